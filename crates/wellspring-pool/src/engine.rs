use std::collections::{HashMap, HashSet};

use tracing::debug;

use wellspring_core::{Cid, Thought, Visibility};

use crate::rules::{Pool, PoolRules};

/// Why the visibility predicate withheld a thought. The sync selector keeps
/// a counter per reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Withheld {
    LocalForever,
    PoolAccess,
    Participants,
    UnknownMarker,
}

/// Pending bilateral membership state for one `member_of` connection.
#[derive(Clone, Debug, Default)]
struct MembershipVotes {
    member_ack: bool,
    admin_ack: bool,
}

/// The pool registry and membership resolver for one node.
///
/// Fed every stored thought through `observe`; pools, config chains,
/// membership connections, attestations, and peering agreements all arrive
/// as thoughts. Membership is conservative: a thought is withheld unless the
/// local view can prove the peer belongs.
#[derive(Clone, Debug, Default)]
pub struct PoolEngine {
    pools: HashMap<Cid, Pool>,
    /// pool → confirmed member identity CIDs.
    members: HashMap<Cid, HashSet<Cid>>,
    /// connection CID → (member, pool) for pending memberships.
    connections: HashMap<Cid, (Cid, Cid)>,
    votes: HashMap<Cid, MembershipVotes>,
    /// peer identity → pools designated as shared with that peer.
    agreements: HashMap<Cid, HashSet<Cid>>,
    /// identity CID → display name (for participants_only matching).
    names: HashMap<Cid, String>,
}

impl PoolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Thought ingestion ────────────────────────────────────────────────────

    pub fn observe(&mut self, thought: &Thought) {
        match thought.kind() {
            "identity" => {
                if let Some(name) = thought.content().str_field("name") {
                    self.names.insert(thought.cid().clone(), name.to_owned());
                }
            }
            "pool" => {
                if let Some(pool) = Pool::from_thought(thought) {
                    debug!(pool = %pool.cid, name = %pool.name, "registered pool");
                    // The admin is implicitly a member of their own pool.
                    if let Some(admin) = pool.admin.clone() {
                        self.members.entry(pool.cid.clone()).or_default().insert(admin);
                    }
                    self.pools.insert(pool.cid.clone(), pool);
                }
            }
            "pool_config" => {
                for pool in self.pools.values_mut() {
                    if pool.apply_config(thought) {
                        debug!(pool = %pool.cid, "pool config updated");
                        break;
                    }
                }
            }
            "connection" => self.observe_connection(thought),
            "attestation" => self.observe_attestation(thought),
            "peering" => {
                let content = thought.content();
                let Some(peer) = content.str_field("peer").and_then(|s| s.parse().ok()) else {
                    return;
                };
                let shared = content
                    .get("shared_pools")
                    .and_then(|v| v.as_array())
                    .map(|pools| {
                        pools
                            .iter()
                            .filter_map(|p| p.as_str())
                            .filter_map(|s| s.parse().ok())
                            .collect()
                    })
                    .unwrap_or_default();
                self.agreements.insert(peer, shared);
            }
            _ => {}
        }
    }

    fn observe_connection(&mut self, thought: &Thought) {
        let content = thought.content();
        if content.str_field("relation") != Some("member_of") {
            return;
        }
        let (Some(member), Some(pool)) = (
            content.str_field("from").and_then(|s| s.parse::<Cid>().ok()),
            content.str_field("to").and_then(|s| s.parse::<Cid>().ok()),
        ) else {
            return;
        };
        // A connection written by the pool admin carries the admin's approval.
        let by_admin = self
            .pools
            .get(&pool)
            .and_then(|p| p.admin.as_ref())
            .is_some_and(|admin| thought.created_by().as_cid() == Some(admin));
        self.connections.insert(thought.cid().clone(), (member, pool));
        let votes = self.votes.entry(thought.cid().clone()).or_default();
        if by_admin {
            votes.admin_ack = true;
        }
        self.settle(thought.cid());
    }

    fn observe_attestation(&mut self, thought: &Thought) {
        let content = thought.content();
        let Some(on) = content.str_field("on").and_then(|s| s.parse::<Cid>().ok()) else {
            return;
        };
        let Some((member, pool)) = self.connections.get(&on).cloned() else { return };
        let weight = content.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let signer = thought.created_by().as_cid();

        if weight < 0.0 {
            // Membership revocation: only the pool admin's word removes.
            let by_admin = self
                .pools
                .get(&pool)
                .and_then(|p| p.admin.as_ref())
                .is_some_and(|admin| signer == Some(admin));
            if by_admin {
                if let Some(set) = self.members.get_mut(&pool) {
                    set.remove(&member);
                }
                self.votes.remove(&on);
                debug!(pool = %pool, member = %member, "membership revoked");
            }
            return;
        }

        let votes = self.votes.entry(on.clone()).or_default();
        if signer == Some(&member) {
            votes.member_ack = true;
        }
        let is_admin = self
            .pools
            .get(&pool)
            .and_then(|p| p.admin.as_ref())
            .is_some_and(|admin| signer == Some(admin));
        if is_admin {
            votes.admin_ack = true;
        }
        self.settle(&on);
    }

    /// Promote a connection to confirmed membership once bilateral.
    fn settle(&mut self, connection: &Cid) {
        let Some(votes) = self.votes.get(connection) else { return };
        if !(votes.member_ack && votes.admin_ack) {
            return;
        }
        if let Some((member, pool)) = self.connections.get(connection) {
            self.members.entry(pool.clone()).or_default().insert(member.clone());
            debug!(pool = %pool, member = %member, "membership confirmed");
        }
    }

    // ── Direct administration (local configuration, not synced thoughts) ─────

    /// Designate pools shared with a peer (a peering agreement).
    pub fn add_agreement(&mut self, peer: Cid, shared_pools: Vec<Cid>) {
        self.agreements.entry(peer).or_default().extend(shared_pools);
    }

    /// Admin roster shortcut: record a member without bilateral attestation.
    pub fn add_member(&mut self, pool: Cid, member: Cid) {
        self.members.entry(pool).or_default().insert(member);
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn pool(&self, cid: &Cid) -> Option<&Pool> {
        self.pools.get(cid)
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn effective_rules(&self, pool: &Cid) -> PoolRules {
        self.pools.get(pool).map(|p| p.rules.clone()).unwrap_or_default()
    }

    pub fn is_member(&self, pool: &Cid, identity: &Cid) -> bool {
        self.members.get(pool).is_some_and(|set| set.contains(identity))
    }

    pub fn members(&self, pool: &Cid) -> Vec<Cid> {
        self.members.get(pool).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// The sender-side visibility predicate: may `thought` be shared with
    /// peer `peer`? Missing membership records conservatively withhold.
    pub fn visible_to(&self, thought: &Thought, peer: &Cid) -> Result<(), Withheld> {
        match thought.effective_visibility() {
            Visibility::Public => Ok(()),
            Visibility::LocalForever => Err(Withheld::LocalForever),
            Visibility::Pool(pool) => {
                if self.is_member(&pool, peer) {
                    return Ok(());
                }
                let shared = self
                    .agreements
                    .get(peer)
                    .is_some_and(|pools| pools.contains(&pool));
                if shared {
                    Ok(())
                } else {
                    Err(Withheld::PoolAccess)
                }
            }
            Visibility::ParticipantsOnly => {
                let peer_str = peer.to_string();
                let peer_name = self.names.get(peer).map(String::as_str);
                let listed = thought
                    .participants()
                    .iter()
                    .any(|p| *p == peer_str || Some(*p) == peer_name);
                if listed {
                    Ok(())
                } else {
                    Err(Withheld::Participants)
                }
            }
            Visibility::Other(_) => Err(Withheld::UnknownMarker),
        }
    }
}
