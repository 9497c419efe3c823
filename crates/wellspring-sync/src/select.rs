use std::collections::{HashMap, HashSet};

use tracing::debug;

use wellspring_core::{Cid, Thought};
use wellspring_pool::{PoolEngine, Withheld};

use crate::bloom::BloomFilter;

/// Sender-side accounting for one selection pass. The withheld counters are
/// the node's own audit trail; they never cross the wire.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterStats {
    pub total_checked: usize,
    /// Thoughts the peer's bloom filter did not claim.
    pub missing: usize,
    pub filtered_local_forever: usize,
    pub filtered_pool_access: usize,
    pub filtered_participants: usize,
    pub filtered_unknown_marker: usize,
    pub shared: usize,
}

/// What one directional sync will send, in wire order: creator identities
/// first, then everything else by `created_at`.
#[derive(Debug)]
pub struct SendPlan {
    pub thoughts: Vec<Thought>,
    pub stats: FilterStats,
}

/// Select the thoughts to offer `peer`, given the peer's bloom filter over
/// its own CID set.
///
/// For every locally stored thought: skip bloom hits, then apply the
/// visibility predicate against the peer's identity. Shareable thoughts are
/// closed over their creators — an identity thought the peer likely lacks is
/// pulled into the plan (visibility-checked like anything else) and ordered
/// ahead, so verification at the receiver never fails for want of a key.
pub fn select_for_peer(
    local: &[Thought],
    pools: &PoolEngine,
    peer: &Cid,
    bloom: &BloomFilter,
) -> SendPlan {
    let by_cid: HashMap<&Cid, &Thought> = local.iter().map(|t| (t.cid(), t)).collect();
    let mut stats = FilterStats::default();
    let mut selected: Vec<&Thought> = Vec::new();
    let mut selected_cids: HashSet<&Cid> = HashSet::new();

    for thought in local {
        stats.total_checked += 1;
        if bloom.contains(thought.cid()) {
            continue;
        }
        stats.missing += 1;
        match pools.visible_to(thought, peer) {
            Ok(()) => {
                selected.push(thought);
                selected_cids.insert(thought.cid());
                stats.shared += 1;
            }
            Err(Withheld::LocalForever) => stats.filtered_local_forever += 1,
            Err(Withheld::PoolAccess) => stats.filtered_pool_access += 1,
            Err(Withheld::Participants) => stats.filtered_participants += 1,
            Err(Withheld::UnknownMarker) => stats.filtered_unknown_marker += 1,
        }
    }

    // Dependency closure: creators the peer likely lacks ride along.
    let mut closure: Vec<&Thought> = Vec::new();
    for thought in &selected {
        let Some(creator) = thought.created_by().as_cid() else { continue };
        if selected_cids.contains(creator) || bloom.contains(creator) {
            continue;
        }
        let Some(identity) = by_cid.get(creator) else { continue };
        if pools.visible_to(identity, peer).is_ok() {
            closure.push(identity);
            selected_cids.insert(identity.cid());
            stats.shared += 1;
        }
    }
    selected.extend(closure);

    // Identities first, then created_at order within each group.
    let mut thoughts: Vec<Thought> = selected.into_iter().cloned().collect();
    thoughts.sort_by(|a, b| {
        b.is_identity()
            .cmp(&a.is_identity())
            .then(a.created_at().cmp(&b.created_at()))
            .then_with(|| a.cid().digest().cmp(b.cid().digest()))
    });

    debug!(
        peer = %peer,
        checked = stats.total_checked,
        shared = stats.shared,
        withheld = stats.missing - stats.shared,
        "sync selection complete"
    );
    SendPlan { thoughts, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::types::Signature;
    use wellspring_core::{CidAlgo, Creator, Value, Visibility};

    fn cid(b: u8) -> Cid {
        Cid::new(CidAlgo::Blake3, [b; 32])
    }

    fn identity(owner: u8, at: i64) -> Thought {
        Thought::assemble(
            cid(owner),
            "identity".into(),
            Value::map([
                ("name", Value::text(format!("id-{owner}"))),
                ("pubkey", Value::text("ed25519:00")),
            ]),
            Creator::Genesis,
            vec![],
            at,
            None,
            Signature(vec![]),
            None,
        )
    }

    fn note(owner: u8, marker: u8, at: i64, visibility: Option<Visibility>) -> Thought {
        Thought::assemble(
            cid(marker),
            "basic".into(),
            Value::map([("text", Value::text(format!("note {marker}")))]),
            Creator::Identity(cid(owner)),
            vec![],
            at,
            visibility,
            Signature(vec![]),
            None,
        )
    }

    #[test]
    fn bloom_hits_are_skipped() {
        let id = identity(1, 0);
        let n1 = note(1, 10, 100, None);
        let n2 = note(1, 11, 200, None);
        let local = vec![id.clone(), n1.clone(), n2.clone()];

        let mut peer_bloom = BloomFilter::default();
        peer_bloom.insert(id.cid());
        peer_bloom.insert(n1.cid());

        let plan = select_for_peer(&local, &PoolEngine::new(), &cid(99), &peer_bloom);
        assert_eq!(plan.stats.total_checked, 3);
        assert_eq!(plan.stats.missing, 1);
        assert_eq!(plan.thoughts.len(), 1);
        assert_eq!(plan.thoughts[0].cid(), n2.cid());
    }

    #[test]
    fn local_forever_never_selected() {
        let id = identity(1, 0);
        let secret = note(1, 10, 100, Some(Visibility::LocalForever));
        let local = vec![id, secret];

        let plan = select_for_peer(&local, &PoolEngine::new(), &cid(99), &BloomFilter::default());
        assert_eq!(plan.stats.filtered_local_forever, 1);
        assert!(plan.thoughts.iter().all(|t| !t.is_local_forever()));
    }

    #[test]
    fn identities_precede_their_dependents() {
        let id = identity(1, 500); // created later than the notes
        let n1 = note(1, 10, 100, None);
        let n2 = note(1, 11, 200, None);
        let local = vec![n1, n2, id];

        let plan = select_for_peer(&local, &PoolEngine::new(), &cid(99), &BloomFilter::default());
        let kinds: Vec<&str> = plan.thoughts.iter().map(Thought::kind).collect();
        assert_eq!(kinds, vec!["identity", "basic", "basic"]);
        // Non-identities keep created_at order.
        assert_eq!(plan.thoughts[1].created_at(), 100);
        assert_eq!(plan.thoughts[2].created_at(), 200);
    }

    #[test]
    fn dependency_closure_pulls_missing_creator() {
        let id = identity(1, 0);
        // Peer's bloom knows nothing; the note alone is selected, and the
        // closure drags the identity in even though nothing else selected it.
        let n = note(1, 10, 100, None);
        let local = vec![n.clone(), id.clone()];

        // Sanity: with the identity already known to the peer, only the note moves.
        let mut knows_identity = BloomFilter::default();
        knows_identity.insert(id.cid());
        let plan = select_for_peer(&local, &PoolEngine::new(), &cid(99), &knows_identity);
        assert_eq!(plan.thoughts.len(), 1);
        assert_eq!(plan.thoughts[0].cid(), n.cid());
    }

    #[test]
    fn pool_scoped_thought_reaches_members_only() {
        let admin = cid(1);
        let member = cid(2);
        let outsider = cid(3);
        let mut pools = PoolEngine::new();
        let pool_thought = Thought::assemble(
            cid(50),
            "pool".into(),
            Value::map([
                ("name", Value::text("team")),
                ("admin", Value::text(admin.to_string())),
            ]),
            Creator::Identity(admin.clone()),
            vec![],
            0,
            None,
            Signature(vec![]),
            None,
        );
        pools.observe(&pool_thought);
        pools.add_member(cid(50), member.clone());

        let scoped = note(1, 10, 100, Some(Visibility::Pool(cid(50))));
        let local = vec![identity(1, 0), scoped];

        let to_member = select_for_peer(&local, &pools, &member, &BloomFilter::default());
        assert_eq!(to_member.stats.shared, 2);

        let to_outsider = select_for_peer(&local, &pools, &outsider, &BloomFilter::default());
        assert_eq!(to_outsider.stats.filtered_pool_access, 1);
        assert!(to_outsider.thoughts.iter().all(|t| t.kind() == "identity"));
    }
}
