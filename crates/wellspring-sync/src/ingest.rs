use tracing::{debug, warn};

use wellspring_core::{
    AppetiteStatus, Cid, CidAlgo, Creator, Thought, TimestampMs, Value, Visibility,
    WellspringError,
};
use wellspring_crypto::{check_cid, verify_thought, KeyPair, ThoughtDraft, VerifyError};
use wellspring_identity::verify_rotation;
use wellspring_index::SemanticIndex;
use wellspring_pool::{AppetiteEngine, PoolEngine, RateDecision, RuleCheck};
use wellspring_store::ThoughtStore;
use wellspring_trust::{CompromiseLedger, TrustGraph};

/// Per-CID ingest verdict returned to the pushing peer.
#[derive(Clone, Debug, PartialEq)]
pub enum AckStatus {
    Accepted,
    Rejected(String),
}

#[derive(Clone, Debug)]
pub struct Ack {
    pub cid: Cid,
    pub status: AckStatus,
    /// Appetite the thought was stored under, when accepted.
    pub appetite: Option<AppetiteStatus>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
    /// Accepted only on the deferred second verification pass.
    pub resolved_on_retry: usize,
    pub acks: Vec<Ack>,
}

/// The ingesting node's own signing identity, used to forge the
/// `received_via` provenance connection for each accepted thought.
pub struct NodeSigner<'a> {
    pub keypair: &'a KeyPair,
    pub identity: Cid,
    pub algo: CidAlgo,
}

/// Everything an ingest mutates on the receiving node, borrowed together.
pub struct IngestContext<'a> {
    pub store: &'a ThoughtStore,
    pub pools: &'a mut PoolEngine,
    pub appetite: &'a mut AppetiteEngine,
    pub trust: &'a mut TrustGraph,
    pub ledger: &'a mut CompromiseLedger,
    pub index: Option<&'a SemanticIndex>,
}

/// Ingest a batch of thoughts pushed by (or fetched from) `via`.
///
/// Pipeline per thought: rate limit → CID integrity → signature (deferring
/// `UnknownIdentity` to a second pass after the batch) → pool rules (rule
/// violations downgrade appetite, they do not reject a validly signed
/// thought) → store → index → derived registries (pools, appetite, trust
/// edges, compromise windows, rotation lineage) → provenance. Idempotent:
/// already-known CIDs ack `Accepted` without side effects.
pub fn ingest_batch(
    ctx: &mut IngestContext<'_>,
    signer: &NodeSigner<'_>,
    batch: Vec<Thought>,
    via: &Cid,
    peer_trust: f64,
    now: TimestampMs,
) -> IngestReport {
    let mut report = IngestReport::default();
    let mut deferred: Vec<Thought> = Vec::new();

    for thought in batch {
        match ingest_one(ctx, signer, thought, via, peer_trust, now) {
            IngestStep::Done(ack) => record(&mut report, ack),
            IngestStep::Defer(thought) => deferred.push(thought),
        }
    }

    // Second pass: creators may have arrived later in the same batch.
    for thought in deferred {
        let cid = thought.cid().clone();
        match ingest_one(ctx, signer, thought, via, peer_trust, now) {
            IngestStep::Done(ack) => {
                if ack.status == AckStatus::Accepted {
                    report.resolved_on_retry += 1;
                }
                record(&mut report, ack);
            }
            IngestStep::Defer(_) => record(
                &mut report,
                Ack {
                    cid,
                    status: AckStatus::Rejected("unknown identity".into()),
                    appetite: None,
                },
            ),
        }
    }

    debug!(
        via = %via,
        accepted = report.accepted,
        rejected = report.rejected,
        retried = report.resolved_on_retry,
        "ingest batch complete"
    );
    report
}

fn record(report: &mut IngestReport, ack: Ack) {
    match ack.status {
        AckStatus::Accepted => report.accepted += 1,
        AckStatus::Rejected(_) => report.rejected += 1,
    }
    report.acks.push(ack);
}

enum IngestStep {
    Done(Ack),
    Defer(Thought),
}

fn ingest_one(
    ctx: &mut IngestContext<'_>,
    signer: &NodeSigner<'_>,
    thought: Thought,
    via: &Cid,
    peer_trust: f64,
    now: TimestampMs,
) -> IngestStep {
    let cid = thought.cid().clone();
    let store = ctx.store;

    if store.contains(&cid) {
        return IngestStep::Done(Ack { cid, status: AckStatus::Accepted, appetite: None });
    }

    // Rate limiting happens before any expensive verification. An over-limit
    // known sender is deferred, not banned — the next sync round (bloom miss
    // at the receiver) re-offers the thought.
    match ctx.appetite.evaluate(via, peer_trust, None, now) {
        RateDecision::Allowed(_) => {}
        RateDecision::Queued(category) => {
            return IngestStep::Done(Ack {
                cid,
                status: AckStatus::Rejected(format!(
                    "rate limited ({}); queued for a later round",
                    category.name()
                )),
                appetite: None,
            });
        }
        RateDecision::Rejected(reason) => {
            return IngestStep::Done(Ack { cid, status: AckStatus::Rejected(reason), appetite: None });
        }
    }

    let thought = lift_visibility_alias(thought);

    if let Err(e) = check_cid(&thought) {
        return IngestStep::Done(Ack {
            cid,
            status: AckStatus::Rejected(e.to_string()),
            appetite: None,
        });
    }

    match verify_thought(&thought, |c| store.get_identity(c)) {
        Ok(()) => {}
        Err(VerifyError::Missing(_)) => return IngestStep::Defer(thought),
        Err(e) => {
            return IngestStep::Done(Ack {
                cid,
                status: AckStatus::Rejected(e.to_string()),
                appetite: None,
            });
        }
    }

    // Pool-scoped thoughts only enter through current members. A revoked
    // device's historical thoughts stay verifiable; its new ones stop here.
    let pool_cid = match thought.effective_visibility() {
        Visibility::Pool(p) => Some(p),
        _ => None,
    };
    if let (Some(pool), Some(creator)) = (&pool_cid, thought.created_by().as_cid()) {
        if !ctx.pools.is_member(pool, creator) {
            return IngestStep::Done(Ack {
                cid,
                status: AckStatus::Rejected(
                    WellspringError::VisibilityDenied(format!(
                        "creator is not a member of pool {pool}"
                    ))
                    .to_string(),
                ),
                appetite: None,
            });
        }
    }

    let rules = pool_cid.as_ref().map(|p| ctx.pools.effective_rules(p)).unwrap_or_default();
    let payload_len = thought.cid_preimage().map(|b| b.len()).unwrap_or(usize::MAX);
    let status = match rules.check_ingest(&thought, payload_len) {
        RuleCheck::Accept => AppetiteStatus::Welcomed,
        RuleCheck::Downgrade(status, reason) => {
            warn!(cid = %cid, %reason, appetite = status.name(), "pool rule downgrade");
            status
        }
    };

    match store.put(&thought) {
        Ok(_) => {}
        Err(WellspringError::UnknownIdentity(_)) => return IngestStep::Defer(thought),
        Err(e) => {
            return IngestStep::Done(Ack {
                cid,
                status: AckStatus::Rejected(e.to_string()),
                appetite: None,
            });
        }
    }

    // Feed the registries derived from the thought set.
    ctx.pools.observe(&thought);
    ctx.appetite.observe(&thought);
    ctx.trust.observe(&thought);
    ctx.ledger.observe(&thought);
    if thought.kind() == "attestation"
        && thought.content().str_field("aspect_type") == Some("key_acknowledgment")
    {
        record_rotation_if_valid(store, &thought, ctx.trust);
    }

    if let Some(index) = ctx.index {
        let depth = chain_depth(store, &thought, 16);
        if let Err(e) = index.index_thought(
            &thought,
            pool_cid.as_ref(),
            status,
            status.default_weight(),
            depth,
        ) {
            warn!(cid = %cid, error = %e, "indexing failed; thought stored unindexed");
        }
    }

    if let Err(e) = record_provenance(store, signer, &thought, via, now) {
        warn!(cid = %cid, error = %e, "provenance recording failed");
    }

    IngestStep::Done(Ack { cid, status: AckStatus::Accepted, appetite: Some(status) })
}

/// A key-acknowledgment attestation arrived: if its rotation pair
/// cross-verifies, record the lineage so trust transfers to the successor.
/// Also used when rebuilding registries from a stored thought set.
pub fn record_rotation_if_valid(store: &ThoughtStore, ack: &Thought, trust: &mut TrustGraph) {
    let Some(rotation_cid) = ack.content().str_field("on").and_then(|s| s.parse().ok()) else {
        return;
    };
    let Ok(Some(rotation)) = store.get(&rotation_cid) else { return };
    if rotation.kind() != "rotation" {
        return;
    }
    if verify_rotation(&rotation, ack, |c| store.get_identity(c)).is_err() {
        return;
    }
    let (Some(from), Some(to)) = (
        rotation.content().str_field("from_identity").and_then(|s| s.parse().ok()),
        rotation.content().str_field("to_identity").and_then(|s| s.parse().ok()),
    ) else {
        return;
    };
    debug!(old = %from, new = %to, "verified key rotation; trust transfers");
    trust.record_rotation(from, to);
}

/// Some import paths carry visibility inside the content map as
/// `_visibility`; the top-level field is canonical and wins when present.
fn lift_visibility_alias(thought: Thought) -> Thought {
    if thought.visibility().is_some() {
        return thought;
    }
    let Some(alias) = thought.content().str_field("_visibility") else {
        return thought;
    };
    let Ok(visibility) = alias.parse::<Visibility>() else { return thought };
    Thought::assemble(
        thought.cid().clone(),
        thought.kind().to_owned(),
        thought.content().clone(),
        thought.created_by().clone(),
        thought.because().to_vec(),
        thought.created_at(),
        Some(visibility),
        thought.signature().clone(),
        thought.source().map(str::to_owned),
    )
}

/// Reasoning-chain depth: longest because-path down to a root, bounded.
pub fn chain_depth(store: &ThoughtStore, thought: &Thought, cap: u32) -> u32 {
    fn walk(store: &ThoughtStore, cid: &Cid, cap: u32, depth: u32) -> u32 {
        if depth >= cap {
            return depth;
        }
        match store.get(cid) {
            Ok(Some(t)) if !t.because().is_empty() => t
                .because()
                .iter()
                .map(|parent| walk(store, parent, cap, depth + 1))
                .max()
                .unwrap_or(depth),
            _ => depth,
        }
    }
    thought
        .because()
        .iter()
        .map(|parent| walk(store, parent, cap, 1))
        .max()
        .unwrap_or(0)
}

/// Record where an accepted thought came from: a `received_via` connection
/// thought with `local_forever` visibility, plus the store's fast-lookup
/// mirror. Provenance never enters sync.
fn record_provenance(
    store: &ThoughtStore,
    signer: &NodeSigner<'_>,
    thought: &Thought,
    via: &Cid,
    now: TimestampMs,
) -> Result<(), WellspringError> {
    let connection = ThoughtDraft::new(
        "connection",
        Value::map([
            ("from", Value::text(thought.cid().to_string())),
            ("to", Value::text(via.to_string())),
            ("relation", Value::text("received_via")),
        ]),
    )
    .because(vec![thought.cid().clone()])
    .visibility(Visibility::LocalForever)
    .forge(signer.keypair, Creator::Identity(signer.identity.clone()), signer.algo, now)?;

    store.put(&connection)?;
    store.record_provenance(thought.cid(), via)
}
