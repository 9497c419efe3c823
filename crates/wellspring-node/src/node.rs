use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use tracing::{debug, info};

use wellspring_core::{Cid, CidAlgo, Thought, TimestampMs, Value, Visibility, WellspringError};
use wellspring_crypto::ThoughtDraft;
use wellspring_identity::{HelloCard, IdentityBundle};
use wellspring_index::{HashEmbedder, SemanticIndex};
use wellspring_pool::{AppetiteEngine, PoolEngine, PoolRules};
use wellspring_rpc::{PeerClient, RpcServerState};
use wellspring_store::ThoughtStore;
use wellspring_sync::{
    chain_depth, ingest_batch, record_rotation_if_valid, select_for_peer, BloomFilter,
    FilterStats, IngestContext, NodeSigner, SessionRegistry,
};
use wellspring_trust::{CompromiseLedger, TrustGraph};

const META_IDENTITY: &str = "node_identity_cid";
const META_SECRET: &str = "node_secret_cid";
const META_INDEXED_THROUGH: &str = "indexed_through_ms";

/// One node's entire mutable state, instantiated per process and passed
/// down explicitly. Every shared structure sits behind its own lock; long
/// computations clone snapshots instead of holding one.
pub struct NodeContext {
    pub data_dir: PathBuf,
    pub store: Arc<ThoughtStore>,
    pub pools: Arc<RwLock<PoolEngine>>,
    pub appetite: Arc<RwLock<AppetiteEngine>>,
    pub trust: Arc<RwLock<TrustGraph>>,
    pub ledger: Arc<RwLock<CompromiseLedger>>,
    pub index: Option<Arc<SemanticIndex>>,
    pub sessions: Arc<RwLock<SessionRegistry>>,
    pub blooms: Arc<RwLock<HashMap<String, BloomFilter>>>,
    pub bundle: Arc<IdentityBundle>,
}

/// Outcome of one bidirectional sync round with a peer.
#[derive(Debug)]
pub struct SyncSummary {
    pub pushed: usize,
    pub push_accepted: usize,
    pub pulled: usize,
    pub pull_accepted: usize,
    pub filter_stats: FilterStats,
}

impl NodeContext {
    /// Open (or initialize) a node at `data_dir`. A fresh directory gets a
    /// new identity named `name`; an existing one restores its identity
    /// from the store and rebuilds the derived registries from the thought
    /// set.
    pub fn open(data_dir: &Path, name: &str, with_index: bool) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let store = Arc::new(
            ThoughtStore::open_with_log(data_dir.join("db"), data_dir.join("audit.jsonl"))
                .context("opening thought store")?,
        );

        let bundle = Arc::new(Self::load_or_create_identity(&store, name)?);
        info!(identity = %bundle.cid(), name = %bundle.name(), "node identity ready");

        let index = if with_index {
            let idx = SemanticIndex::open(data_dir.join("vec"), Box::<HashEmbedder>::default())
                .context("opening semantic index")?
                .with_fallback(data_dir.join("vec-local"));
            Some(Arc::new(idx))
        } else {
            None
        };

        let ctx = Self {
            data_dir: data_dir.to_path_buf(),
            store,
            pools: Arc::new(RwLock::new(PoolEngine::new())),
            appetite: Arc::new(RwLock::new(AppetiteEngine::new())),
            trust: Arc::new(RwLock::new(TrustGraph::default())),
            ledger: Arc::new(RwLock::new(CompromiseLedger::new())),
            index,
            sessions: Arc::new(RwLock::new(SessionRegistry::new())),
            blooms: Arc::new(RwLock::new(HashMap::new())),
            bundle,
        };
        ctx.rebuild_registries()?;
        ctx.seed_index_config()?;
        Ok(ctx)
    }

    /// The embedder identifier is configuration, and configuration is a
    /// thought. Idempotent across restarts via the pre-CID dedup pass.
    fn seed_index_config(&self) -> Result<(), WellspringError> {
        let Some(index) = &self.index else { return Ok(()) };
        self.create_thought(
            "aspect",
            Value::map([
                ("aspect_type", Value::text("index_config")),
                ("model", Value::text(index.embedder_id())),
                ("dim", Value::Int(wellspring_core::constants::EMBED_DIM as i64)),
                ("seed", Value::Int(wellspring_core::constants::EMBED_SEED as i64)),
            ]),
            vec![self.identity_cid().clone()],
            Some(Visibility::LocalForever),
            None,
        )?;
        Ok(())
    }

    fn load_or_create_identity(
        store: &ThoughtStore,
        name: &str,
    ) -> anyhow::Result<IdentityBundle> {
        if let (Some(id_bytes), Some(secret_bytes)) =
            (store.get_meta(META_IDENTITY)?, store.get_meta(META_SECRET)?)
        {
            let identity_cid = Cid::from_wire(&id_bytes)?;
            let secret_cid = Cid::from_wire(&secret_bytes)?;
            let identity = store
                .get(&identity_cid)?
                .context("identity thought missing from store")?;
            let secret = store.get(&secret_cid)?.context("secret thought missing from store")?;
            return Ok(IdentityBundle::restore(identity, secret)?);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let bundle = IdentityBundle::create(name, CidAlgo::Blake3, now)?;
        store.put(&bundle.identity)?;
        store.put(&bundle.secret)?;
        store.put_meta(META_IDENTITY, &bundle.identity.cid().to_wire())?;
        store.put_meta(META_SECRET, &bundle.secret.cid().to_wire())?;
        Ok(bundle)
    }

    /// Replay the stored thought set through the derived registries (pool
    /// membership, appetite config, trust edges, compromise windows).
    fn rebuild_registries(&self) -> Result<(), WellspringError> {
        let mut thoughts = self.store.iter_all()?;
        thoughts.sort_by_key(Thought::created_at);

        let mut pools = self.pools.write().expect("pool lock poisoned");
        let mut appetite = self.appetite.write().expect("appetite lock poisoned");
        let mut trust = self.trust.write().expect("trust lock poisoned");
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        for thought in &thoughts {
            pools.observe(thought);
            appetite.observe(thought);
            trust.observe(thought);
            ledger.observe(thought);
            if thought.kind() == "attestation"
                && thought.content().str_field("aspect_type") == Some("key_acknowledgment")
            {
                record_rotation_if_valid(&self.store, thought, &mut trust);
            }
        }
        debug!(count = thoughts.len(), "registries rebuilt");
        Ok(())
    }

    pub fn identity_cid(&self) -> &Cid {
        self.bundle.cid()
    }

    fn now(&self) -> TimestampMs {
        chrono::Utc::now().timestamp_millis()
    }

    fn signer(&self) -> NodeSigner<'_> {
        NodeSigner {
            keypair: &self.bundle.keypair,
            identity: self.bundle.cid().clone(),
            algo: self.bundle.algo(),
        }
    }

    // ── Owner path: creating thoughts locally ────────────────────────────────

    /// Forge, store, and index a thought as this node's identity. The
    /// pre-CID deduplication pass collapses a locally re-created
    /// `(type, content)` pair into the earlier thought.
    pub fn create_thought(
        &self,
        kind: &str,
        content: Value,
        because: Vec<Cid>,
        visibility: Option<Visibility>,
        source: Option<&str>,
    ) -> Result<Thought, WellspringError> {
        if let Some(existing) = self.store.find_semantic_duplicate(kind, &content)? {
            if let Some(thought) = self.store.get(&existing)? {
                debug!(cid = %existing, "semantic duplicate; reusing earlier thought");
                return Ok(thought);
            }
        }

        let mut draft = ThoughtDraft::new(kind, content);
        draft = draft.because(because);
        if let Some(v) = visibility {
            draft = draft.visibility(v);
        }
        if let Some(s) = source {
            draft = draft.source(s);
        }
        let thought = self.bundle.forge(draft, self.now())?;

        self.store.put(&thought)?;
        self.store.register_dedupe(&thought)?;

        {
            let mut pools = self.pools.write().expect("pool lock poisoned");
            let mut appetite = self.appetite.write().expect("appetite lock poisoned");
            let mut trust = self.trust.write().expect("trust lock poisoned");
            let mut ledger = self.ledger.write().expect("ledger lock poisoned");
            pools.observe(&thought);
            appetite.observe(&thought);
            trust.observe(&thought);
            ledger.observe(&thought);
        }

        if let Some(index) = &self.index {
            let pool_cid = match thought.effective_visibility() {
                Visibility::Pool(p) => Some(p),
                _ => None,
            };
            let depth = chain_depth(&self.store, &thought, 16);
            index.index_thought(
                &thought,
                pool_cid.as_ref(),
                wellspring_core::AppetiteStatus::Welcomed,
                1.0,
                depth,
            )?;
        }
        Ok(thought)
    }

    /// Create a pool owned by this identity.
    pub fn create_pool(&self, name: &str, rules: PoolRules) -> Result<Thought, WellspringError> {
        self.create_thought(
            "pool",
            Value::map([
                ("name", Value::text(name)),
                ("admin", Value::text(self.identity_cid().to_string())),
                ("rules", rules.to_value()),
            ]),
            vec![self.identity_cid().clone()],
            None,
            None,
        )
    }

    /// Update a pool's waterline by chaining a `pool_config` thought to the
    /// current config head.
    pub fn set_waterline(&self, pool: &Cid, waterline: f64) -> Result<Thought, WellspringError> {
        let head = {
            let pools = self.pools.read().expect("pool lock poisoned");
            let record = pools
                .pool(pool)
                .ok_or_else(|| WellspringError::Other(format!("unknown pool {pool}")))?;
            let mut rules = record.rules.clone();
            rules.waterline = waterline.clamp(0.0, 1.0);
            (record.config_head.clone(), rules)
        };
        self.create_thought(
            "pool_config",
            Value::map([("rules", head.1.to_value())]),
            vec![head.0],
            None,
            None,
        )
    }

    /// This node's hello card, base64-encoded for out-of-band sharing.
    pub fn hello_card(&self) -> Result<String, WellspringError> {
        HelloCard::issue(&self.bundle, self.now())?.encode()
    }

    /// Shared state handed to the RPC server.
    pub fn rpc_state(&self) -> Arc<RpcServerState> {
        Arc::new(RpcServerState {
            store: Arc::clone(&self.store),
            pools: Arc::clone(&self.pools),
            appetite: Arc::clone(&self.appetite),
            trust: Arc::clone(&self.trust),
            ledger: Arc::clone(&self.ledger),
            index: self.index.clone(),
            sessions: Arc::clone(&self.sessions),
            blooms: Arc::clone(&self.blooms),
            identity: self.bundle.identity.clone(),
            keypair: Arc::new(self.bundle.keypair.clone()),
        })
    }

    // ── Sync driver ──────────────────────────────────────────────────────────

    /// One bidirectional sync round with a peer: hello (attaching our hello
    /// card), bloom exchange, push our selection, pull theirs, ingest.
    pub async fn sync_with(&self, url: &str) -> Result<SyncSummary, WellspringError> {
        let now = self.now();
        let mut client = PeerClient::connect(url)?;
        let card = self.hello_card()?;
        client
            .hello(
                &self.identity_cid().to_string(),
                &self.bundle.keypair,
                &["bloom", "want", "push", "query"],
                Some(card),
                now,
            )
            .await?;
        let peer_cid: Cid = client
            .peer_identity
            .as_deref()
            .ok_or_else(|| WellspringError::Network("peer sent no identity".into()))?
            .parse()?;

        let ours = BloomFilter::from_cids(self.store.all_cids()?.iter());
        let theirs = client.exchange_bloom(&ours).await?;

        // Push: our selection against the peer's filter.
        let local = self.store.iter_all()?;
        let pools_snapshot = self.pools.read().expect("pool lock poisoned").clone();
        let plan = select_for_peer(&local, &pools_snapshot, &peer_cid, &theirs);
        let pushed = plan.thoughts.len();
        let mut push_accepted = 0;
        for chunk in plan.thoughts.chunks(wellspring_core::constants::SYNC_MAX_BATCH) {
            let acks = client.push(chunk).await?;
            push_accepted += acks.iter().filter(|a| a.status == "Accepted").count();
        }

        // Pull: the peer's selection against our filter.
        let incoming = client.want(vec![]).await?;
        let pulled = incoming.len();
        let report = self.ingest_from(&peer_cid, incoming, now);

        // Chase unresolved because references by explicit CID. The peer may
        // withhold them (visibility) or lack them itself; either way the
        // next round can try again.
        let missing = self.unresolved_references()?;
        let mut chased = 0;
        if !missing.is_empty() {
            let fetched = client
                .want(missing.iter().map(Cid::to_string).collect())
                .await?;
            chased = self.ingest_from(&peer_cid, fetched, now).accepted;
        }

        info!(
            peer = %peer_cid,
            pushed,
            pulled,
            accepted = report.accepted,
            chased,
            "sync round complete"
        );
        Ok(SyncSummary {
            pushed,
            push_accepted,
            pulled,
            pull_accepted: report.accepted + chased,
            filter_stats: plan.stats,
        })
    }

    fn ingest_from(
        &self,
        peer: &Cid,
        batch: Vec<Thought>,
        now: TimestampMs,
    ) -> wellspring_sync::IngestReport {
        let peer_trust = self
            .trust
            .read()
            .expect("trust lock poisoned")
            .trust(self.identity_cid(), peer);
        let mut pools = self.pools.write().expect("pool lock poisoned");
        let mut appetite = self.appetite.write().expect("appetite lock poisoned");
        let mut trust = self.trust.write().expect("trust lock poisoned");
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        let mut ctx = IngestContext {
            store: &self.store,
            pools: &mut pools,
            appetite: &mut appetite,
            trust: &mut trust,
            ledger: &mut ledger,
            index: self.index.as_deref(),
        };
        ingest_batch(&mut ctx, &self.signer(), batch, peer, peer_trust, now)
    }

    /// Because references that do not resolve locally. Some stay boundary
    /// references forever (the antecedent may be invisible to this node).
    fn unresolved_references(&self) -> Result<Vec<Cid>, WellspringError> {
        let mut missing = Vec::new();
        for thought in self.store.iter_all()? {
            for parent in thought.because() {
                if !self.store.contains(parent) && !missing.contains(parent) {
                    missing.push(parent.clone());
                }
            }
        }
        Ok(missing)
    }

    // ── Background indexing ──────────────────────────────────────────────────

    /// Index any stored thoughts newer than the last indexed position.
    /// Resumable: the position survives restarts in the store's meta tree.
    pub fn backfill_index(&self) -> Result<usize, WellspringError> {
        let Some(index) = &self.index else { return Ok(0) };
        let since = self
            .store
            .get_meta(META_INDEXED_THROUGH)?
            .and_then(|b| b.try_into().ok().map(i64::from_be_bytes))
            .unwrap_or(i64::MIN);

        let mut indexed = 0;
        let mut high_water = since;
        for thought in self.store.iter_since(since.saturating_add(1))? {
            let pool_cid = match thought.effective_visibility() {
                Visibility::Pool(p) => Some(p),
                _ => None,
            };
            let depth = chain_depth(&self.store, &thought, 16);
            let weight = self.ledger.read().expect("ledger lock poisoned").effective_weight(&thought);
            if index
                .index_thought(
                    &thought,
                    pool_cid.as_ref(),
                    wellspring_core::AppetiteStatus::Welcomed,
                    weight,
                    depth,
                )?
                .is_some()
            {
                indexed += 1;
            }
            high_water = high_water.max(thought.created_at());
        }
        if high_water > since {
            self.store.put_meta(META_INDEXED_THROUGH, &high_water.to_be_bytes())?;
        }
        Ok(indexed)
    }
}
