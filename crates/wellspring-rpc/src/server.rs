use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use wellspring_core::constants::PROTOCOL_VERSION;
use wellspring_core::types::Signature;
use wellspring_core::{Cid, Creator, Thought, Value, Visibility};
use wellspring_crypto::{parse_pubkey, verify_message, KeyPair, ThoughtDraft};
use wellspring_identity::HelloCard;
use wellspring_index::{QueryOptions, SemanticIndex};
use wellspring_pool::{AppetiteEngine, PoolEngine};
use wellspring_store::ThoughtStore;
use wellspring_sync::{
    ingest_batch, select_for_peer, AckStatus, BloomFilter, IngestContext, NodeSigner,
    SessionRegistry,
};
use wellspring_trust::{CompromiseLedger, TrustGraph};

use crate::api::WellspringApiServer;
use crate::types::{
    hello_signable, BloomExchange, HelloRequest, HelloResponse, HeartbeatRequest,
    HeartbeatResponse, QueryRequest, QueryResponse, QueryResult, RpcAck, RpcPoolRules,
    RpcRateLimits, ThoughtPayload,
};

/// Session lifetime granted by a hello.
const SESSION_TTL_MS: i64 = 10 * 60 * 1000;

/// Capabilities this node implements.
const SUPPORTED_CAPABILITIES: [&str; 4] = ["bloom", "want", "push", "query"];

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Shared state passed to the RPC server — one node's context, explicitly
/// threaded rather than global. Locks are never held across await points.
pub struct RpcServerState {
    pub store: Arc<ThoughtStore>,
    pub pools: Arc<RwLock<PoolEngine>>,
    pub appetite: Arc<RwLock<AppetiteEngine>>,
    pub trust: Arc<RwLock<TrustGraph>>,
    pub ledger: Arc<RwLock<CompromiseLedger>>,
    pub index: Option<Arc<SemanticIndex>>,
    pub sessions: Arc<RwLock<SessionRegistry>>,
    /// session id → the peer's bloom filter from `ws_exchangeBloom`.
    pub blooms: Arc<RwLock<HashMap<String, BloomFilter>>>,
    /// This node's signing identity.
    pub identity: Thought,
    pub keypair: Arc<KeyPair>,
}

impl RpcServerState {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn signer(&self) -> NodeSigner<'_> {
        NodeSigner {
            keypair: &self.keypair,
            identity: self.identity.cid().clone(),
            algo: self.identity.cid().algo(),
        }
    }

    fn session_identity(&self, session_id: &str) -> RpcResult<Cid> {
        let mut sessions = self.sessions.write().expect("session lock poisoned");
        sessions
            .validate(session_id, self.now())
            .map(|s| s.identity.clone())
            .map_err(|e| rpc_err(-32001, e.to_string()))
    }

    /// Record a hello card's identity thought (idempotent, pre-known peer).
    fn absorb_hello_card(&self, encoded: &str) -> Result<Cid, String> {
        let card = HelloCard::decode(encoded).map_err(|e| e.to_string())?;
        let cid = card.verify().map_err(|e| e.to_string())?;
        let identity = Thought::assemble(
            cid.clone(),
            "identity".into(),
            Value::map([
                ("name", Value::text(card.name.clone())),
                ("pubkey", Value::text(card.pubkey.clone())),
            ]),
            Creator::Genesis,
            vec![],
            card.created,
            None,
            Signature::from_base64(&card.signature).map_err(|e| e.to_string())?,
            Some("hello_card".into()),
        );
        match self.store.put(&identity) {
            Ok(_) => Ok(cid),
            Err(e) => Err(e.to_string()),
        }
    }

    /// When ingest crossed the appetite attack threshold, materialize the
    /// flip as a new appetite aspect thought chained to its predecessor.
    fn materialize_attack_mode(&self) {
        let mut appetite = self.appetite.write().expect("appetite lock poisoned");
        if !appetite.attack_flip_pending() {
            return;
        }
        let limits = appetite.limits().clone();
        let because = appetite.config_head().cloned().into_iter().collect::<Vec<_>>();
        let draft = ThoughtDraft::new(
            "aspect",
            Value::map([
                ("aspect_type", Value::text("appetite")),
                ("description", Value::text("attack mode: traffic over threshold")),
                (
                    "limits",
                    Value::map([
                        ("unknown_rate", Value::Int(i64::from(limits.unknown_rate))),
                        ("trusted_rate", Value::Int(i64::from(limits.trusted_rate))),
                        ("expectation_boost", Value::Int(i64::from(limits.expectation_boost))),
                        ("attack_threshold", Value::Int(i64::from(limits.attack_threshold))),
                        ("attack_mode", Value::Bool(true)),
                    ]),
                ),
            ]),
        )
        .because(because)
        .visibility(Visibility::LocalForever);

        let forged = draft.forge(
            &self.keypair,
            Creator::Identity(self.identity.cid().clone()),
            self.identity.cid().algo(),
            self.now(),
        );
        match forged {
            Ok(aspect) => {
                if let Err(e) = self.store.put(&aspect) {
                    warn!(error = %e, "failed to store attack-mode aspect");
                    return;
                }
                appetite.observe(&aspect);
                warn!(aspect = %aspect.cid(), "attack mode engaged");
            }
            Err(e) => warn!(error = %e, "failed to forge attack-mode aspect"),
        }
    }
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any);
        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;
        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl WellspringApiServer for RpcServer {
    async fn hello(&self, req: HelloRequest) -> RpcResult<HelloResponse> {
        let state = &self.state;

        if let Some(card) = &req.hello_card {
            if let Err(e) = state.absorb_hello_card(card) {
                return Err(rpc_err(-32002, format!("bad hello card: {e}")));
            }
        }

        let peer_cid: Cid =
            req.identity_cid.parse().map_err(|e: wellspring_core::WellspringError| {
                rpc_err(-32602, format!("invalid identity cid: {e}"))
            })?;

        // Verify the signed hello when the peer's key is locally known;
        // an unknown peer still gets a session — every pushed thought is
        // verified individually regardless.
        match state.store.get_identity(&peer_cid) {
            Some(identity) => {
                let tag = identity
                    .content()
                    .str_field("pubkey")
                    .ok_or_else(|| rpc_err(-32002, "peer identity lacks pubkey"))?
                    .to_owned();
                let key =
                    parse_pubkey(&tag).map_err(|e| rpc_err(-32002, format!("bad peer key: {e}")))?;
                let signable =
                    hello_signable(&req.identity_cid, &req.protocol_version, req.timestamp);
                let sig = Signature::from_base64(&req.signature)
                    .map_err(|e| rpc_err(-32002, e.to_string()))?;
                verify_message(&key, &signable, &sig)
                    .map_err(|_| rpc_err(-32002, "hello signature does not verify"))?;
            }
            None => {
                warn!(peer = %peer_cid, "hello from unknown identity (no card); session unverified");
            }
        }

        let accepted: Vec<String> = req
            .capabilities
            .iter()
            .filter(|c| SUPPORTED_CAPABILITIES.contains(&c.as_str()))
            .cloned()
            .collect();

        let session = state
            .sessions
            .write()
            .expect("session lock poisoned")
            .open(peer_cid.clone(), accepted.clone(), state.now() + SESSION_TTL_MS);
        info!(peer = %peer_cid, session = %session.session_id, "session opened");

        let our_cid = state.identity.cid().to_string();
        let signable = hello_signable(&our_cid, PROTOCOL_VERSION, req.timestamp);
        let signature = state.keypair.sign(&signable).to_base64();
        Ok(HelloResponse {
            identity_cid: our_cid,
            accepted_capabilities: accepted,
            session_id: session.session_id,
            signature,
        })
    }

    async fn get_schemas(&self, pool_cid: String) -> RpcResult<RpcPoolRules> {
        let cid: Cid = pool_cid
            .parse()
            .map_err(|e: wellspring_core::WellspringError| rpc_err(-32602, e.to_string()))?;
        let rate_limits = {
            let appetite = self.state.appetite.read().expect("appetite lock poisoned");
            let l = appetite.limits();
            RpcRateLimits {
                unknown_rate: l.unknown_rate,
                trusted_rate: l.trusted_rate,
                expectation_boost: l.expectation_boost,
                attack_threshold: l.attack_threshold,
                attack_mode: l.attack_mode,
            }
        };
        let pools = self.state.pools.read().expect("pool lock poisoned");
        let pool = pools.pool(&cid).ok_or_else(|| rpc_err(-32004, "unknown pool"))?;
        Ok(RpcPoolRules {
            pool_rules_cid: pool.config_head.to_string(),
            required_schemas: pool.rules.accepted_schemas.clone(),
            require_because: pool.rules.require_because,
            max_payload_bytes: pool.rules.max_payload_bytes,
            waterline: pool.rules.waterline,
            rate_limits,
            timestamp_unit: pool.rules.timestamp_unit.clone(),
        })
    }

    async fn exchange_bloom(&self, req: BloomExchange) -> RpcResult<BloomExchange> {
        let state = &self.state;
        let _peer = state.session_identity(&req.session_id)?;

        let theirs = BloomFilter::from_hex(&req.filter_hex, req.filter_m, req.filter_k, req.thought_count)
            .map_err(|e| rpc_err(-32602, e.to_string()))?;
        state
            .blooms
            .write()
            .expect("bloom lock poisoned")
            .insert(req.session_id.clone(), theirs);

        let cids = state.store.all_cids().map_err(|e| rpc_err(-32603, e.to_string()))?;
        let ours = BloomFilter::from_cids(cids.iter());
        Ok(BloomExchange {
            session_id: req.session_id,
            filter_hex: ours.to_hex(),
            filter_m: ours.m(),
            filter_k: ours.k(),
            thought_count: ours.count(),
        })
    }

    async fn want(&self, session_id: String, cids: Vec<String>) -> RpcResult<Vec<ThoughtPayload>> {
        let state = &self.state;
        let peer = state.session_identity(&session_id)?;
        let pools = state.pools.read().expect("pool lock poisoned").clone();

        if cids.is_empty() {
            // Full selection against the peer's session bloom.
            let bloom = state
                .blooms
                .read()
                .expect("bloom lock poisoned")
                .get(&session_id)
                .cloned()
                .ok_or_else(|| rpc_err(-32005, "exchange a bloom filter first"))?;
            let local = state.store.iter_all().map_err(|e| rpc_err(-32603, e.to_string()))?;
            let plan = select_for_peer(&local, &pools, &peer, &bloom);
            return Ok(plan.thoughts.iter().map(ThoughtPayload::from_thought).collect());
        }

        let mut out = Vec::new();
        for cid_str in cids {
            let cid: Cid = match cid_str.parse() {
                Ok(c) => c,
                Err(_) => continue,
            };
            let Some(thought) = state.store.get(&cid).map_err(|e| rpc_err(-32603, e.to_string()))?
            else {
                continue;
            };
            if pools.visible_to(&thought, &peer).is_ok() {
                out.push(ThoughtPayload::from_thought(&thought));
            }
        }
        Ok(out)
    }

    async fn push(&self, session_id: String, thoughts: Vec<ThoughtPayload>) -> RpcResult<Vec<RpcAck>> {
        let state = &self.state;
        let peer = state.session_identity(&session_id)?;

        let mut acks = Vec::new();
        let mut batch = Vec::new();
        for payload in thoughts {
            let cid = payload.cid.clone();
            match payload.into_thought() {
                Ok(t) => batch.push(t),
                Err(e) => acks.push(RpcAck {
                    cid,
                    status: "Rejected".into(),
                    message: Some(e.to_string()),
                }),
            }
        }

        let peer_trust = state
            .trust
            .read()
            .expect("trust lock poisoned")
            .trust(state.identity.cid(), &peer);

        let report = {
            let mut pools = state.pools.write().expect("pool lock poisoned");
            let mut appetite = state.appetite.write().expect("appetite lock poisoned");
            let mut trust = state.trust.write().expect("trust lock poisoned");
            let mut ledger = state.ledger.write().expect("ledger lock poisoned");
            let mut ctx = IngestContext {
                store: &state.store,
                pools: &mut pools,
                appetite: &mut appetite,
                trust: &mut trust,
                ledger: &mut ledger,
                index: state.index.as_deref(),
            };
            ingest_batch(&mut ctx, &state.signer(), batch, &peer, peer_trust, state.now())
        };
        state.materialize_attack_mode();

        for ack in report.acks {
            let (status, message) = match ack.status {
                AckStatus::Accepted => ("Accepted".to_string(), None),
                AckStatus::Rejected(reason) => ("Rejected".to_string(), Some(reason)),
            };
            acks.push(RpcAck { cid: ack.cid.to_string(), status, message });
        }
        Ok(acks)
    }

    async fn query(&self, req: QueryRequest) -> RpcResult<QueryResponse> {
        let state = &self.state;
        let Some(index) = &state.index else {
            return Err(rpc_err(-32006, "semantic index not enabled"));
        };
        let pool_cid = match &req.pool_cid {
            Some(s) => Some(
                s.parse::<Cid>()
                    .map_err(|e: wellspring_core::WellspringError| rpc_err(-32602, e.to_string()))?,
            ),
            None => None,
        };
        let rules = {
            let pools = state.pools.read().expect("pool lock poisoned");
            pool_cid.as_ref().map(|p| pools.effective_rules(p)).unwrap_or_default()
        };

        let mut opts = QueryOptions::new(req.top_k, rules.waterline, state.now());
        opts.pool = pool_cid;
        opts.decay_per_hour = rules.trust_decay;
        let hits = index
            .query(&req.query_text, &opts)
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(QueryResponse {
            results: hits
                .into_iter()
                .map(|h| QueryResult {
                    cid: h.cid.to_string(),
                    similarity: h.similarity,
                    relevance: h.relevance,
                    snippet: h.snippet,
                })
                .collect(),
        })
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> RpcResult<HeartbeatResponse> {
        let count = self.state.store.count();
        Ok(HeartbeatResponse {
            timestamp: self.state.now(),
            thought_count: count,
            sync_needed: count != req.thought_count,
        })
    }
}

