use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    BloomExchange, HelloRequest, HelloResponse, HeartbeatRequest, HeartbeatResponse,
    QueryRequest, QueryResponse, RpcAck, RpcPoolRules, ThoughtPayload,
};

/// Wellspring JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "ws_" via `namespace = "ws"`. The
/// same definition generates the typed HTTP client used by the sync driver.
#[rpc(server, client, namespace = "ws")]
pub trait WellspringApi {
    /// Identity and capability exchange. Opens a session; all other verbs
    /// except `query`/`heartbeat` require the returned session id.
    #[method(name = "hello")]
    async fn hello(&self, req: HelloRequest) -> RpcResult<HelloResponse>;

    /// A pool's effective ingestion rules (schema list, limits, waterline).
    #[method(name = "getSchemas")]
    async fn get_schemas(&self, pool_cid: String) -> RpcResult<RpcPoolRules>;

    /// Swap bloom filters over CID sets. The caller's filter is retained
    /// for the session so `ws_want` can compute the selection server-side.
    #[method(name = "exchangeBloom")]
    async fn exchange_bloom(&self, req: BloomExchange) -> RpcResult<BloomExchange>;

    /// Fetch thoughts by explicit CID, or — with an empty list — the full
    /// visibility-filtered selection against the caller's session bloom,
    /// identities ordered first.
    #[method(name = "want")]
    async fn want(&self, session_id: String, cids: Vec<String>) -> RpcResult<Vec<ThoughtPayload>>;

    /// Push a batch of thoughts. Returns one ack per payload; rejected
    /// thoughts never abort the batch.
    #[method(name = "push")]
    async fn push(
        &self,
        session_id: String,
        thoughts: Vec<ThoughtPayload>,
    ) -> RpcResult<Vec<RpcAck>>;

    /// Trust-weighted semantic query over the local index.
    #[method(name = "query")]
    async fn query(&self, req: QueryRequest) -> RpcResult<QueryResponse>;

    /// Liveness probe; `sync_needed` reports a thought-count divergence.
    #[method(name = "heartbeat")]
    async fn heartbeat(&self, req: HeartbeatRequest) -> RpcResult<HeartbeatResponse>;
}
