use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tracing::debug;

use wellspring_core::constants::PROTOCOL_VERSION;
use wellspring_core::{Thought, WellspringError};
use wellspring_crypto::KeyPair;
use wellspring_sync::BloomFilter;

use crate::api::WellspringApiClient;
use crate::types::{
    hello_signable, BloomExchange, HelloRequest, HeartbeatRequest, HeartbeatResponse,
    QueryRequest, QueryResponse, RpcAck, ThoughtPayload,
};

/// Typed client for one remote peer, wrapping the generated jsonrpsee
/// client with the session handshake.
pub struct PeerClient {
    inner: HttpClient,
    session_id: Option<String>,
    /// The remote node's identity CID, learned from the hello response.
    pub peer_identity: Option<String>,
}

fn net_err(e: impl std::fmt::Display) -> WellspringError {
    WellspringError::Network(e.to_string())
}

impl PeerClient {
    pub fn connect(url: &str) -> Result<Self, WellspringError> {
        let inner = HttpClientBuilder::default().build(url).map_err(net_err)?;
        Ok(Self { inner, session_id: None, peer_identity: None })
    }

    pub fn session_id(&self) -> Result<&str, WellspringError> {
        self.session_id
            .as_deref()
            .ok_or_else(|| WellspringError::Network("no session; call hello first".into()))
    }

    /// Run the hello exchange: signed identity introduction, optionally
    /// attaching a hello card so an unknown peer can verify us.
    pub async fn hello(
        &mut self,
        identity_cid: &str,
        keypair: &KeyPair,
        capabilities: &[&str],
        hello_card: Option<String>,
        now: i64,
    ) -> Result<(), WellspringError> {
        let signable = hello_signable(identity_cid, PROTOCOL_VERSION, now);
        let req = HelloRequest {
            identity_cid: identity_cid.to_owned(),
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            timestamp: now,
            signature: keypair.sign(&signable).to_base64(),
            hello_card,
        };
        let resp = WellspringApiClient::hello(&self.inner, req).await.map_err(net_err)?;
        debug!(session = %resp.session_id, peer = %resp.identity_cid, "hello complete");
        self.session_id = Some(resp.session_id);
        self.peer_identity = Some(resp.identity_cid);
        Ok(())
    }

    /// Send our bloom filter; returns the peer's.
    pub async fn exchange_bloom(&self, ours: &BloomFilter) -> Result<BloomFilter, WellspringError> {
        let req = BloomExchange {
            session_id: self.session_id()?.to_owned(),
            filter_hex: ours.to_hex(),
            filter_m: ours.m(),
            filter_k: ours.k(),
            thought_count: ours.count(),
        };
        let resp = WellspringApiClient::exchange_bloom(&self.inner, req).await.map_err(net_err)?;
        BloomFilter::from_hex(&resp.filter_hex, resp.filter_m, resp.filter_k, resp.thought_count)
    }

    /// Fetch the peer's selection for our bloom (empty `cids`), or specific
    /// thoughts by CID.
    pub async fn want(&self, cids: Vec<String>) -> Result<Vec<Thought>, WellspringError> {
        let payloads =
            WellspringApiClient::want(&self.inner, self.session_id()?.to_owned(), cids)
                .await
                .map_err(net_err)?;
        payloads.into_iter().map(ThoughtPayload::into_thought).collect()
    }

    /// Push thoughts; returns per-CID acks.
    pub async fn push(&self, thoughts: &[Thought]) -> Result<Vec<RpcAck>, WellspringError> {
        let payloads: Vec<ThoughtPayload> =
            thoughts.iter().map(ThoughtPayload::from_thought).collect();
        WellspringApiClient::push(&self.inner, self.session_id()?.to_owned(), payloads)
            .await
            .map_err(net_err)
    }

    pub async fn query(&self, req: QueryRequest) -> Result<QueryResponse, WellspringError> {
        WellspringApiClient::query(&self.inner, req).await.map_err(net_err)
    }

    pub async fn heartbeat(
        &self,
        thought_count: u64,
        now: i64,
    ) -> Result<HeartbeatResponse, WellspringError> {
        WellspringApiClient::heartbeat(
            &self.inner,
            HeartbeatRequest { timestamp: now, thought_count },
        )
        .await
        .map_err(net_err)
    }
}
