//! wellspring-rpc
//!
//! JSON-RPC 2.0 surface for Wellspring nodes.
//!
//! Namespace: "ws"
//! Methods:
//!   ws_hello          — identity/capability exchange, opens a session
//!   ws_getSchemas     — a pool's effective ingestion rules
//!   ws_exchangeBloom  — swap CID-set bloom filters
//!   ws_want           — fetch thoughts by CID (or the selection for the
//!                       caller's bloom), visibility-filtered
//!   ws_push           — push thoughts; per-CID Accepted/Rejected acks
//!   ws_query          — trust-weighted semantic query
//!   ws_heartbeat      — liveness + thought-count comparison

pub mod api;
pub mod client;
pub mod server;
pub mod types;

pub use api::{WellspringApiClient, WellspringApiServer};
pub use client::PeerClient;
pub use server::{RpcServer, RpcServerState};
pub use types::{
    hello_signable, BloomExchange, HelloRequest, HelloResponse, HeartbeatRequest,
    HeartbeatResponse, QueryRequest, QueryResponse, QueryResult, RpcAck, RpcPoolRules,
    RpcRateLimits, ThoughtPayload,
};
