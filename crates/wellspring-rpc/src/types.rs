use serde::{Deserialize, Serialize};

use wellspring_core::{Thought, TimestampMs, WellspringError};

/// `ws_hello` request: who is calling and what they can do. The signature
/// (base64 Ed25519) covers `hello_signable` and proves key possession for
/// the claimed identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    pub identity_cid: String,
    pub protocol_version: String,
    pub capabilities: Vec<String>,
    pub timestamp: TimestampMs,
    pub signature: String,
    /// Optional out-of-band bootstrap: lets a previously unknown peer
    /// introduce its identity in the same round trip.
    pub hello_card: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub identity_cid: String,
    pub accepted_capabilities: Vec<String>,
    pub session_id: String,
    pub signature: String,
}

/// The bytes a hello signature covers, on either side of the exchange.
pub fn hello_signable(identity_cid: &str, protocol_version: &str, timestamp: TimestampMs) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(identity_cid.as_bytes());
    hasher.update(b"|");
    hasher.update(protocol_version.as_bytes());
    hasher.update(b"|");
    hasher.update(&timestamp.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// One side of `ws_exchangeBloom`; the response carries the peer's filter in
/// the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomExchange {
    pub session_id: String,
    pub filter_hex: String,
    pub filter_m: u32,
    pub filter_k: u32,
    pub thought_count: u64,
}

/// A thought on the wire: the JSON form (CID, all fields, signature,
/// source) — the receiver recomputes the CID from canonical bytes and it
/// must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtPayload {
    pub cid: String,
    pub thought: serde_json::Value,
}

impl ThoughtPayload {
    pub fn from_thought(thought: &Thought) -> Self {
        Self { cid: thought.cid().to_string(), thought: thought.to_json() }
    }

    pub fn into_thought(self) -> Result<Thought, WellspringError> {
        let thought = Thought::from_json(&self.thought)?;
        if thought.cid().to_string() != self.cid {
            return Err(WellspringError::CidMismatch {
                claimed: self.cid,
                computed: thought.cid().to_string(),
            });
        }
        Ok(thought)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAck {
    pub cid: String,
    /// "Accepted" | "Rejected"
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    pub pool_cid: Option<String>,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub cid: String,
    pub similarity: f64,
    pub relevance: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
}

/// A pool's effective rules as returned by `ws_getSchemas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcPoolRules {
    pub pool_rules_cid: String,
    pub required_schemas: Vec<String>,
    pub require_because: bool,
    pub max_payload_bytes: usize,
    pub waterline: f64,
    pub rate_limits: RpcRateLimits,
    pub timestamp_unit: String,
}

/// The node's current appetite limits, mirrored into `ws_getSchemas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRateLimits {
    pub unknown_rate: u32,
    pub trusted_rate: u32,
    pub expectation_boost: u32,
    pub attack_threshold: u32,
    pub attack_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub timestamp: TimestampMs,
    pub thought_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub timestamp: TimestampMs,
    pub thought_count: u64,
    pub sync_needed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::types::Signature;
    use wellspring_core::{Cid, CidAlgo, Creator, Value};

    #[test]
    fn payload_round_trip_checks_cid() {
        let t = Thought::assemble(
            Cid::new(CidAlgo::Blake3, [9u8; 32]),
            "basic".into(),
            Value::text("hi"),
            Creator::Genesis,
            vec![],
            0,
            None,
            Signature(vec![0u8; 64]),
            None,
        );
        let payload = ThoughtPayload::from_thought(&t);
        assert_eq!(payload.clone().into_thought().unwrap(), t);

        let mut lying = payload;
        lying.cid = Cid::new(CidAlgo::Blake3, [8u8; 32]).to_string();
        assert!(matches!(
            lying.into_thought(),
            Err(WellspringError::CidMismatch { .. })
        ));
    }

    #[test]
    fn hello_signable_is_stable_and_field_sensitive() {
        let a = hello_signable("cid:blake3:aa", "wellspring/1.0", 5);
        assert_eq!(a, hello_signable("cid:blake3:aa", "wellspring/1.0", 5));
        assert_ne!(a, hello_signable("cid:blake3:ab", "wellspring/1.0", 5));
        assert_ne!(a, hello_signable("cid:blake3:aa", "wellspring/1.1", 5));
        assert_ne!(a, hello_signable("cid:blake3:aa", "wellspring/1.0", 6));
    }
}
