use thiserror::Error;

use crate::canonical::EncodeError;

#[derive(Debug, Error)]
pub enum WellspringError {
    // ── Encoding / identity errors ───────────────────────────────────────────
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("invalid CID: {0}")]
    InvalidCid(String),

    #[error("computed CID {computed} disagrees with claimed CID {claimed}")]
    CidMismatch { claimed: String, computed: String },

    #[error("bad signature")]
    BadSignature,

    #[error("malformed public key: {0}")]
    BadKey(String),

    #[error("unknown identity: {0} (may resolve after a later sync round)")]
    UnknownIdentity(String),

    // ── Pool / visibility errors ─────────────────────────────────────────────
    #[error("visibility denied: {0}")]
    VisibilityDenied(String),

    #[error("rate limited: {category} sender exceeded {limit}/hour")]
    RateLimited { category: String, limit: u32 },

    #[error("pool rule violation: {0}")]
    PoolRuleViolation(String),

    // ── Trust diagnostics (callers treat these as score 0) ───────────────────
    #[error("trust path depth exceeded bound {bound}")]
    TrustDepthExceeded { bound: usize },

    // ── Storage / transport ──────────────────────────────────────────────────
    #[error("storage error: {0}")]
    StoreIO(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("network error: {0}")]
    Network(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}
