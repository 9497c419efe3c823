//! ─── Wellspring Protocol Constants ──────────────────────────────────────────
//!
//! Defaults only: pools override most of these through configuration aspect
//! thoughts (`pool_config`, `appetite`), never through process flags.

// ── Trust graph ──────────────────────────────────────────────────────────────

/// Per-hop confidence decay applied during transitive trust computation.
pub const TRUST_DECAY: f64 = 0.8;

/// Maximum hops explored by the transitive trust BFS.
pub const TRUST_MAX_DEPTH: usize = 5;

/// Trust score at or above which a sender is classified `trusted` for
/// appetite rate limiting.
pub const TRUSTED_SENDER_THRESHOLD: f64 = 0.8;

// ── Sync / bloom filter ──────────────────────────────────────────────────────

/// Default bloom filter width in bits. Sized for ~10k thoughts at ~1% false
/// positives; a false positive only delays a thought to the next round.
pub const BLOOM_DEFAULT_M: u32 = 95_851;

/// Default number of bloom hash functions.
pub const BLOOM_DEFAULT_K: u32 = 7;

/// Maximum thoughts moved in one push/want batch.
pub const SYNC_MAX_BATCH: usize = 512;

// ── Pools ────────────────────────────────────────────────────────────────────

/// Default relevance waterline: query results scoring below this are dropped.
pub const DEFAULT_WATERLINE: f64 = 0.3;

/// Default cap on a single thought's canonical payload, enforced at ingest.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

// ── Appetite rate limiting (per hour) ────────────────────────────────────────

pub const APPETITE_UNKNOWN_RATE: u32 = 5;
pub const APPETITE_TRUSTED_RATE: u32 = 100;
pub const APPETITE_EXPECTATION_BOOST: u32 = 10;
pub const APPETITE_ATTACK_THRESHOLD: u32 = 50;

// ── Semantic index ───────────────────────────────────────────────────────────

/// Dimensionality of the deterministic fallback embedder.
pub const EMBED_DIM: usize = 384;

/// Shared projection seed — implementations that share it produce identical
/// fallback vectors.
pub const EMBED_SEED: u64 = 0x77_65_6c_6c_73_70_72_67; // "wellsprg"

/// Chain-depth damping factor: boost = 1 / (1 + factor * depth).
pub const CHAIN_BOOST_FACTOR: f64 = 0.1;

/// Floor for the recency multiplier.
pub const RECENCY_FLOOR: f64 = 0.5;

// ── Protocol strings ─────────────────────────────────────────────────────────

/// Hello-card format tag.
pub const HELLO_PROTOCOL: &str = "hello/1.0";

/// Version string exchanged in the sync hello.
pub const PROTOCOL_VERSION: &str = "wellspring/1.0";
