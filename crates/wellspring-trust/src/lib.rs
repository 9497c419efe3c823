//! wellspring-trust
//!
//! Observer-relative trust computed from signed attestation thoughts. There
//! is no canonical global score: every computation starts from a specific
//! observer and walks that observer's locally known edges.

pub mod compromise;
pub mod graph;

pub use compromise::{CompromiseLedger, CompromiseWindow};
pub use graph::{TrustError, TrustGraph};
