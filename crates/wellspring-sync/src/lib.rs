//! wellspring-sync
//!
//! Eventually-consistent pairwise replication: peers exchange bloom filters
//! over their CID sets, the sender selects bloom-missing thoughts its
//! visibility predicate allows, orders identities ahead of their dependents,
//! and the receiver ingests with verification, pool rules, rate limits, and
//! provenance recording. Partial batches are safe because ingest is
//! idempotent; bloom false positives only delay a thought to the next round.

pub mod bloom;
pub mod ingest;
pub mod select;
pub mod session;

pub use bloom::BloomFilter;
pub use ingest::{
    chain_depth, ingest_batch, record_rotation_if_valid, Ack, AckStatus, IngestContext,
    IngestReport, NodeSigner,
};
pub use select::{select_for_peer, FilterStats, SendPlan};
pub use session::{PeerSession, SessionRegistry};
