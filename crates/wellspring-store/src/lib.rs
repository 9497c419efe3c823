//! wellspring-store
//!
//! Durable thought storage: a sled-backed CID → thought map with secondary
//! lookups by type, creator, and time, plus an append-only JSONL audit log
//! mirroring every stored thought. The thoughts tree is authoritative; the
//! secondary indices and caches are advisory and rebuildable.

pub mod db;
pub mod log;

pub use db::ThoughtStore;
pub use log::AuditLog;
