//! wellspring-node library surface: the per-process `NodeContext` and the
//! sync driver, shared by the binary and the integration tests.

pub mod node;

pub use node::{NodeContext, SyncSummary};
