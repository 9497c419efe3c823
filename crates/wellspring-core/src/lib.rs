pub mod canonical;
pub mod constants;
pub mod error;
pub mod thought;
pub mod types;
pub mod value;

pub use canonical::{canonical_bytes, EncodeError};
pub use constants::*;
pub use error::WellspringError;
pub use thought::Thought;
pub use types::{AppetiteStatus, Cid, CidAlgo, Creator, TimestampMs, Visibility};
pub use value::Value;
