//! wellspring-identity
//!
//! The identity lifecycle: GENESIS creation with a local-forever secret,
//! rotation via a cross-signed attestation pair, revocation with compromise
//! windows, and the out-of-band hello card bootstrap.

pub mod hello;
pub mod lifecycle;
pub mod revocation;
pub mod rotation;

pub use hello::HelloCard;
pub use lifecycle::IdentityBundle;
pub use revocation::{revoke_device, RevocationKit};
pub use rotation::{deprecate_old, rotate, verify_rotation, RotationBundle};
