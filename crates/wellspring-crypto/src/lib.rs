//! wellspring-crypto
//!
//! The CID engine and the Ed25519 signing layer.
//!
//! A thought's CID is the tagged hash of its canonical bytes; the signature
//! is a detached Ed25519 signature over the 36-byte binary CID. Verification
//! resolves the creator's identity thought for its published public key —
//! except GENESIS identities, which carry their key inline and self-verify.

pub mod builder;
pub mod cid;
pub mod keypair;
pub mod verify;

pub use builder::ThoughtDraft;
pub use cid::{cid_for_thought, compute_cid};
pub use keypair::KeyPair;
pub use verify::{
    check_cid, parse_pubkey, verify_cid_signature, verify_message, verify_thought, VerifyError,
};
