use ed25519_dalek::{Verifier as _, VerifyingKey};
use thiserror::Error;

use wellspring_core::types::Signature;
use wellspring_core::{Cid, Thought, WellspringError};

use crate::cid::cid_for_thought;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// The creator's identity thought is not locally known. May resolve after
    /// a later sync round — ingest defers these and retries.
    #[error("creator identity not known: {0}")]
    Missing(String),

    #[error("malformed public key: {0}")]
    BadKey(String),

    #[error("signature does not verify")]
    BadSig,
}

/// Parse a published `ed25519:<hex>` key tag.
pub fn parse_pubkey(tag: &str) -> Result<VerifyingKey, VerifyError> {
    let hex_part = tag
        .strip_prefix("ed25519:")
        .ok_or_else(|| VerifyError::BadKey(format!("unsupported key tag: {tag}")))?;
    let bytes = hex::decode(hex_part).map_err(|e| VerifyError::BadKey(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::BadKey(format!("key is {} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| VerifyError::BadKey(e.to_string()))
}

/// Verify a detached signature over arbitrary message bytes.
pub fn verify_message(
    key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), VerifyError> {
    let sig_bytes: [u8; 64] = signature
        .0
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::BadSig)?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    key.verify(message, &sig).map_err(|_| VerifyError::BadSig)
}

/// Verify a detached signature over a CID's 36-byte wire form.
pub fn verify_cid_signature(
    cid: &Cid,
    signature: &Signature,
    key: &VerifyingKey,
) -> Result<(), VerifyError> {
    verify_message(key, &cid.to_wire(), signature)
}

/// Recompute a thought's CID from its canonical bytes and compare with the
/// claimed CID. Runs before signature verification at every trust boundary.
pub fn check_cid(thought: &Thought) -> Result<(), WellspringError> {
    let computed = cid_for_thought(thought)?;
    if &computed != thought.cid() {
        return Err(WellspringError::CidMismatch {
            claimed: thought.cid().to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

/// Verify a thought's signature against its creator's published public key.
///
/// `resolve` maps an identity CID to the locally stored identity thought.
/// GENESIS identity thoughts self-verify against `content.pubkey`; all other
/// thoughts look the creator up. A non-identity thought claiming GENESIS is
/// rejected outright.
pub fn verify_thought<F>(thought: &Thought, resolve: F) -> Result<(), VerifyError>
where
    F: Fn(&Cid) -> Option<Thought>,
{
    let key_tag = match thought.created_by() {
        wellspring_core::Creator::Genesis => {
            if !thought.is_identity() {
                return Err(VerifyError::BadKey("non-identity GENESIS thought".into()));
            }
            thought
                .content()
                .str_field("pubkey")
                .ok_or_else(|| VerifyError::BadKey("identity thought missing pubkey".into()))?
                .to_owned()
        }
        wellspring_core::Creator::Identity(creator_cid) => {
            let identity = resolve(creator_cid)
                .ok_or_else(|| VerifyError::Missing(creator_cid.to_string()))?;
            identity
                .content()
                .str_field("pubkey")
                .ok_or_else(|| VerifyError::BadKey("identity thought missing pubkey".into()))?
                .to_owned()
        }
    };
    let key = parse_pubkey(&key_tag)?;
    verify_cid_signature(thought.cid(), thought.signature(), &key)
}
