use wellspring_core::{Cid, Thought, TimestampMs, Value, WellspringError};
use wellspring_crypto::{verify_thought, ThoughtDraft, VerifyError};

use crate::lifecycle::IdentityBundle;

/// The artifacts of one key rotation. Both signatures cross-verify: the old
/// key proves consent to rotate, the new key proves possession.
pub struct RotationBundle {
    pub new_identity: IdentityBundle,
    /// Signed by the OLD key: declares the successor and deprecates itself.
    pub rotation: Thought,
    /// Signed by the NEW key: acknowledges the rotation at weight 1.0.
    pub acknowledgment: Thought,
}

/// Rotate `old` to a fresh keypair under the same display name.
pub fn rotate(
    old: &IdentityBundle,
    now: TimestampMs,
) -> Result<RotationBundle, WellspringError> {
    let new_identity = IdentityBundle::create(old.name(), old.algo(), now)?;

    let rotation = old.forge(
        ThoughtDraft::new(
            "rotation",
            Value::map([
                ("from_identity", Value::text(old.cid().to_string())),
                ("to_identity", Value::text(new_identity.cid().to_string())),
                ("old_key_status", Value::text("deprecated")),
            ]),
        )
        .because(vec![old.cid().clone(), new_identity.cid().clone()]),
        now,
    )?;

    let acknowledgment = new_identity.forge(
        ThoughtDraft::new(
            "attestation",
            Value::map([
                ("aspect_type", Value::text("key_acknowledgment")),
                ("on", Value::text(rotation.cid().to_string())),
                ("weight", Value::Float(1.0)),
            ]),
        )
        .because(vec![rotation.cid().clone()]),
        now,
    )?;

    Ok(RotationBundle { new_identity, rotation, acknowledgment })
}

/// Optional chain tail: the new identity downweights the old one to zero so
/// observers stop extending trust through the deprecated key.
pub fn deprecate_old(
    bundle: &RotationBundle,
    old_cid: &Cid,
    now: TimestampMs,
) -> Result<Thought, WellspringError> {
    bundle.new_identity.forge(
        ThoughtDraft::new(
            "attestation",
            Value::map([
                ("aspect_type", Value::text("trust")),
                ("on", Value::text(old_cid.to_string())),
                ("weight", Value::Float(0.0)),
            ]),
        )
        .because(vec![bundle.rotation.cid().clone()]),
        now,
    )
}

/// Check a rotation pair: the rotation thought verifies under the old
/// identity's key, the acknowledgment under the new identity's key, and the
/// contents cross-reference each other.
pub fn verify_rotation<F>(
    rotation: &Thought,
    acknowledgment: &Thought,
    resolve: F,
) -> Result<(), WellspringError>
where
    F: Fn(&Cid) -> Option<Thought>,
{
    let map_verify = |e: VerifyError| match e {
        VerifyError::Missing(id) => WellspringError::UnknownIdentity(id),
        VerifyError::BadKey(msg) => WellspringError::BadKey(msg),
        VerifyError::BadSig => WellspringError::BadSignature,
    };

    verify_thought(rotation, &resolve).map_err(map_verify)?;
    verify_thought(acknowledgment, &resolve).map_err(map_verify)?;

    let from: Cid = rotation
        .content()
        .str_field("from_identity")
        .ok_or_else(|| WellspringError::Other("rotation missing from_identity".into()))?
        .parse()?;
    let to: Cid = rotation
        .content()
        .str_field("to_identity")
        .ok_or_else(|| WellspringError::Other("rotation missing to_identity".into()))?
        .parse()?;

    if rotation.created_by().as_cid() != Some(&from) {
        return Err(WellspringError::Other("rotation not signed by the old identity".into()));
    }
    if acknowledgment.created_by().as_cid() != Some(&to) {
        return Err(WellspringError::Other(
            "acknowledgment not signed by the new identity".into(),
        ));
    }
    let on = acknowledgment.content().str_field("on").unwrap_or_default();
    if on != rotation.cid().to_string() {
        return Err(WellspringError::Other("acknowledgment targets a different thought".into()));
    }
    Ok(())
}
