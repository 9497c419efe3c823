use wellspring_core::{Cid, Thought, TimestampMs, Value, WellspringError};
use wellspring_crypto::ThoughtDraft;

use crate::lifecycle::IdentityBundle;

/// The thoughts a pool admin issues for a compromised device: a `-1.0`
/// attestation on the membership connection, a `compromise_window`
/// constraint aspect, and a `0.0` attestation on each thought inside the
/// window. Historical thoughts stay cryptographically valid; their computed
/// trust reflects the window.
pub struct RevocationKit {
    pub membership_revocation: Thought,
    pub window: Thought,
    pub flags: Vec<Thought>,
}

/// Issue the full revocation kit for a compromised device.
#[allow(clippy::too_many_arguments)]
pub fn revoke_device(
    admin: &IdentityBundle,
    membership_connection: &Cid,
    compromised: &Cid,
    window_start: TimestampMs,
    window_end: TimestampMs,
    reason: &str,
    affected: &[&Thought],
    now: TimestampMs,
) -> Result<RevocationKit, WellspringError> {
    let membership_revocation = admin.forge(
        ThoughtDraft::new(
            "attestation",
            Value::map([
                ("on", Value::text(membership_connection.to_string())),
                ("weight", Value::Float(-1.0)),
                ("note", Value::text(reason)),
            ]),
        )
        .because(vec![membership_connection.clone()]),
        now,
    )?;

    let window = admin.forge(
        ThoughtDraft::new(
            "aspect",
            Value::map([
                ("aspect_type", Value::text("constraint")),
                ("name", Value::text("compromise_window")),
                ("applies_to", Value::text(compromised.to_string())),
                ("window_start", Value::Int(window_start)),
                ("window_end", Value::Int(window_end)),
                ("reason", Value::text(reason)),
            ]),
        )
        .because(vec![membership_revocation.cid().clone()]),
        now,
    )?;

    let mut flags = Vec::new();
    for thought in affected {
        if thought.created_at() < window_start || thought.created_at() > window_end {
            continue;
        }
        let flag = admin.forge(
            ThoughtDraft::new(
                "attestation",
                Value::map([
                    ("on", Value::text(thought.cid().to_string())),
                    ("weight", Value::Float(0.0)),
                    ("note", Value::text("within compromise window")),
                ]),
            )
            .because(vec![window.cid().clone(), thought.cid().clone()]),
            now,
        )?;
        flags.push(flag);
    }

    Ok(RevocationKit { membership_revocation, window, flags })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::CidAlgo;
    use wellspring_crypto::ThoughtDraft;
    use wellspring_trust::CompromiseLedger;

    fn phone_note(phone: &IdentityBundle, text: &str, at: TimestampMs) -> Thought {
        phone
            .forge(ThoughtDraft::new("basic", Value::map([("text", Value::text(text))])), at)
            .unwrap()
    }

    #[test]
    fn kit_flags_only_in_window_thoughts() {
        let admin = IdentityBundle::create("Keif", CidAlgo::Blake3, 0).unwrap();
        let phone = IdentityBundle::create("Keif@phone", CidAlgo::Blake3, 0).unwrap();
        let conn = Cid::new(CidAlgo::Blake3, [7u8; 32]);

        // Five pre-window thoughts, three in-window.
        let mut thoughts = Vec::new();
        for day in 0..5 {
            thoughts.push(phone_note(&phone, &format!("legit day {day}"), day * 86_400_000));
        }
        for day in 5..8 {
            thoughts.push(phone_note(&phone, &format!("suspect day {day}"), day * 86_400_000));
        }
        let refs: Vec<&Thought> = thoughts.iter().collect();

        let kit = revoke_device(
            &admin,
            &conn,
            phone.cid(),
            5 * 86_400_000,
            8 * 86_400_000,
            "phone stolen",
            &refs,
            9 * 86_400_000,
        )
        .unwrap();

        assert_eq!(kit.flags.len(), 3);
        assert_eq!(
            kit.membership_revocation.content().get("weight").and_then(Value::as_f64),
            Some(-1.0)
        );
        assert_eq!(kit.window.content().str_field("name"), Some("compromise_window"));

        // Feed the kit to a ledger: pre-window thoughts keep weight, the
        // in-window three drop to zero.
        let mut ledger = CompromiseLedger::new();
        ledger.observe(&kit.window);
        for flag in &kit.flags {
            ledger.observe(flag);
        }
        let weights: Vec<f64> = thoughts.iter().map(|t| ledger.effective_weight(t)).collect();
        assert_eq!(&weights[..5], &[1.0; 5]);
        assert_eq!(&weights[5..], &[0.0; 3]);
    }
}
