use base64::Engine;
use serde::{Deserialize, Serialize};

use wellspring_core::constants::HELLO_PROTOCOL;
use wellspring_core::types::Signature;
use wellspring_core::{Cid, Creator, TimestampMs, Value, WellspringError};
use wellspring_crypto::{compute_cid, parse_pubkey, verify_cid_signature};

use crate::lifecycle::IdentityBundle;

/// Out-of-band bootstrap record: shareable over any channel (QR code,
/// email, a business card). The receiver verifies the in-line pubkey and
/// records the identity as a pre-known peer — cryptographic proof of
/// identity, no trust implied.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HelloCard {
    pub protocol: String,
    pub identity_cid: String,
    pub name: String,
    pub pubkey: String,
    pub created: TimestampMs,
    pub signature: String,
}

impl HelloCard {
    /// Issue a card for a local identity.
    pub fn issue(bundle: &IdentityBundle, now: TimestampMs) -> Result<Self, WellspringError> {
        let mut card = Self {
            protocol: HELLO_PROTOCOL.into(),
            identity_cid: bundle.cid().to_string(),
            name: bundle.name().to_owned(),
            pubkey: bundle.keypair.public_tag(),
            created: now,
            signature: String::new(),
        };
        // The signature covers the identity CID, same as any thought.
        card.signature = bundle.keypair.sign(&bundle.cid().to_wire()).to_base64();
        Ok(card)
    }

    /// Base64-encoded JSON, the form that travels out of band.
    pub fn encode(&self) -> Result<String, WellspringError> {
        let json = serde_json::to_string(self)
            .map_err(|e| WellspringError::Serialization(e.to_string()))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, WellspringError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| WellspringError::Serialization(format!("bad hello card base64: {e}")))?;
        let card: Self = serde_json::from_slice(&bytes)
            .map_err(|e| WellspringError::Serialization(format!("bad hello card JSON: {e}")))?;
        if card.protocol != HELLO_PROTOCOL {
            return Err(WellspringError::Serialization(format!(
                "unsupported hello protocol `{}`",
                card.protocol
            )));
        }
        Ok(card)
    }

    /// Verify the card: the claimed identity CID must recompute from the
    /// in-line `{name, pubkey}` content, and the signature must verify
    /// against that pubkey.
    pub fn verify(&self) -> Result<Cid, WellspringError> {
        let claimed: Cid = self.identity_cid.parse()?;
        let content = Value::map([
            ("name", Value::text(self.name.clone())),
            ("pubkey", Value::text(self.pubkey.clone())),
        ]);
        let computed = compute_cid(claimed.algo(), "identity", &content, &Creator::Genesis, &[])?;
        if computed != claimed {
            return Err(WellspringError::CidMismatch {
                claimed: claimed.to_string(),
                computed: computed.to_string(),
            });
        }
        let key = parse_pubkey(&self.pubkey)
            .map_err(|e| WellspringError::BadKey(e.to_string()))?;
        let signature = Signature::from_base64(&self.signature)?;
        verify_cid_signature(&claimed, &signature, &key)
            .map_err(|_| WellspringError::BadSignature)?;
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::CidAlgo;

    #[test]
    fn issue_encode_decode_verify() {
        let alice = IdentityBundle::create("Alice", CidAlgo::Blake3, 1_000).unwrap();
        let card = HelloCard::issue(&alice, 2_000).unwrap();
        let wire = card.encode().unwrap();

        let received = HelloCard::decode(&wire).unwrap();
        assert_eq!(received, card);
        let verified_cid = received.verify().unwrap();
        assert_eq!(&verified_cid, alice.cid());
    }

    #[test]
    fn forged_name_fails_cid_recomputation() {
        let alice = IdentityBundle::create("Alice", CidAlgo::Blake3, 1_000).unwrap();
        let mut card = HelloCard::issue(&alice, 2_000).unwrap();
        card.name = "Mallory".into();
        assert!(matches!(card.verify(), Err(WellspringError::CidMismatch { .. })));
    }

    #[test]
    fn swapped_key_fails_signature() {
        let alice = IdentityBundle::create("Alice", CidAlgo::Blake3, 1_000).unwrap();
        let eve = IdentityBundle::create("Alice", CidAlgo::Blake3, 1_000).unwrap();
        let mut card = HelloCard::issue(&alice, 2_000).unwrap();
        // Eve substitutes her signature; the key in the card still belongs
        // to Alice's identity CID, so verification fails.
        card.signature = eve.keypair.sign(&alice.cid().to_wire()).to_base64();
        assert!(matches!(card.verify(), Err(WellspringError::BadSignature)));
    }

    #[test]
    fn garbage_rejected() {
        assert!(HelloCard::decode("not base64 at all!!!").is_err());
        let junk = base64::engine::general_purpose::STANDARD.encode("{\"protocol\":\"other/9\"}");
        assert!(HelloCard::decode(&junk).is_err());
    }
}
