use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use wellspring_core::types::Signature;
use wellspring_core::WellspringError;

/// An Ed25519 keypair backing one identity (or device).
///
/// The inner `SigningKey` zeroizes its seed on drop (dalek's `zeroize`
/// feature), and every clone wipes its own copy the same way. The seed is
/// exported only to be wrapped in a `local_forever` secret thought; it
/// never enters sync.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair from the OS RNG.
    pub fn generate() -> Self {
        Self { signing: SigningKey::generate(&mut OsRng) }
    }

    /// Restore from the 32-byte secret seed (e.g. a secret thought's payload).
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, WellspringError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WellspringError::BadKey(format!("secret key is {} bytes", bytes.len())))?;
        Ok(Self { signing: SigningKey::from_bytes(&arr) })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Public key in the `ed25519:<hex>` form identity thoughts publish.
    pub fn public_tag(&self) -> String {
        format!("ed25519:{}", hex::encode(self.signing.verifying_key().as_bytes()))
    }

    /// Secret seed bytes, zeroized when the returned buffer drops.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// Detached signature over `message` (for thoughts: the 36-byte wire CID).
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes().to_vec())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ pubkey: {}… }}", &self.public_tag()[..24])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_tag_is_parseable() {
        let kp = KeyPair::generate();
        let tag = kp.public_tag();
        assert!(tag.starts_with("ed25519:"));
        assert_eq!(tag.len(), "ed25519:".len() + 64);
    }

    #[test]
    fn secret_round_trip() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(kp.secret_bytes().as_ref()).unwrap();
        assert_eq!(kp.public_tag(), restored.public_tag());
    }
}
