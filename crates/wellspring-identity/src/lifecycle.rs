use tracing::info;

use wellspring_core::{Cid, CidAlgo, Creator, Thought, TimestampMs, Value, Visibility, WellspringError};
use wellspring_crypto::{KeyPair, ThoughtDraft};

/// A local identity: the keypair, the public identity thought, and the
/// local-forever secret thought wrapping the private key.
pub struct IdentityBundle {
    pub keypair: KeyPair,
    pub identity: Thought,
    pub secret: Thought,
}

impl IdentityBundle {
    /// Create a fresh identity.
    ///
    /// The identity thought declares `{name, pubkey}` with the GENESIS
    /// sentinel as creator and is signed by the new key; the CID that falls
    /// out is the identity's CID from then on. The private key is wrapped in
    /// a separate `secret` thought with `local_forever` visibility and the
    /// identity CID in `because` — it never enters sync.
    pub fn create(name: &str, algo: CidAlgo, now: TimestampMs) -> Result<Self, WellspringError> {
        let keypair = KeyPair::generate();
        let identity = ThoughtDraft::new(
            "identity",
            Value::map([
                ("name", Value::text(name)),
                ("pubkey", Value::text(keypair.public_tag())),
            ]),
        )
        .forge(&keypair, Creator::Genesis, algo, now)?;

        let secret = Self::wrap_secret(&keypair, identity.cid(), algo, now)?;
        info!(identity = %identity.cid(), %name, "created identity");
        Ok(Self { keypair, identity, secret })
    }

    fn wrap_secret(
        keypair: &KeyPair,
        identity_cid: &Cid,
        algo: CidAlgo,
        now: TimestampMs,
    ) -> Result<Thought, WellspringError> {
        ThoughtDraft::new(
            "secret",
            Value::map([
                ("type", Value::text("identity_secret")),
                ("for_identity", Value::text(identity_cid.to_string())),
                (
                    "privkey",
                    Value::text(format!("ed25519:{}", hex::encode(keypair.secret_bytes().as_ref()))),
                ),
            ]),
        )
        .because(vec![identity_cid.clone()])
        .visibility(Visibility::LocalForever)
        .forge(keypair, Creator::Identity(identity_cid.clone()), algo, now)
    }

    /// Restore a bundle from its stored identity and secret thoughts.
    pub fn restore(identity: Thought, secret: Thought) -> Result<Self, WellspringError> {
        let tag = secret
            .content()
            .str_field("privkey")
            .ok_or_else(|| WellspringError::BadKey("secret thought missing privkey".into()))?;
        let hex_part = tag
            .strip_prefix("ed25519:")
            .ok_or_else(|| WellspringError::BadKey(format!("unsupported secret tag: {tag}")))?;
        let bytes =
            hex::decode(hex_part).map_err(|e| WellspringError::BadKey(e.to_string()))?;
        let keypair = KeyPair::from_secret_bytes(&bytes)?;
        Ok(Self { keypair, identity, secret })
    }

    pub fn cid(&self) -> &Cid {
        self.identity.cid()
    }

    pub fn name(&self) -> &str {
        self.identity.content().str_field("name").unwrap_or("unnamed")
    }

    pub fn algo(&self) -> CidAlgo {
        self.identity.cid().algo()
    }

    /// Forge a thought as this identity.
    pub fn forge(
        &self,
        draft: ThoughtDraft,
        now: TimestampMs,
    ) -> Result<Thought, WellspringError> {
        draft.forge(&self.keypair, Creator::Identity(self.cid().clone()), self.algo(), now)
    }
}
