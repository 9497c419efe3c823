use wellspring_core::types::Signature;
use wellspring_core::{Cid, CidAlgo, Creator, Thought, Value, Visibility, WellspringError};

use crate::cid::compute_cid;
use crate::keypair::KeyPair;

/// The mutable staging form of a thought. `forge` runs the canonical
/// encoder, derives the CID, signs it, and freezes the record — after that
/// nothing changes.
#[derive(Clone, Debug)]
pub struct ThoughtDraft {
    kind: String,
    content: Value,
    because: Vec<Cid>,
    visibility: Option<Visibility>,
    source: Option<String>,
}

impl ThoughtDraft {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
            because: Vec::new(),
            visibility: None,
            source: None,
        }
    }

    pub fn because(mut self, antecedents: Vec<Cid>) -> Self {
        self.because = antecedents;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Derive the CID, sign it with `keypair`, and return the immutable
    /// thought. `created_by` is the signing identity's CID — or GENESIS for
    /// the identity bootstrap, where the CID that comes out *is* the new
    /// identity's CID.
    pub fn forge(
        self,
        keypair: &KeyPair,
        created_by: Creator,
        algo: CidAlgo,
        created_at: wellspring_core::TimestampMs,
    ) -> Result<Thought, WellspringError> {
        let cid = compute_cid(algo, &self.kind, &self.content, &created_by, &self.because)?;
        let signature: Signature = keypair.sign(&cid.to_wire());
        Ok(Thought::assemble(
            cid,
            self.kind,
            self.content,
            created_by,
            self.because,
            created_at,
            self.visibility,
            signature,
            self.source,
        ))
    }

    /// `forge` with the current wall clock.
    pub fn forge_now(
        self,
        keypair: &KeyPair,
        created_by: Creator,
        algo: CidAlgo,
    ) -> Result<Thought, WellspringError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.forge(keypair, created_by, algo, now)
    }
}
