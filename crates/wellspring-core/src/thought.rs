use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, EncodeError};
use crate::error::WellspringError;
use crate::types::{Cid, Creator, Signature, TimestampMs, Visibility};
use crate::value::Value;

/// The single primitive: a signed, content-addressed, immutable record.
///
/// Fields are frozen at construction — a thought is never mutated, deleted,
/// or updated in place. Revocation, rotation, and deprecation are themselves
/// new thoughts referencing the old one through `because`.
///
/// The CID covers `{type, content, created_by, because}`; the signature
/// covers the binary CID. `created_at`, `visibility`, and `source` are
/// transport metadata outside the hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    cid: Cid,
    kind: String,
    content: Value,
    created_by: Creator,
    because: Vec<Cid>,
    created_at: TimestampMs,
    visibility: Option<Visibility>,
    signature: Signature,
    source: Option<String>,
}

impl Thought {
    /// Assemble a thought from already-derived parts.
    ///
    /// Protocol-internal: the builder in `wellspring-crypto` and the sync
    /// ingest path are the intended callers — both guarantee (or verify)
    /// that `cid` and `signature` match the other fields.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        cid: Cid,
        kind: String,
        content: Value,
        created_by: Creator,
        because: Vec<Cid>,
        created_at: TimestampMs,
        visibility: Option<Visibility>,
        signature: Signature,
        source: Option<String>,
    ) -> Self {
        Self { cid, kind, content, created_by, because, created_at, visibility, signature, source }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    /// The open-ended `type` tag (`identity`, `pool`, `attestation`, …).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn created_by(&self) -> &Creator {
        &self.created_by
    }

    pub fn because(&self) -> &[Cid] {
        &self.because
    }

    pub fn created_at(&self) -> TimestampMs {
        self.created_at
    }

    pub fn visibility(&self) -> Option<&Visibility> {
        self.visibility.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Absent visibility means public.
    pub fn effective_visibility(&self) -> Visibility {
        self.visibility.clone().unwrap_or(Visibility::Public)
    }

    pub fn is_local_forever(&self) -> bool {
        matches!(self.visibility, Some(Visibility::LocalForever))
    }

    pub fn is_identity(&self) -> bool {
        self.kind == "identity"
    }

    /// Participant list for `participants_only` thoughts: identity CIDs or
    /// display names in `content.participants`.
    pub fn participants(&self) -> Vec<&str> {
        self.content
            .get("participants")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    // ── Canonical form ───────────────────────────────────────────────────────

    /// The canonical bytes the CID is derived from.
    pub fn cid_preimage(&self) -> Result<Vec<u8>, EncodeError> {
        cid_preimage(&self.kind, &self.content, &self.created_by, &self.because)
    }

    // ── JSON form (audit log, hello flows, RPC payloads) ─────────────────────

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("cid".into(), self.cid.to_string().into());
        obj.insert("type".into(), self.kind.clone().into());
        obj.insert("content".into(), self.content.to_json());
        obj.insert("created_by".into(), self.created_by.to_string().into());
        obj.insert(
            "because".into(),
            self.because.iter().map(|c| c.to_string()).collect::<Vec<_>>().into(),
        );
        obj.insert("created_at".into(), self.created_at.into());
        if let Some(v) = &self.visibility {
            obj.insert("visibility".into(), v.to_string().into());
        }
        obj.insert("signature".into(), self.signature.to_base64().into());
        if let Some(s) = &self.source {
            obj.insert("source".into(), s.clone().into());
        }
        serde_json::Value::Object(obj)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, WellspringError> {
        let field = |name: &str| {
            json.get(name)
                .ok_or_else(|| WellspringError::Serialization(format!("thought missing `{name}`")))
        };
        let str_field = |name: &str| {
            field(name)?.as_str().map(str::to_owned).ok_or_else(|| {
                WellspringError::Serialization(format!("thought field `{name}` is not a string"))
            })
        };

        let cid: Cid = str_field("cid")?.parse()?;
        let kind = str_field("type")?;
        let content = Value::from_json(field("content")?);
        let created_by: Creator = str_field("created_by")?.parse()?;
        let because = field("because")?
            .as_array()
            .ok_or_else(|| WellspringError::Serialization("`because` is not an array".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| {
                        WellspringError::Serialization("`because` entry is not a string".into())
                    })
                    .and_then(|s| s.parse::<Cid>())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let created_at = field("created_at")?
            .as_i64()
            .ok_or_else(|| WellspringError::Serialization("`created_at` is not an integer".into()))?;
        let visibility = match json.get("visibility").and_then(|v| v.as_str()) {
            Some(s) => Some(s.parse::<Visibility>()?),
            None => None,
        };
        let signature = Signature::from_base64(&str_field("signature")?)?;
        let source = json.get("source").and_then(|v| v.as_str()).map(str::to_owned);

        Ok(Self { cid, kind, content, created_by, because, created_at, visibility, signature, source })
    }
}

/// Canonical CID preimage for the given identity-bearing fields: the map
/// `{type, content, created_by, because}` with creators and antecedents as
/// raw 32-byte digests (GENESIS = 32 zero bytes).
pub fn cid_preimage(
    kind: &str,
    content: &Value,
    created_by: &Creator,
    because: &[Cid],
) -> Result<Vec<u8>, EncodeError> {
    let map = Value::map([
        ("type", Value::text(kind)),
        ("content", content.clone()),
        ("created_by", Value::bytes(created_by.preimage_bytes().to_vec())),
        (
            "because",
            Value::array(because.iter().map(|c| Value::bytes(c.digest().to_vec()))),
        ),
    ]);
    canonical_bytes(&map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CidAlgo;

    fn sample() -> Thought {
        let creator = Cid::new(CidAlgo::Blake3, [1u8; 32]);
        Thought::assemble(
            Cid::new(CidAlgo::Blake3, [9u8; 32]),
            "basic".into(),
            Value::map([("text", Value::text("Hello, WoT!"))]),
            Creator::Identity(creator),
            vec![Cid::new(CidAlgo::Blake3, [2u8; 32])],
            1_760_000_000_000,
            Some(Visibility::LocalForever),
            Signature(vec![0u8; 64]),
            Some("test/unit".into()),
        )
    }

    #[test]
    fn json_round_trip() {
        let t = sample();
        let json = t.to_json();
        assert_eq!(json["type"], "basic");
        assert_eq!(json["visibility"], "local_forever");
        let back = Thought::from_json(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn preimage_ignores_transport_metadata() {
        let a = sample();
        let mut json = a.to_json();
        json.as_object_mut().unwrap().remove("visibility");
        json["created_at"] = 0.into();
        let b = Thought::from_json(&json).unwrap();
        assert_eq!(a.cid_preimage().unwrap(), b.cid_preimage().unwrap());
    }

    #[test]
    fn participants_extracted_from_content() {
        let t = Thought::assemble(
            Cid::new(CidAlgo::Blake3, [3u8; 32]),
            "message".into(),
            Value::map([(
                "participants",
                Value::array([Value::text("Alice"), Value::text("Bob")]),
            )]),
            Creator::Genesis,
            vec![],
            0,
            Some(Visibility::ParticipantsOnly),
            Signature(vec![]),
            None,
        );
        assert_eq!(t.participants(), vec!["Alice", "Bob"]);
    }
}
