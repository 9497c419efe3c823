use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WellspringError;

/// Logical timestamp: milliseconds since the Unix epoch (UTC).
/// Never used to resolve conflicts — ordering hints only.
pub type TimestampMs = i64;

// ── CidAlgo ──────────────────────────────────────────────────────────────────

/// Hash function a CID was derived with. A deployment commits to one and tags
/// every CID accordingly; stores may still hold legacy-tagged CIDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CidAlgo {
    /// BLAKE3-256 — the test-vector reference algorithm.
    Blake3,
    /// SHA-256 — legacy dogfood imports.
    Sha256,
}

impl CidAlgo {
    /// Multihash function code used in the binary wire form.
    pub fn multihash_code(&self) -> u8 {
        match self {
            CidAlgo::Blake3 => 0x1e,
            CidAlgo::Sha256 => 0x12,
        }
    }

    pub fn from_multihash_code(code: u8) -> Option<Self> {
        match code {
            0x1e => Some(CidAlgo::Blake3),
            0x12 => Some(CidAlgo::Sha256),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CidAlgo::Blake3 => "blake3",
            CidAlgo::Sha256 => "sha256",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "blake3" => Some(CidAlgo::Blake3),
            "sha256" => Some(CidAlgo::Sha256),
            _ => None,
        }
    }
}

// ── Cid ──────────────────────────────────────────────────────────────────────

/// Content identifier: a tagged 256-bit digest of a thought's canonical bytes.
///
/// Text form is `cid:<algo>:<hex64>`. The binary wire form is 36 bytes:
/// CIDv1 (0x01), dag-cbor (0x71), the multihash code, the digest length
/// (0x20), then the 32-byte digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid {
    algo: CidAlgo,
    digest: [u8; 32],
}

/// Length of the binary wire form.
pub const CID_WIRE_LEN: usize = 36;

impl Cid {
    pub fn new(algo: CidAlgo, digest: [u8; 32]) -> Self {
        Self { algo, digest }
    }

    pub fn algo(&self) -> CidAlgo {
        self.algo
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// 36-byte multiformat wire encoding. This is also the message that
    /// thought signatures cover.
    pub fn to_wire(&self) -> [u8; CID_WIRE_LEN] {
        let mut out = [0u8; CID_WIRE_LEN];
        out[0] = 0x01; // CIDv1
        out[1] = 0x71; // dag-cbor
        out[2] = self.algo.multihash_code();
        out[3] = 0x20; // 32-byte digest
        out[4..].copy_from_slice(&self.digest);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, WellspringError> {
        if bytes.len() != CID_WIRE_LEN || bytes[0] != 0x01 || bytes[1] != 0x71 || bytes[3] != 0x20 {
            return Err(WellspringError::InvalidCid(format!(
                "bad wire header ({} bytes)",
                bytes.len()
            )));
        }
        let algo = CidAlgo::from_multihash_code(bytes[2])
            .ok_or_else(|| WellspringError::InvalidCid(format!("unknown hash code {:#x}", bytes[2])))?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[4..]);
        Ok(Self { algo, digest })
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{}:{}", self.algo.name(), self.to_hex())
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}:{}…)", self.algo.name(), &self.to_hex()[..12])
    }
}

impl FromStr for Cid {
    type Err = WellspringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (prefix, algo, digest_hex) = (parts.next(), parts.next(), parts.next());
        let (Some("cid"), Some(algo), Some(digest_hex)) = (prefix, algo, digest_hex) else {
            return Err(WellspringError::InvalidCid(s.to_string()));
        };
        let algo =
            CidAlgo::from_name(algo).ok_or_else(|| WellspringError::InvalidCid(s.to_string()))?;
        let bytes =
            hex::decode(digest_hex).map_err(|_| WellspringError::InvalidCid(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(WellspringError::InvalidCid(s.to_string()));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes);
        Ok(Self { algo, digest })
    }
}

// ── Creator ──────────────────────────────────────────────────────────────────

/// The `created_by` field: either the CID of the signing identity thought, or
/// the GENESIS sentinel used by self-bootstrapping identities.
///
/// GENESIS encodes as 32 zero bytes in the CID preimage; an identity thought
/// carrying it declares its own public key in `content.pubkey` and is
/// verified against that inline key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Creator {
    Genesis,
    Identity(Cid),
}

impl Creator {
    /// The 32 bytes this creator contributes to the CID preimage.
    pub fn preimage_bytes(&self) -> [u8; 32] {
        match self {
            Creator::Genesis => [0u8; 32],
            Creator::Identity(cid) => *cid.digest(),
        }
    }

    pub fn as_cid(&self) -> Option<&Cid> {
        match self {
            Creator::Genesis => None,
            Creator::Identity(cid) => Some(cid),
        }
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self, Creator::Genesis)
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Creator::Genesis => write!(f, "GENESIS"),
            Creator::Identity(cid) => write!(f, "{cid}"),
        }
    }
}

impl fmt::Debug for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Creator::Genesis => write!(f, "GENESIS"),
            Creator::Identity(cid) => write!(f, "{cid:?}"),
        }
    }
}

impl FromStr for Creator {
    type Err = WellspringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "GENESIS" {
            Ok(Creator::Genesis)
        } else {
            Ok(Creator::Identity(s.parse()?))
        }
    }
}

// ── Visibility ───────────────────────────────────────────────────────────────

/// Who a thought may be shared with. The *sender* evaluates this against a
/// candidate peer; absence of the field means public.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// Shareable with anyone (explicit form; absence means the same).
    Public,
    /// Never leaves this node. Secrets and provenance records live here.
    LocalForever,
    /// Shareable only with members of the referenced pool (or peers with a
    /// peering agreement designating the pool as shared).
    Pool(Cid),
    /// Shareable only with identities listed in `content.participants`.
    ParticipantsOnly,
    /// Unrecognized marker carried verbatim; the predicate withholds it.
    Other(String),
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::LocalForever => write!(f, "local_forever"),
            Visibility::Pool(cid) => write!(f, "pool:{cid}"),
            Visibility::ParticipantsOnly => write!(f, "participants_only"),
            Visibility::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for Visibility {
    type Err = WellspringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "local_forever" => Ok(Visibility::LocalForever),
            "participants_only" => Ok(Visibility::ParticipantsOnly),
            _ => {
                if let Some(rest) = s.strip_prefix("pool:") {
                    match rest.parse() {
                        Ok(cid) => Ok(Visibility::Pool(cid)),
                        Err(_) => Ok(Visibility::Other(s.to_string())),
                    }
                } else {
                    Ok(Visibility::Other(s.to_string()))
                }
            }
        }
    }
}

// ── AppetiteStatus ───────────────────────────────────────────────────────────

/// How warmly a pool received a thought at ingest. Drives the default trust
/// weight applied during retrieval; updatable later via attestation thoughts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppetiteStatus {
    Welcomed,
    UnauthorizedClaim,
    UnverifiedSource,
    LowTrustPath,
    PendingAttestation,
    Flagged,
}

impl AppetiteStatus {
    /// Default retrieval weight for each status.
    pub fn default_weight(&self) -> f64 {
        match self {
            AppetiteStatus::Welcomed => 1.0,
            AppetiteStatus::UnauthorizedClaim => 0.3,
            AppetiteStatus::UnverifiedSource => 0.5,
            AppetiteStatus::LowTrustPath => 0.4,
            AppetiteStatus::PendingAttestation => 0.0,
            AppetiteStatus::Flagged => 0.1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppetiteStatus::Welcomed => "welcomed",
            AppetiteStatus::UnauthorizedClaim => "unauthorized_claim",
            AppetiteStatus::UnverifiedSource => "unverified_source",
            AppetiteStatus::LowTrustPath => "low_trust_path",
            AppetiteStatus::PendingAttestation => "pending_attestation",
            AppetiteStatus::Flagged => "flagged",
        }
    }
}

// ── Signature ────────────────────────────────────────────────────────────────

/// Detached Ed25519 signature (64 bytes) over the 36-byte binary CID.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, WellspringError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Signature)
            .map_err(|e| WellspringError::Serialization(format!("bad signature base64: {e}")))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}b)", self.0.len())
    }
}
