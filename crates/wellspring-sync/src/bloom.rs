use wellspring_core::constants::{BLOOM_DEFAULT_K, BLOOM_DEFAULT_M};
use wellspring_core::{Cid, WellspringError};

/// Approximate-membership filter over a node's CID set.
///
/// Index derivation is double hashing over the CID digest: with
/// `h1, h2` taken from the BLAKE3 of the digest, probe `i` lands at
/// `(h1 + i·h2) mod m`. False positives withhold a thought for one round;
/// there are no false negatives.
#[derive(Clone, Debug, PartialEq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    m: u32,
    k: u32,
    count: u64,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(BLOOM_DEFAULT_M, BLOOM_DEFAULT_K)
    }
}

impl BloomFilter {
    pub fn new(m: u32, k: u32) -> Self {
        Self { bits: vec![0u8; m.div_ceil(8) as usize], m, k, count: 0 }
    }

    /// Build a filter over an existing CID set with default parameters.
    pub fn from_cids<'a>(cids: impl IntoIterator<Item = &'a Cid>) -> Self {
        let mut filter = Self::default();
        for cid in cids {
            filter.insert(cid);
        }
        filter
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    /// Number of inserted CIDs (exact, carried alongside the bits).
    pub fn count(&self) -> u64 {
        self.count
    }

    fn probes(&self, cid: &Cid) -> impl Iterator<Item = u32> + '_ {
        let hash = blake3::hash(cid.digest());
        let bytes = hash.as_bytes();
        let h1 = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let h2 = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
        let m = u64::from(self.m);
        (0..u64::from(self.k)).map(move |i| ((h1.wrapping_add(i.wrapping_mul(h2))) % m) as u32)
    }

    pub fn insert(&mut self, cid: &Cid) {
        let probes: Vec<u32> = self.probes(cid).collect();
        for bit in probes {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        self.count += 1;
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.probes(cid)
            .all(|bit| self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0)
    }

    // ── Wire form ────────────────────────────────────────────────────────────

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bits)
    }

    pub fn from_hex(bits_hex: &str, m: u32, k: u32, count: u64) -> Result<Self, WellspringError> {
        let bits = hex::decode(bits_hex)
            .map_err(|e| WellspringError::Serialization(format!("bad bloom hex: {e}")))?;
        if bits.len() != m.div_ceil(8) as usize {
            return Err(WellspringError::Serialization(format!(
                "bloom bits length {} does not match m={m}",
                bits.len()
            )));
        }
        Ok(Self { bits, m, k, count })
    }
}
