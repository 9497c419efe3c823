use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wellspring_core::constants::{CHAIN_BOOST_FACTOR, RECENCY_FLOOR};
use wellspring_core::{AppetiteStatus, Cid, Thought, TimestampMs, WellspringError};

use crate::embed::{cosine_similarity, Embedder};

/// Metadata stored alongside each vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexRow {
    pub row_id: u64,
    pub cid: Cid,
    pub pool_cid: Option<Cid>,
    pub snippet: String,
    pub kind: String,
    pub created_at: TimestampMs,
    pub appetite_status: AppetiteStatus,
    pub trust_weight: f64,
    pub chain_depth: u32,
}

#[derive(Clone, Debug)]
pub struct QueryHit {
    pub cid: Cid,
    pub similarity: f64,
    pub relevance: f64,
    pub snippet: String,
}

#[derive(Clone, Debug)]
pub struct QueryOptions {
    pub pool: Option<Cid>,
    pub top_k: usize,
    pub waterline: f64,
    /// Per-hour relevance decay; `None` disables the recency term.
    pub decay_per_hour: Option<f64>,
    pub now: TimestampMs,
    /// Surface rows whose appetite is `pending_attestation` (suppressed by
    /// default).
    pub include_pending: bool,
}

impl QueryOptions {
    pub fn new(top_k: usize, waterline: f64, now: TimestampMs) -> Self {
        Self { pool: None, top_k, waterline, decay_per_hour: None, now, include_pending: false }
    }
}

struct Backend {
    _db: sled::Db,
    rows: sled::Tree,
    vectors: sled::Tree,
    by_cid: sled::Tree,
}

impl Backend {
    fn open(path: &Path) -> Result<Self, WellspringError> {
        let db = sled::open(path).map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        let rows = db.open_tree("rows").map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        let vectors =
            db.open_tree("vectors").map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        let by_cid =
            db.open_tree("by_cid").map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        Ok(Self { _db: db, rows, vectors, by_cid })
    }

    fn insert(&self, row: &IndexRow, vector: &[f32]) -> Result<(), WellspringError> {
        let key = row.row_id.to_be_bytes();
        let row_bytes =
            bincode::serialize(row).map_err(|e| WellspringError::Serialization(e.to_string()))?;
        let mut packed = Vec::with_capacity(vector.len() * 4);
        for v in vector {
            packed.extend_from_slice(&v.to_le_bytes());
        }
        self.vectors.insert(key, packed).map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        self.rows.insert(key, row_bytes).map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        let mut cid_key = row.cid.digest().to_vec();
        if let Some(pool) = &row.pool_cid {
            cid_key.extend_from_slice(pool.digest());
        }
        self.by_cid
            .insert(cid_key, &key[..])
            .map_err(|e| WellspringError::StoreIO(e.to_string()))?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, WellspringError> {
        self._db.generate_id().map_err(|e| WellspringError::StoreIO(e.to_string()))
    }
}

/// Disk-backed vector index over an `Embedder`.
///
/// Index backends have been observed failing under concurrent file locking
/// on synced filesystems; when a fallback location is configured, a failed
/// insert reconnects there and replays the insert instead of surfacing the
/// error.
pub struct SemanticIndex {
    backend: RwLock<Backend>,
    embedder: Box<dyn Embedder>,
    fallback: Option<PathBuf>,
    on_fallback: RwLock<bool>,
}

impl SemanticIndex {
    pub fn open<P: AsRef<Path>>(
        path: P,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, WellspringError> {
        Ok(Self {
            backend: RwLock::new(Backend::open(path.as_ref())?),
            embedder,
            fallback: None,
            on_fallback: RwLock::new(false),
        })
    }

    pub fn with_fallback<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.fallback = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.id()
    }

    /// Extract the text a thought is indexed under: preferred content fields
    /// first, then bare string content, then the serialized content value.
    pub fn indexable_text(thought: &Thought) -> Option<String> {
        if matches!(thought.kind(), "identity" | "pool") {
            return None;
        }
        const PREFERRED: [&str; 6] = ["text", "body", "title", "summary", "description", "name"];
        for field in PREFERRED {
            if let Some(s) = thought.content().str_field(field) {
                return Some(s.to_owned());
            }
        }
        if let Some(s) = thought.content().as_str() {
            return Some(s.to_owned());
        }
        Some(thought.content().to_json().to_string())
    }

    /// Embed and store one thought. Returns `None` for non-indexable kinds.
    pub fn index_thought(
        &self,
        thought: &Thought,
        pool_cid: Option<&Cid>,
        appetite: AppetiteStatus,
        trust_weight: f64,
        chain_depth: u32,
    ) -> Result<Option<u64>, WellspringError> {
        let Some(text) = Self::indexable_text(thought) else {
            return Ok(None);
        };
        let vector = self.embedder.embed(&text);
        let mut snippet = text;
        snippet.truncate(200);

        let backend = self.backend.read().expect("index lock poisoned");
        let row_id = backend.next_id()?;
        let row = IndexRow {
            row_id,
            cid: thought.cid().clone(),
            pool_cid: pool_cid.cloned(),
            snippet,
            kind: thought.kind().to_owned(),
            created_at: thought.created_at(),
            appetite_status: appetite,
            trust_weight,
            chain_depth,
        };

        match backend.insert(&row, &vector) {
            Ok(()) => {
                debug!(cid = %row.cid, row_id, "indexed thought");
                Ok(Some(row_id))
            }
            Err(first_err) => {
                drop(backend);
                self.reconnect_and_replay(&row, &vector, first_err)?;
                Ok(Some(row_id))
            }
        }
    }

    fn reconnect_and_replay(
        &self,
        row: &IndexRow,
        vector: &[f32],
        first_err: WellspringError,
    ) -> Result<(), WellspringError> {
        let Some(fallback) = &self.fallback else { return Err(first_err) };
        if *self.on_fallback.read().expect("index lock poisoned") {
            return Err(first_err);
        }
        warn!(error = %first_err, fallback = %fallback.display(), "index backend failed; reconnecting");
        let replacement = Backend::open(fallback)?;
        replacement.insert(row, vector)?;
        *self.backend.write().expect("index lock poisoned") = replacement;
        *self.on_fallback.write().expect("index lock poisoned") = true;
        Ok(())
    }

    /// Update the stored trust weight / appetite of an indexed thought
    /// (appetite statuses are updatable via later thoughts).
    pub fn reweigh(
        &self,
        cid: &Cid,
        appetite: AppetiteStatus,
        trust_weight: f64,
    ) -> Result<bool, WellspringError> {
        let backend = self.backend.read().expect("index lock poisoned");
        let mut changed = false;
        for item in backend.rows.iter() {
            let (key, bytes) = item.map_err(|e| WellspringError::StoreIO(e.to_string()))?;
            let mut row: IndexRow = bincode::deserialize(&bytes)
                .map_err(|e| WellspringError::Serialization(e.to_string()))?;
            if &row.cid != cid {
                continue;
            }
            row.appetite_status = appetite;
            row.trust_weight = trust_weight;
            let updated = bincode::serialize(&row)
                .map_err(|e| WellspringError::Serialization(e.to_string()))?;
            backend
                .rows
                .insert(key, updated)
                .map_err(|e| WellspringError::StoreIO(e.to_string()))?;
            changed = true;
        }
        Ok(changed)
    }

    /// Trust-weighted retrieval:
    /// `relevance = similarity × trust_weight × chain_boost × recency`,
    /// waterline-filtered, descending, top-k.
    pub fn query(
        &self,
        text: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<QueryHit>, WellspringError> {
        let query_vec = self.embedder.embed(text);
        let backend = self.backend.read().expect("index lock poisoned");
        let mut hits = Vec::new();

        for item in backend.rows.iter() {
            let (key, bytes) = item.map_err(|e| WellspringError::StoreIO(e.to_string()))?;
            let row: IndexRow = bincode::deserialize(&bytes)
                .map_err(|e| WellspringError::Serialization(e.to_string()))?;

            if let Some(pool) = &opts.pool {
                if row.pool_cid.as_ref() != Some(pool) {
                    continue;
                }
            }
            if row.appetite_status == AppetiteStatus::PendingAttestation && !opts.include_pending {
                continue;
            }

            let Some(packed) = backend
                .vectors
                .get(&key)
                .map_err(|e| WellspringError::StoreIO(e.to_string()))?
            else {
                continue;
            };
            let vector: Vec<f32> = packed
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            let similarity = cosine_similarity(&query_vec, &vector);
            let chain_boost = 1.0 / (1.0 + CHAIN_BOOST_FACTOR * f64::from(row.chain_depth));
            let recency = match opts.decay_per_hour {
                Some(decay) => {
                    let hours = (opts.now - row.created_at).max(0) as f64 / 3_600_000.0;
                    (1.0 - decay * hours).max(RECENCY_FLOOR)
                }
                None => 1.0,
            };
            let relevance = similarity * row.trust_weight * chain_boost * recency;
            if relevance < opts.waterline {
                continue;
            }
            hits.push(QueryHit { cid: row.cid, similarity, relevance, snippet: row.snippet });
        }

        hits.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        hits.truncate(opts.top_k);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.backend.read().expect("index lock poisoned").rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
