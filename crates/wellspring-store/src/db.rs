use std::path::Path;

use tracing::debug;

use wellspring_core::{Cid, Thought, TimestampMs, Value, WellspringError};
use wellspring_crypto::{check_cid, verify_thought, VerifyError};

use crate::log::AuditLog;

/// Persistent thought database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   thoughts    — digest bytes                    → bincode(Thought)
///   by_type     — type utf8 ++ 0x00 ++ digest     → [] (membership)
///   by_creator  — creator digest ++ digest        → [] (membership)
///   by_time     — created_at be64 ++ digest       → [] (membership)
///   provenance  — digest                          → peer identity digest ++ algo byte
///   dedupe      — truncated blake3(type+content)  → digest
///   meta        — utf8 key                        → raw bytes
pub struct ThoughtStore {
    _db: sled::Db,
    thoughts: sled::Tree,
    by_type: sled::Tree,
    by_creator: sled::Tree,
    by_time: sled::Tree,
    provenance: sled::Tree,
    dedupe: sled::Tree,
    meta: sled::Tree,
    audit: Option<AuditLog>,
}

fn storage_err(e: impl std::fmt::Display) -> WellspringError {
    WellspringError::StoreIO(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> WellspringError {
    WellspringError::Serialization(e.to_string())
}

impl ThoughtStore {
    /// Open or create the store at `path`, without an audit log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WellspringError> {
        Self::open_inner(path, None)
    }

    /// Open or create the store with an audit log at `log_path`.
    pub fn open_with_log<P: AsRef<Path>, Q: AsRef<Path>>(
        path: P,
        log_path: Q,
    ) -> Result<Self, WellspringError> {
        let audit = AuditLog::open(log_path)?;
        Self::open_inner(path, Some(audit))
    }

    fn open_inner<P: AsRef<Path>>(path: P, audit: Option<AuditLog>) -> Result<Self, WellspringError> {
        let db = sled::open(path).map_err(storage_err)?;
        let thoughts   = db.open_tree("thoughts").map_err(storage_err)?;
        let by_type    = db.open_tree("by_type").map_err(storage_err)?;
        let by_creator = db.open_tree("by_creator").map_err(storage_err)?;
        let by_time    = db.open_tree("by_time").map_err(storage_err)?;
        let provenance = db.open_tree("provenance").map_err(storage_err)?;
        let dedupe     = db.open_tree("dedupe").map_err(storage_err)?;
        let meta       = db.open_tree("meta").map_err(storage_err)?;
        Ok(Self { _db: db, thoughts, by_type, by_creator, by_time, provenance, dedupe, meta, audit })
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Store a thought. Idempotent: a known CID is a no-op returning `false`.
    ///
    /// The CID is recomputed from canonical bytes and the signature verified
    /// against the creator's stored identity thought before anything is
    /// written; `UnknownIdentity` callers (sync ingest) defer and retry.
    /// Secondary index entries are written before the authoritative record,
    /// so a crash can only leave orphan index entries that readers ignore.
    pub fn put(&self, thought: &Thought) -> Result<bool, WellspringError> {
        if self.contains(thought.cid()) {
            return Ok(false);
        }

        check_cid(thought)?;
        verify_thought(thought, |cid| self.get_identity(cid)).map_err(|e| match e {
            VerifyError::Missing(id) => WellspringError::UnknownIdentity(id),
            VerifyError::BadKey(msg) => WellspringError::BadKey(msg),
            VerifyError::BadSig => WellspringError::BadSignature,
        })?;

        let digest = thought.cid().digest();
        let bytes = bincode::serialize(thought).map_err(ser_err)?;

        self.by_type
            .insert(type_key(thought.kind(), digest), &[][..])
            .map_err(storage_err)?;
        if let Some(creator) = thought.created_by().as_cid() {
            let mut key = creator.digest().to_vec();
            key.extend_from_slice(digest);
            self.by_creator.insert(key, &[][..]).map_err(storage_err)?;
        }
        self.by_time
            .insert(time_key(thought.created_at(), digest), &[][..])
            .map_err(storage_err)?;
        self.thoughts.insert(digest, bytes).map_err(storage_err)?;

        if let Some(audit) = &self.audit {
            audit.append(thought)?;
        }
        debug!(cid = %thought.cid(), kind = %thought.kind(), "stored thought");
        Ok(true)
    }

    /// Record which peer delivered `thought_cid` (fast lookup mirror of the
    /// `received_via` provenance connection thought).
    pub fn record_provenance(&self, thought_cid: &Cid, via: &Cid) -> Result<(), WellspringError> {
        self.provenance
            .insert(thought_cid.digest(), &via.to_wire()[..])
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn provenance_of(&self, thought_cid: &Cid) -> Result<Option<Cid>, WellspringError> {
        match self.provenance.get(thought_cid.digest()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(Cid::from_wire(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn get(&self, cid: &Cid) -> Result<Option<Thought>, WellspringError> {
        match self.thoughts.get(cid.digest()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.thoughts.contains_key(cid.digest()).unwrap_or(false)
    }

    /// Identity-thought lookup used as the verification resolver.
    pub fn get_identity(&self, cid: &Cid) -> Option<Thought> {
        self.get(cid).ok().flatten().filter(Thought::is_identity)
    }

    /// Query by optional type and creator, newest first, capped at `limit`.
    pub fn query(
        &self,
        kind: Option<&str>,
        creator: Option<&Cid>,
        limit: usize,
    ) -> Result<Vec<Thought>, WellspringError> {
        let mut out = Vec::new();
        // Walk by_time newest-first so the limit keeps recent thoughts.
        for item in self.by_time.iter().rev() {
            let (key, _) = item.map_err(storage_err)?;
            let Some(thought) = self.get_by_digest(&key[8..])? else { continue };
            if let Some(k) = kind {
                if thought.kind() != k {
                    continue;
                }
            }
            if let Some(c) = creator {
                if thought.created_by().as_cid() != Some(c) {
                    continue;
                }
            }
            out.push(thought);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// All thoughts with `created_at >= since`, oldest first.
    pub fn iter_since(&self, since: TimestampMs) -> Result<Vec<Thought>, WellspringError> {
        let start = time_key(since, &[0u8; 32]);
        let mut out = Vec::new();
        for item in self.by_time.range(start..) {
            let (key, _) = item.map_err(storage_err)?;
            if let Some(t) = self.get_by_digest(&key[8..])? {
                out.push(t);
            }
        }
        Ok(out)
    }

    /// Every stored thought, insertion-key order. Used by sync selection.
    pub fn iter_all(&self) -> Result<Vec<Thought>, WellspringError> {
        let mut out = Vec::new();
        for item in self.thoughts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// Every stored CID. Feeds the sync bloom filter.
    pub fn all_cids(&self) -> Result<Vec<Cid>, WellspringError> {
        Ok(self.iter_all()?.into_iter().map(|t| t.cid().clone()).collect())
    }

    pub fn count(&self) -> u64 {
        self.thoughts.len() as u64
    }

    fn get_by_digest(&self, digest: &[u8]) -> Result<Option<Thought>, WellspringError> {
        match self.thoughts.get(digest).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None), // orphan index entry from an interrupted put
        }
    }

    // ── Semantic deduplication (owner-side policy) ───────────────────────────

    /// Truncated content hash for pre-CID deduplication of locally created
    /// thoughts. Deliberately independent of `created_by`; never applied to
    /// thoughts arriving from peers.
    pub fn dedupe_key(kind: &str, content: &Value) -> Result<[u8; 16], WellspringError> {
        let map = Value::map([("type", Value::text(kind)), ("content", content.clone())]);
        let canonical = wellspring_core::canonical_bytes(&map)?;
        let hash = blake3::hash(&canonical);
        let mut key = [0u8; 16];
        key.copy_from_slice(&hash.as_bytes()[..16]);
        Ok(key)
    }

    /// Look up an earlier local thought with the same `(type, content)`.
    pub fn find_semantic_duplicate(
        &self,
        kind: &str,
        content: &Value,
    ) -> Result<Option<Cid>, WellspringError> {
        let key = Self::dedupe_key(kind, content)?;
        match self.dedupe.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(Cid::from_wire(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Register a locally created thought in the dedupe table.
    pub fn register_dedupe(&self, thought: &Thought) -> Result<(), WellspringError> {
        let key = Self::dedupe_key(thought.kind(), thought.content())?;
        self.dedupe
            .insert(key, &thought.cid().to_wire()[..])
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), WellspringError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, WellspringError> {
        Ok(self.meta.get(key.as_bytes()).map_err(storage_err)?.map(|v| v.to_vec()))
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), WellspringError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn type_key(kind: &str, digest: &[u8; 32]) -> Vec<u8> {
    let mut key = kind.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(digest);
    key
}

fn time_key(at: TimestampMs, digest: &[u8]) -> Vec<u8> {
    // Offset so that i64 timestamps sort correctly as unsigned big-endian.
    let shifted = (at as i128 - i64::MIN as i128) as u64;
    let mut key = shifted.to_be_bytes().to_vec();
    key.extend_from_slice(digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wellspring_core::{CidAlgo, Creator, Visibility};
    use wellspring_crypto::{KeyPair, ThoughtDraft};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    struct TestDir(PathBuf);

    impl TestDir {
        fn new(label: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "wellspring-store-{label}-{}-{}",
                std::process::id(),
                DIR_SEQ.fetch_add(1, Ordering::SeqCst)
            ));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn identity(kp: &KeyPair, name: &str, at: i64) -> Thought {
        ThoughtDraft::new(
            "identity",
            Value::map([("name", Value::text(name)), ("pubkey", Value::text(kp.public_tag()))]),
        )
        .forge(kp, Creator::Genesis, CidAlgo::Blake3, at)
        .unwrap()
    }

    fn note(kp: &KeyPair, id: &Thought, text: &str, at: i64) -> Thought {
        ThoughtDraft::new("basic", Value::map([("text", Value::text(text))]))
            .because(vec![id.cid().clone()])
            .forge(kp, Creator::Identity(id.cid().clone()), CidAlgo::Blake3, at)
            .unwrap()
    }

    #[test]
    fn put_get_round_trip() {
        let dir = TestDir::new("roundtrip");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);

        assert!(store.put(&id).unwrap());
        let loaded = store.get(id.cid()).unwrap().unwrap();
        assert_eq!(loaded, id);
    }

    #[test]
    fn put_is_idempotent() {
        let dir = TestDir::new("idem");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);

        assert!(store.put(&id).unwrap());
        assert!(!store.put(&id).unwrap());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn put_rejects_unknown_creator() {
        let dir = TestDir::new("unknown");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        let n = note(&kp, &id, "hello", 2_000);

        // The note's creator identity is not stored yet.
        assert!(matches!(store.put(&n), Err(WellspringError::UnknownIdentity(_))));
        store.put(&id).unwrap();
        assert!(store.put(&n).unwrap());
    }

    #[test]
    fn query_filters_by_type_and_creator() {
        let dir = TestDir::new("query");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        store.put(&id).unwrap();
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            store.put(&note(&kp, &id, text, 2_000 + i as i64)).unwrap();
        }

        let basics = store.query(Some("basic"), None, 10).unwrap();
        assert_eq!(basics.len(), 3);
        // Newest first.
        assert_eq!(basics[0].content().str_field("text"), Some("c"));

        let by_alice = store.query(None, Some(id.cid()), 10).unwrap();
        assert_eq!(by_alice.len(), 3);

        let capped = store.query(Some("basic"), None, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn iter_since_respects_timestamps() {
        let dir = TestDir::new("since");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        store.put(&id).unwrap();
        store.put(&note(&kp, &id, "old", 2_000)).unwrap();
        store.put(&note(&kp, &id, "new", 5_000)).unwrap();

        let recent = store.iter_since(3_000).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content().str_field("text"), Some("new"));
    }

    #[test]
    fn audit_log_one_line_per_put() {
        let dir = TestDir::new("audit");
        let log_path = dir.0.join("audit.jsonl");
        let store = ThoughtStore::open_with_log(dir.0.join("db"), &log_path).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);

        store.put(&id).unwrap();
        store.put(&id).unwrap(); // no-op must not append

        let lines = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(lines.lines().count(), 1);
        let replayed = crate::log::AuditLog::replay(&log_path).unwrap();
        assert_eq!(replayed[0], id);
    }

    #[test]
    fn provenance_round_trip() {
        let dir = TestDir::new("prov");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        let peer = identity(&KeyPair::generate(), "Bob", 1_001);
        store.put(&id).unwrap();

        store.record_provenance(id.cid(), peer.cid()).unwrap();
        assert_eq!(store.provenance_of(id.cid()).unwrap().as_ref(), Some(peer.cid()));
        assert_eq!(store.provenance_of(peer.cid()).unwrap(), None);
    }

    #[test]
    fn semantic_dedupe_is_creator_independent() {
        let dir = TestDir::new("dedupe");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        store.put(&id).unwrap();
        let n = note(&kp, &id, "same text", 2_000);
        store.put(&n).unwrap();
        store.register_dedupe(&n).unwrap();

        let dup = store
            .find_semantic_duplicate("basic", &Value::map([("text", Value::text("same text"))]))
            .unwrap();
        assert_eq!(dup.as_ref(), Some(n.cid()));
    }

    #[test]
    fn tampered_thought_rejected() {
        let dir = TestDir::new("tamper");
        let store = ThoughtStore::open(dir.0.join("db")).unwrap();
        let kp = KeyPair::generate();
        let id = identity(&kp, "Alice", 1_000);
        store.put(&id).unwrap();
        let n = note(&kp, &id, "original", 2_000);

        let mut json = n.to_json();
        json["content"]["text"] = "evil".into();
        let forged = Thought::from_json(&json).unwrap();
        assert!(matches!(store.put(&forged), Err(WellspringError::CidMismatch { .. })));
    }
}
