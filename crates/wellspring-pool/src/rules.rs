use wellspring_core::constants::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_WATERLINE, TRUST_DECAY};
use wellspring_core::{AppetiteStatus, Cid, Thought, Value};

/// Ingestion and retrieval rules carried in a pool thought's `rules` record
/// and updated by chained `pool_config` thoughts.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolRules {
    /// Minimum relevance a query result must meet to surface.
    pub waterline: f64,
    /// Accepted thought types; empty accepts anything.
    pub accepted_schemas: Vec<String>,
    /// Reject (downgrade) thoughts with an empty `because` list.
    pub require_because: bool,
    /// Cap on a thought's canonical payload size.
    pub max_payload_bytes: usize,
    /// Per-hour recency decay used by trust-weighted retrieval.
    pub trust_decay: Option<f64>,
    /// Unit tag for `created_at` values accepted into this pool.
    pub timestamp_unit: String,
}

impl Default for PoolRules {
    fn default() -> Self {
        Self {
            waterline: DEFAULT_WATERLINE,
            accepted_schemas: Vec::new(),
            require_because: false,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            trust_decay: None,
            timestamp_unit: "ms".into(),
        }
    }
}

impl PoolRules {
    pub fn from_value(value: &Value) -> Self {
        let mut rules = Self::default();
        if let Some(w) = value.get("waterline").and_then(Value::as_f64) {
            rules.waterline = w.clamp(0.0, 1.0);
        }
        if let Some(schemas) = value.get("accepted_schemas").and_then(Value::as_array) {
            rules.accepted_schemas =
                schemas.iter().filter_map(Value::as_str).map(str::to_owned).collect();
        }
        if let Some(b) = value.get("require_because").and_then(Value::as_bool) {
            rules.require_because = b;
        }
        if let Some(n) = value.get("max_payload_bytes").and_then(Value::as_i64) {
            rules.max_payload_bytes = n.max(0) as usize;
        }
        if let Some(d) = value.get("trust_decay").and_then(Value::as_f64) {
            rules.trust_decay = Some(d);
        }
        if let Some(u) = value.get("timestamp_unit").and_then(Value::as_str) {
            rules.timestamp_unit = u.to_owned();
        }
        rules
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![
            ("waterline".to_string(), Value::Float(self.waterline)),
            (
                "accepted_schemas".to_string(),
                Value::array(self.accepted_schemas.iter().map(|s| Value::text(s.clone()))),
            ),
            ("require_because".to_string(), Value::Bool(self.require_because)),
            ("max_payload_bytes".to_string(), Value::Int(self.max_payload_bytes as i64)),
            ("timestamp_unit".to_string(), Value::text(self.timestamp_unit.clone())),
        ];
        if let Some(d) = self.trust_decay {
            entries.push(("trust_decay".to_string(), Value::Float(d)));
        }
        Value::map(entries)
    }

    /// Ingest-side rule check. Violations downgrade the thought's appetite
    /// rather than rejecting it — the signature is already verified by the
    /// time rules run, so the thought is kept at reduced weight.
    pub fn check_ingest(&self, thought: &Thought, payload_len: usize) -> RuleCheck {
        if !self.accepted_schemas.is_empty()
            && !self.accepted_schemas.iter().any(|s| s == thought.kind())
        {
            return RuleCheck::Downgrade(
                AppetiteStatus::UnauthorizedClaim,
                format!("type `{}` not in accepted schema list", thought.kind()),
            );
        }
        if self.require_because && thought.because().is_empty() {
            return RuleCheck::Downgrade(
                AppetiteStatus::Flagged,
                "pool requires a non-empty because chain".into(),
            );
        }
        if payload_len > self.max_payload_bytes {
            return RuleCheck::Downgrade(
                AppetiteStatus::Flagged,
                format!("payload {payload_len}b exceeds cap {}b", self.max_payload_bytes),
            );
        }
        RuleCheck::Accept
    }
}

/// Outcome of the ingest rule check.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleCheck {
    Accept,
    Downgrade(AppetiteStatus, String),
}

/// A pool as resolved from its defining thought plus any config chain.
#[derive(Clone, Debug)]
pub struct Pool {
    pub cid: Cid,
    pub name: String,
    pub admin: Option<Cid>,
    pub rules: PoolRules,
    /// Newest thought in the config chain (the pool thought itself until a
    /// `pool_config` supersedes it).
    pub config_head: Cid,
}

impl Pool {
    /// Interpret a `pool` thought. Returns `None` for anything else.
    pub fn from_thought(thought: &Thought) -> Option<Self> {
        if thought.kind() != "pool" {
            return None;
        }
        let content = thought.content();
        let name = content.str_field("name").unwrap_or("unnamed").to_owned();
        let admin = content
            .str_field("admin")
            .and_then(|s| s.parse::<Cid>().ok())
            .or_else(|| thought.created_by().as_cid().cloned());
        let rules = content.get("rules").map(PoolRules::from_value).unwrap_or_default();
        Some(Self {
            cid: thought.cid().clone(),
            name,
            admin,
            rules,
            config_head: thought.cid().clone(),
        })
    }

    /// Apply a `pool_config` thought chained (via `because`) to the current
    /// config head. Stale configs not referencing the head are ignored.
    pub fn apply_config(&mut self, thought: &Thought) -> bool {
        if thought.kind() != "pool_config" {
            return false;
        }
        if !thought.because().contains(&self.config_head) {
            return false;
        }
        if let Some(rules) = thought.content().get("rules") {
            self.rules = PoolRules::from_value(rules);
        }
        self.config_head = thought.cid().clone();
        true
    }
}
