use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use wellspring_core::constants::{
    APPETITE_ATTACK_THRESHOLD, APPETITE_EXPECTATION_BOOST, APPETITE_TRUSTED_RATE,
    APPETITE_UNKNOWN_RATE, TRUSTED_SENDER_THRESHOLD,
};
use wellspring_core::{Cid, Thought, TimestampMs};

/// Per-category rate limits, read from the newest `appetite` aspect thought.
/// No hardcoded policy — everything comes from the thought graph; these
/// defaults only cover a node that has not yet seeded one.
#[derive(Clone, Debug, PartialEq)]
pub struct AppetiteLimits {
    /// Unknown senders: messages per hour.
    pub unknown_rate: u32,
    /// Trusted senders (trust ≥ 0.8): messages per hour.
    pub trusted_rate: u32,
    /// Multiplier applied to `unknown_rate` for expected senders.
    pub expectation_boost: u32,
    /// Total messages/hour that flips attack mode.
    pub attack_threshold: u32,
    /// When set, unknown senders are rejected outright.
    pub attack_mode: bool,
}

impl Default for AppetiteLimits {
    fn default() -> Self {
        Self {
            unknown_rate: APPETITE_UNKNOWN_RATE,
            trusted_rate: APPETITE_TRUSTED_RATE,
            expectation_boost: APPETITE_EXPECTATION_BOOST,
            attack_threshold: APPETITE_ATTACK_THRESHOLD,
            attack_mode: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenderCategory {
    Trusted,
    Expected,
    Unknown,
}

impl SenderCategory {
    pub fn name(&self) -> &'static str {
        match self {
            SenderCategory::Trusted => "trusted",
            SenderCategory::Expected => "expected",
            SenderCategory::Unknown => "unknown",
        }
    }
}

/// Outcome of evaluating one incoming message against the appetite.
#[derive(Clone, Debug, PartialEq)]
pub enum RateDecision {
    Allowed(SenderCategory),
    /// Over the limit but from a known quantity — the caller may queue.
    Queued(SenderCategory),
    Rejected(String),
}

#[derive(Clone, Debug)]
struct Expectation {
    expires: Option<TimestampMs>,
}

/// Rate-limiting engine driven by aspect thoughts.
#[derive(Clone, Debug, Default)]
pub struct AppetiteEngine {
    limits: AppetiteLimits,
    /// Newest appetite aspect thought (the chain head for updates). Until
    /// one is observed the engine classifies and counts but enforces
    /// nothing — limits come from the thought graph, not from code.
    config_head: Option<Cid>,
    config_at: TimestampMs,
    /// channel → expectation.
    expectations: HashMap<String, Expectation>,
    /// (sender, arrival) log for windowed counting.
    log: VecDeque<(Cid, TimestampMs)>,
    /// Set when traffic crossed the threshold and no aspect thought has
    /// materialized the flip yet.
    pending_attack_flip: bool,
}

const HOUR_MS: i64 = 3_600_000;

impl AppetiteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(&self) -> &AppetiteLimits {
        &self.limits
    }

    /// CID of the appetite aspect thought currently in force.
    pub fn config_head(&self) -> Option<&Cid> {
        self.config_head.as_ref()
    }

    /// True once traffic crossed `attack_threshold`; the node materializes
    /// the flip as a new appetite aspect thought and feeds it back through
    /// `observe`, which clears this flag.
    pub fn attack_flip_pending(&self) -> bool {
        self.pending_attack_flip
    }

    // ── Thought ingestion ────────────────────────────────────────────────────

    pub fn observe(&mut self, thought: &Thought) {
        match thought.kind() {
            "aspect" => {
                if thought.content().str_field("aspect_type") != Some("appetite") {
                    return;
                }
                if thought.created_at() < self.config_at {
                    return; // stale config
                }
                let limits = thought.content().get("limits");
                let mut next = AppetiteLimits::default();
                if let Some(l) = limits {
                    if let Some(n) = l.get("unknown_rate").and_then(|v| v.as_i64()) {
                        next.unknown_rate = n.max(0) as u32;
                    }
                    if let Some(n) = l.get("trusted_rate").and_then(|v| v.as_i64()) {
                        next.trusted_rate = n.max(0) as u32;
                    }
                    if let Some(n) = l.get("expectation_boost").and_then(|v| v.as_i64()) {
                        next.expectation_boost = n.max(0) as u32;
                    }
                    if let Some(n) = l.get("attack_threshold").and_then(|v| v.as_i64()) {
                        next.attack_threshold = n.max(0) as u32;
                    }
                    if let Some(b) = l.get("attack_mode").and_then(|v| v.as_bool()) {
                        next.attack_mode = b;
                    }
                }
                debug!(?next, "appetite configured");
                self.limits = next;
                self.config_head = Some(thought.cid().clone());
                self.config_at = thought.created_at();
                self.pending_attack_flip = false;
            }
            "expectation" => {
                let content = thought.content();
                let Some(channel) = content.str_field("expecting_channel") else { return };
                let expires = content
                    .str_field("expires")
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.timestamp_millis())
                    .or_else(|| content.get("expires").and_then(|v| v.as_i64()));
                debug!(
                    name = content.str_field("expecting_name").unwrap_or("unknown"),
                    channel,
                    "expectation set"
                );
                self.expectations.insert(channel.to_owned(), Expectation { expires });
            }
            _ => {}
        }
    }

    // ── Evaluation ───────────────────────────────────────────────────────────

    /// Classify a sender and enforce its category limit. `trust` is the
    /// observer's computed trust in the sender; `channel` matches against
    /// expectations.
    pub fn evaluate(
        &mut self,
        sender: &Cid,
        trust: f64,
        channel: Option<&str>,
        now: TimestampMs,
    ) -> RateDecision {
        self.prune(now);
        let expected = channel.is_some_and(|c| self.expectation_valid(c, now));

        // Unconfigured node: classify and count, enforce nothing.
        if self.config_head.is_none() {
            let category = if trust >= TRUSTED_SENDER_THRESHOLD {
                SenderCategory::Trusted
            } else if expected {
                SenderCategory::Expected
            } else {
                SenderCategory::Unknown
            };
            self.log.push_back((sender.clone(), now));
            return RateDecision::Allowed(category);
        }

        let total_recent = self.log.len() as u32;
        let attack = self.limits.attack_mode || total_recent > self.limits.attack_threshold;
        if attack && !self.limits.attack_mode && !self.pending_attack_flip {
            warn!(total_recent, threshold = self.limits.attack_threshold, "attack threshold crossed");
            self.pending_attack_flip = true;
        }
        if attack && trust <= 0.0 && !expected {
            return RateDecision::Rejected("attack mode: unknown sender rejected".into());
        }

        let (category, limit) = if trust >= TRUSTED_SENDER_THRESHOLD {
            (SenderCategory::Trusted, self.limits.trusted_rate)
        } else if expected {
            (SenderCategory::Expected, self.limits.unknown_rate * self.limits.expectation_boost)
        } else {
            (SenderCategory::Unknown, self.limits.unknown_rate)
        };

        let recent_from_sender =
            self.log.iter().filter(|(s, _)| s == sender).count() as u32;
        if recent_from_sender >= limit {
            return match category {
                SenderCategory::Unknown => RateDecision::Rejected(format!(
                    "unknown sender exceeded {limit}/hour"
                )),
                cat => RateDecision::Queued(cat),
            };
        }

        self.log.push_back((sender.clone(), now));
        RateDecision::Allowed(category)
    }

    fn expectation_valid(&self, channel: &str, now: TimestampMs) -> bool {
        match self.expectations.get(channel) {
            Some(exp) => exp.expires.map_or(true, |e| now <= e),
            None => false,
        }
    }

    fn prune(&mut self, now: TimestampMs) {
        let cutoff = now - HOUR_MS;
        while self.log.front().is_some_and(|(_, t)| *t < cutoff) {
            self.log.pop_front();
        }
    }
}
