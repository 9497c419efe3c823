use std::collections::HashMap;

use wellspring_core::{Cid, Thought, TimestampMs};

/// A time range during which one identity's outputs are suspect — issued as
/// a `constraint` aspect thought by the containing pool's admin after a
/// device compromise.
#[derive(Clone, Debug, PartialEq)]
pub struct CompromiseWindow {
    pub applies_to: Cid,
    pub window_start: TimestampMs,
    pub window_end: TimestampMs,
    pub reason: Option<String>,
}

impl CompromiseWindow {
    pub fn covers(&self, creator: &Cid, at: TimestampMs) -> bool {
        &self.applies_to == creator && at >= self.window_start && at <= self.window_end
    }
}

/// Thought-level trust adjustments: compromise windows plus per-thought
/// attestation overrides. Historical thoughts stay cryptographically valid;
/// only their computed weight changes.
#[derive(Clone, Debug, Default)]
pub struct CompromiseLedger {
    windows: Vec<CompromiseWindow>,
    overrides: HashMap<Cid, f64>,
}

impl CompromiseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest aspect/attestation thoughts that affect thought-level weight.
    ///
    /// - `aspect` thoughts with `aspect_type = "constraint"` named
    ///   `compromise_window` add a window;
    /// - `attestation` thoughts whose `on` target is a thought (not handled
    ///   by the trust graph) record a per-thought weight override.
    pub fn observe(&mut self, thought: &Thought) {
        match thought.kind() {
            "aspect" => {
                let c = thought.content();
                if c.str_field("aspect_type") != Some("constraint")
                    || c.str_field("name") != Some("compromise_window")
                {
                    return;
                }
                let Some(applies_to) =
                    c.str_field("applies_to").and_then(|s| s.parse::<Cid>().ok())
                else {
                    return;
                };
                let (Some(start), Some(end)) = (
                    c.get("window_start").and_then(|v| v.as_i64()),
                    c.get("window_end").and_then(|v| v.as_i64()),
                ) else {
                    return;
                };
                self.windows.push(CompromiseWindow {
                    applies_to,
                    window_start: start,
                    window_end: end,
                    reason: c.str_field("reason").map(str::to_owned),
                });
            }
            "attestation" => {
                let c = thought.content();
                let Some(on) = c.str_field("on").and_then(|s| s.parse::<Cid>().ok()) else {
                    return;
                };
                let Some(weight) = c.get("weight").and_then(|v| v.as_f64()) else { return };
                self.overrides.insert(on, weight.clamp(-1.0, 1.0));
            }
            _ => {}
        }
    }

    /// Effective trust weight of a stored thought: an explicit override wins;
    /// otherwise 0.0 inside a compromise window covering its creator, 1.0
    /// elsewhere.
    pub fn effective_weight(&self, thought: &Thought) -> f64 {
        if let Some(w) = self.overrides.get(thought.cid()) {
            return w.max(0.0);
        }
        if let Some(creator) = thought.created_by().as_cid() {
            let in_window = self
                .windows
                .iter()
                .any(|w| w.covers(creator, thought.created_at()));
            if in_window {
                return 0.0;
            }
        }
        1.0
    }

    pub fn windows(&self) -> &[CompromiseWindow] {
        &self.windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::types::Signature;
    use wellspring_core::{CidAlgo, Creator, Value};

    fn cid(b: u8) -> Cid {
        Cid::new(CidAlgo::Blake3, [b; 32])
    }

    fn note(by: u8, at: TimestampMs, marker: u8) -> Thought {
        Thought::assemble(
            cid(marker),
            "basic".into(),
            Value::text("note"),
            Creator::Identity(cid(by)),
            vec![],
            at,
            None,
            Signature(vec![]),
            None,
        )
    }

    fn window_aspect(applies_to: u8, start: i64, end: i64) -> Thought {
        Thought::assemble(
            cid(200),
            "aspect".into(),
            Value::map([
                ("aspect_type", Value::text("constraint")),
                ("name", Value::text("compromise_window")),
                ("applies_to", Value::text(cid(applies_to).to_string())),
                ("window_start", Value::Int(start)),
                ("window_end", Value::Int(end)),
                ("reason", Value::text("device stolen")),
            ]),
            Creator::Identity(cid(99)),
            vec![],
            end,
            None,
            Signature(vec![]),
            None,
        )
    }

    #[test]
    fn window_zeroes_in_range_thoughts_only() {
        let mut ledger = CompromiseLedger::new();
        ledger.observe(&window_aspect(5, 1_000, 2_000));

        // Pre-window and post-window thoughts keep full weight.
        assert_eq!(ledger.effective_weight(&note(5, 500, 1)), 1.0);
        assert_eq!(ledger.effective_weight(&note(5, 2_500, 2)), 1.0);
        // In-window thoughts by the compromised identity drop to zero.
        assert_eq!(ledger.effective_weight(&note(5, 1_500, 3)), 0.0);
        // Other identities are untouched.
        assert_eq!(ledger.effective_weight(&note(6, 1_500, 4)), 1.0);
    }

    #[test]
    fn per_thought_override_wins() {
        let mut ledger = CompromiseLedger::new();
        let target = note(5, 500, 1);
        let attestation = Thought::assemble(
            cid(201),
            "attestation".into(),
            Value::map([
                ("on", Value::text(target.cid().to_string())),
                ("weight", Value::Float(0.0)),
            ]),
            Creator::Identity(cid(99)),
            vec![target.cid().clone()],
            600,
            None,
            Signature(vec![]),
            None,
        );
        ledger.observe(&attestation);
        assert_eq!(ledger.effective_weight(&target), 0.0);
    }

    #[test]
    fn malformed_aspects_are_ignored() {
        let mut ledger = CompromiseLedger::new();
        let bad = Thought::assemble(
            cid(202),
            "aspect".into(),
            Value::map([("aspect_type", Value::text("constraint"))]),
            Creator::Identity(cid(99)),
            vec![],
            0,
            None,
            Signature(vec![]),
            None,
        );
        ledger.observe(&bad);
        assert!(ledger.windows().is_empty());
    }
}
