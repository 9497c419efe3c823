use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use thiserror::Error;
use tracing::trace;

use wellspring_core::constants::{TRUST_DECAY, TRUST_MAX_DEPTH};
use wellspring_core::{Cid, Thought, TimestampMs};

/// Diagnostics only — callers treat every failure as score 0.
#[derive(Debug, Error, PartialEq)]
pub enum TrustError {
    #[error("trust path cycles back to the observer")]
    Cycle,
    #[error("no path within the depth bound {0}")]
    DepthExceeded(usize),
    #[error("observer has no outbound attestations: {0}")]
    UnknownIdentity(String),
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    weight: f64,
    at: TimestampMs,
}

#[derive(Clone, Debug)]
struct Repeater {
    repeater: Cid,
    domain: String,
    at: TimestampMs,
}

type MemoKey = (Cid, Cid, Option<String>);

/// Directed weighted trust graph derived from attestation thoughts.
///
/// `edge(a → b, w)` means "identity `a` endorses identity `b` with strength
/// `w ∈ [-1, 1]`". Only the most recent edge per pair counts. The memo table
/// caches transitive scores and is dropped wholesale on any mutation.
pub struct TrustGraph {
    edges: HashMap<Cid, HashMap<Cid, Edge>>,
    repeaters: HashMap<Cid, Vec<Repeater>>,
    penalties: HashMap<Cid, f64>,
    /// new identity → predecessor, from verified rotations. Endorsements of
    /// the predecessor carry over to the successor undiminished.
    rotations: HashMap<Cid, Cid>,
    decay: f64,
    max_depth: usize,
    memo: RwLock<HashMap<MemoKey, f64>>,
}

impl Default for TrustGraph {
    fn default() -> Self {
        Self::new(TRUST_DECAY, TRUST_MAX_DEPTH)
    }
}

impl Clone for TrustGraph {
    fn clone(&self) -> Self {
        // Snapshot for long-running computations: shares nothing, fresh memo.
        Self {
            edges: self.edges.clone(),
            repeaters: self.repeaters.clone(),
            penalties: self.penalties.clone(),
            rotations: self.rotations.clone(),
            decay: self.decay,
            max_depth: self.max_depth,
            memo: RwLock::new(HashMap::new()),
        }
    }
}

impl TrustGraph {
    pub fn new(decay: f64, max_depth: usize) -> Self {
        Self {
            edges: HashMap::new(),
            repeaters: HashMap::new(),
            penalties: HashMap::new(),
            rotations: HashMap::new(),
            decay,
            max_depth,
            memo: RwLock::new(HashMap::new()),
        }
    }

    // ── Mutation (each drops the memo table) ─────────────────────────────────

    /// Record a direct trust edge; a newer timestamp replaces an older edge.
    pub fn set_edge(&mut self, from: Cid, to: Cid, weight: f64, at: TimestampMs) {
        let slot = self.edges.entry(from).or_default().entry(to).or_insert(Edge { weight, at });
        if at >= slot.at {
            *slot = Edge { weight, at };
        }
        self.invalidate();
    }

    /// Designate `repeater` as a trust shortcut for `domain` (`"*"` = all).
    /// Re-designating the same pair refreshes the timestamp.
    pub fn designate_repeater(&mut self, observer: Cid, repeater: Cid, domain: &str, at: TimestampMs) {
        let designations = self.repeaters.entry(observer).or_default();
        match designations.iter_mut().find(|r| r.repeater == repeater && r.domain == domain) {
            Some(existing) => existing.at = existing.at.max(at),
            None => designations.push(Repeater { repeater, domain: domain.to_string(), at }),
        }
        self.invalidate();
    }

    /// Judgement penalty on a voucher: their outbound vouching weights are
    /// multiplied by `(1 - penalty)` when trust flows through them.
    pub fn set_penalty(&mut self, voucher: Cid, penalty: f64) {
        self.penalties.insert(voucher, penalty.clamp(0.0, 1.0));
        self.invalidate();
    }

    /// Record a verified key rotation: trust computed for `new` falls back
    /// to the predecessor's score, undiminished — the identity transferred,
    /// not a new party.
    pub fn record_rotation(&mut self, old: Cid, new: Cid) {
        self.rotations.insert(new, old);
        self.invalidate();
    }

    /// Ingest one attestation thought: trust edges and repeater designations
    /// are both expressed this way. Anything else is ignored.
    pub fn observe(&mut self, thought: &Thought) {
        if thought.kind() != "attestation" {
            return;
        }
        let Some(observer) = thought.created_by().as_cid().cloned() else { return };
        let content = thought.content();
        let Some(on) = content.str_field("on").and_then(|s| s.parse::<Cid>().ok()) else {
            return;
        };
        let aspect = content
            .str_field("aspect_type")
            .or_else(|| content.str_field("aspect"))
            .unwrap_or("trust");
        match aspect {
            "repeater" => {
                let domain = content.str_field("domain").unwrap_or("*").to_string();
                self.designate_repeater(observer, on, &domain, thought.created_at());
            }
            "trust" => {
                let weight = content.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.0);
                self.set_edge(observer, on, weight, thought.created_at());
            }
            _ => {}
        }
    }

    fn invalidate(&mut self) {
        self.memo.write().expect("trust memo lock poisoned").clear();
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn direct(&self, from: &Cid, to: &Cid) -> Option<f64> {
        self.edges.get(from).and_then(|m| m.get(to)).map(|e| e.weight)
    }

    /// Trust from `observer` to `target`, diagnostics mapped to 0.0.
    pub fn trust(&self, observer: &Cid, target: &Cid) -> f64 {
        self.trust_for_domain(observer, target, None)
    }

    /// Domain-scoped trust: a matching repeater designation may shortcut the
    /// chain. Diagnostics mapped to 0.0.
    pub fn trust_for_domain(&self, observer: &Cid, target: &Cid, domain: Option<&str>) -> f64 {
        self.try_trust(observer, target, domain).unwrap_or(0.0)
    }

    /// Trust with diagnostics surfaced.
    pub fn try_trust(
        &self,
        observer: &Cid,
        target: &Cid,
        domain: Option<&str>,
    ) -> Result<f64, TrustError> {
        if observer == target {
            return Ok(1.0);
        }
        let key: MemoKey = (observer.clone(), target.clone(), domain.map(str::to_owned));
        if let Some(score) = self.memo.read().expect("trust memo lock poisoned").get(&key) {
            return Ok(*score);
        }

        // A rotated identity inherits its predecessors' scores verbatim.
        let mut lineage: Vec<&Cid> = vec![target];
        let mut seen: HashSet<&Cid> = HashSet::from([target]);
        let mut cursor = target;
        while let Some(old) = self.rotations.get(cursor) {
            if !seen.insert(old) {
                break;
            }
            lineage.push(old);
            cursor = old;
        }
        if lineage.len() > 1 {
            let mut best = 0.0_f64;
            let mut last_err = None;
            for ancestor in &lineage {
                match self.base_trust(observer, ancestor, domain) {
                    Ok(score) => best = best.max(score),
                    Err(e) => last_err = Some(e),
                }
            }
            if best == 0.0 {
                if let Some(e) = last_err {
                    return Err(e);
                }
            }
            self.memo.write().expect("trust memo lock poisoned").insert(key, best);
            return Ok(best);
        }

        self.base_trust(observer, target, domain).map(|score| {
            self.memo.write().expect("trust memo lock poisoned").insert(key, score);
            score
        })
    }

    /// Plain + repeater scoring for one concrete target (no rotation
    /// lineage, no memo).
    fn base_trust(
        &self,
        observer: &Cid,
        target: &Cid,
        domain: Option<&str>,
    ) -> Result<f64, TrustError> {
        if observer == target {
            return Ok(1.0);
        }
        let plain = self.transitive(observer, target);

        // Repeater shortcut: trust(O,R) × trust(R,T), both legs computed as
        // ordinary transitive paths with fresh visited sets. The chain resets
        // at the junction — no decay is compounded across it.
        let mut best = match &plain {
            Ok(score) => *score,
            Err(_) => 0.0,
        };
        if let (Some(domain), Some(designations)) = (domain, self.repeaters.get(observer)) {
            for d in designations {
                if d.domain != "*" && d.domain != domain {
                    continue;
                }
                let leg_in = if &d.repeater == observer {
                    1.0
                } else {
                    self.transitive(observer, &d.repeater).unwrap_or(0.0)
                };
                let leg_out = if &d.repeater == target {
                    1.0
                } else {
                    self.transitive(&d.repeater, target).unwrap_or(0.0)
                };
                let score = leg_in * leg_out;
                trace!(repeater = %d.repeater, domain = %d.domain, score, "repeater leg");
                if score > best {
                    best = score;
                }
            }
            return Ok(best);
        }

        plain
    }

    /// Ordinary transitive computation: direct edge wins, otherwise BFS with
    /// per-hop decay, visited-set cycle suppression, and the depth bound.
    fn transitive(&self, observer: &Cid, target: &Cid) -> Result<f64, TrustError> {
        if let Some(w) = self.direct(observer, target) {
            return Ok(w);
        }
        let Some(_) = self.edges.get(observer) else {
            return Err(TrustError::UnknownIdentity(observer.to_string()));
        };

        let mut visited: HashSet<Cid> = HashSet::from([observer.clone()]);
        let mut queue: VecDeque<(Cid, f64, usize)> = VecDeque::from([(observer.clone(), 1.0, 0)]);
        let mut best: Option<f64> = None;
        let mut pruned = false;
        let mut cycled = false;

        while let Some((current, acc, depth)) = queue.pop_front() {
            if depth >= self.max_depth {
                pruned = true;
                continue;
            }
            let Some(outbound) = self.edges.get(&current) else { continue };
            let damp = 1.0 - self.penalties.get(&current).copied().unwrap_or(0.0);
            for (next, edge) in outbound {
                if next == observer {
                    cycled = true;
                }
                if visited.contains(next) {
                    continue;
                }
                let weight = edge.weight * damp;
                let score = acc * weight * self.decay;
                if next == target {
                    best = Some(best.map_or(score, |b| b.max(score)));
                    continue;
                }
                // Every intermediate is walked, whatever the sign of its
                // edge — a negative attester reduces what flows through them
                // rather than hiding the path.
                visited.insert(next.clone());
                queue.push_back((next.clone(), score, depth + 1));
            }
        }

        match best {
            Some(score) => Ok(score),
            None if pruned => Err(TrustError::DepthExceeded(self.max_depth)),
            None if cycled => Err(TrustError::Cycle),
            None => Ok(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_core::CidAlgo;

    fn id(b: u8) -> Cid {
        Cid::new(CidAlgo::Blake3, [b; 32])
    }

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn direct_edge_wins_undecayed() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 0.7, 10);
        approx(g.trust(&id(1), &id(2)), 0.7);
        approx(g.trust(&id(1), &id(1)), 1.0);
    }

    #[test]
    fn newest_edge_replaces_older() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 0.9, 10);
        g.set_edge(id(1), id(2), 0.2, 20);
        g.set_edge(id(1), id(2), 0.5, 15); // stale, ignored
        approx(g.trust(&id(1), &id(2)), 0.2);
    }

    #[test]
    fn transitive_decays_per_hop() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 1.0, 0);
        g.set_edge(id(2), id(3), 1.0, 0);
        // 1.0 × 0.8 per hop, two hops.
        approx(g.trust(&id(1), &id(3)), 0.8 * 0.8);
    }

    #[test]
    fn best_path_wins() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 1.0, 0);
        g.set_edge(id(2), id(4), 0.5, 0);
        g.set_edge(id(1), id(3), 1.0, 0);
        g.set_edge(id(3), id(4), 0.9, 0);
        approx(g.trust(&id(1), &id(4)), 0.9 * 0.8 * 0.8);
    }

    #[test]
    fn depth_bound_applies() {
        let mut g = TrustGraph::new(0.8, 3);
        for hop in 1..6 {
            g.set_edge(id(hop), id(hop + 1), 1.0, 0);
        }
        // id(1) → id(6) needs 5 hops; bound is 3.
        assert_eq!(g.try_trust(&id(1), &id(6), None), Err(TrustError::DepthExceeded(3)));
        approx(g.trust(&id(1), &id(6)), 0.0);
        // Within the bound still works.
        approx(g.trust(&id(1), &id(4)), 0.8f64.powi(3));
    }

    #[test]
    fn cycles_do_not_loop() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 1.0, 0);
        g.set_edge(id(2), id(1), 1.0, 0);
        g.set_edge(id(2), id(3), 1.0, 0);
        approx(g.trust(&id(1), &id(3)), 0.8 * 0.8);
    }

    #[test]
    fn negative_edges_propagate_reduction() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), -1.0, 0);
        approx(g.trust(&id(1), &id(2)), -1.0);
        // A path through the distrusted intermediate is still walked; the
        // negative product surfaces instead of reading as "no path".
        g.set_edge(id(2), id(3), 1.0, 0);
        approx(g.trust(&id(1), &id(3)), -1.0 * 0.8 * 0.8);
        // A parallel positive path wins the best-candidate selection.
        g.set_edge(id(1), id(4), 0.5, 0);
        g.set_edge(id(4), id(3), 1.0, 0);
        approx(g.trust(&id(1), &id(3)), 0.5 * 0.8 * 0.8);
    }

    #[test]
    fn judgement_penalty_damps_outbound_vouches() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 1.0, 0);
        g.set_edge(id(2), id(3), 1.0, 0);
        let clean = g.trust(&id(1), &id(3));
        g.set_penalty(id(2), 0.5);
        approx(g.trust(&id(1), &id(3)), clean * 0.5);
    }

    #[test]
    fn monotonic_under_positive_edge_addition() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 0.6, 0);
        g.set_edge(id(2), id(4), 0.6, 0);
        let before = g.trust(&id(1), &id(4));
        // A second positive path cannot decrease the score.
        g.set_edge(id(1), id(3), 0.9, 0);
        g.set_edge(id(3), id(4), 0.9, 0);
        assert!(g.trust(&id(1), &id(4)) >= before);
    }

    #[test]
    fn repeater_resets_decay_at_junction() {
        // Long chain D → C → B → A → Nature → DrChen scores ≈ 0.099.
        let (d, c, b, a, nature, drchen, prof) =
            (id(10), id(11), id(12), id(13), id(14), id(15), id(16));
        let mut g = TrustGraph::default();
        g.set_edge(d.clone(), c.clone(), 0.8, 0);
        g.set_edge(c.clone(), b.clone(), 0.8, 0);
        g.set_edge(b.clone(), a.clone(), 0.8, 0);
        g.set_edge(a.clone(), nature.clone(), 0.8, 0);
        g.set_edge(nature.clone(), drchen.clone(), 0.74, 0);
        let plain = g.trust(&d, &drchen);
        approx(plain, 0.8_f64.powi(4) * 0.74 * 0.8_f64.powi(5)); // ≈ 0.0993
        assert!((plain - 0.099).abs() < 0.001);

        // D reaches ProfClimate at ≈ 0.24; the Prof vouches DrChen at 1.0.
        g.set_edge(c.clone(), prof.clone(), 0.47, 0);
        g.set_edge(prof.clone(), drchen.clone(), 1.0, 0);
        let leg_in = g.trust(&d, &prof);
        approx(leg_in, 0.8 * 0.8 * 0.47 * 0.8); // ≈ 0.24
        assert!((leg_in - 0.24).abs() < 0.01);
        g.designate_repeater(d.clone(), prof.clone(), "climate", 1);

        let with_repeater = g.trust_for_domain(&d, &drchen, Some("climate"));
        // No decay is compounded across the junction: exactly leg_in × 1.0,
        // strictly better than routing the same hops as one plain chain.
        approx(with_repeater, leg_in);
        assert!(with_repeater >= leg_in * g.trust(&prof, &drchen));
        assert!(with_repeater > g.trust(&d, &drchen) - 1e-12);

        // Other domains fall back to the plain computation.
        let other = g.trust_for_domain(&d, &drchen, Some("cooking"));
        approx(other, g.trust(&d, &drchen));
    }

    #[test]
    fn wildcard_repeater_matches_any_domain() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 0.5, 0);
        g.set_edge(id(2), id(3), 1.0, 0);
        g.designate_repeater(id(1), id(2), "*", 0);
        approx(g.trust_for_domain(&id(1), &id(3), Some("anything")), 0.5);
    }

    #[test]
    fn observe_builds_edges_from_attestations() {
        use wellspring_core::{Creator, Value};
        let mut g = TrustGraph::default();
        let observer = id(1);
        let target = id(2);
        let t = Thought::assemble(
            id(9),
            "attestation".into(),
            Value::map([
                ("aspect_type", Value::text("trust")),
                ("on", Value::text(target.to_string())),
                ("weight", Value::Float(0.9)),
            ]),
            Creator::Identity(observer.clone()),
            vec![],
            100,
            None,
            wellspring_core::types::Signature(vec![]),
            None,
        );
        g.observe(&t);
        approx(g.trust(&observer, &target), 0.9);
    }

    #[test]
    fn rotated_identity_inherits_endorsements() {
        let (alice, keif_v1, keif_v2) = (id(1), id(2), id(3));
        let mut g = TrustGraph::default();
        g.set_edge(alice.clone(), keif_v1.clone(), 0.9, 0);
        approx(g.trust(&alice, &keif_v2), 0.0);

        // After a verified rotation the successor scores exactly like the
        // predecessor — transferred identity, no decay.
        g.record_rotation(keif_v1.clone(), keif_v2.clone());
        approx(g.trust(&alice, &keif_v2), g.trust(&alice, &keif_v1));
        approx(g.trust(&alice, &keif_v2), 0.9);
    }

    #[test]
    fn memo_is_invalidated_on_edge_change() {
        let mut g = TrustGraph::default();
        g.set_edge(id(1), id(2), 1.0, 0);
        g.set_edge(id(2), id(3), 1.0, 0);
        approx(g.trust(&id(1), &id(3)), 0.64);
        g.set_edge(id(2), id(3), 0.5, 10);
        approx(g.trust(&id(1), &id(3)), 0.32);
    }
}
