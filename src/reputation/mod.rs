//! On-chain reputation scoring with fairness mechanisms and persistence.
//!
//! State is kept under two persisted keys, loaded at construction and
//! written back after every mutating call; persistence failures are logged
//! rather than surfaced to the caller. Each validator's score is recomputed
//! from a bounded ring of recent activity rather than an unbounded history.

mod score;

pub use score::{ReputationEvent, ReputationEventKind, ReputationScore};

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::Address;
use parking_lot::RwLock;

use crate::config::ReputationConfig;
use crate::storage::KeyValueDB;

const SCORES_COLUMN: &str = "reputation_scores";
const EVENTS_COLUMN: &str = "reputation_events";
const SCORES_KEY: &[u8] = b"reputation_scores";
const EVENTS_KEY: &[u8] = b"reputation_events";
const MAX_EVENTS: usize = 1000;

pub struct ReputationSystem {
    config: ReputationConfig,
    db: Arc<dyn KeyValueDB>,
    scores: RwLock<HashMap<Address, ReputationScore>>,
    events: RwLock<std::collections::VecDeque<ReputationEvent>>,
    /// Cadence clock for the self-triggered fixed-factor decay, independent
    /// of the engine-driven variable-factor decay in `apply_periodic_decay`.
    last_decay_at: RwLock<u64>,
}

impl ReputationSystem {
    pub fn new(config: ReputationConfig, db: Arc<dyn KeyValueDB>, now: u64) -> Self {
        let scores = Self::load_scores(&db);
        let events = Self::load_events(&db);
        ReputationSystem { config, db, scores: RwLock::new(scores), events: RwLock::new(events), last_decay_at: RwLock::new(now) }
    }

    fn load_scores(db: &Arc<dyn KeyValueDB>) -> HashMap<Address, ReputationScore> {
        db.get(SCORES_COLUMN, SCORES_KEY)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn load_events(db: &Arc<dyn KeyValueDB>) -> std::collections::VecDeque<ReputationEvent> {
        db.get(EVENTS_COLUMN, EVENTS_KEY)
            .and_then(|bytes| serde_json::from_slice::<Vec<ReputationEvent>>(&bytes).ok())
            .map(std::collections::VecDeque::from)
            .unwrap_or_default()
    }

    fn persist(&self) {
        let scores = self.scores.read();
        match serde_json::to_vec(&*scores) {
            Ok(bytes) => self.db.put(SCORES_COLUMN, SCORES_KEY, &bytes),
            Err(e) => log::warn!(target: "reputation", "failed to serialize reputation_scores: {}", e),
        }
        drop(scores);
        let events = self.events.read();
        let as_vec: Vec<ReputationEvent> = events.iter().cloned().collect();
        match serde_json::to_vec(&as_vec) {
            Ok(bytes) => self.db.put(EVENTS_COLUMN, EVENTS_KEY, &bytes),
            Err(e) => log::warn!(target: "reputation", "failed to serialize reputation_events: {}", e),
        }
    }

    fn emit(&self, event: ReputationEvent) {
        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > MAX_EVENTS {
            events.pop_front();
        }
    }

    fn entry(&self, addr: Address, now: u64) -> ReputationScore {
        self.scores.write().entry(addr).or_insert_with(|| ReputationScore::new(&self.config, now)).clone()
    }

    pub fn score_of(&self, addr: Address) -> Option<ReputationScore> {
        self.scores.read().get(&addr).cloned()
    }

    pub fn top_validators(&self, n: usize) -> Vec<(Address, f64)> {
        let scores = self.scores.read();
        let mut all: Vec<(Address, f64)> = scores.iter().map(|(a, s)| (*a, s.current_score)).collect();
        all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        all.truncate(n);
        all
    }

    pub fn events(&self) -> Vec<ReputationEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Credits a block mined by `addr` at height `h`, applies fairness
    /// mechanisms, recomputes the score and emits a `block_mined` event.
    pub fn record_block_mined(&self, addr: Address, height: u64, now: u64) {
        self.maybe_apply_fixed_decay(now);
        let mut score = self.entry(addr, now);
        score.record_block_mined(&self.config, now);
        score.apply_fairness(&self.config, now);
        score.recompute(&self.config);
        self.scores.write().insert(addr, score.clone());
        self.emit(ReputationEvent {
            address: addr,
            kind: ReputationEventKind::BlockMined,
            score_change: score.current_score - score.previous_score,
            block_number: height,
            timestamp: now,
            description: "block mined".into(),
        });
        self.persist();
    }

    /// Marks `addr` offline (closes any open online period without crediting
    /// further uptime until `mark_online` is called again implicitly by the
    /// next `update_uptime`).
    pub fn mark_offline(&self, addr: Address, now: u64) {
        let mut score = self.entry(addr, now);
        score.offline = true;
        self.scores.write().insert(addr, score);
    }

    pub fn update_uptime(&self, addr: Address, now: u64) {
        self.maybe_apply_fixed_decay(now);
        let mut score = self.entry(addr, now);
        score.record_uptime(&self.config, now);
        score.apply_fairness(&self.config, now);
        score.recompute(&self.config);
        self.scores.write().insert(addr, score.clone());
        self.emit(ReputationEvent {
            address: addr,
            kind: ReputationEventKind::Uptime,
            score_change: score.current_score - score.previous_score,
            block_number: 0,
            timestamp: now,
            description: "uptime update".into(),
        });
        self.persist();
    }

    /// Increments the violation counter; applies a penalty once
    /// `penalty_threshold` is reached.
    pub fn record_violation(&self, addr: Address, height: u64, kind: &str, description: &str, now: u64) {
        self.maybe_apply_fixed_decay(now);
        let mut score = self.entry(addr, now);
        score.violation_count += 1;
        let crossed_threshold = score.violation_count >= self.config.penalty_threshold;
        if crossed_threshold {
            score.penalty = (score.penalty + self.config.penalty_amount).min(self.config.max_component);
        }
        score.apply_fairness(&self.config, now);
        score.recompute(&self.config);
        self.scores.write().insert(addr, score.clone());

        let (event_kind, change, desc) = if crossed_threshold {
            (ReputationEventKind::Penalty, score.current_score - score.previous_score, format!("{} ({})", description, kind))
        } else {
            (ReputationEventKind::Violation, 0.0, format!("{} ({})", description, kind))
        };
        self.emit(ReputationEvent { address: addr, kind: event_kind, score_change: change, block_number: height, timestamp: now, description: desc });
        self.persist();
    }

    /// Engine-driven decay on the time-dynamic cadence: multiplies every
    /// component by the caller-supplied `factor`, which the time-dynamic
    /// subsystem derives from elapsed hours rather than the fixed
    /// `config.decay_factor` used by `maybe_apply_fixed_decay`.
    pub fn apply_periodic_decay(&self, factor: f64, now: u64) {
        self.apply_decay(factor, now, "periodic decay");
    }

    /// Self-triggered fixed-factor decay on `evaluation_window_secs`
    /// cadence, independent of the engine's own decay schedule.
    pub fn maybe_apply_fixed_decay(&self, now: u64) {
        let due = {
            let last = *self.last_decay_at.read();
            now.saturating_sub(last) >= self.config.evaluation_window_secs
        };
        if !due {
            return;
        }
        *self.last_decay_at.write() = now;
        self.apply_decay(self.config.decay_factor, now, "fixed-cadence decay");
    }

    fn apply_decay(&self, factor: f64, now: u64, description: &str) {
        let addrs: Vec<Address> = self.scores.read().keys().cloned().collect();
        for addr in addrs {
            let mut score = self.entry(addr, now);
            score.block_mining *= factor;
            score.uptime *= factor;
            score.consistency *= factor;
            score.penalty *= factor;
            score.apply_fairness(&self.config, now);
            score.recompute(&self.config);
            self.scores.write().insert(addr, score.clone());
            self.emit(ReputationEvent {
                address: addr,
                kind: ReputationEventKind::Decay,
                score_change: score.current_score - score.previous_score,
                block_number: 0,
                timestamp: now,
                description: description.into(),
            });
        }
        self.persist();
    }

    /// Manual score override for operator corrections: adds `delta` to
    /// `current_score` directly, clamped to the configured range.
    pub fn adjust_reputation(&self, addr: Address, delta: f64, now: u64) -> f64 {
        let mut score = self.entry(addr, now);
        score.previous_score = score.current_score;
        score.current_score = (score.current_score + delta).clamp(self.config.min_reputation, self.config.max_reputation);
        let new_score = score.current_score;
        self.scores.write().insert(addr, score.clone());
        self.emit(ReputationEvent {
            address: addr,
            kind: ReputationEventKind::ManualAdjustment,
            score_change: score.current_score - score.previous_score,
            block_number: 0,
            timestamp: now,
            description: "manual reputation adjustment".into(),
        });
        self.persist();
        new_score
    }

    pub fn low_threshold(&self) -> f64 {
        self.config.low_reputation_threshold
    }

    pub fn high_threshold(&self) -> f64 {
        self.config.high_reputation_threshold
    }

    pub fn auto_blacklist_expiry_secs(&self) -> u64 {
        self.config.auto_blacklist_expiry_secs
    }

    /// Summary used by the `getReputationStats` RPC method.
    pub fn stats(&self) -> ReputationStats {
        let scores = self.scores.read();
        let tracked = scores.len();
        let average_score = if tracked == 0 { 0.0 } else { scores.values().map(|s| s.current_score).sum::<f64>() / tracked as f64 };
        ReputationStats {
            tracked_validators: tracked,
            average_score,
            low_threshold: self.config.low_reputation_threshold,
            high_threshold: self.config.high_reputation_threshold,
            event_count: self.events.read().len(),
        }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ReputationStats {
    pub tracked_validators: usize,
    pub average_score: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub event_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDB;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn components_clamp_after_unlimited_mining_events() {
        let db = Arc::new(MemoryDB::new());
        let sys = ReputationSystem::new(ReputationConfig::default(), db, 0);
        for i in 0..10_000 {
            sys.record_block_mined(addr(1), i, 1_000_000 + i);
        }
        let s = sys.score_of(addr(1)).unwrap();
        assert!(s.block_mining <= sys.config.max_component + 1e-9);
        assert!(s.current_score >= sys.config.min_reputation - 1e-9);
        assert!(s.current_score <= sys.config.max_reputation + 1e-9);
    }

    #[test]
    fn violation_then_penalty_threshold() {
        let db = Arc::new(MemoryDB::new());
        let cfg = ReputationConfig { penalty_threshold: 2, ..Default::default() };
        let sys = ReputationSystem::new(cfg, db, 0);
        sys.record_violation(addr(1), 1, "rapid_signing", "too many blocks", 100);
        let before = sys.score_of(addr(1)).unwrap();
        assert_eq!(before.penalty, 0.0);
        sys.record_violation(addr(1), 2, "rapid_signing", "too many blocks", 200);
        let after = sys.score_of(addr(1)).unwrap();
        assert!(after.penalty > 0.0);
    }
}
