//! Adaptive block period, committee rotation cadence and reputation decay
//! triggers — three loops driven synchronously from the verify/seal paths.

use std::collections::VecDeque;

use ethereum_types::Address;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::TimeDynamicConfig;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct DecayRecord {
    pub address: Address,
    pub old_score: f64,
    pub new_score: f64,
    pub decay_factor: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TimeDynamicStats {
    pub current_block_time_secs: u64,
    pub base_block_time_secs: u64,
    pub last_selection: u64,
    pub last_decay: u64,
    pub tx_count_samples: usize,
    pub decay_history_len: usize,
}

struct State {
    tx_counts: VecDeque<u64>,
    current_block_time_secs: u64,
    last_selection: u64,
    last_decay: u64,
    decay_history: VecDeque<DecayRecord>,
}

pub struct TimeDynamicManager {
    config: RwLock<TimeDynamicConfig>,
    state: RwLock<State>,
}

impl TimeDynamicManager {
    pub fn new(config: TimeDynamicConfig, now: u64) -> Self {
        let base = config.base_block_time_secs;
        TimeDynamicManager {
            config: RwLock::new(config),
            state: RwLock::new(State { tx_counts: VecDeque::new(), current_block_time_secs: base, last_selection: now, last_decay: now, decay_history: VecDeque::new() }),
        }
    }

    pub fn base_block_time_secs(&self) -> u64 {
        self.config.read().base_block_time_secs
    }

    pub fn config(&self) -> TimeDynamicConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: TimeDynamicConfig) {
        *self.config.write() = config;
    }

    /// Summary used by the `getTimeDynamicStats` RPC method.
    pub fn stats(&self) -> TimeDynamicStats {
        let state = self.state.read();
        TimeDynamicStats {
            current_block_time_secs: state.current_block_time_secs,
            base_block_time_secs: self.config.read().base_block_time_secs,
            last_selection: state.last_selection,
            last_decay: state.last_decay,
            tx_count_samples: state.tx_counts.len(),
            decay_history_len: state.decay_history.len(),
        }
    }

    pub fn current_block_time_secs(&self) -> u64 {
        self.state.read().current_block_time_secs
    }

    /// Pushes a per-block tx count and recomputes `current_block_time` once
    /// at least 3 samples are available. Returns `Some(new_value)` only when
    /// the change exceeds 1 second, to suppress oscillation.
    pub fn update_transaction_count(&self, tx_count: u64) -> Option<u64> {
        let config = self.config.read();
        let mut state = self.state.write();
        state.tx_counts.push_back(tx_count);
        while state.tx_counts.len() > config.tx_count_window {
            state.tx_counts.pop_front();
        }
        if state.tx_counts.len() < 3 {
            return None;
        }

        let avg = state.tx_counts.iter().sum::<u64>() as f64 / state.tx_counts.len() as f64;
        let base = config.base_block_time_secs as f64;
        let high = config.high_threshold_txs as f64;
        let low = config.low_threshold_txs as f64;

        let candidate = if avg == 0.0 {
            base
        } else if avg >= high {
            (base / (avg / high).min(3.0)).max(config.min_block_time_secs as f64)
        } else if avg <= low {
            (base * (low / avg).min(1.33)).min(config.max_block_time_secs as f64)
        } else {
            base * (1.2 - 0.2 * (avg - low) / (high - low))
        };

        let candidate = candidate.round().max(1.0) as u64;
        if candidate.abs_diff(state.current_block_time_secs) > 1 {
            state.current_block_time_secs = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    pub fn should_update_validator_selection(&self, now: u64) -> bool {
        let config = self.config.read();
        if !config.enable_dynamic_validator_selection {
            return false;
        }
        now.saturating_sub(self.state.read().last_selection) >= config.validator_selection_interval_secs
    }

    pub fn mark_validator_selection_triggered(&self, now: u64) {
        self.state.write().last_selection = now;
    }

    pub fn should_apply_reputation_decay(&self, now: u64) -> bool {
        now.saturating_sub(self.state.read().last_decay) >= self.config.read().reputation_update_interval_secs
    }

    /// `decay_factor = max(0.5, 1 - decay_rate_per_hour * hours_elapsed)`.
    pub fn decay_factor(&self, now: u64) -> f64 {
        let hours = now.saturating_sub(self.state.read().last_decay) as f64 / 3600.0;
        (1.0 - self.config.read().decay_rate_per_hour * hours).max(0.5)
    }

    pub fn record_decay(&self, address: Address, old_score: f64, new_score: f64, decay_factor: f64, now: u64) {
        let history_size = self.config.read().decay_history_size;
        let mut state = self.state.write();
        state.last_decay = now;
        state.decay_history.push_back(DecayRecord { address, old_score, new_score, decay_factor });
        while state.decay_history.len() > history_size {
            state.decay_history.pop_front();
        }
    }

    pub fn decay_history(&self) -> Vec<DecayRecord> {
        self.state.read().decay_history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_load_shortens_block_time() {
        let mgr = TimeDynamicManager::new(TimeDynamicConfig::default(), 0);
        for _ in 0..5 {
            mgr.update_transaction_count(500);
        }
        assert!(mgr.current_block_time_secs() < mgr.base_block_time_secs());
    }

    #[test]
    fn low_load_lengthens_block_time() {
        let mgr = TimeDynamicManager::new(TimeDynamicConfig::default(), 0);
        for _ in 0..5 {
            mgr.update_transaction_count(1);
        }
        assert!(mgr.current_block_time_secs() > mgr.base_block_time_secs());
    }

    #[test]
    fn selection_trigger_respects_interval() {
        let cfg = TimeDynamicConfig { validator_selection_interval_secs: 600, ..Default::default() };
        let mgr = TimeDynamicManager::new(cfg, 0);
        assert!(!mgr.should_update_validator_selection(599));
        assert!(mgr.should_update_validator_selection(600));
    }
}
