use std::collections::VecDeque;

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::config::ReputationConfig;

const MINING_RING_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReputationEventKind {
    BlockMined,
    Uptime,
    Violation,
    Penalty,
    Decay,
    Reset,
    ManualAdjustment,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub address: Address,
    pub kind: ReputationEventKind,
    pub score_change: f64,
    pub block_number: u64,
    pub timestamp: u64,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReputationScore {
    pub block_mining: f64,
    pub uptime: f64,
    pub consistency: f64,
    pub penalty: f64,
    pub current_score: f64,
    pub previous_score: f64,

    pub total_blocks_mined: u64,
    pub uptime_hours: f64,
    pub violation_count: u32,
    pub join_time: u64,
    pub last_reset: u64,
    pub last_seen: u64,
    pub is_new_validator: bool,
    pub veteran_penalty_applied: bool,
    pub offline: bool,

    mining_timestamps: VecDeque<u64>,
}

impl ReputationScore {
    pub fn new(config: &ReputationConfig, now: u64) -> Self {
        ReputationScore {
            block_mining: 0.0,
            uptime: 0.0,
            consistency: 0.0,
            penalty: 0.0,
            current_score: config.initial_reputation,
            previous_score: config.initial_reputation,
            total_blocks_mined: 0,
            uptime_hours: 0.0,
            violation_count: 0,
            join_time: now,
            last_reset: now,
            last_seen: now,
            is_new_validator: true,
            veteran_penalty_applied: false,
            offline: false,
            mining_timestamps: VecDeque::new(),
        }
    }

    pub fn record_block_mined(&mut self, config: &ReputationConfig, now: u64) {
        self.block_mining = (self.block_mining + config.block_mining_reward).min(config.max_component);
        self.total_blocks_mined += 1;

        self.mining_timestamps.push_back(now);
        while self.mining_timestamps.len() > MINING_RING_CAPACITY {
            self.mining_timestamps.pop_front();
        }
        self.consistency = Self::consistency_from_intervals(&self.mining_timestamps, config.consistency_reward);

        self.record_uptime_internal(config, now);
    }

    pub fn record_uptime(&mut self, config: &ReputationConfig, now: u64) {
        self.record_uptime_internal(config, now);
    }

    fn record_uptime_internal(&mut self, config: &ReputationConfig, now: u64) {
        if self.offline {
            self.offline = false;
            self.last_seen = now;
            return;
        }
        let elapsed_secs = now.saturating_sub(self.last_seen) as f64;
        let elapsed_hours = elapsed_secs / 3600.0;
        self.uptime_hours += elapsed_hours;
        self.uptime = (self.uptime + elapsed_hours * config.uptime_reward_per_hour).min(config.max_component);
        self.last_seen = now;
    }

    fn consistency_from_intervals(timestamps: &VecDeque<u64>, reward: f64) -> f64 {
        if timestamps.len() < 3 {
            return 0.0;
        }
        let intervals: Vec<f64> = timestamps
            .iter()
            .zip(timestamps.iter().skip(1))
            .map(|(a, b)| b.saturating_sub(*a) as f64)
            .collect();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        if mean <= 0.0 || !mean.is_finite() {
            return 0.0;
        }
        let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        let stdev = variance.sqrt();
        let result = reward / (1.0 + stdev / mean);
        if result.is_finite() {
            result
        } else {
            0.0
        }
    }

    /// Partial reset, new-validator boost and veteran penalty, evaluated on
    /// every recompute.
    pub fn apply_fairness(&mut self, config: &ReputationConfig, now: u64) {
        if now.saturating_sub(self.last_reset) >= config.reset_interval_secs {
            self.block_mining *= 0.5;
            self.uptime *= 0.5;
            self.consistency *= 0.5;
            self.penalty *= 0.5;
            self.last_reset = now;
        }

        let age = now.saturating_sub(self.join_time);
        if self.is_new_validator {
            if age < config.new_validator_window_secs {
                self.block_mining = (self.block_mining + config.new_validator_boost).min(config.max_component);
                self.uptime = (self.uptime + config.new_validator_boost).min(config.max_component);
            } else {
                self.is_new_validator = false;
            }
        }

        if age > config.veteran_window_secs {
            self.block_mining = (self.block_mining - config.veteran_penalty).max(0.0);
            self.uptime = (self.uptime - config.veteran_penalty).max(0.0);
        }

        self.block_mining = self.block_mining.min(config.max_component);
        self.uptime = self.uptime.min(config.max_component);
        self.consistency = self.consistency.min(config.max_component);
        self.penalty = self.penalty.min(config.max_component);
    }

    /// Recomputes `current_score`, centralizing the NaN/∞ collapse to
    /// `initial_reputation` here rather than scattering checks across every
    /// mutation site.
    pub fn recompute(&mut self, config: &ReputationConfig) {
        self.previous_score = self.current_score;
        let weighted = config.weight_block_mining * self.block_mining
            + config.weight_uptime * self.uptime
            + config.weight_consistency * self.consistency
            - config.weight_penalty * self.penalty;

        let clamped = if weighted.is_finite() {
            weighted.clamp(config.min_reputation, config.max_reputation)
        } else {
            config.initial_reputation
        };
        self.current_score = clamped;
    }
}
