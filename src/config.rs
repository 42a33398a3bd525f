//! Centralized, validated configuration for every subsystem.
//!
//! Each subsystem takes exactly one config value; unknown TOML keys are a
//! hard error rather than being silently dropped, so a typo in an operator's
//! config file surfaces immediately instead of quietly falling back to a
//! default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotConfig {
    pub epoch: u64,
    pub period_secs: u64,
    pub snapshot_cache_size: usize,
    pub checkpoint_interval: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig { epoch: 30_000, period_secs: 15, snapshot_cache_size: 128, checkpoint_interval: 1024 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AnomalyConfig {
    pub analysis_window_secs: u64,
    pub max_blocks_per_signer: u32,
    pub suspicious_threshold: u32,
    pub max_timestamp_drift_secs: i64,
    pub high_frequency_floor_secs: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            analysis_window_secs: 3600,
            max_blocks_per_signer: 10,
            suspicious_threshold: 5,
            max_timestamp_drift_secs: 30,
            high_frequency_floor_secs: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReputationConfig {
    pub max_component: f64,
    pub min_reputation: f64,
    pub max_reputation: f64,
    pub initial_reputation: f64,
    pub weight_block_mining: f64,
    pub weight_uptime: f64,
    pub weight_consistency: f64,
    pub weight_penalty: f64,
    pub block_mining_reward: f64,
    pub consistency_reward: f64,
    pub uptime_reward_per_hour: f64,
    pub penalty_threshold: u32,
    pub penalty_amount: f64,
    pub evaluation_window_secs: u64,
    pub decay_factor: f64,
    pub reset_interval_secs: u64,
    pub new_validator_window_secs: u64,
    pub new_validator_boost: f64,
    pub veteran_window_secs: u64,
    pub veteran_penalty: f64,
    pub low_reputation_threshold: f64,
    pub high_reputation_threshold: f64,
    pub auto_blacklist_expiry_secs: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        ReputationConfig {
            max_component: 5.0,
            min_reputation: 0.1,
            max_reputation: 10.0,
            initial_reputation: 1.0,
            weight_block_mining: 0.4,
            weight_uptime: 0.3,
            weight_consistency: 0.3,
            weight_penalty: 1.0,
            block_mining_reward: 0.1,
            consistency_reward: 1.0,
            uptime_reward_per_hour: 0.05,
            penalty_threshold: 3,
            penalty_amount: 1.0,
            evaluation_window_secs: 3600,
            decay_factor: 0.95,
            reset_interval_secs: 7 * 24 * 3600,
            new_validator_window_secs: 24 * 3600,
            new_validator_boost: 0.5,
            veteran_window_secs: 30 * 24 * 3600,
            veteran_penalty: 0.1,
            low_reputation_threshold: 3.0,
            high_reputation_threshold: 7.0,
            auto_blacklist_expiry_secs: 24 * 3600,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    Random,
    Stake,
    Reputation,
    Hybrid,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        SelectionMethod::Hybrid
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SelectionConfig {
    pub small_set_size: usize,
    pub selection_window_secs: u64,
    pub method: SelectionMethod,
    pub weight_stake: f64,
    pub weight_reputation: f64,
    pub weight_random: f64,
    pub history_size: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            small_set_size: 3,
            selection_window_secs: 3600,
            method: SelectionMethod::Hybrid,
            weight_stake: 0.4,
            weight_reputation: 0.4,
            weight_random: 0.2,
            history_size: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PolicyConfig {
    pub enable_whitelist: bool,
    pub enable_blacklist: bool,
    pub whitelist_mode: bool,
    pub persistence_path: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            enable_whitelist: false,
            enable_blacklist: true,
            whitelist_mode: false,
            persistence_path: "./whitelist_blacklist.json".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Off,
    Basic,
    Detailed,
    Verbose,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TracingConfig {
    pub enable_tracing: bool,
    pub trace_level: TraceLevel,
    pub max_trace_events: usize,
    pub retention_secs: u64,
    pub merkle_root_in_block: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            enable_tracing: true,
            trace_level: TraceLevel::Detailed,
            max_trace_events: 10_000,
            retention_secs: 7 * 24 * 3600,
            merkle_root_in_block: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeDynamicConfig {
    pub base_block_time_secs: u64,
    pub min_block_time_secs: u64,
    pub max_block_time_secs: u64,
    pub high_threshold_txs: u64,
    pub low_threshold_txs: u64,
    pub tx_count_window: usize,
    pub enable_dynamic_validator_selection: bool,
    pub validator_selection_interval_secs: u64,
    pub reputation_update_interval_secs: u64,
    pub decay_rate_per_hour: f64,
    pub decay_history_size: usize,
}

impl Default for TimeDynamicConfig {
    fn default() -> Self {
        TimeDynamicConfig {
            base_block_time_secs: 15,
            min_block_time_secs: 3,
            max_block_time_secs: 60,
            high_threshold_txs: 200,
            low_threshold_txs: 20,
            tx_count_window: 10,
            enable_dynamic_validator_selection: true,
            validator_selection_interval_secs: 600,
            reputation_update_interval_secs: 60,
            decay_rate_per_hour: 0.05,
            decay_history_size: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoatcConfig {
    pub snapshot: SnapshotConfig,
    pub anomaly: AnomalyConfig,
    pub reputation: ReputationConfig,
    pub selection: SelectionConfig,
    pub policy: PolicyConfig,
    pub tracing: TracingConfig,
    pub time_dynamic: TimeDynamicConfig,
}

impl Default for PoatcConfig {
    fn default() -> Self {
        PoatcConfig {
            snapshot: SnapshotConfig::default(),
            anomaly: AnomalyConfig::default(),
            reputation: ReputationConfig::default(),
            selection: SelectionConfig::default(),
            policy: PolicyConfig::default(),
            tracing: TracingConfig::default(),
            time_dynamic: TimeDynamicConfig::default(),
        }
    }
}

impl PoatcConfig {
    /// Parses a TOML configuration file. Unrecognized keys are a hard error.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn period(&self) -> Duration {
        secs(self.snapshot.period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_is_rejected() {
        let toml = "[snapshot]\nepoch = 10\nbogus_field = 1\n";
        assert!(PoatcConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml = "[reputation]\npenalty_threshold = 9\n";
        let cfg = PoatcConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.reputation.penalty_threshold, 9);
        assert_eq!(cfg.selection.small_set_size, 3);
    }
}
