//! JSON-RPC surface: one `#[rpc(server)]` trait with a thin `RpcImpl`
//! delegating straight into [`crate::engine::Engine`].
//!
//! The wire namespace is `clique_*`; `poatc_*` is registered as an alias of
//! every method on the same `IoHandler`, since the two namespaces expose
//! identical methods over the same engine (see §6 of the design notes).

use std::sync::Arc;

use ethereum_types::{Address, H256};
use jsonrpc_core::{Error as RpcError, IoHandler, Result as RpcResult};
use jsonrpc_derive::rpc;
use serde_json::Value;

use crate::config::TraceLevel;
use crate::engine::Engine;
use crate::error::Error;

fn to_rpc_error(e: Error) -> RpcError {
    RpcError { code: jsonrpc_core::ErrorCode::ServerError(1), message: e.to_string(), data: None }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[rpc(server)]
pub trait CliqueRpc {
    #[rpc(name = "clique_getSigners")]
    fn get_signers(&self, hash: H256) -> RpcResult<Vec<Address>>;

    #[rpc(name = "clique_getSignersAtHash")]
    fn get_signers_at_hash(&self, hash: H256) -> RpcResult<Vec<Address>>;

    #[rpc(name = "clique_getSnapshot")]
    fn get_snapshot(&self, hash: H256) -> RpcResult<Value>;

    #[rpc(name = "clique_getSnapshotAtHash")]
    fn get_snapshot_at_hash(&self, hash: H256) -> RpcResult<Value>;

    #[rpc(name = "clique_getSigner")]
    fn get_signer(&self, hash: H256) -> RpcResult<Address>;

    #[rpc(name = "clique_status")]
    fn status(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_propose")]
    fn propose(&self, address: Address, authorize: bool) -> RpcResult<bool>;

    #[rpc(name = "clique_discard")]
    fn discard(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_proposals")]
    fn proposals(&self) -> RpcResult<Value>;

    // --- anomaly ---
    #[rpc(name = "clique_getAnomalyStats")]
    fn get_anomaly_stats(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_detectAnomalies")]
    fn detect_anomalies(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_getAnomalyConfig")]
    fn get_anomaly_config(&self) -> RpcResult<Value>;

    // --- whitelist / blacklist ---
    #[rpc(name = "clique_getWhitelist")]
    fn get_whitelist(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_getBlacklist")]
    fn get_blacklist(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_addToWhitelist")]
    fn add_to_whitelist(&self, address: Address, reason: String, expires_at: Option<u64>) -> RpcResult<bool>;

    #[rpc(name = "clique_removeFromWhitelist")]
    fn remove_from_whitelist(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_addToBlacklist")]
    fn add_to_blacklist(&self, address: Address, reason: String, expires_at: Option<u64>) -> RpcResult<bool>;

    #[rpc(name = "clique_removeFromBlacklist")]
    fn remove_from_blacklist(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_isWhitelisted")]
    fn is_whitelisted(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_isBlacklisted")]
    fn is_blacklisted(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_validateSigner")]
    fn validate_signer(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_cleanupExpiredEntries")]
    fn cleanup_expired_entries(&self) -> RpcResult<usize>;

    #[rpc(name = "clique_getStats")]
    fn policy_stats(&self) -> RpcResult<Value>;

    // --- validator selection ---
    #[rpc(name = "clique_getSmallValidatorSet")]
    fn get_small_validator_set(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_getValidatorInfo")]
    fn get_validator_info(&self, address: Address) -> RpcResult<Value>;

    #[rpc(name = "clique_addValidator")]
    fn add_validator(&self, address: Address, stake: String, reputation: f64) -> RpcResult<bool>;

    #[rpc(name = "clique_updateValidatorStake")]
    fn update_validator_stake(&self, address: Address, stake: String) -> RpcResult<bool>;

    #[rpc(name = "clique_getSelectionHistory")]
    fn get_selection_history(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_forceValidatorSelection")]
    fn force_validator_selection(&self, block_number: u64, seed_hash: H256) -> RpcResult<Value>;

    #[rpc(name = "clique_getValidatorSelectionStats")]
    fn get_validator_selection_stats(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_updateValidatorReputation")]
    fn update_validator_reputation(&self, address: Address, reputation: f64) -> RpcResult<bool>;

    #[rpc(name = "clique_triggerValidatorSelection")]
    fn trigger_validator_selection(&self, block_number: u64, seed_hash: H256) -> RpcResult<Value>;

    // --- reputation ---
    #[rpc(name = "clique_getReputationScore")]
    fn get_reputation_score(&self, address: Address) -> RpcResult<Value>;

    #[rpc(name = "clique_getTopValidators")]
    fn get_top_validators(&self, n: usize) -> RpcResult<Vec<(Address, f64)>>;

    #[rpc(name = "clique_getReputationEvents")]
    fn get_reputation_events(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_recordViolation")]
    fn record_violation(&self, address: Address, block_number: u64, kind: String, description: String) -> RpcResult<bool>;

    #[rpc(name = "clique_markValidatorOffline")]
    fn mark_validator_offline(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_updateValidatorUptime")]
    fn update_validator_uptime(&self, address: Address) -> RpcResult<bool>;

    #[rpc(name = "clique_getReputationStats")]
    fn get_reputation_stats(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_updateReputation")]
    fn update_reputation(&self, address: Address, delta: f64) -> RpcResult<f64>;

    // --- tracing ---
    #[rpc(name = "clique_getTraceEvents")]
    fn get_trace_events(&self, limit: Option<usize>) -> RpcResult<Value>;

    #[rpc(name = "clique_getMerkleRoot")]
    fn get_merkle_root(&self) -> RpcResult<Option<String>>;

    #[rpc(name = "clique_exportTraceEvents")]
    fn export_trace_events(&self) -> RpcResult<String>;

    #[rpc(name = "clique_clearTraceEvents")]
    fn clear_trace_events(&self) -> RpcResult<bool>;

    #[rpc(name = "clique_setTraceLevel")]
    fn set_trace_level(&self, level: String) -> RpcResult<bool>;

    #[rpc(name = "clique_enableTracing")]
    fn enable_tracing(&self, enabled: bool) -> RpcResult<bool>;

    #[rpc(name = "clique_getTracingStats")]
    fn get_tracing_stats(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_verifyEventInMerkleTree")]
    fn verify_event_in_merkle_tree(&self, event_id: String) -> RpcResult<bool>;

    #[rpc(name = "clique_getMerkleProof")]
    fn get_merkle_proof(&self, event_id: String) -> RpcResult<Option<Vec<String>>>;

    #[rpc(name = "clique_getTraceMetrics")]
    fn get_trace_metrics(&self) -> RpcResult<Value>;

    // --- time-dynamic ---
    #[rpc(name = "clique_getCurrentBlockTime")]
    fn get_current_block_time(&self) -> RpcResult<u64>;

    #[rpc(name = "clique_updateTransactionCount")]
    fn update_transaction_count(&self, tx_count: u64) -> RpcResult<Option<u64>>;

    #[rpc(name = "clique_getDecayHistory")]
    fn get_decay_history(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_getTimeDynamicStats")]
    fn get_time_dynamic_stats(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_getTimeDynamicConfig")]
    fn get_time_dynamic_config(&self) -> RpcResult<Value>;

    #[rpc(name = "clique_updateTimeDynamicConfig")]
    fn update_time_dynamic_config(&self, config: Value) -> RpcResult<bool>;

    #[rpc(name = "clique_triggerReputationDecay")]
    fn trigger_reputation_decay(&self) -> RpcResult<bool>;
}

pub struct RpcImpl {
    engine: Arc<Engine>,
}

impl RpcImpl {
    pub fn new(engine: Arc<Engine>) -> Self {
        RpcImpl { engine }
    }

    fn snapshot_json(&self, hash: H256) -> RpcResult<Value> {
        let snapshot = self.engine.cached_snapshot(hash).ok_or_else(|| RpcError::invalid_params("unknown block hash"))?;
        serde_json::to_value(snapshot).map_err(|e| RpcError::invalid_params(e.to_string()))
    }
}

fn parse_trace_level(s: &str) -> RpcResult<TraceLevel> {
    match s {
        "off" => Ok(TraceLevel::Off),
        "basic" => Ok(TraceLevel::Basic),
        "detailed" => Ok(TraceLevel::Detailed),
        "verbose" => Ok(TraceLevel::Verbose),
        other => Err(RpcError::invalid_params(format!("unknown trace level: {}", other))),
    }
}

impl CliqueRpc for RpcImpl {
    fn get_signers(&self, hash: H256) -> RpcResult<Vec<Address>> {
        let snapshot = self.engine.snapshot_at(0, hash, &[]).map_err(to_rpc_error)?;
        Ok(snapshot.signers.into_iter().collect())
    }

    fn get_signers_at_hash(&self, hash: H256) -> RpcResult<Vec<Address>> {
        self.get_signers(hash)
    }

    fn get_snapshot(&self, hash: H256) -> RpcResult<Value> {
        self.snapshot_json(hash)
    }

    fn get_snapshot_at_hash(&self, hash: H256) -> RpcResult<Value> {
        self.snapshot_json(hash)
    }

    fn get_signer(&self, hash: H256) -> RpcResult<Address> {
        let snapshot = self.engine.cached_snapshot(hash).ok_or_else(|| RpcError::invalid_params("unknown block hash"))?;
        snapshot.recents.get(&snapshot.number).copied().ok_or_else(|| RpcError::invalid_params("no recorded sealer for this block"))
    }

    fn status(&self) -> RpcResult<Value> {
        Ok(serde_json::json!({ "events_traced": self.engine.tracing().event_count() }))
    }

    fn propose(&self, address: Address, authorize: bool) -> RpcResult<bool> {
        self.engine.propose(address, authorize);
        Ok(true)
    }

    fn discard(&self, address: Address) -> RpcResult<bool> {
        self.engine.discard(address);
        Ok(true)
    }

    fn proposals(&self) -> RpcResult<Value> {
        Ok(serde_json::json!(self.engine.proposals()))
    }

    fn get_anomaly_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.anomaly_stats()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn detect_anomalies(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.detect_anomalies()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_anomaly_config(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.anomaly_config()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_whitelist(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.policy().whitelist_entries()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_blacklist(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.policy().blacklist_entries()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn add_to_whitelist(&self, address: Address, reason: String, expires_at: Option<u64>) -> RpcResult<bool> {
        self.engine.policy().add_to_whitelist(address, "rpc", &reason, expires_at, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn remove_from_whitelist(&self, address: Address) -> RpcResult<bool> {
        self.engine.policy().remove_from_whitelist(address);
        Ok(true)
    }

    fn add_to_blacklist(&self, address: Address, reason: String, expires_at: Option<u64>) -> RpcResult<bool> {
        self.engine.policy().add_to_blacklist(address, "rpc", &reason, expires_at, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn remove_from_blacklist(&self, address: Address) -> RpcResult<bool> {
        self.engine.policy().remove_from_blacklist(address);
        Ok(true)
    }

    fn is_whitelisted(&self, address: Address) -> RpcResult<bool> {
        Ok(self.engine.policy().is_whitelisted(address, self.engine.time_dynamic().current_block_time_secs()))
    }

    fn is_blacklisted(&self, address: Address) -> RpcResult<bool> {
        Ok(self.engine.policy().is_blacklisted(address, self.engine.time_dynamic().current_block_time_secs()))
    }

    fn validate_signer(&self, address: Address) -> RpcResult<bool> {
        let (ok, _) = self.engine.policy().validate_signer(address, self.engine.time_dynamic().current_block_time_secs());
        Ok(ok)
    }

    fn cleanup_expired_entries(&self) -> RpcResult<usize> {
        Ok(self.engine.policy().cleanup_expired_entries(self.engine.time_dynamic().current_block_time_secs()))
    }

    fn get_small_validator_set(&self) -> RpcResult<Value> {
        match self.engine.selection().last_selection() {
            Some(sel) => Ok(serde_json::json!({ "block_number": sel.block_number, "selected": sel.selected })),
            None => Ok(Value::Null),
        }
    }

    fn get_validator_info(&self, address: Address) -> RpcResult<Value> {
        match self.engine.selection().validator_info(address) {
            Some(info) => Ok(serde_json::json!({
                "address": info.address,
                "stake": info.stake.to_string(),
                "reputation": info.reputation,
                "blocks_mined": info.blocks_mined,
                "is_active": info.is_active,
            })),
            None => Ok(Value::Null),
        }
    }

    fn add_validator(&self, address: Address, stake: String, reputation: f64) -> RpcResult<bool> {
        let stake: num_bigint::BigUint = stake.parse().map_err(|_| RpcError::invalid_params("invalid stake"))?;
        self.engine.selection().add_validator(address, stake, reputation, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn update_validator_stake(&self, address: Address, stake: String) -> RpcResult<bool> {
        let stake: num_bigint::BigUint = stake.parse().map_err(|_| RpcError::invalid_params("invalid stake"))?;
        self.engine.selection().update_stake(address, stake);
        Ok(true)
    }

    fn get_selection_history(&self) -> RpcResult<Value> {
        let history = self.engine.selection().history();
        Ok(serde_json::json!(history.iter().map(|s| serde_json::json!({ "block_number": s.block_number, "selected": s.selected })).collect::<Vec<_>>()))
    }

    fn force_validator_selection(&self, block_number: u64, seed_hash: H256) -> RpcResult<Value> {
        let selection = self
            .engine
            .selection()
            .select_small_validator_set(block_number, seed_hash, self.engine.time_dynamic().current_block_time_secs())
            .map_err(to_rpc_error)?;
        Ok(serde_json::json!({ "block_number": selection.block_number, "selected": selection.selected }))
    }

    fn get_reputation_score(&self, address: Address) -> RpcResult<Value> {
        match self.engine.reputation().score_of(address) {
            Some(score) => Ok(serde_json::json!({
                "current_score": score.current_score,
                "total_blocks_mined": score.total_blocks_mined,
                "violation_count": score.violation_count,
            })),
            None => Ok(Value::Null),
        }
    }

    fn get_top_validators(&self, n: usize) -> RpcResult<Vec<(Address, f64)>> {
        Ok(self.engine.reputation().top_validators(n))
    }

    fn get_reputation_events(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.reputation().events()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn record_violation(&self, address: Address, block_number: u64, kind: String, description: String) -> RpcResult<bool> {
        self.engine.reputation().record_violation(address, block_number, &kind, &description, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn mark_validator_offline(&self, address: Address) -> RpcResult<bool> {
        self.engine.reputation().mark_offline(address, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn update_validator_uptime(&self, address: Address) -> RpcResult<bool> {
        self.engine.reputation().update_uptime(address, self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }

    fn get_trace_events(&self, limit: Option<usize>) -> RpcResult<Value> {
        serde_json::to_value(self.engine.tracing().trace_events(None, None, limit)).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_merkle_root(&self) -> RpcResult<Option<String>> {
        Ok(self.engine.tracing().merkle_root().map(|bytes| to_hex(&bytes)))
    }

    fn export_trace_events(&self) -> RpcResult<String> {
        Ok(String::from_utf8_lossy(&self.engine.tracing().export()).into_owned())
    }

    fn clear_trace_events(&self) -> RpcResult<bool> {
        self.engine.tracing().clear_events();
        Ok(true)
    }

    fn set_trace_level(&self, level: String) -> RpcResult<bool> {
        let level = parse_trace_level(&level)?;
        self.engine.tracing().set_trace_level(level);
        Ok(true)
    }

    fn enable_tracing(&self, enabled: bool) -> RpcResult<bool> {
        self.engine.tracing().enable_tracing(enabled);
        Ok(true)
    }

    fn get_current_block_time(&self) -> RpcResult<u64> {
        Ok(self.engine.time_dynamic().current_block_time_secs())
    }

    fn update_transaction_count(&self, tx_count: u64) -> RpcResult<Option<u64>> {
        Ok(self.engine.time_dynamic().update_transaction_count(tx_count))
    }

    fn get_decay_history(&self) -> RpcResult<Value> {
        let history = self.engine.time_dynamic().decay_history();
        Ok(serde_json::json!(history
            .iter()
            .map(|d| serde_json::json!({ "address": d.address, "old_score": d.old_score, "new_score": d.new_score, "decay_factor": d.decay_factor }))
            .collect::<Vec<_>>()))
    }

    fn policy_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.policy().stats(self.engine.time_dynamic().current_block_time_secs())).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_validator_selection_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.selection().stats()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn update_validator_reputation(&self, address: Address, reputation: f64) -> RpcResult<bool> {
        self.engine.selection().update_reputation(address, reputation);
        Ok(true)
    }

    fn trigger_validator_selection(&self, block_number: u64, seed_hash: H256) -> RpcResult<Value> {
        let selection = self.engine.trigger_validator_selection(block_number, seed_hash, self.engine.time_dynamic().current_block_time_secs()).map_err(to_rpc_error)?;
        Ok(serde_json::json!({ "block_number": selection.block_number, "selected": selection.selected }))
    }

    fn get_reputation_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.reputation().stats()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn update_reputation(&self, address: Address, delta: f64) -> RpcResult<f64> {
        Ok(self.engine.reputation().adjust_reputation(address, delta, self.engine.time_dynamic().current_block_time_secs()))
    }

    fn get_tracing_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.tracing().stats()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn verify_event_in_merkle_tree(&self, event_id: String) -> RpcResult<bool> {
        match self.engine.tracing().event_by_id(&event_id) {
            Some(event) => Ok(self.engine.tracing().verify_event_in_merkle_tree(&event)),
            None => Err(RpcError::invalid_params("unknown trace event id")),
        }
    }

    fn get_merkle_proof(&self, event_id: String) -> RpcResult<Option<Vec<String>>> {
        let event = self.engine.tracing().event_by_id(&event_id).ok_or_else(|| RpcError::invalid_params("unknown trace event id"))?;
        Ok(self.engine.tracing().merkle_proof(&event).map(|siblings| siblings.iter().map(|s| to_hex(s)).collect()))
    }

    fn get_trace_metrics(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.tracing().metrics()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_time_dynamic_stats(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.time_dynamic().stats()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn get_time_dynamic_config(&self) -> RpcResult<Value> {
        serde_json::to_value(self.engine.time_dynamic().config()).map_err(|e| RpcError::invalid_params(e.to_string()))
    }

    fn update_time_dynamic_config(&self, config: Value) -> RpcResult<bool> {
        let parsed = serde_json::from_value(config).map_err(|e| RpcError::invalid_params(e.to_string()))?;
        self.engine.time_dynamic().update_config(parsed);
        Ok(true)
    }

    fn trigger_reputation_decay(&self) -> RpcResult<bool> {
        self.engine.trigger_reputation_decay(self.engine.time_dynamic().current_block_time_secs());
        Ok(true)
    }
}

/// Every `clique_*` method name exposed by [`CliqueRpc`], kept in sync with
/// its `#[rpc(name = ...)]` attributes so `poatc_*` can alias them below.
const CLIQUE_METHOD_NAMES: &[&str] = &[
    "clique_getSigners",
    "clique_getSignersAtHash",
    "clique_getSnapshot",
    "clique_getSnapshotAtHash",
    "clique_getSigner",
    "clique_status",
    "clique_propose",
    "clique_discard",
    "clique_proposals",
    "clique_getAnomalyStats",
    "clique_detectAnomalies",
    "clique_getAnomalyConfig",
    "clique_getWhitelist",
    "clique_getBlacklist",
    "clique_addToWhitelist",
    "clique_removeFromWhitelist",
    "clique_addToBlacklist",
    "clique_removeFromBlacklist",
    "clique_isWhitelisted",
    "clique_isBlacklisted",
    "clique_validateSigner",
    "clique_cleanupExpiredEntries",
    "clique_getStats",
    "clique_getSmallValidatorSet",
    "clique_getValidatorInfo",
    "clique_addValidator",
    "clique_updateValidatorStake",
    "clique_getSelectionHistory",
    "clique_forceValidatorSelection",
    "clique_getValidatorSelectionStats",
    "clique_updateValidatorReputation",
    "clique_triggerValidatorSelection",
    "clique_getReputationScore",
    "clique_getTopValidators",
    "clique_getReputationEvents",
    "clique_recordViolation",
    "clique_markValidatorOffline",
    "clique_updateValidatorUptime",
    "clique_getReputationStats",
    "clique_updateReputation",
    "clique_getTraceEvents",
    "clique_getMerkleRoot",
    "clique_exportTraceEvents",
    "clique_clearTraceEvents",
    "clique_setTraceLevel",
    "clique_enableTracing",
    "clique_getTracingStats",
    "clique_verifyEventInMerkleTree",
    "clique_getMerkleProof",
    "clique_getTraceMetrics",
    "clique_getCurrentBlockTime",
    "clique_updateTransactionCount",
    "clique_getDecayHistory",
    "clique_getTimeDynamicStats",
    "clique_getTimeDynamicConfig",
    "clique_updateTimeDynamicConfig",
    "clique_triggerReputationDecay",
];

/// Registers every `clique_*` method and aliases it under `poatc_*`, since
/// the two namespaces are defined (§6) to expose identical methods.
pub fn register(io: &mut IoHandler, rpc: RpcImpl) {
    io.extend_with(rpc.to_delegate());
    for method in CLIQUE_METHOD_NAMES {
        let suffix = &method["clique_".len()..];
        io.add_alias(&format!("poatc_{}", suffix), method);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoatcConfig;
    use crate::storage::{MemoryDB, TestClock};
    use std::collections::BTreeSet;

    #[test]
    fn status_reports_event_count() {
        let db = Arc::new(MemoryDB::new());
        let clock = Arc::new(TestClock::new(0));
        let engine = Arc::new(Engine::new(PoatcConfig::default(), db, clock, ethereum_types::H256::zero(), BTreeSet::new()));
        let rpc = RpcImpl::new(engine);
        let status = rpc.status().unwrap();
        assert_eq!(status["events_traced"], 0);
    }
}
