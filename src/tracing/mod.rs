//! Append-only consensus event log with a Merkle root over all events.

mod merkle;

pub use merkle::MerkleTree;

use std::collections::VecDeque;

use ethereum_types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{TraceLevel, TracingConfig};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEventType {
    HeaderVerified,
    HeaderRejected,
    Anomaly,
    ReputationChange,
    PolicyChange,
    CommitteeSelected,
    BlockTimeAdjusted,
    ReputationDecay,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: String,
    pub event_type: TraceEventType,
    pub timestamp: u64,
    pub block_number: u64,
    pub round: u64,
    pub address: Option<Address>,
    pub message: String,
    pub data: std::collections::BTreeMap<String, String>,
    pub level: TraceLevel,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub merkle_path: Vec<Vec<u8>>,
}

impl TraceEvent {
    /// SHA256 over the canonical JSON encoding of the event with `hash` and
    /// `merkle_path` cleared.
    fn compute_hash(&self) -> Vec<u8> {
        let mut cleared = self.clone();
        cleared.hash.clear();
        cleared.merkle_path.clear();
        let bytes = serde_json::to_vec(&cleared).expect("trace event always serializes");
        Sha256::digest(&bytes).to_vec()
    }
}

pub struct TracingSystem {
    config: RwLock<TracingConfig>,
    events: RwLock<VecDeque<TraceEvent>>,
    tree: RwLock<MerkleTree>,
    counter: RwLock<u64>,
}

impl TracingSystem {
    pub fn new(config: TracingConfig) -> Self {
        TracingSystem { config: RwLock::new(config), events: RwLock::new(VecDeque::new()), tree: RwLock::new(MerkleTree::default()), counter: RwLock::new(0) }
    }

    fn should_record(&self, level: TraceLevel) -> bool {
        let config = self.config.read();
        config.enable_tracing && level <= config.trace_level
    }

    /// Stamps, hashes, appends and rebuilds the Merkle tree. No-op if the
    /// event's level exceeds the configured trace level or tracing is off.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        event_type: TraceEventType,
        level: TraceLevel,
        block_number: u64,
        round: u64,
        address: Option<Address>,
        message: impl Into<String>,
        data: std::collections::BTreeMap<String, String>,
        duration_ms: Option<u64>,
        now: u64,
    ) {
        if !self.should_record(level) {
            return;
        }

        let mut counter = self.counter.write();
        *counter += 1;
        let id = format!("{}-{}-{}", block_number, round, *counter);
        drop(counter);

        let mut event = TraceEvent { id, event_type, timestamp: now, block_number, round, address, message: message.into(), data, level, duration_ms, hash: Vec::new(), merkle_path: Vec::new() };
        event.hash = event.compute_hash();

        let (max_events, retention_secs) = {
            let config = self.config.read();
            (config.max_trace_events, config.retention_secs)
        };
        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > max_events {
            events.pop_front();
        }
        while events.front().map_or(false, |e| now.saturating_sub(e.timestamp) > retention_secs) {
            events.pop_front();
        }
        let hashes: Vec<Vec<u8>> = events.iter().map(|e| e.hash.clone()).collect();
        drop(events);
        *self.tree.write() = MerkleTree::build(hashes);
    }

    pub fn merkle_root(&self) -> Option<Vec<u8>> {
        self.tree.read().root()
    }

    pub fn verify_event_in_merkle_tree(&self, event: &TraceEvent) -> bool {
        self.tree.read().contains(&event.hash)
    }

    pub fn merkle_proof(&self, event: &TraceEvent) -> Option<Vec<Vec<u8>>> {
        self.tree.read().proof_for(&event.hash)
    }

    pub fn trace_events(&self, event_type: Option<TraceEventType>, max_level: Option<TraceLevel>, limit: Option<usize>) -> Vec<TraceEvent> {
        let events = self.events.read();
        let mut out: Vec<TraceEvent> = events
            .iter()
            .filter(|e| event_type.as_ref().map_or(true, |t| *t == e.event_type))
            .filter(|e| max_level.map_or(true, |lvl| e.level <= lvl))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn export(&self) -> Vec<u8> {
        #[derive(Serialize)]
        struct Export<'a> {
            config: &'a TracingConfig,
            events: Vec<TraceEvent>,
            merkle_root: Option<Vec<u8>>,
            event_count: usize,
        }
        let events = self.events.read();
        let export = Export { config: &self.config.read(), events: events.iter().cloned().collect(), merkle_root: self.tree.read().root(), event_count: events.len() };
        serde_json::to_vec(&export).unwrap_or_default()
    }

    pub fn set_trace_level(&self, level: TraceLevel) {
        self.config.write().trace_level = level;
    }

    pub fn enable_tracing(&self, enabled: bool) {
        self.config.write().enable_tracing = enabled;
    }

    pub fn clear_events(&self) {
        self.events.write().clear();
        *self.tree.write() = MerkleTree::default();
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn event_by_id(&self, id: &str) -> Option<TraceEvent> {
        self.events.read().iter().find(|e| e.id == id).cloned()
    }

    /// Summary used by the `getTracingStats` RPC method.
    pub fn stats(&self) -> TracingStats {
        let config = self.config.read();
        TracingStats {
            enable_tracing: config.enable_tracing,
            trace_level: config.trace_level,
            max_trace_events: config.max_trace_events,
            retention_secs: config.retention_secs,
            event_count: self.events.read().len(),
            merkle_root: self.merkle_root(),
        }
    }

    /// Per-event-type counts used by the `getTraceMetrics` RPC method.
    pub fn metrics(&self) -> std::collections::BTreeMap<String, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for event in self.events.read().iter() {
            *counts.entry(format!("{:?}", event.event_type)).or_insert(0usize) += 1;
        }
        counts
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TracingStats {
    pub enable_tracing: bool,
    pub trace_level: TraceLevel,
    pub max_trace_events: usize,
    pub retention_secs: u64,
    pub event_count: usize,
    pub merkle_root: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_data() -> std::collections::BTreeMap<String, String> {
        std::collections::BTreeMap::new()
    }

    #[test]
    fn merkle_root_changes_between_insertions_and_is_nonzero() {
        let sys = TracingSystem::new(TracingConfig::default());
        assert!(sys.merkle_root().is_none());
        sys.record(TraceEventType::HeaderVerified, TraceLevel::Basic, 1, 0, None, "first", empty_data(), None, 10);
        let root1 = sys.merkle_root().unwrap();
        sys.record(TraceEventType::HeaderVerified, TraceLevel::Basic, 2, 0, None, "second", empty_data(), None, 20);
        let root2 = sys.merkle_root().unwrap();
        assert_ne!(root1, root2);
    }

    #[test]
    fn proof_round_trips_to_root() {
        let sys = TracingSystem::new(TracingConfig::default());
        for i in 0..3 {
            sys.record(TraceEventType::HeaderVerified, TraceLevel::Basic, i, 0, None, format!("event {}", i), empty_data(), None, 10 + i);
        }
        let events = sys.trace_events(None, None, None);
        for event in &events {
            assert!(sys.verify_event_in_merkle_tree(event));
            let proof = sys.merkle_proof(event).unwrap();
            let root = sys.tree.read().recompute_root(&event.hash, &proof);
            assert_eq!(Some(root), sys.merkle_root());
        }
    }

    #[test]
    fn filter_by_level_respects_config() {
        let cfg = TracingConfig { trace_level: TraceLevel::Basic, ..Default::default() };
        let sys = TracingSystem::new(cfg);
        sys.record(TraceEventType::Anomaly, TraceLevel::Verbose, 1, 0, None, "verbose only", empty_data(), None, 1);
        assert_eq!(sys.event_count(), 0);
        sys.record(TraceEventType::Anomaly, TraceLevel::Basic, 2, 0, None, "basic", empty_data(), None, 2);
        assert_eq!(sys.event_count(), 1);
    }
}
