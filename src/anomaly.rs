//! Sliding-window behavioral analysis of sealers.
//!
//! Deliberately holds no reference to any other subsystem: it only ever
//! returns a list of findings. The engine is the one that turns those
//! findings into reputation violations (see `DESIGN.md`).

use std::collections::VecDeque;

use ethereum_types::Address;
use serde::Serialize;

use crate::config::AnomalyConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AnomalyKind {
    RapidSigning,
    SuspiciousPattern,
    HighFrequency,
    MissingSigner,
    TimestampDrift,
}

#[derive(Clone, Debug, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub sealer: Address,
    pub block_number: u64,
    pub message: String,
    pub severity: Severity,
    pub timestamp: u64,
}

#[derive(Clone, Debug)]
struct Entry {
    sealer: Address,
    block_number: u64,
    timestamp: u64,
    parent_timestamp: u64,
}

/// Ring of recent `(header fields, sealer)` entries, retained for
/// `analysis_window_secs`.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    window: VecDeque<Entry>,
    expected_period_secs: u64,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, expected_period_secs: u64) -> Self {
        AnomalyDetector { config, window: VecDeque::new(), expected_period_secs }
    }

    fn evict_stale(&mut self, now: u64) {
        let window_secs = self.config.analysis_window_secs;
        while let Some(front) = self.window.front() {
            if now.saturating_sub(front.timestamp) > window_secs {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// O(1) amortized: appends one entry and evicts anything that fell out
    /// of the analysis window.
    pub fn add_block(&mut self, sealer: Address, block_number: u64, timestamp: u64, parent_timestamp: u64) {
        self.evict_stale(timestamp);
        self.window.push_back(Entry { sealer, block_number, timestamp, parent_timestamp });
    }

    fn blocks_by_signer(&self) -> std::collections::HashMap<Address, u32> {
        let mut counts = std::collections::HashMap::new();
        for e in &self.window {
            *counts.entry(e.sealer).or_insert(0u32) += 1;
        }
        counts
    }

    /// Side-effect free: returns every anomaly visible in the current
    /// window.
    pub fn detect_anomalies(&self) -> Vec<Anomaly> {
        let mut out = Vec::new();
        if self.window.is_empty() {
            return out;
        }

        // RapidSigning: strictly more than max_blocks_per_signer in window.
        for (sealer, count) in self.blocks_by_signer() {
            if count > self.config.max_blocks_per_signer {
                let last = self.window.iter().rev().find(|e| e.sealer == sealer).unwrap();
                out.push(Anomaly {
                    kind: AnomalyKind::RapidSigning,
                    sealer,
                    block_number: last.block_number,
                    message: format!("{} signed {} blocks in the analysis window (limit {})", sealer, count, self.config.max_blocks_per_signer),
                    severity: Severity::Warning,
                    timestamp: last.timestamp,
                });
            }
        }

        // SuspiciousPattern: >= threshold consecutive same-sealer blocks by
        // number, scanning the ordered window.
        let mut ordered: Vec<&Entry> = self.window.iter().collect();
        ordered.sort_by_key(|e| e.block_number);
        let mut run_start = 0usize;
        for i in 1..ordered.len() {
            if ordered[i].sealer != ordered[run_start].sealer || ordered[i].block_number != ordered[i - 1].block_number + 1 {
                run_start = i;
            }
            let run_len = i - run_start + 1;
            if run_len as u32 == self.config.suspicious_threshold {
                out.push(Anomaly {
                    kind: AnomalyKind::SuspiciousPattern,
                    sealer: ordered[i].sealer,
                    block_number: ordered[i].block_number,
                    message: format!("{} sealed {} consecutive blocks ending at {}", ordered[i].sealer, run_len, ordered[i].block_number),
                    severity: Severity::Critical,
                    timestamp: ordered[i].timestamp,
                });
            }
        }

        // HighFrequency: inter-block interval for a sealer below the floor.
        let mut last_seen: std::collections::HashMap<Address, &Entry> = std::collections::HashMap::new();
        for e in &ordered {
            if let Some(prev) = last_seen.get(&e.sealer) {
                let gap = e.timestamp.saturating_sub(prev.timestamp);
                if gap < self.config.high_frequency_floor_secs {
                    out.push(Anomaly {
                        kind: AnomalyKind::HighFrequency,
                        sealer: e.sealer,
                        block_number: e.block_number,
                        message: format!("{} resealed after only {}s (floor {}s)", e.sealer, gap, self.config.high_frequency_floor_secs),
                        severity: Severity::Warning,
                        timestamp: e.timestamp,
                    });
                }
            }
            last_seen.insert(e.sealer, e);
        }

        // TimestampDrift: |time - parent.time - period| > max_drift.
        for e in &ordered {
            let actual_gap = e.timestamp as i64 - e.parent_timestamp as i64;
            let drift = (actual_gap - self.expected_period_secs as i64).abs();
            if drift > self.config.max_timestamp_drift_secs {
                out.push(Anomaly {
                    kind: AnomalyKind::TimestampDrift,
                    sealer: e.sealer,
                    block_number: e.block_number,
                    message: format!("timestamp drift of {}s at block {} (limit {}s)", drift, e.block_number, self.config.max_timestamp_drift_secs),
                    severity: Severity::Warning,
                    timestamp: e.timestamp,
                });
            }
        }

        out
    }

    /// Checks whether `signer`, expected to seal at `block_number`, has
    /// shown up anywhere in the window — used to emit `MissingSigner`.
    pub fn missing_signer(&self, signer: Address, block_number: u64, now: u64) -> Option<Anomaly> {
        let seen = self.window.iter().any(|e| e.sealer == signer);
        if seen {
            return None;
        }
        Some(Anomaly {
            kind: AnomalyKind::MissingSigner,
            sealer: signer,
            block_number,
            message: format!("expected-turn signer {} was not seen in the analysis window", signer),
            severity: Severity::Warning,
            timestamp: now,
        })
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Summary used by the `getAnomalyStats` RPC method.
    pub fn stats(&self) -> AnomalyStats {
        AnomalyStats {
            window_size: self.window.len(),
            per_signer_counts: self.blocks_by_signer().into_iter().collect(),
            analysis_window_secs: self.config.analysis_window_secs,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AnomalyStats {
    pub window_size: usize,
    pub per_signer_counts: std::collections::BTreeMap<Address, u32>,
    pub analysis_window_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn rapid_signing_boundary() {
        let cfg = AnomalyConfig { max_blocks_per_signer: 3, ..Default::default() };
        let mut d = AnomalyDetector::new(cfg, 15);
        for i in 0..3 {
            d.add_block(addr(1), i, 1000 + i * 15, 1000 + i.saturating_sub(1) * 15);
        }
        assert!(d.detect_anomalies().iter().all(|a| a.kind != AnomalyKind::RapidSigning));

        d.add_block(addr(1), 3, 1045, 1030);
        assert!(d.detect_anomalies().iter().any(|a| a.kind == AnomalyKind::RapidSigning));
    }

    #[test]
    fn suspicious_pattern_at_threshold() {
        let cfg = AnomalyConfig { suspicious_threshold: 3, ..Default::default() };
        let mut d = AnomalyDetector::new(cfg, 15);
        d.add_block(addr(2), 1, 1015, 1000);
        d.add_block(addr(2), 2, 1030, 1015);
        d.add_block(addr(1), 3, 1045, 1030);
        d.add_block(addr(1), 4, 1060, 1045);
        d.add_block(addr(1), 5, 1075, 1060);
        let found = d.detect_anomalies();
        assert!(found.iter().any(|a| a.kind == AnomalyKind::SuspiciousPattern && a.block_number == 5));
    }

    #[test]
    fn timestamp_drift_boundary() {
        let cfg = AnomalyConfig { max_timestamp_drift_secs: 30, ..Default::default() };
        let mut d = AnomalyDetector::new(cfg, 15);
        d.add_block(addr(1), 1, 1045, 1000); // drift exactly 30
        assert!(d.detect_anomalies().iter().all(|a| a.kind != AnomalyKind::TimestampDrift));

        let mut d2 = AnomalyDetector::new(AnomalyConfig { max_timestamp_drift_secs: 30, ..Default::default() }, 15);
        d2.add_block(addr(1), 1, 1046, 1000); // drift 31
        assert!(d2.detect_anomalies().iter().any(|a| a.kind == AnomalyKind::TimestampDrift));
    }
}
