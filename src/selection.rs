//! Deterministic two-tier committee selection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ethereum_types::{Address, H256};
use num_bigint::BigUint;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{SelectionConfig, SelectionMethod};
use crate::error::{Error, ErrorKind};

#[derive(Clone, Debug, Serialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub stake: BigUint,
    pub reputation: f64,
    pub last_active: u64,
    pub blocks_mined: u64,
    pub is_active: bool,
}

impl ValidatorInfo {
    fn new(address: Address, stake: BigUint, reputation: f64, now: u64) -> Self {
        ValidatorInfo { address, stake, reputation, last_active: now, blocks_mined: 0, is_active: true }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CommitteeSelection {
    pub block_number: u64,
    pub timestamp: u64,
    pub selected: Vec<Address>,
    pub method: SelectionMethod,
    pub seed: [u8; 32],
}

/// Treats `seed` as an infinite byte stream: round `i`'s selector byte is
/// the first byte of `SHA256(seed || i_le8)`. Documented as the chosen
/// convention for the seed-indexing ambiguity noted in the design notes.
fn stream_byte(seed: &[u8; 32], round: u64) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(round.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    digest[0]
}

fn stream_u64(seed: &[u8; 32], round: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(round.to_le_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(buf)
}

pub struct ValidatorSelectionManager {
    config: SelectionConfig,
    validators: RwLock<HashMap<Address, ValidatorInfo>>,
    history: RwLock<VecDeque<CommitteeSelection>>,
}

impl ValidatorSelectionManager {
    pub fn new(config: SelectionConfig) -> Self {
        ValidatorSelectionManager { config, validators: RwLock::new(HashMap::new()), history: RwLock::new(VecDeque::new()) }
    }

    pub fn add_validator(&self, address: Address, stake: BigUint, reputation: f64, now: u64) {
        self.validators.write().entry(address).or_insert_with(|| ValidatorInfo::new(address, stake, reputation, now));
    }

    pub fn update_stake(&self, address: Address, stake: BigUint) {
        if let Some(v) = self.validators.write().get_mut(&address) {
            v.stake = stake;
        }
    }

    pub fn update_reputation(&self, address: Address, reputation: f64) {
        if let Some(v) = self.validators.write().get_mut(&address) {
            v.reputation = reputation;
        }
    }

    pub fn record_block_mining(&self, address: Address, now: u64) {
        if let Some(v) = self.validators.write().get_mut(&address) {
            v.blocks_mined += 1;
            v.last_active = now;
        }
    }

    pub fn validator_info(&self, address: Address) -> Option<ValidatorInfo> {
        self.validators.read().get(&address).cloned()
    }

    fn active_validators(&self) -> Vec<ValidatorInfo> {
        self.validators.read().values().filter(|v| v.is_active).cloned().collect()
    }

    pub fn last_selection(&self) -> Option<CommitteeSelection> {
        self.history.read().back().cloned()
    }

    pub fn history(&self) -> Vec<CommitteeSelection> {
        self.history.read().iter().cloned().collect()
    }

    /// Selects (or returns the still-valid prior) committee for `(number,
    /// hash)`. Idempotent within `selection_window_secs`.
    pub fn select_small_validator_set(&self, number: u64, block_hash: H256, now: u64) -> Result<CommitteeSelection, Error> {
        if let Some(last) = self.last_selection() {
            if now.saturating_sub(last.timestamp) < self.config.selection_window_secs {
                return Ok(last);
            }
        }

        let mut active = self.active_validators();
        if active.is_empty() {
            return Err(ErrorKind::NoActiveValidators.into());
        }
        active.sort_by_key(|v| v.address);

        let seed = crate::snapshot::seed(number, block_hash);
        let k = self.config.small_set_size.min(active.len());
        let selected = match self.config.method {
            SelectionMethod::Random => select_random(&active, &seed, k),
            SelectionMethod::Stake => select_weighted_biguint(&active, &seed, k, |v| v.stake.clone()),
            SelectionMethod::Reputation => select_weighted_f64(&active, &seed, k, |v| v.reputation.max(0.0)),
            SelectionMethod::Hybrid => select_hybrid(&active, &self.config, &seed, k),
        };

        let selection = CommitteeSelection { block_number: number, timestamp: now, selected, method: self.config.method, seed };
        let mut history = self.history.write();
        history.push_back(selection.clone());
        while history.len() > self.config.history_size {
            history.pop_front();
        }
        Ok(selection)
    }

    /// Summary used by the `getValidatorSelectionStats` RPC method.
    pub fn stats(&self) -> SelectionStats {
        let validators = self.validators.read();
        SelectionStats {
            total_validators: validators.len(),
            active_validators: validators.values().filter(|v| v.is_active).count(),
            method: self.config.method,
            history_size: self.history.read().len(),
            last_selection: self.last_selection(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SelectionStats {
    pub total_validators: usize,
    pub active_validators: usize,
    pub method: SelectionMethod,
    pub history_size: usize,
    pub last_selection: Option<CommitteeSelection>,
}

fn select_random(pool: &[ValidatorInfo], seed: &[u8; 32], k: usize) -> Vec<Address> {
    let mut chosen = Vec::new();
    let mut round = 0u64;
    let mut guard = 0usize;
    while chosen.len() < k && guard < pool.len() * 8 {
        let idx = (stream_byte(seed, round) as usize) % pool.len();
        let addr = pool[idx].address;
        if !chosen.contains(&addr) {
            chosen.push(addr);
        }
        round += 1;
        guard += 1;
    }
    chosen
}

fn select_weighted_biguint<F: Fn(&ValidatorInfo) -> BigUint>(pool: &[ValidatorInfo], seed: &[u8; 32], k: usize, weight: F) -> Vec<Address> {
    let total: BigUint = pool.iter().map(&weight).sum();
    if total == BigUint::from(0u32) {
        return select_random(pool, seed, k);
    }

    let mut chosen = Vec::new();
    let mut excluded: std::collections::HashSet<Address> = std::collections::HashSet::new();
    let mut round = 0u64;
    while chosen.len() < k {
        let remaining: Vec<&ValidatorInfo> = pool.iter().filter(|v| !excluded.contains(&v.address)).collect();
        if remaining.is_empty() {
            break;
        }
        let remaining_total: BigUint = remaining.iter().map(|v| weight(v)).sum();
        if remaining_total == BigUint::from(0u32) {
            break;
        }
        let r = stream_u64(seed, round);
        let target = BigUint::from(r) % &remaining_total;
        let mut acc = BigUint::from(0u32);
        let mut picked = None;
        for v in &remaining {
            acc += weight(v);
            if target < acc {
                picked = Some(v.address);
                break;
            }
        }
        match picked {
            Some(addr) => {
                chosen.push(addr);
                excluded.insert(addr);
            }
            None => break,
        }
        round += 1;
    }
    chosen
}

fn select_weighted_f64<F: Fn(&ValidatorInfo) -> f64>(pool: &[ValidatorInfo], seed: &[u8; 32], k: usize, weight: F) -> Vec<Address> {
    let total: f64 = pool.iter().map(&weight).sum();
    if total <= 0.0 {
        return select_random(pool, seed, k);
    }

    let mut chosen = Vec::new();
    let mut excluded: std::collections::HashSet<Address> = std::collections::HashSet::new();
    let mut round = 0u64;
    while chosen.len() < k {
        let remaining: Vec<&ValidatorInfo> = pool.iter().filter(|v| !excluded.contains(&v.address)).collect();
        if remaining.is_empty() {
            break;
        }
        let remaining_total: f64 = remaining.iter().map(|v| weight(v)).sum();
        if remaining_total <= 0.0 {
            break;
        }
        let r = (stream_u64(seed, round) as f64 / u64::MAX as f64) * remaining_total;
        let mut acc = 0.0;
        let mut picked = None;
        for v in &remaining {
            acc += weight(v);
            if r < acc {
                picked = Some(v.address);
                break;
            }
        }
        match picked {
            Some(addr) => {
                chosen.push(addr);
                excluded.insert(addr);
            }
            None => break,
        }
        round += 1;
    }
    chosen
}

fn select_hybrid(pool: &[ValidatorInfo], config: &SelectionConfig, seed: &[u8; 32], k: usize) -> Vec<Address> {
    let max_stake: f64 = pool.iter().map(|v| to_f64(&v.stake)).fold(0.0, f64::max);
    let max_rep: f64 = pool.iter().map(|v| v.reputation).fold(0.0, f64::max);

    let scores: HashMap<Address, f64> = pool
        .iter()
        .map(|v| {
            let stake_component = if max_stake > 0.0 { to_f64(&v.stake) / max_stake } else { 0.0 };
            let rep_component = if max_rep > 0.0 { v.reputation / max_rep } else { 0.0 };
            let score = config.weight_stake * stake_component + config.weight_reputation * rep_component + config.weight_random * 0.5;
            (v.address, score.max(0.0))
        })
        .collect();

    select_weighted_f64(pool, seed, k, |v| *scores.get(&v.address).unwrap_or(&0.0))
}

fn to_f64(big: &BigUint) -> f64 {
    big.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn selection_is_reproducible_across_instances() {
        let build = || {
            let mgr = ValidatorSelectionManager::new(SelectionConfig::default());
            for i in 1..=10u64 {
                mgr.add_validator(addr(i), BigUint::from(i * 100), i as f64 / 2.0, 0);
            }
            mgr
        };
        let m1 = build();
        let m2 = build();
        let hash = H256::from_low_u64_be(0xdeadbeef);
        let s1 = m1.select_small_validator_set(100, hash, 0).unwrap();
        let s2 = m2.select_small_validator_set(100, hash, 0).unwrap();
        assert_eq!(s1.selected, s2.selected);
    }

    #[test]
    fn selection_is_idempotent_within_window() {
        let mgr = ValidatorSelectionManager::new(SelectionConfig::default());
        mgr.add_validator(addr(1), BigUint::from(1u32), 1.0, 0);
        mgr.add_validator(addr(2), BigUint::from(1u32), 1.0, 0);
        let hash = H256::from_low_u64_be(1);
        let s1 = mgr.select_small_validator_set(1, hash, 0).unwrap();
        let s2 = mgr.select_small_validator_set(2, H256::from_low_u64_be(2), 10).unwrap();
        assert_eq!(s1.selected, s2.selected);
    }

    #[test]
    fn no_active_validators_errors() {
        let mgr = ValidatorSelectionManager::new(SelectionConfig::default());
        assert!(mgr.select_small_validator_set(1, H256::zero(), 0).is_err());
    }
}
