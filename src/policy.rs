//! Hard policy gate over sealer identity, with persistent, expiring entries.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use ethereum_types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub address: Address,
    pub added_at: u64,
    pub added_by: String,
    pub reason: String,
    pub is_active: bool,
    pub expires_at: Option<u64>,
}

impl PolicyEntry {
    fn is_effective(&self, now: u64) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp >= now)
    }
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    whitelist: HashMap<Address, PolicyEntry>,
    blacklist: HashMap<Address, PolicyEntry>,
}

pub struct PolicyManager {
    config: PolicyConfig,
    state: RwLock<PersistedState>,
}

impl PolicyManager {
    pub fn new(config: PolicyConfig) -> Self {
        let state = Self::load(&config.persistence_path).unwrap_or_default();
        PolicyManager { config, state: RwLock::new(state) }
    }

    fn load(path: &str) -> Option<PersistedState> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Atomic write-to-temp-then-rename into `PersistencePath`.
    fn persist(&self) {
        let state = self.state.read();
        let bytes = match serde_json::to_vec_pretty(&*state) {
            Ok(b) => b,
            Err(e) => {
                log::warn!(target: "policy", "failed to serialize whitelist/blacklist: {}", e);
                return;
            }
        };
        drop(state);

        let path = std::path::Path::new(&self.config.persistence_path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let tmp = match tempfile::NamedTempFile::new_in(dir) {
            Ok(t) => t,
            Err(e) => {
                log::warn!(target: "policy", "failed to create temp file for persistence: {}", e);
                return;
            }
        };
        if let Err(e) = (&tmp).write_all(&bytes) {
            log::warn!(target: "policy", "failed to write whitelist/blacklist temp file: {}", e);
            return;
        }
        if let Err(e) = tmp.persist(path) {
            log::warn!(target: "policy", "failed to rename whitelist/blacklist temp file: {}", e);
        }
    }

    pub fn add_to_whitelist(&self, address: Address, by: &str, reason: &str, expires_at: Option<u64>, now: u64) {
        let mut state = self.state.write();
        state.blacklist.remove(&address);
        state.whitelist.insert(address, PolicyEntry { address, added_at: now, added_by: by.into(), reason: reason.into(), is_active: true, expires_at });
        drop(state);
        self.persist();
    }

    pub fn remove_from_whitelist(&self, address: Address) {
        self.state.write().whitelist.remove(&address);
        self.persist();
    }

    pub fn add_to_blacklist(&self, address: Address, by: &str, reason: &str, expires_at: Option<u64>, now: u64) {
        let mut state = self.state.write();
        state.whitelist.remove(&address);
        state.blacklist.insert(address, PolicyEntry { address, added_at: now, added_by: by.into(), reason: reason.into(), is_active: true, expires_at });
        drop(state);
        self.persist();
    }

    pub fn remove_from_blacklist(&self, address: Address) {
        self.state.write().blacklist.remove(&address);
        self.persist();
    }

    pub fn is_whitelisted(&self, address: Address, now: u64) -> bool {
        self.state.read().whitelist.get(&address).map_or(false, |e| e.is_effective(now))
    }

    pub fn is_blacklisted(&self, address: Address, now: u64) -> bool {
        self.state.read().blacklist.get(&address).map_or(false, |e| e.is_effective(now))
    }

    pub fn whitelist_entries(&self) -> Vec<PolicyEntry> {
        self.state.read().whitelist.values().cloned().collect()
    }

    pub fn blacklist_entries(&self) -> Vec<PolicyEntry> {
        self.state.read().blacklist.values().cloned().collect()
    }

    /// Removes entries whose expiry has passed.
    pub fn cleanup_expired_entries(&self, now: u64) -> usize {
        let mut state = self.state.write();
        let before = state.whitelist.len() + state.blacklist.len();
        state.whitelist.retain(|_, e| e.is_effective(now));
        state.blacklist.retain(|_, e| e.is_effective(now));
        let removed = before - (state.whitelist.len() + state.blacklist.len());
        drop(state);
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// `ValidateSigner`: blacklist strictly overrides whitelist; whitelist
    /// enforcement depends on `WhitelistMode`.
    pub fn validate_signer(&self, address: Address, now: u64) -> (bool, Option<String>) {
        if self.config.enable_blacklist && self.is_blacklisted(address, now) {
            return (false, Some("signer is blacklisted".into()));
        }
        if self.config.enable_whitelist && !self.is_whitelisted(address, now) {
            if self.config.whitelist_mode {
                return (false, Some("signer is not whitelisted".into()));
            }
            log::warn!(target: "policy", "signer {:#x} is not whitelisted (warn-only mode)", address);
        }
        (true, None)
    }

    /// Summary used by the `getStats` RPC method.
    pub fn stats(&self, now: u64) -> PolicyStats {
        let state = self.state.read();
        PolicyStats {
            whitelist_active: state.whitelist.values().filter(|e| e.is_effective(now)).count(),
            blacklist_active: state.blacklist.values().filter(|e| e.is_effective(now)).count(),
            whitelist_total: state.whitelist.len(),
            blacklist_total: state.blacklist.len(),
            enable_whitelist: self.config.enable_whitelist,
            enable_blacklist: self.config.enable_blacklist,
            whitelist_mode: self.config.whitelist_mode,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyStats {
    pub whitelist_active: usize,
    pub blacklist_active: usize,
    pub whitelist_total: usize,
    pub blacklist_total: usize,
    pub enable_whitelist: bool,
    pub enable_blacklist: bool,
    pub whitelist_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn blacklist_overrides_whitelist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let config = PolicyConfig { persistence_path: path.to_str().unwrap().into(), ..Default::default() };
        let mgr = PolicyManager::new(config);
        mgr.add_to_whitelist(addr(1), "admin", "trusted", None, 0);
        assert!(mgr.is_whitelisted(addr(1), 0));
        mgr.add_to_blacklist(addr(1), "admin", "misbehaved", None, 0);
        assert!(!mgr.is_whitelisted(addr(1), 0));
        assert!(mgr.is_blacklisted(addr(1), 0));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let config = PolicyConfig { persistence_path: path.to_str().unwrap().into(), ..Default::default() };
        {
            let mgr = PolicyManager::new(config.clone());
            mgr.add_to_blacklist(addr(2), "admin", "spam", Some(1000), 0);
        }
        let mgr2 = PolicyManager::new(config);
        assert!(mgr2.is_blacklisted(addr(2), 500));
        assert!(!mgr2.is_blacklisted(addr(2), 1001));
    }

    #[test]
    fn expired_entries_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let config = PolicyConfig { persistence_path: path.to_str().unwrap().into(), ..Default::default() };
        let mgr = PolicyManager::new(config);
        mgr.add_to_blacklist(addr(3), "admin", "temp ban", Some(100), 0);
        assert!(mgr.is_blacklisted(addr(3), 99));
        assert!(!mgr.is_blacklisted(addr(3), 101));
        assert_eq!(mgr.cleanup_expired_entries(200), 1);
    }
}
