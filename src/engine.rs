//! Sequences every subsystem for `prepare`, `seal`, `verify` and
//! `snapshot-at`. This is the only module allowed to call across
//! subsystems — none of them import this one, so there is no cycle.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use secp256k1::SecretKey;

use crate::anomaly::AnomalyDetector;
use crate::config::{PoatcConfig, TraceLevel};
use crate::crypto::{recover_signer, sign as sign_digest};
use crate::error::{Error, ErrorKind};
use crate::header::{empty_uncle_hash, expected_base_fee, Header, ADDRESS_LENGTH, GAS_LIMIT_BOUND_DIVISOR, MIN_GAS_LIMIT, NONCE_AUTH_VOTE, NONCE_DROP_VOTE, NULL_MIX_DIGEST, SIGNATURE_LENGTH, VANITY_LENGTH};
use crate::policy::PolicyManager;
use crate::reputation::ReputationSystem;
use crate::seal::{compute_delay, RealTimeScheduler, SealOutcome, SealScheduler};
use crate::selection::ValidatorSelectionManager;
use crate::snapshot::{Snapshot, SnapshotEngine};
use crate::storage::{Clock, KeyValueDB};
use crate::time_dynamic::TimeDynamicManager;
use crate::tracing::{TraceEventType, TracingSystem};

pub struct Engine {
    config: PoatcConfig,
    clock: Arc<dyn Clock>,
    signer: RwLock<Option<SecretKey>>,
    proposals: RwLock<BTreeMap<Address, bool>>,

    snapshot_engine: SnapshotEngine,
    anomaly: Mutex<AnomalyDetector>,
    reputation: ReputationSystem,
    selection: ValidatorSelectionManager,
    policy: PolicyManager,
    tracing: TracingSystem,
    time_dynamic: TimeDynamicManager,
    scheduler: Box<dyn SealScheduler>,
}

impl Engine {
    /// `genesis_hash` must be the hash of the actual genesis header, since
    /// that is the `parent_hash` every block-1 header will carry.
    pub fn new(config: PoatcConfig, db: Arc<dyn KeyValueDB>, clock: Arc<dyn Clock>, genesis_hash: H256, genesis_signers: std::collections::BTreeSet<Address>) -> Self {
        let now = clock.now_unix();
        let snapshot_engine = SnapshotEngine::new(db.clone(), config.snapshot.snapshot_cache_size, config.snapshot.checkpoint_interval, config.snapshot.epoch);
        snapshot_engine.seed_genesis(Snapshot::genesis(0, genesis_hash, genesis_signers));

        let anomaly = AnomalyDetector::new(config.anomaly.clone(), config.snapshot.period_secs);
        let reputation = ReputationSystem::new(config.reputation.clone(), db.clone(), now);
        let selection = ValidatorSelectionManager::new(config.selection.clone());
        let policy = PolicyManager::new(config.policy.clone());
        let tracing = TracingSystem::new(config.tracing.clone());
        let time_dynamic = TimeDynamicManager::new(config.time_dynamic.clone(), now);

        Engine {
            config,
            clock,
            signer: RwLock::new(None),
            proposals: RwLock::new(BTreeMap::new()),
            snapshot_engine,
            anomaly: Mutex::new(anomaly),
            reputation,
            selection,
            policy,
            tracing,
            time_dynamic,
            scheduler: Box::new(RealTimeScheduler),
        }
    }

    /// Swaps in a different seal scheduler, e.g. an [`crate::seal::ImmediateScheduler`]
    /// so tests don't actually sleep out the seal delay.
    pub fn with_scheduler(mut self, scheduler: Box<dyn SealScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn set_signer(&self, key: SecretKey) {
        *self.signer.write() = Some(key);
    }

    pub fn propose(&self, target: Address, authorize: bool) {
        self.proposals.write().insert(target, authorize);
    }

    pub fn discard(&self, target: Address) {
        self.proposals.write().remove(&target);
    }

    pub fn snapshot_at(&self, number: u64, hash: H256, ancestors: &[Header]) -> Result<Snapshot, Error> {
        self.snapshot_engine.snapshot(number, hash, ancestors)
    }

    pub fn reputation(&self) -> &ReputationSystem {
        &self.reputation
    }

    pub fn selection(&self) -> &ValidatorSelectionManager {
        &self.selection
    }

    pub fn policy(&self) -> &PolicyManager {
        &self.policy
    }

    pub fn tracing(&self) -> &TracingSystem {
        &self.tracing
    }

    pub fn time_dynamic(&self) -> &TimeDynamicManager {
        &self.time_dynamic
    }

    /// Runs anomaly detection against the current window without mutating
    /// it — used by read-only RPC methods.
    pub fn detect_anomalies(&self) -> Vec<crate::anomaly::Anomaly> {
        self.anomaly.lock().detect_anomalies()
    }

    pub fn anomaly_stats(&self) -> crate::anomaly::AnomalyStats {
        self.anomaly.lock().stats()
    }

    pub fn anomaly_config(&self) -> crate::config::AnomalyConfig {
        self.anomaly.lock().config().clone()
    }

    pub fn proposals(&self) -> BTreeMap<Address, bool> {
        self.proposals.read().clone()
    }

    /// Snapshot cached under `hash`, if any — backs the hash-addressed RPC
    /// snapshot queries, which cannot walk an unknown ancestor chain.
    pub fn cached_snapshot(&self, hash: H256) -> Option<Snapshot> {
        self.snapshot_engine.get_cached(&hash)
    }

    /// Forces committee rotation independent of the time-dynamic cadence,
    /// marking the cadence as triggered so the automatic path doesn't
    /// immediately re-fire on the next block.
    pub fn trigger_validator_selection(&self, block_number: u64, seed_hash: H256, now: u64) -> Result<crate::selection::CommitteeSelection, Error> {
        let selection = self.selection.select_small_validator_set(block_number, seed_hash, now)?;
        self.time_dynamic.mark_validator_selection_triggered(now);
        Ok(selection)
    }

    /// Forces a reputation decay pass independent of the time-dynamic
    /// cadence, using the same variable factor the automatic path computes.
    pub fn trigger_reputation_decay(&self, now: u64) {
        let factor = self.time_dynamic.decay_factor(now);
        self.reputation.apply_periodic_decay(factor, now);
        self.time_dynamic.record_decay(Address::zero(), 0.0, 0.0, factor, now);
    }

    fn now(&self) -> u64 {
        self.clock.now_unix()
    }

    /// Fills coinbase (a random pending proposal), difficulty, extra-data
    /// and timestamp ready for sealing.
    pub fn prepare(&self, header: &mut Header, parent: &Header, parent_snapshot: &Snapshot) -> Result<(), Error> {
        header.uncle_hash = empty_uncle_hash();
        header.mix_digest = NULL_MIX_DIGEST;

        let mut chosen_proposal = None;
        if !header.is_checkpoint(self.config.snapshot.epoch) {
            let proposals = self.proposals.read();
            for (&target, &authorize) in proposals.iter() {
                if parent_snapshot.valid_vote(target, authorize) {
                    chosen_proposal = Some((target, authorize));
                    break;
                }
            }
        }
        match chosen_proposal {
            Some((target, authorize)) => {
                header.coinbase = target;
                header.nonce = if authorize { NONCE_AUTH_VOTE } else { NONCE_DROP_VOTE };
            }
            None => {
                header.coinbase = Address::zero();
                header.nonce = NONCE_DROP_VOTE;
            }
        }

        let local = self.local_address()?;
        header.difficulty = if parent_snapshot.inturn(header.number, local) { U256::from(2) } else { U256::from(1) };

        let mut extra = vec![0u8; VANITY_LENGTH];
        if header.is_checkpoint(self.config.snapshot.epoch) {
            for signer in &parent_snapshot.signers {
                extra.extend_from_slice(signer.as_bytes());
            }
        }
        extra.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
        header.extra_data = extra;

        let earliest = parent.timestamp + self.config.snapshot.period_secs;
        header.timestamp = earliest.max(self.now());
        Ok(())
    }

    fn local_address(&self) -> Result<Address, Error> {
        let guard = self.signer.read();
        let key = guard.as_ref().ok_or(ErrorKind::NotASigner)?;
        let secp = secp256k1::Secp256k1::new();
        let public = secp256k1::PublicKey::from_secret_key(&secp, key);
        Ok(crate::crypto::public_to_address(&public))
    }

    /// Signs and emits `header`, observing `stop`. Returns `Err` if the
    /// local account isn't authorized, has signed too recently, or sealing
    /// is cancelled.
    pub fn seal(&self, mut header: Header, parent_snapshot: &Snapshot, stop: Receiver<()>) -> Result<Header, Error> {
        let local = self.local_address()?;
        if !parent_snapshot.signers.contains(&local) {
            return Err(ErrorKind::Unauthorized(local).into());
        }
        if parent_snapshot.recents.values().any(|a| *a == local) {
            return Err(ErrorKind::RecentlySigned(local).into());
        }

        let in_turn = parent_snapshot.inturn(header.number, local);
        let delay = compute_delay(
            header.timestamp,
            self.now(),
            self.time_dynamic.current_block_time_secs(),
            self.time_dynamic.base_block_time_secs(),
            in_turn,
            parent_snapshot.signer_count(),
        );

        match self.scheduler.wait(&stop, delay) {
            SealOutcome::Cancelled => return Err(ErrorKind::HeaderFormat("sealing cancelled".into()).into()),
            SealOutcome::Ready => {}
        }

        let digest = header.seal_hash();
        let key = self.signer.read().as_ref().cloned().ok_or(ErrorKind::NotASigner)?;
        let sig = sign_digest(&key, digest)?;
        let vanity_len = header.extra_data.len() - SIGNATURE_LENGTH;
        header.extra_data.truncate(vanity_len);
        header.extra_data.extend_from_slice(&sig);
        Ok(header)
    }

    /// Standalone field checks that don't require chain context.
    fn verify_header_basic(&self, header: &Header) -> Result<(), Error> {
        if header.timestamp > self.now() + 15 {
            return Err(ErrorKind::HeaderFormat("timestamp in the future".into()).into());
        }
        if !header.is_auth_vote() && !header.is_drop_vote() {
            return Err(ErrorKind::HeaderFormat("nonce is neither auth nor drop vote".into()).into());
        }
        let is_checkpoint = header.is_checkpoint(self.config.snapshot.epoch);
        if is_checkpoint && !header.is_drop_vote() {
            return Err(ErrorKind::HeaderFormat("checkpoint blocks must carry the drop-vote nonce".into()).into());
        }
        if is_checkpoint && header.coinbase != Address::zero() {
            return Err(ErrorKind::HeaderFormat("invalid checkpoint vote".into()).into());
        }
        if header.gas_limit < U256::from(MIN_GAS_LIMIT) {
            return Err(ErrorKind::HeaderFormat("gas limit below the protocol minimum".into()).into());
        }
        if header.gas_used > header.gas_limit {
            return Err(ErrorKind::HeaderFormat("gas used exceeds gas limit".into()).into());
        }
        let (_, signers, _) = header.extra_data_parts()?;
        if !is_checkpoint && !signers.is_empty() {
            return Err(ErrorKind::HeaderFormat("non-checkpoint block carries a signer list".into()).into());
        }
        if is_checkpoint && signers.is_empty() {
            return Err(ErrorKind::HeaderFormat("checkpoint block carries no signer list".into()).into());
        }
        if signers.len() % ADDRESS_LENGTH != 0 {
            return Err(ErrorKind::HeaderFormat("checkpoint signer list misaligned".into()).into());
        }
        if header.mix_digest != NULL_MIX_DIGEST {
            return Err(ErrorKind::HeaderFormat("invalid mix digest".into()).into());
        }
        if header.uncle_hash != empty_uncle_hash() {
            return Err(ErrorKind::HeaderFormat("invalid uncle hash".into()).into());
        }
        if header.difficulty != U256::from(1) && header.difficulty != U256::from(2) {
            return Err(ErrorKind::HeaderFormat("invalid difficulty".into()).into());
        }
        Ok(())
    }

    fn verify_cascading_fields(&self, header: &Header, parent: &Header) -> Result<(), Error> {
        if header.parent_hash != parent.hash() {
            return Err(ErrorKind::UnknownAncestor(header.parent_hash).into());
        }
        if parent.timestamp + self.config.snapshot.period_secs > header.timestamp {
            return Err(ErrorKind::HeaderFormat("header timestamp too close to parent".into()).into());
        }

        let bound = parent.gas_limit / U256::from(GAS_LIMIT_BOUND_DIVISOR);
        let diff = if header.gas_limit > parent.gas_limit { header.gas_limit - parent.gas_limit } else { parent.gas_limit - header.gas_limit };
        if diff >= bound {
            return Err(ErrorKind::HeaderFormat("gas limit diverges from parent by more than the bound divisor allows".into()).into());
        }

        match (parent.base_fee_per_gas, header.base_fee_per_gas) {
            (None, None) => {}
            (Some(_), None) | (None, Some(_)) => {
                return Err(ErrorKind::HeaderFormat("base fee presence does not match parent".into()).into());
            }
            (Some(_), Some(actual)) => {
                let expected = expected_base_fee(parent).expect("parent carries a base fee");
                if actual != expected {
                    return Err(ErrorKind::HeaderFormat("base fee does not match the expected EIP-1559 adjustment".into()).into());
                }
            }
        }
        Ok(())
    }

    /// Full verify cascade: field checks, snapshot derivation, seal
    /// verification, and every side-effect from §4.8 of the design, in
    /// order. Side-effect failures (anomaly/reputation/tracing) never abort
    /// verification — only header-format/ancestor/authorization errors do.
    pub fn verify(&self, header: &Header, parent: &Header, ancestors: &[Header]) -> Result<(), Error> {
        self.verify_header_basic(header)?;
        self.verify_cascading_fields(header, parent)?;

        let snapshot = self.snapshot_engine.snapshot(header.number - 1, header.parent_hash, ancestors)?;
        self.snapshot_engine.verify_checkpoint_signers(&snapshot, header)?;

        let result = self.verify_seal(header, parent, &snapshot);
        if result.is_ok() {
            // Advances and caches the snapshot for this block so later
            // headers can resolve it without re-walking the chain.
            let _ = self.snapshot_engine.snapshot(header.number, header.hash(), &[header.clone()]);
        }
        if let Err(ref e) = result {
            self.tracing.record(
                TraceEventType::HeaderRejected,
                TraceLevel::Basic,
                header.number,
                0,
                None,
                format!("header rejected: {}", e),
                Default::default(),
                None,
                self.now(),
            );
        }
        result
    }

    /// Verifies `headers` in order, threading each as the parent of the
    /// next. Every entry's outcome is independent and returned in input
    /// order, so a rejection partway through does not stop the remaining
    /// headers from being checked.
    pub fn verify_headers(&self, parent: &Header, headers: &[Header]) -> Vec<Result<(), Error>> {
        let mut results = Vec::with_capacity(headers.len());
        let mut prev = parent.clone();
        for header in headers {
            results.push(self.verify(header, &prev, &[]));
            prev = header.clone();
        }
        results
    }

    fn verify_seal(&self, header: &Header, parent: &Header, snapshot: &Snapshot) -> Result<(), Error> {
        let now = self.now();
        let sealer = recover_signer(header)?;

        if !snapshot.signers.contains(&sealer) {
            return Err(ErrorKind::Unauthorized(sealer).into());
        }
        if snapshot.recents.values().any(|a| *a == sealer) {
            return Err(ErrorKind::RecentlySigned(sealer).into());
        }

        let expect_inturn = snapshot.inturn(header.number, sealer);
        let expected_difficulty = if expect_inturn { U256::from(2) } else { U256::from(1) };
        if header.difficulty != expected_difficulty {
            return Err(ErrorKind::HeaderFormat("difficulty does not match turn-ness".into()).into());
        }

        let (ok, reason) = self.policy.validate_signer(sealer, now);
        if !ok {
            self.tracing.record(TraceEventType::PolicyChange, TraceLevel::Basic, header.number, 0, Some(sealer), reason.clone().unwrap_or_default(), Default::default(), None, now);
            return Err(ErrorKind::PolicyRejected(sealer, reason.unwrap_or_default()).into());
        }

        // From here on, every failure is a side-effect, logged and never
        // propagated — the header has already passed authorization.
        self.apply_side_effects(header, parent, sealer, snapshot, now);
        Ok(())
    }

    fn apply_side_effects(&self, header: &Header, parent: &Header, sealer: Address, snapshot: &Snapshot, now: u64) {
        let mut anomalies;
        {
            let mut detector = self.anomaly.lock();
            detector.add_block(sealer, header.number, header.timestamp, parent.timestamp);
            anomalies = detector.detect_anomalies();
            if let Some(expected) = snapshot.inturn_signer(header.number) {
                if expected != sealer {
                    if let Some(missed) = detector.missing_signer(expected, header.number, now) {
                        anomalies.push(missed);
                    }
                }
            }
        }
        for anomaly in &anomalies {
            self.reputation.record_violation(anomaly.sealer, anomaly.block_number, &format!("{:?}", anomaly.kind), &anomaly.message, now);
            self.tracing.record(TraceEventType::Anomaly, TraceLevel::Detailed, anomaly.block_number, 0, Some(anomaly.sealer), anomaly.message.clone(), Default::default(), None, now);
        }

        self.reputation.record_block_mined(sealer, header.number, now);
        self.selection.record_block_mining(sealer, now);
        if let Some(score) = self.reputation.score_of(sealer) {
            self.selection.update_reputation(sealer, score.current_score);
            self.apply_reputation_gate(sealer, score.current_score, now);
            self.tracing.record(TraceEventType::ReputationChange, TraceLevel::Detailed, header.number, 0, Some(sealer), format!("score now {:.3}", score.current_score), Default::default(), None, now);
        }

        if self.time_dynamic.should_update_validator_selection(now) {
            let seed_hash = header.hash();
            if self.selection.select_small_validator_set(header.number, seed_hash, now).is_ok() {
                self.time_dynamic.mark_validator_selection_triggered(now);
                self.tracing.record(TraceEventType::CommitteeSelected, TraceLevel::Basic, header.number, 0, None, "committee rotated", Default::default(), None, now);
            }
        }

        if self.time_dynamic.should_apply_reputation_decay(now) {
            let factor = self.time_dynamic.decay_factor(now);
            let before = self.reputation.score_of(sealer).map(|s| s.current_score);
            self.reputation.apply_periodic_decay(factor, now);
            if let (Some(before), Some(after)) = (before, self.reputation.score_of(sealer).map(|s| s.current_score)) {
                self.time_dynamic.record_decay(sealer, before, after, factor, now);
            }
            self.tracing.record(TraceEventType::ReputationDecay, TraceLevel::Detailed, header.number, 0, None, "periodic reputation decay applied", Default::default(), None, now);
        }

        let _ = snapshot;
    }

    /// Auto whitelist/blacklist hook, invoked after every reputation
    /// recompute.
    fn apply_reputation_gate(&self, addr: Address, score: f64, now: u64) {
        if score < self.reputation.low_threshold() {
            if !self.policy.is_blacklisted(addr, now) {
                let expiry = now + self.reputation.auto_blacklist_expiry_secs();
                self.policy.add_to_blacklist(addr, "reputation-auto", "score below low threshold", Some(expiry), now);
            }
        } else if score >= self.reputation.high_threshold() {
            if self.policy.is_blacklisted(addr, now) {
                self.policy.remove_from_blacklist(addr);
            }
            if !self.policy.is_whitelisted(addr, now) {
                self.policy.add_to_whitelist(addr, "reputation-auto", "score above high threshold", None, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::public_to_address;
    use crate::header::test_header;
    use crate::storage::MemoryDB;
    use secp256k1::Secp256k1;

    struct TestValidator {
        key: SecretKey,
        address: Address,
    }

    fn make_validator() -> TestValidator {
        let secp = Secp256k1::new();
        let key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        let public = secp256k1::PublicKey::from_secret_key(&secp, &key);
        TestValidator { key, address: public_to_address(&public) }
    }

    fn seal_with(validator: &TestValidator, mut header: Header) -> Header {
        let digest = header.seal_hash();
        let sig = sign_digest(&validator.key, digest).unwrap();
        let len = header.extra_data.len() - SIGNATURE_LENGTH;
        header.extra_data.truncate(len);
        header.extra_data.extend_from_slice(&sig);
        header
    }

    #[test]
    fn single_sealer_three_blocks_normal_cadence() {
        let a = make_validator();
        let b = make_validator();
        let mut signers = std::collections::BTreeSet::new();
        signers.insert(a.address);
        signers.insert(b.address);

        let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);

        let db = Arc::new(MemoryDB::new());
        let clock = Arc::new(crate::storage::TestClock::new(1_700_000_000));
        let engine = Engine::new(PoatcConfig::default(), db, clock.clone(), genesis.hash(), signers);

        let mut parent = genesis.clone();

        let sealers = [&a, &b, &a];
        for (i, sealer) in sealers.iter().enumerate() {
            let number = i as u64 + 1;
            let parent_snapshot = engine.snapshot_at(parent.number, parent.hash(), &[]).expect("parent snapshot resolves");
            let difficulty = if parent_snapshot.inturn(number, sealer.address) { U256::from(2) } else { U256::from(1) };
            let mut header = test_header(number, parent.hash(), Address::zero(), parent.timestamp + 15);
            header.difficulty = difficulty;
            let header = seal_with(sealer, header);
            clock.set(header.timestamp);
            engine.verify(&header, &parent, &[header.clone()]).expect("header should verify");
            parent = header;
        }

        let events = engine.reputation().events();
        let mined = events.iter().filter(|e| matches!(e.kind, crate::reputation::ReputationEventKind::BlockMined)).count();
        assert_eq!(mined, 3);
        assert!(engine.tracing().merkle_root().is_some());
    }

    #[test]
    fn seal_rejects_an_address_that_is_not_an_authorized_signer() {
        let a = make_validator();
        let outsider = make_validator();
        let mut signers = std::collections::BTreeSet::new();
        signers.insert(a.address);

        let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
        let db = Arc::new(MemoryDB::new());
        let clock = Arc::new(crate::storage::TestClock::new(1_700_000_000));
        let engine = Engine::new(PoatcConfig::default(), db, clock, genesis.hash(), signers).with_scheduler(Box::new(crate::seal::ImmediateScheduler));
        engine.set_signer(outsider.key);

        let parent_snapshot = engine.snapshot_at(genesis.number, genesis.hash(), &[]).unwrap();
        let header = test_header(1, genesis.hash(), Address::zero(), genesis.timestamp + 15);
        let (_tx, rx) = std::sync::mpsc::channel();
        let result = engine.seal(header, &parent_snapshot, rx);
        assert!(matches!(result, Err(ref e) if matches!(e.kind(), ErrorKind::Unauthorized(addr) if *addr == outsider.address)));
    }

    #[test]
    fn seal_with_immediate_scheduler_returns_a_signed_header_without_blocking() {
        let a = make_validator();
        let mut signers = std::collections::BTreeSet::new();
        signers.insert(a.address);

        let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
        let db = Arc::new(MemoryDB::new());
        let clock = Arc::new(crate::storage::TestClock::new(1_700_000_000));
        let engine = Engine::new(PoatcConfig::default(), db, clock, genesis.hash(), signers).with_scheduler(Box::new(crate::seal::ImmediateScheduler));
        engine.set_signer(a.key);

        let parent_snapshot = engine.snapshot_at(genesis.number, genesis.hash(), &[]).unwrap();
        let header = test_header(1, genesis.hash(), Address::zero(), genesis.timestamp + 15);
        let (_tx, rx) = std::sync::mpsc::channel();
        let sealed = engine.seal(header, &parent_snapshot, rx).expect("local signer is authorized and has not signed recently");
        let recovered = recover_signer(&sealed).expect("seal recovers");
        assert_eq!(recovered, a.address);
    }
}
