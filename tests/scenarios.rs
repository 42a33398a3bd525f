//! End-to-end scenarios driving a fully assembled `Engine` against
//! `MemoryDB` and `TestClock`.

use std::collections::BTreeSet;
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use poatc_consensus::config::{AnomalyConfig, PoatcConfig};
use poatc_consensus::engine::Engine;
use poatc_consensus::header::{test_header, Header, NONCE_DROP_VOTE, SIGNATURE_LENGTH};
use poatc_consensus::storage::{MemoryDB, TestClock};

struct Validator {
    secret: secp256k1::SecretKey,
    address: Address,
}

fn make_validator() -> Validator {
    let secp = secp256k1::Secp256k1::new();
    let secret = secp256k1::SecretKey::new(&mut secp256k1::rand::thread_rng());
    let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
    Validator { secret, address: poatc_consensus::crypto::public_to_address(&public) }
}

fn seal(validator: &Validator, mut header: Header) -> Header {
    let digest = header.seal_hash();
    let sig = poatc_consensus::crypto::sign(&validator.secret, digest).unwrap();
    let cut = header.extra_data.len() - SIGNATURE_LENGTH;
    header.extra_data.truncate(cut);
    header.extra_data.extend_from_slice(&sig);
    header
}

fn build_engine(config: PoatcConfig, genesis: &Header, signers: BTreeSet<Address>) -> (Engine, Arc<TestClock>) {
    let db = Arc::new(MemoryDB::new());
    let clock = Arc::new(TestClock::new(genesis.timestamp));
    let engine = Engine::new(config, db, clock.clone(), genesis.hash(), signers);
    (engine, clock)
}

fn next_header(engine: &Engine, parent: &Header, validator: &Validator) -> Header {
    let parent_snapshot = engine.snapshot_at(parent.number, parent.hash(), &[]).expect("parent snapshot resolves");
    let difficulty = if parent_snapshot.inturn(parent.number + 1, validator.address) { U256::from(2) } else { U256::from(1) };
    let mut header = test_header(parent.number + 1, parent.hash(), Address::zero(), parent.timestamp + 15);
    header.difficulty = difficulty;
    header.nonce = NONCE_DROP_VOTE;
    seal(validator, header)
}

/// Drives the clock forward to the header's own timestamp, mirroring a node
/// that only learns of a block once its timestamp has actually elapsed.
fn verify_at(engine: &Engine, clock: &TestClock, header: &Header, parent: &Header) -> Result<(), poatc_consensus::Error> {
    clock.set(header.timestamp);
    engine.verify(header, parent, &[])
}

#[test]
fn alternating_sealers_verify_cleanly_over_three_blocks() {
    let a = make_validator();
    let b = make_validator();
    let mut signers = BTreeSet::new();
    signers.insert(a.address);
    signers.insert(b.address);

    let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
    let (engine, clock) = build_engine(PoatcConfig::default(), &genesis, signers);

    let mut parent = genesis;
    for validator in [&a, &b, &a] {
        let header = next_header(&engine, &parent, validator);
        verify_at(&engine, &clock, &header, &parent).expect("header verifies");
        parent = header;
    }

    let events = engine.reputation().events();
    let mined = events.iter().filter(|e| matches!(e.kind, poatc_consensus::reputation::ReputationEventKind::BlockMined)).count();
    assert_eq!(mined, 3);
}

#[test]
fn rapid_signing_beyond_limit_is_flagged_as_a_violation() {
    // Two signers so `a` can legally reseal every other block (the
    // recent-signers window forbids back-to-back resealing by one
    // address) while still clearing `max_blocks_per_signer` within the
    // analysis window.
    let a = make_validator();
    let b = make_validator();
    let mut signers = BTreeSet::new();
    signers.insert(a.address);
    signers.insert(b.address);

    let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
    let config = PoatcConfig { anomaly: AnomalyConfig { max_blocks_per_signer: 2, analysis_window_secs: 3600, ..AnomalyConfig::default() }, ..PoatcConfig::default() };
    let (engine, clock) = build_engine(config, &genesis, signers);

    let mut parent = genesis;
    for validator in [&a, &b, &a, &b, &a] {
        let header = next_header(&engine, &parent, validator);
        verify_at(&engine, &clock, &header, &parent).expect("header verifies despite the anomaly");
        parent = header;
    }

    let events = engine.reputation().events();
    assert!(events.iter().any(|e| matches!(e.kind, poatc_consensus::reputation::ReputationEventKind::Violation | poatc_consensus::reputation::ReputationEventKind::Penalty)));
}

#[test]
fn committee_selection_is_reproducible_given_the_same_seed() {
    use num_bigint::BigUint;
    use poatc_consensus::config::SelectionConfig;
    use poatc_consensus::selection::ValidatorSelectionManager;

    let build = || {
        let mgr = ValidatorSelectionManager::new(SelectionConfig::default());
        for i in 1..=6u64 {
            mgr.add_validator(Address::from_low_u64_be(i), BigUint::from(i * 10), i as f64, 0);
        }
        mgr
    };
    let hash = H256::from_low_u64_be(0xabc);
    let m1 = build();
    let m2 = build();
    let s1 = m1.select_small_validator_set(1, hash, 0).unwrap();
    let s2 = m2.select_small_validator_set(1, hash, 0).unwrap();
    assert_eq!(s1.selected, s2.selected);
}

#[test]
fn merkle_proof_round_trips_for_every_recorded_trace_event() {
    use poatc_consensus::config::{TraceLevel, TracingConfig};
    use poatc_consensus::tracing::{TraceEventType, TracingSystem};
    use std::collections::BTreeMap;

    let sys = TracingSystem::new(TracingConfig::default());
    for i in 0..5u64 {
        sys.record(TraceEventType::HeaderVerified, TraceLevel::Basic, i, 0, None, format!("block {}", i), BTreeMap::new(), None, 1000 + i);
    }
    for event in sys.trace_events(None, None, None) {
        assert!(sys.verify_event_in_merkle_tree(&event));
        let proof = sys.merkle_proof(&event).unwrap();
        assert!(!proof.is_empty() || sys.event_count() == 1);
    }
}

#[test]
fn whitelist_blacklist_gate_rejects_a_blacklisted_sealer() {
    let a = make_validator();
    let mut signers = BTreeSet::new();
    signers.insert(a.address);

    let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
    let dir = tempfile::tempdir().unwrap();
    let mut config = PoatcConfig::default();
    config.policy.persistence_path = dir.path().join("policy.json").to_str().unwrap().into();
    let (engine, clock) = build_engine(config, &genesis, signers);

    engine.policy().add_to_blacklist(a.address, "test", "misbehaved", None, 0);

    let header = next_header(&engine, &genesis, &a);
    let result = verify_at(&engine, &clock, &header, &genesis);
    assert!(result.is_err());
}

#[test]
fn verify_headers_reports_one_result_per_header_in_order() {
    let a = make_validator();
    let b = make_validator();
    let mut signers = BTreeSet::new();
    signers.insert(a.address);
    signers.insert(b.address);

    let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
    let (engine, clock) = build_engine(PoatcConfig::default(), &genesis, signers);

    let mut chain = Vec::new();
    let mut parent = genesis.clone();
    for validator in [&a, &b, &a] {
        let header = next_header(&engine, &parent, validator);
        clock.set(header.timestamp);
        engine.verify(&header, &parent, &[]).expect("header verifies as it is produced");
        parent = header.clone();
        chain.push(header);
    }

    let results = engine.verify_headers(&genesis, &chain);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_ok()));
}

#[test]
fn timestamp_too_close_to_parent_is_a_header_format_error() {
    let a = make_validator();
    let mut signers = BTreeSet::new();
    signers.insert(a.address);

    let genesis = test_header(0, H256::zero(), Address::zero(), 1_700_000_000);
    let (engine, _clock) = build_engine(PoatcConfig::default(), &genesis, signers);

    let parent_snapshot = engine.snapshot_at(genesis.number, genesis.hash(), &[]).unwrap();
    let difficulty = if parent_snapshot.inturn(1, a.address) { U256::from(2) } else { U256::from(1) };
    let mut header = test_header(1, genesis.hash(), Address::zero(), genesis.timestamp + 1);
    header.difficulty = difficulty;
    let header = seal(&a, header);

    assert!(engine.verify(&header, &genesis, &[]).is_err());
}
