//! Authoritative signer set and recent-signing history.
//!
//! Tracks the current authorized signer set, the sliding window of addresses
//! that have sealed too recently to seal again, and the running vote tally
//! used to add or drop signers by majority. Checkpoint blocks re-derive the
//! signer set from `extra_data` rather than trusting the tally across epoch
//! boundaries.

mod vote;

pub use vote::AuthorityVote;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ethereum_types::{Address, H256};
use lru::LruCache;
use parking_lot::Mutex;
use sha3::{Digest, Keccak256};

use crate::crypto::recover_signer;
use crate::error::{Error, ErrorKind};
use crate::header::Header;
use crate::storage::KeyValueDB;

const CHECKPOINT_COLUMN: &str = "snapshot_checkpoints";

/// Immutable, identified by `(number, hash)`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub number: u64,
    pub hash: H256,
    pub signers: BTreeSet<Address>,
    /// height -> signer, the last `floor(N/2)+1` heights.
    pub recents: BTreeMap<u64, Address>,
    /// target -> votes cast for/against it since its last state change.
    pub votes: HashMap<Address, Vec<AuthorityVote>>,
}

fn recent_window_size(signer_count: usize) -> u64 {
    (signer_count / 2 + 1) as u64
}

impl Snapshot {
    pub fn genesis(number: u64, hash: H256, signers: BTreeSet<Address>) -> Self {
        Snapshot { number, hash, signers, recents: BTreeMap::new(), votes: HashMap::new() }
    }

    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// A vote is only valid if it would actually change the outcome: you
    /// cannot vote to add a signer who is already one, nor to drop a
    /// non-signer.
    pub fn valid_vote(&self, target: Address, authorize: bool) -> bool {
        let is_signer = self.signers.contains(&target);
        (authorize && !is_signer) || (!authorize && is_signer)
    }

    fn tally(&self, target: Address, authorize: bool) -> usize {
        self.votes
            .get(&target)
            .map(|votes| votes.iter().filter(|v| v.authorize == authorize && self.signers.contains(&v.voter)).count())
            .unwrap_or(0)
    }

    fn record_vote(&mut self, vote: AuthorityVote) {
        let entry = self.votes.entry(vote.target).or_default();
        entry.retain(|v| v.voter != vote.voter);
        entry.push(vote);
    }

    fn clear_votes_for(&mut self, target: Address) {
        self.votes.remove(&target);
    }

    /// Derives the snapshot effective *after* `header`, given the snapshot
    /// effective at `header`'s parent. Pure and deterministic (universal
    /// property 1).
    pub fn apply(&self, header: &Header) -> Result<Snapshot, Error> {
        if header.number != self.number + 1 {
            return Err(ErrorKind::HeaderFormat(format!(
                "non-contiguous header: snapshot at {}, header at {}",
                self.number, header.number
            ))
            .into());
        }

        let sealer = recover_signer(header)?;
        let mut next = self.clone();
        next.number = header.number;
        next.hash = header.hash();

        let window = recent_window_size(self.signers.len());
        if header.number > window {
            next.recents.remove(&(header.number - window));
        }

        if next.recents.values().any(|a| *a == sealer) {
            return Err(ErrorKind::RecentlySigned(sealer).into());
        }

        // Checkpoint blocks carry the signer list but cast no vote, and any
        // pending tallies are reset at the epoch boundary.
        let is_checkpoint = header.nonce == crate::header::NONCE_DROP_VOTE && header.coinbase == Address::zero();
        if !is_checkpoint && (header.is_auth_vote() || header.is_drop_vote()) {
            let target = header.coinbase;
            let authorize = header.is_auth_vote();
            if self.valid_vote(target, authorize) {
                next.record_vote(AuthorityVote { voter: sealer, target, authorize });
                let threshold = self.signers.len() / 2;
                if next.tally(target, authorize) > threshold {
                    if authorize {
                        next.signers.insert(target);
                    } else {
                        next.signers.remove(&target);
                        next.recents.retain(|_, addr| *addr != target);
                    }
                    next.clear_votes_for(target);
                    // Votes cast by a dropped signer no longer count either.
                    if !authorize {
                        for votes in next.votes.values_mut() {
                            votes.retain(|v| v.voter != target);
                        }
                    }
                }
            }
        }

        next.recents.insert(header.number, sealer);
        Ok(next)
    }

    /// Deterministic PRNG seeded by `(number, parent_hash)` selects one
    /// signer from the sorted signer list. Unpredictable without being
    /// non-deterministic across nodes.
    pub fn inturn(&self, number: u64, signer: Address) -> bool {
        self.inturn_signer(number) == Some(signer)
    }

    /// The signer expected to seal block `number` in-turn, if any signers
    /// are authorized at all.
    pub fn inturn_signer(&self, number: u64) -> Option<Address> {
        if self.signers.is_empty() {
            return None;
        }
        let sorted: Vec<Address> = self.signers.iter().cloned().collect();
        let idx = inturn_index(number, self.hash, sorted.len());
        Some(sorted[idx])
    }
}

/// `SHA256(number_le8 || parent_hash)`- shared determinism source for
/// in-turn selection and committee selection.
pub fn seed(number: u64, parent_hash: H256) -> [u8; 32] {
    use sha2::{Digest as Sha2Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(number.to_le_bytes());
    hasher.update(parent_hash.as_bytes());
    hasher.finalize().into()
}

fn inturn_index(number: u64, parent_hash: H256, signer_count: usize) -> usize {
    let digest = seed(number, parent_hash);
    let mut acc = [0u8; 8];
    acc.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(acc) % signer_count as u64) as usize
}

/// Resolves snapshots for arbitrary `(number, hash)` pairs, caching in an
/// LRU and checkpointing to `KeyValueDB` every `checkpoint_interval` blocks.
pub struct SnapshotEngine {
    cache: Mutex<LruCache<H256, Snapshot>>,
    db: std::sync::Arc<dyn KeyValueDB>,
    checkpoint_interval: u64,
    epoch: u64,
}

impl SnapshotEngine {
    pub fn new(db: std::sync::Arc<dyn KeyValueDB>, cache_size: usize, checkpoint_interval: u64, epoch: u64) -> Self {
        SnapshotEngine {
            cache: Mutex::new(LruCache::new(cache_size)),
            db,
            checkpoint_interval,
            epoch,
        }
    }

    pub fn seed_genesis(&self, genesis: Snapshot) {
        self.cache.lock().put(genesis.hash, genesis);
    }

    pub fn get_cached(&self, hash: &H256) -> Option<Snapshot> {
        self.cache.lock().get(hash).cloned()
    }

    /// Resolves the snapshot effective at `(number, hash)`.
    ///
    /// Resolution order: in-memory LRU by hash, on-disk checkpoint, then
    /// walking `headers` (a chain back to the last known ancestor) forward.
    /// `headers` must contain every header strictly between the last known
    /// ancestor and `(number, hash)`, ordered oldest-first.
    pub fn snapshot(&self, number: u64, hash: H256, headers: &[Header]) -> Result<Snapshot, Error> {
        if let Some(s) = self.get_cached(&hash) {
            return Ok(s);
        }
        if let Some(checkpoint) = self.load_checkpoint(hash) {
            self.cache.lock().put(hash, checkpoint.clone());
            return Ok(checkpoint);
        }

        if headers.is_empty() {
            return Err(ErrorKind::UnknownAncestor(hash).into());
        }

        let parent_hash = headers[0].parent_hash;
        let mut snap = self
            .get_cached(&parent_hash)
            .or_else(|| self.load_checkpoint(parent_hash))
            .ok_or_else(|| Error::from(ErrorKind::UnknownAncestor(parent_hash)))?;

        for header in headers {
            snap = snap.apply(header)?;
            self.cache.lock().put(snap.hash, snap.clone());
            if snap.number % self.checkpoint_interval == 0 {
                self.store_checkpoint(&snap);
            }
        }

        if snap.number != number || snap.hash != hash {
            return Err(ErrorKind::HeaderFormat("supplied header chain does not reach target block".into()).into());
        }
        Ok(snap)
    }

    /// Validates that a checkpoint block's embedded signer list matches the
    /// locally tallied set.
    pub fn verify_checkpoint_signers(&self, snapshot: &Snapshot, header: &Header) -> Result<(), Error> {
        if !header.is_checkpoint(self.epoch) {
            return Ok(());
        }
        let embedded: BTreeSet<Address> = header.checkpoint_signers()?.into_iter().collect();
        if embedded != snapshot.signers {
            return Err(ErrorKind::MismatchingCheckpointSigners.into());
        }
        Ok(())
    }

    fn checkpoint_key(hash: H256) -> [u8; 32] {
        let mut digest = Keccak256::new();
        digest.update(hash.as_bytes());
        digest.finalize().into()
    }

    fn load_checkpoint(&self, hash: H256) -> Option<Snapshot> {
        let bytes = self.db.get(CHECKPOINT_COLUMN, &Self::checkpoint_key(hash))?;
        serde_json::from_slice::<SerializedSnapshot>(&bytes).ok().map(Into::into)
    }

    fn store_checkpoint(&self, snapshot: &Snapshot) {
        let serialized: SerializedSnapshot = snapshot.clone().into();
        match serde_json::to_vec(&serialized) {
            Ok(bytes) => self.db.put(CHECKPOINT_COLUMN, &Self::checkpoint_key(snapshot.hash), &bytes),
            Err(e) => log::warn!(target: "snapshot", "failed to serialize checkpoint at {}: {}", snapshot.number, e),
        }
    }
}

/// serde-friendly mirror of `Snapshot` (votes/recents need ordered, hashable
/// keys that round-trip through JSON cleanly).
#[derive(serde::Serialize, serde::Deserialize)]
struct SerializedSnapshot {
    number: u64,
    hash: H256,
    signers: Vec<Address>,
    recents: Vec<(u64, Address)>,
}

impl From<Snapshot> for SerializedSnapshot {
    fn from(s: Snapshot) -> Self {
        SerializedSnapshot {
            number: s.number,
            hash: s.hash,
            signers: s.signers.into_iter().collect(),
            recents: s.recents.into_iter().collect(),
        }
    }
}

impl From<SerializedSnapshot> for Snapshot {
    fn from(s: SerializedSnapshot) -> Self {
        Snapshot {
            number: s.number,
            hash: s.hash,
            signers: s.signers.into_iter().collect(),
            recents: s.recents.into_iter().collect(),
            votes: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{public_to_address, sign};
    use crate::header::{test_header, NONCE_AUTH_VOTE, SIGNATURE_LENGTH};
    use crate::storage::MemoryDB;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};
    use std::sync::Arc;

    struct TestSigner {
        secret: SecretKey,
        address: Address,
    }

    fn make_signer() -> TestSigner {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut secp256k1::rand::thread_rng());
        let public = PublicKey::from_secret_key(&secp, &secret);
        TestSigner { secret, address: public_to_address(&public) }
    }

    fn sealed_header(signer: &TestSigner, number: u64, parent: H256, coinbase: Address, nonce: [u8; 8]) -> Header {
        let mut h = test_header(number, parent, coinbase, 1000 + number * 15);
        h.nonce = nonce;
        let digest = h.seal_hash();
        let sig = sign(&signer.secret, digest).unwrap();
        let vanity_len = h.extra_data.len() - SIGNATURE_LENGTH;
        h.extra_data.truncate(vanity_len);
        h.extra_data.extend_from_slice(&sig);
        h
    }

    #[test]
    fn recent_window_forbids_resigning() {
        let a = make_signer();
        let b = make_signer();
        let mut signers = BTreeSet::new();
        signers.insert(a.address);
        signers.insert(b.address);
        let genesis = Snapshot::genesis(0, H256::zero(), signers);

        let h1 = sealed_header(&a, 1, H256::zero(), Address::zero(), crate::header::NONCE_DROP_VOTE);
        let snap1 = genesis.apply(&h1).unwrap();

        // `a` signing again immediately (window size is 2 for 2 signers) must be refused.
        let h2 = sealed_header(&a, 2, snap1.hash, Address::zero(), crate::header::NONCE_DROP_VOTE);
        assert!(snap1.apply(&h2).is_err());

        let h2b = sealed_header(&b, 2, snap1.hash, Address::zero(), crate::header::NONCE_DROP_VOTE);
        assert!(snap1.apply(&h2b).is_ok());
    }

    #[test]
    fn majority_vote_flips_signer_set() {
        let a = make_signer();
        let b = make_signer();
        let c = make_signer();
        let mut signers = BTreeSet::new();
        signers.insert(a.address);
        signers.insert(b.address);
        let genesis = Snapshot::genesis(0, H256::zero(), signers);

        let h1 = sealed_header(&a, 1, H256::zero(), c.address, NONCE_AUTH_VOTE);
        let snap1 = genesis.apply(&h1).unwrap();
        assert!(!snap1.signers.contains(&c.address));

        let h2 = sealed_header(&b, 2, snap1.hash, c.address, NONCE_AUTH_VOTE);
        let snap2 = snap1.apply(&h2).unwrap();
        assert!(snap2.signers.contains(&c.address));
        assert!(snap2.votes.get(&c.address).is_none());
    }

    #[test]
    fn snapshot_engine_checkpoints_and_caches() {
        let a = make_signer();
        let mut signers = BTreeSet::new();
        signers.insert(a.address);
        let genesis = Snapshot::genesis(0, H256::zero(), signers);

        let db = Arc::new(MemoryDB::new());
        let engine = SnapshotEngine::new(db, 128, 1, 30_000);
        engine.seed_genesis(genesis);

        let h1 = sealed_header(&a, 1, H256::zero(), Address::zero(), crate::header::NONCE_DROP_VOTE);
        let snap = engine.snapshot(1, h1.hash(), &[h1]).unwrap();
        assert_eq!(snap.number, 1);
        assert_eq!(engine.get_cached(&snap.hash).unwrap().number, 1);
    }
}
