//! The external block header and its Clique-style extra-data layout.
//!
//! The header format itself (RLP layout, field set) is an external
//! collaborator's concern in the full node — this module implements just
//! enough of it for the consensus core to recover a sealer, compute a seal
//! hash, and validate the handful of fields the engine cares about.

use ethereum_types::{Address, Bloom, H256, U256};
use rlp::{Encodable, RlpStream};
use sha3::{Digest, Keccak256};

use crate::error::{Error, ErrorKind};

/// Fixed-length vanity prefix reserved at the front of `extra_data`.
pub const VANITY_LENGTH: usize = 32;
/// Fixed-length secp256k1 recoverable signature appended to `extra_data`.
pub const SIGNATURE_LENGTH: usize = 65;
/// Width of a single signer address packed into a checkpoint's extra-data.
pub const ADDRESS_LENGTH: usize = 20;

/// `nonce` sentinel meaning "vote to authorize the coinbase address".
pub const NONCE_AUTH_VOTE: [u8; 8] = [0xff; 8];
/// `nonce` sentinel meaning "vote to drop the coinbase address".
pub const NONCE_DROP_VOTE: [u8; 8] = [0x00; 8];

/// `mixDigest` must always be this value — no fork-choice randomness field.
pub const NULL_MIX_DIGEST: H256 = H256::zero();

/// Lower bound on `gas_limit`, matching mainnet's historical floor.
pub const MIN_GAS_LIMIT: u64 = 5000;
/// `gas_limit` may drift from its parent by at most `parent.gas_limit /
/// GAS_LIMIT_BOUND_DIVISOR` in either direction per block.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;
/// EIP-1559 base-fee adjustment constants, used once `base_fee_per_gas` is
/// active on a chain.
pub const BASE_FEE_CHANGE_DENOMINATOR: u64 = 8;
pub const ELASTICITY_MULTIPLIER: u64 = 2;

/// Computes the base fee `header` must carry given `parent`, per EIP-1559.
/// Only meaningful once `parent.base_fee_per_gas` is `Some`.
pub fn expected_base_fee(parent: &Header) -> Option<U256> {
    let parent_base_fee = parent.base_fee_per_gas?;
    let parent_gas_target = parent.gas_limit / U256::from(ELASTICITY_MULTIPLIER);
    if parent_gas_target.is_zero() {
        return Some(parent_base_fee);
    }

    let base_fee = if parent.gas_used == parent_gas_target {
        parent_base_fee
    } else if parent.gas_used > parent_gas_target {
        let gas_used_delta = parent.gas_used - parent_gas_target;
        let delta = (parent_base_fee * gas_used_delta / parent_gas_target / U256::from(BASE_FEE_CHANGE_DENOMINATOR)).max(U256::from(1));
        parent_base_fee + delta
    } else {
        let gas_used_delta = parent_gas_target - parent.gas_used;
        let delta = parent_base_fee * gas_used_delta / parent_gas_target / U256::from(BASE_FEE_CHANGE_DENOMINATOR);
        parent_base_fee.saturating_sub(delta)
    };
    Some(base_fee)
}

/// `RLP(emptyList)` keccak, the only uncle hash PoA blocks may carry.
pub fn empty_uncle_hash() -> H256 {
    let empty: Vec<H256> = Vec::new();
    H256::from_slice(&Keccak256::digest(&rlp::encode_list(&empty)))
}

/// Minimal representation of the consensus-relevant header fields.
///
/// Transaction/receipt content is opaque to this crate; only the roots and
/// bloom are carried so the seal hash can be reproduced faithfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub log_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: U256,
    pub gas_used: U256,
    pub timestamp: u64,
    /// `[vanity][optional checkpoint signer list][signature]`.
    pub extra_data: Vec<u8>,
    pub mix_digest: H256,
    pub nonce: [u8; 8],
    /// Present only post-London-equivalent forks; forbidden to be `Some`
    /// together with any withdrawals/blob field (there are none here).
    pub base_fee_per_gas: Option<U256>,
}

impl Header {
    pub fn is_checkpoint(&self, epoch: u64) -> bool {
        epoch != 0 && self.number % epoch == 0
    }

    /// Splits `extra_data` into `(vanity, checkpoint_signers, signature)`.
    pub fn extra_data_parts(&self) -> Result<(&[u8], &[u8], &[u8]), Error> {
        let len = self.extra_data.len();
        if len < VANITY_LENGTH + SIGNATURE_LENGTH {
            return Err(ErrorKind::HeaderFormat("extra-data shorter than vanity+signature".into()).into());
        }
        let vanity = &self.extra_data[..VANITY_LENGTH];
        let signers = &self.extra_data[VANITY_LENGTH..len - SIGNATURE_LENGTH];
        let sig = &self.extra_data[len - SIGNATURE_LENGTH..];
        if signers.len() % ADDRESS_LENGTH != 0 {
            return Err(ErrorKind::HeaderFormat("checkpoint signer list is not a multiple of 20 bytes".into()).into());
        }
        Ok((vanity, signers, sig))
    }

    /// Decodes the checkpoint signer list carried in `extra_data`, if any.
    pub fn checkpoint_signers(&self) -> Result<Vec<Address>, Error> {
        let (_, signers, _) = self.extra_data_parts()?;
        Ok(signers.chunks(ADDRESS_LENGTH).map(Address::from_slice).collect())
    }

    pub fn signature(&self) -> Result<[u8; SIGNATURE_LENGTH], Error> {
        let (_, _, sig) = self.extra_data_parts()?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out.copy_from_slice(sig);
        Ok(out)
    }

    /// The header with its trailing signature bytes stripped — this is what
    /// actually gets signed and what a verifier re-hashes to recover the
    /// signer's public key.
    fn unsealed(&self) -> Header {
        let mut h = self.clone();
        if h.extra_data.len() >= SIGNATURE_LENGTH {
            let cut = h.extra_data.len() - SIGNATURE_LENGTH;
            h.extra_data.truncate(cut);
        }
        h
    }

    /// Keccak256 over the RLP encoding of every field except the trailing
    /// 65-byte seal signature. This is what gets ECDSA-signed by the sealer.
    pub fn seal_hash(&self) -> H256 {
        let unsealed = self.unsealed();
        H256::from_slice(&Keccak256::digest(&rlp::encode(&unsealed)))
    }

    /// Full block hash, including the signature — used as snapshot/cache keys.
    pub fn hash(&self) -> H256 {
        H256::from_slice(&Keccak256::digest(&rlp::encode(self)))
    }

    pub fn is_auth_vote(&self) -> bool {
        self.nonce == NONCE_AUTH_VOTE
    }

    pub fn is_drop_vote(&self) -> bool {
        self.nonce == NONCE_DROP_VOTE
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        let field_count = 13 + if self.base_fee_per_gas.is_some() { 1 } else { 0 };
        s.begin_list(field_count);
        s.append(&self.parent_hash);
        s.append(&self.uncle_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.log_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        s.append(&self.extra_data);
        // mix_digest and nonce are seal fields proper; encoded after
        // extra-data so `unsealed()` need only truncate extra-data to strip
        // the signature and still produce the pre-seal digest used by
        // `sig_hash` in the reference Clique engine.
        s.append(&self.mix_digest);
        s.append(&self.nonce.to_vec());
        if let Some(base_fee) = self.base_fee_per_gas {
            s.append(&base_fee);
        }
    }
}

/// Builds a header with sane consensus-irrelevant defaults (empty roots,
/// zero bloom, empty extra-data slots) for use in tests and test fixtures.
pub fn test_header(number: u64, parent_hash: H256, coinbase: Address, timestamp: u64) -> Header {
    Header {
        parent_hash,
        uncle_hash: empty_uncle_hash(),
        coinbase,
        state_root: H256::zero(),
        transactions_root: H256::zero(),
        receipts_root: H256::zero(),
        log_bloom: Bloom::zero(),
        difficulty: U256::from(2),
        number,
        gas_limit: U256::from(8_000_000u64),
        gas_used: U256::zero(),
        timestamp,
        extra_data: vec![0u8; VANITY_LENGTH + SIGNATURE_LENGTH],
        mix_digest: NULL_MIX_DIGEST,
        nonce: NONCE_DROP_VOTE,
        base_fee_per_gas: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_data_round_trip() {
        let mut h = test_header(1, H256::zero(), Address::zero(), 100);
        let signer = Address::from_low_u64_be(0xabcd);
        h.extra_data = [vec![7u8; VANITY_LENGTH], signer.as_bytes().to_vec(), vec![9u8; SIGNATURE_LENGTH]].concat();
        let signers = h.checkpoint_signers().unwrap();
        assert_eq!(signers, vec![signer]);
    }

    #[test]
    fn seal_hash_excludes_signature() {
        let mut a = test_header(1, H256::zero(), Address::zero(), 100);
        let mut b = a.clone();
        a.extra_data = [vec![0u8; VANITY_LENGTH], vec![1u8; SIGNATURE_LENGTH]].concat();
        b.extra_data = [vec![0u8; VANITY_LENGTH], vec![2u8; SIGNATURE_LENGTH]].concat();
        assert_eq!(a.seal_hash(), b.seal_hash());
        assert_ne!(a.hash(), b.hash());
    }
}
