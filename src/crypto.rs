//! ECDSA sealer recovery and signing over secp256k1, Ethereum-style.

use ethereum_types::{Address, H256};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

use crate::error::{Error, ErrorKind};
use crate::header::{Header, SIGNATURE_LENGTH};

/// Derives the Ethereum-style address (last 20 bytes of Keccak256 of the
/// uncompressed public key, sans the 0x04 prefix byte) from a public key.
pub fn public_to_address(public: &PublicKey) -> Address {
    let uncompressed = public.serialize_uncompressed();
    let hash = Keccak256::digest(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// Recovers the sealer address from `header`'s trailing 65-byte signature
/// over its seal hash.
pub fn recover_signer(header: &Header) -> Result<Address, Error> {
    let sig_bytes = header.signature()?;
    let digest = header.seal_hash();
    let recid = RecoveryId::from_i32(sig_bytes[64] as i32)
        .map_err(|_| ErrorKind::HeaderFormat("invalid recovery id".into()))?;
    let sig = RecoverableSignature::from_compact(&sig_bytes[..64], recid)
        .map_err(|_| ErrorKind::HeaderFormat("invalid signature".into()))?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_slice(digest.as_bytes())
        .map_err(|_| ErrorKind::HeaderFormat("invalid seal hash".into()))?;
    let public = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| ErrorKind::HeaderFormat("signature does not recover".into()))?;
    Ok(public_to_address(&public))
}

/// Signs `digest` with `key`, returning the 65-byte `r || s || v` signature
/// used in the extra-data suffix.
pub fn sign(key: &SecretKey, digest: H256) -> Result<[u8; SIGNATURE_LENGTH], Error> {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_slice(digest.as_bytes())
        .map_err(|_| ErrorKind::HeaderFormat("invalid digest".into()))?;
    let (recid, compact) = secp.sign_ecdsa_recoverable(&msg, key).serialize_compact();
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&compact);
    out[64] = recid.to_i32() as u8;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::test_header;
    use ethereum_types::Address;
    use secp256k1::rand::thread_rng;

    #[test]
    fn sign_then_recover_round_trips() {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut thread_rng());
        let expected = public_to_address(&public);

        let mut header = test_header(1, H256::zero(), Address::zero(), 10);
        let digest = header.seal_hash();
        let sig = sign(&secret, digest).unwrap();
        let vanity_len = header.extra_data.len() - SIGNATURE_LENGTH;
        header.extra_data.truncate(vanity_len);
        header.extra_data.extend_from_slice(&sig);

        let recovered = recover_signer(&header).unwrap();
        assert_eq!(recovered, expected);
    }
}
