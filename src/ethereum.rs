//! Ethereum conventions on top of secp256k1: Keccak-256 hashing, public key
//! recovery from 65-byte signatures and address derivation.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Length of an uncompressed SEC1 point (0x04 || X || Y)
pub const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Offset added to the recovery id in the last signature byte
pub const RECOVERY_ID_OFFSET: u8 = 27;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("signature must be 65 bytes, got {0}")]
    InvalidSignatureLength(usize),
    #[error("hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error(transparent)]
    Ecdsa(#[from] k256::ecdsa::Error),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Recover the uncompressed public key that produced `signature` over `hash`.
///
/// The recovery byte may be given either raw (0/1) or with the Ethereum
/// offset (27/28). A high-S signature is folded onto its low-S twin, with the
/// recovery id flipped, so both forms recover the same key.
pub fn recover_public_key(
    hash: &[u8],
    signature: &[u8],
) -> Result<[u8; UNCOMPRESSED_POINT_LEN], RecoveryError> {
    if signature.len() != 65 {
        return Err(RecoveryError::InvalidSignatureLength(signature.len()));
    }
    if hash.len() != 32 {
        return Err(RecoveryError::InvalidHashLength(hash.len()));
    }

    let v = match signature[64] {
        v @ (27 | 28) => v - RECOVERY_ID_OFFSET,
        v => v,
    };
    let recovery_id = RecoveryId::from_byte(v)
        .filter(|_| v <= 1)
        .ok_or(RecoveryError::InvalidRecoveryId(signature[64]))?;

    let mut signature = Signature::from_slice(&signature[..64])?;
    let mut recovery_id = recovery_id;
    if let Some(low_s) = signature.normalize_s() {
        signature = low_s;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)?;

    let point = key.to_encoded_point(false);
    let mut out = [0u8; UNCOMPRESSED_POINT_LEN];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

/// Address of the key that produced `signature` over `hash`
pub fn recover_address(hash: &[u8], signature: &[u8]) -> Result<Address, RecoveryError> {
    let public_key = recover_public_key(hash, signature)?;
    Address::from_public_key(&public_key)
}

/// A 20-byte Ethereum account address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Derive the address from an uncompressed point, with or without the 0x04 prefix
    pub fn from_public_key(public_key: &[u8]) -> Result<Self, RecoveryError> {
        let xy = match public_key.len() {
            65 if public_key[0] == 0x04 => &public_key[1..],
            64 => public_key,
            len => {
                return Err(RecoveryError::InvalidPublicKey(format!(
                    "expected an uncompressed point, got {} bytes",
                    len
                )))
            }
        };

        let hash = keccak256(xy);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Ok(Address(address))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// EIP-55 mixed-case checksum encoding
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

/// Decode hex with or without a 0x prefix
pub fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(digits)
}

/// 0x-prefixed lowercase hex
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
