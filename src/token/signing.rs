//! Ethereum-style recoverable signatures from a raw token ECDSA primitive.
//!
//! The token's `CKM_ECDSA` mechanism returns a bare `R || S` pair: S may lie
//! in either half of the curve order and no recovery id is provided. Both are
//! fixed up here, outside the token.

use num_bigint::BigUint;
use std::fmt;
use std::sync::OnceLock;

use super::error::{Result, TokenError};
use super::module::{MechanismKind, TokenModule};
use super::resolver::key_template;
use super::template::ObjectClass;
use super::Token;
use crate::ethereum::{self, RECOVERY_ID_OFFSET};

/// secp256k1 group order n
const SECP256K1_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
    0x41, 0x41,
];

fn curve_order() -> &'static BigUint {
    static ORDER: OnceLock<BigUint> = OnceLock::new();
    ORDER.get_or_init(|| BigUint::from_bytes_be(&SECP256K1_ORDER))
}

fn half_curve_order() -> &'static BigUint {
    static HALF: OnceLock<BigUint> = OnceLock::new();
    HALF.get_or_init(|| curve_order().clone() / 2u32)
}

/// 65-byte signature: `R || S || V`, S in the lower half of the order, V in {27, 28}
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature([u8; 65]);

impl RecoverableSignature {
    pub fn r(&self) -> &[u8] {
        &self.0[..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        ethereum::encode_hex(&self.0)
    }
}

impl AsRef<[u8]> for RecoverableSignature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RecoverableSignature({})", self.to_hex())
    }
}

impl fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Strip leading zero bytes and left-pad to 32 bytes.
///
/// Values wider than 32 significant bytes keep their low 32 bytes.
pub fn fix_len(bytes: &[u8]) -> [u8; 32] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[start..];
    let significant = &significant[significant.len().saturating_sub(32)..];

    let mut out = [0u8; 32];
    out[32 - significant.len()..].copy_from_slice(significant);
    out
}

/// Replace S with n - S when S is in the upper half of the curve order
pub fn normalize_s(s: &[u8]) -> [u8; 32] {
    let value = BigUint::from_bytes_be(s);
    if &value > half_curve_order() {
        fix_len(&(curve_order() - &value).to_bytes_be())
    } else {
        fix_len(s)
    }
}

/// True when `s` lies in the lower half of the curve order
pub fn is_low_s(s: &[u8]) -> bool {
    &BigUint::from_bytes_be(s) <= half_curve_order()
}

/// Split a raw `R || S` signature and bring it into canonical 32-byte low-S form
pub fn canonical_rs(raw: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    if raw.is_empty() || raw.len() % 2 != 0 || raw.len() > 66 {
        return Err(TokenError::MalformedSignature(raw.len()));
    }
    let (r, s) = raw.split_at(raw.len() / 2);
    Ok((fix_len(r), normalize_s(s)))
}

/// Find the recovery id under which `R || S` recovers `expected_point`
pub fn attach_recovery_id(
    hash: &[u8],
    r: &[u8; 32],
    s: &[u8; 32],
    expected_point: &[u8],
) -> Result<RecoverableSignature> {
    let mut signature = [0u8; 65];
    signature[..32].copy_from_slice(r);
    signature[32..64].copy_from_slice(s);

    for v in [0u8, 1] {
        signature[64] = v;
        match ethereum::recover_public_key(hash, &signature) {
            Ok(recovered) if recovered.as_slice() == expected_point => {
                signature[64] = v + RECOVERY_ID_OFFSET;
                return Ok(RecoverableSignature(signature));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(v, error = %e, "Candidate recovery failed"),
        }
    }

    Err(TokenError::SignatureRecoveryFailed)
}

impl<M: TokenModule> Token<M> {
    /// Sign a 32-byte hash with the private key matching `label`/`id`.
    ///
    /// Exactly one private key may match. The result is low-S with a
    /// recovery byte of 27 or 28.
    pub fn sign(&mut self, label: &str, id: &str, hash: &[u8]) -> Result<RecoverableSignature> {
        if hash.len() != 32 {
            return Err(TokenError::InvalidHashLength(hash.len()));
        }

        let key = self.resolve_unique(&key_template(
            ObjectClass::PrivateKey,
            Some(label),
            Some(id),
        ))?;

        let raw = self
            .module_mut()
            .sign(MechanismKind::Ecdsa, key, hash)
            .map_err(|e| TokenError::module("sign", describe_key(label, id), e))?;

        let public_key = self.public_key(label, id)?;

        let (r, s) = canonical_rs(&raw)?;
        attach_recovery_id(hash, &r, &s, &public_key.ec_point)
    }
}

pub(crate) fn describe_key(label: &str, id: &str) -> String {
    format!("label='{}', id='{}'", label, id)
}
