//! Signature verification against on-token public keys.

use serde::Serialize;

use super::error::{Result, TokenError};
use super::module::{ModuleError, ObjectId, TokenModule};
use super::resolver::key_template;
use super::signing::describe_key;
use super::template::{Attribute, AttributeKind, ObjectClass};
use super::Token;
use crate::ethereum::{self, Address, UNCOMPRESSED_POINT_LEN};

/// SEC1 marker for an uncompressed point, also the DER OCTET STRING tag
const POINT_MARKER: u8 = 0x04;

/// Public half of an on-token EC key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicKeyInfo {
    /// Uncompressed point, 0x04 || X || Y
    #[serde(serialize_with = "serialize_hex")]
    pub ec_point: Vec<u8>,
    pub address: Address,
}

fn serialize_hex<S: serde::Serializer>(
    bytes: &[u8],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&ethereum::encode_hex(bytes))
}

/// Bring a CKA_EC_POINT value into plain uncompressed form.
///
/// Tokens differ in how they encode the attribute:
/// - `04 X Y`: already plain, returned unchanged
/// - `04 X Y 04`: even length with a trailing marker, which is dropped
/// - `04 41 04 X Y`: DER OCTET STRING wrapper, the two prefix bytes are dropped
/// - anything else is returned unchanged
///
/// The trailing-marker case is checked before the DER case, so a 66-byte
/// value whose X starts with `40 04` keeps its prefix.
pub fn normalize_ec_point(raw: &[u8]) -> Vec<u8> {
    let len = raw.len();
    if len == UNCOMPRESSED_POINT_LEN && raw[0] == POINT_MARKER {
        raw.to_vec()
    } else if len >= 2 && len % 2 == 0 && raw[0] == POINT_MARKER && raw[len - 1] == POINT_MARKER
    {
        raw[..len - 1].to_vec()
    } else if len >= 3
        && raw[0] == POINT_MARKER
        && usize::from(raw[1]) == len - 2
        && raw[2] == POINT_MARKER
    {
        raw[2..].to_vec()
    } else {
        raw.to_vec()
    }
}

fn read_ec_point<M: TokenModule + ?Sized>(module: &mut M, key: ObjectId) -> Result<Vec<u8>> {
    let attribute = module
        .get_attribute(key, AttributeKind::EcPoint)
        .map_err(|e| TokenError::AttributeReadFailed {
            attribute: AttributeKind::EcPoint,
            reason: e.to_string(),
        })?;

    match attribute {
        Attribute::EcPoint(raw) if !raw.is_empty() => Ok(normalize_ec_point(&raw)),
        _ => Err(TokenError::AttributeReadFailed {
            attribute: AttributeKind::EcPoint,
            reason: ModuleError::AttributeTypeInvalid.to_string(),
        }),
    }
}

impl<M: TokenModule> Token<M> {
    /// The EC point and Ethereum address of the public key matching `label`/`id`
    pub fn public_key(&mut self, label: &str, id: &str) -> Result<PublicKeyInfo> {
        let key = self.resolve_unique(&key_template(
            ObjectClass::PublicKey,
            Some(label),
            Some(id),
        ))?;

        let ec_point = read_ec_point(self.module_mut(), key)?;
        let address = Address::from_public_key(&ec_point).map_err(|e| {
            TokenError::AttributeReadFailed {
                attribute: AttributeKind::EcPoint,
                reason: format!("{} ({})", e, describe_key(label, id)),
            }
        })?;

        Ok(PublicKeyInfo { ec_point, address })
    }

    /// Check that `signature` over `hash` was made by the key matching `label`/`id`.
    ///
    /// A missing or ambiguous key is reported as a failed verification. The
    /// high-S twin of a valid signature is accepted as well.
    pub fn verify(&mut self, label: &str, id: &str, hash: &[u8], signature: &[u8]) -> Result<()> {
        let public_key = match self.public_key(label, id) {
            Ok(public_key) => public_key,
            Err(e @ (TokenError::KeyNotFound(_) | TokenError::AmbiguousKey { .. })) => {
                return Err(TokenError::VerificationFailed(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let recovered = ethereum::recover_public_key(hash, signature)
            .map_err(|e| TokenError::VerificationFailed(e.to_string()))?;

        if recovered.as_slice() != public_key.ec_point.as_slice() {
            return Err(TokenError::VerificationFailed(format!(
                "signer does not match {}",
                describe_key(label, id)
            )));
        }

        tracing::info!(label, address = %public_key.address, "Verified successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Vec<u8> {
        let mut point = vec![POINT_MARKER];
        point.extend((1..=64).map(|b| b as u8));
        point
    }

    #[test]
    fn test_normalize_plain_point() {
        assert_eq!(normalize_ec_point(&point()), point());
    }

    #[test]
    fn test_normalize_der_wrapped_point() {
        let mut wrapped = vec![POINT_MARKER, 0x41];
        wrapped.extend(point());
        assert_eq!(normalize_ec_point(&wrapped), point());
    }

    #[test]
    fn test_normalize_trailing_marker() {
        let mut padded = point();
        padded[64] = 0x10;
        let expected = padded.clone();
        padded.push(POINT_MARKER);
        assert_eq!(normalize_ec_point(&padded), expected);
    }

    #[test]
    fn test_trailing_marker_with_der_like_x() {
        let mut point = point();
        point[1] = 0x40;
        point[2] = POINT_MARKER;
        let mut padded = point.clone();
        padded.push(POINT_MARKER);
        assert_eq!(padded.len(), 66);
        assert_eq!(normalize_ec_point(&padded), point);
    }

    #[test]
    fn test_plain_point_with_marker_in_x() {
        let mut plain = point();
        plain[2] = POINT_MARKER;
        assert_eq!(normalize_ec_point(&plain), plain);
    }

    #[test]
    fn test_normalize_short_values() {
        assert_eq!(normalize_ec_point(&[]), Vec::<u8>::new());
        assert_eq!(normalize_ec_point(&[0x01]), vec![0x01]);
    }
}
