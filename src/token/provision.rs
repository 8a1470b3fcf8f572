//! Key and key pair generation.

use std::str::FromStr;

use super::error::{Result, TokenError};
use super::module::{MechanismKind, TokenModule};
use super::resolver::key_template;
use super::template::{Attribute, KeyType, ObjectClass, Template};
use super::Token;

const VALID_RSA_SIZES: [u32; 4] = [1024, 2048, 3072, 4096];
const VALID_AES_SIZES: [u32; 3] = [128, 192, 256];
const VALID_EC_SIZES: [u32; 1] = [256];

/// Algorithm designator for secp256k1 EC keys
pub const SECP256K1_ALGORITHM: &str = "S256";

/// DER encoding of the secp256k1 curve OID 1.3.132.0.10
pub const SECP256K1_OID_DER: [u8; 7] = [0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x0a];

/// RSA public exponent 65537
const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Parameters of a key generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub label: String,
    /// Defaults to the label when not given
    pub id: Option<String>,
    pub key_type: String,
    pub key_size: u32,
    /// Only meaningful for EC keys
    pub algorithm: String,
}

impl KeySpec {
    pub fn new(label: &str, key_type: &str, key_size: u32, algorithm: &str) -> Self {
        Self {
            label: label.to_string(),
            id: None,
            key_type: key_type.to_string(),
            key_size,
            algorithm: algorithm.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// The id actually written to the token
    pub fn effective_id(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.label,
        }
    }

    /// Check type, size and algorithm, in that order
    pub fn validate(&self) -> Result<KeyType> {
        let key_type = KeyType::from_str(&self.key_type)?;

        let valid_sizes: &[u32] = match key_type {
            KeyType::Rsa => &VALID_RSA_SIZES,
            KeyType::Aes => &VALID_AES_SIZES,
            KeyType::Ec => &VALID_EC_SIZES,
        };

        let invalid_size = || TokenError::InvalidKeySize {
            key_type: key_type.to_string(),
            size: self.key_size,
        };

        if !valid_sizes.contains(&self.key_size) {
            return Err(invalid_size());
        }

        // Size and curve are coupled for EC keys
        if key_type == KeyType::Ec && !is_secp256k1(&self.algorithm) {
            return Err(invalid_size());
        }

        Ok(key_type)
    }
}

pub fn is_secp256k1(algorithm: &str) -> bool {
    algorithm == SECP256K1_ALGORITHM
}

impl<M: TokenModule> Token<M> {
    /// Generate an RSA key pair, AES key or secp256k1 key pair described by `spec`.
    ///
    /// Nothing is sent to the token unless the spec validates and no key of
    /// the same class already carries the label.
    pub fn generate_key_pair(&mut self, spec: &KeySpec) -> Result<()> {
        let key_type = spec.validate()?;

        let existing_class = match key_type {
            KeyType::Aes => ObjectClass::SecretKey,
            KeyType::Rsa | KeyType::Ec => ObjectClass::PublicKey,
        };
        self.ensure_label_unused(existing_class, &spec.label)?;

        match key_type {
            KeyType::Ec => self.generate_ec_key(spec),
            KeyType::Rsa => self.generate_rsa_key(spec),
            KeyType::Aes => self.generate_aes_key(spec),
        }
    }

    /// Import raw AES key material as a sensitive secret key
    pub fn import_aes_key(&mut self, label: &str, key_bytes: &[u8]) -> Result<()> {
        let bits = key_bytes.len() as u32 * 8;
        if !VALID_AES_SIZES.contains(&bits) {
            return Err(TokenError::InvalidKeySize {
                key_type: KeyType::Aes.to_string(),
                size: bits,
            });
        }
        self.ensure_label_unused(ObjectClass::SecretKey, label)?;

        let template = Template::new()
            .with(Attribute::Class(ObjectClass::SecretKey))
            .with(Attribute::KeyType(KeyType::Aes))
            .with(Attribute::Value(key_bytes.to_vec()))
            .with(Attribute::Unwrap(true))
            .with(Attribute::Wrap(true))
            .with(Attribute::Encrypt(true))
            .with(Attribute::Sensitive(true))
            .with(Attribute::Token(true))
            .with(Attribute::Label(label.to_string()))
            .with(Attribute::Id(label.as_bytes().to_vec()));

        self.module_mut()
            .create_object(&template)
            .map_err(|e| TokenError::module("create object", format!("label='{}'", label), e))?;

        tracing::info!(label, "Key imported to token");
        Ok(())
    }

    fn ensure_label_unused(&mut self, class: ObjectClass, label: &str) -> Result<()> {
        let existing = self.find(&key_template(class, Some(label), None))?;
        if !existing.is_empty() {
            return Err(TokenError::KeyAlreadyExists(label.to_string()));
        }
        Ok(())
    }

    fn generate_ec_key(&mut self, spec: &KeySpec) -> Result<()> {
        let id = spec.effective_id().as_bytes().to_vec();

        let public_template = Template::new()
            .with(Attribute::KeyType(KeyType::Ec))
            .with(Attribute::Class(ObjectClass::PublicKey))
            .with(Attribute::Token(true))
            .with(Attribute::Verify(true))
            .with(Attribute::EcParams(SECP256K1_OID_DER.to_vec()))
            .with(Attribute::Label(spec.label.clone()))
            .with(Attribute::Id(id.clone()));

        // The private half never leaves the token
        let private_template = Template::new()
            .with(Attribute::KeyType(KeyType::Ec))
            .with(Attribute::Class(ObjectClass::PrivateKey))
            .with(Attribute::Token(true))
            .with(Attribute::Private(true))
            .with(Attribute::Sign(true))
            .with(Attribute::Label(spec.label.clone()))
            .with(Attribute::Extractable(false))
            .with(Attribute::Sensitive(true))
            .with(Attribute::Id(id));

        self.module_mut()
            .generate_key_pair(MechanismKind::EcKeyPairGen, &public_template, &private_template)
            .map_err(|e| {
                TokenError::module("generate key pair", format!("label='{}'", spec.label), e)
            })?;

        tracing::info!(label = %spec.label, "Keypair generated on token");
        Ok(())
    }

    // RSA and AES material is left extractable so test keys can be exported
    fn generate_rsa_key(&mut self, spec: &KeySpec) -> Result<()> {
        let id = spec.effective_id().as_bytes().to_vec();

        let public_template = Template::new()
            .with(Attribute::Class(ObjectClass::PublicKey))
            .with(Attribute::KeyType(KeyType::Rsa))
            .with(Attribute::Token(true))
            .with(Attribute::Verify(true))
            .with(Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()))
            .with(Attribute::Label(spec.label.clone()))
            .with(Attribute::ModulusBits(u64::from(spec.key_size)))
            .with(Attribute::Id(id.clone()));

        let private_template = Template::new()
            .with(Attribute::Class(ObjectClass::PrivateKey))
            .with(Attribute::KeyType(KeyType::Rsa))
            .with(Attribute::Extractable(true))
            .with(Attribute::Token(true))
            .with(Attribute::Private(true))
            .with(Attribute::Sensitive(true))
            .with(Attribute::Sign(true))
            .with(Attribute::Label(spec.label.clone()))
            .with(Attribute::Id(id));

        self.module_mut()
            .generate_key_pair(
                MechanismKind::RsaPkcsKeyPairGen,
                &public_template,
                &private_template,
            )
            .map_err(|e| {
                TokenError::module("generate key pair", format!("label='{}'", spec.label), e)
            })?;

        tracing::info!(label = %spec.label, bits = spec.key_size, "Keypair generated on token");
        Ok(())
    }

    fn generate_aes_key(&mut self, spec: &KeySpec) -> Result<()> {
        let template = Template::new()
            .with(Attribute::Class(ObjectClass::SecretKey))
            .with(Attribute::KeyType(KeyType::Aes))
            .with(Attribute::Token(true))
            .with(Attribute::Sign(true))
            .with(Attribute::Encrypt(true))
            .with(Attribute::Decrypt(true))
            .with(Attribute::Label(spec.label.clone()))
            .with(Attribute::Id(spec.effective_id().as_bytes().to_vec()))
            .with(Attribute::Sensitive(true))
            .with(Attribute::Extractable(true))
            .with(Attribute::ValueLen(u64::from(spec.key_size / 8)));

        self.module_mut()
            .generate_key(MechanismKind::AesKeyGen, &template)
            .map_err(|e| TokenError::module("generate key", format!("label='{}'", spec.label), e))?;

        tracing::info!(label = %spec.label, bits = spec.key_size, "Key generated on token");
        Ok(())
    }
}
