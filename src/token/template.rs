//! Attribute templates used both to search for token objects and to create them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::error::TokenError;

/// Object class of a token object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectClass {
    PublicKey,
    PrivateKey,
    SecretKey,
    Data,
    Certificate,
    Other,
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectClass::PublicKey => write!(f, "public key"),
            ObjectClass::PrivateKey => write!(f, "private key"),
            ObjectClass::SecretKey => write!(f, "secret key"),
            ObjectClass::Data => write!(f, "data"),
            ObjectClass::Certificate => write!(f, "certificate"),
            ObjectClass::Other => write!(f, "other"),
        }
    }
}

/// Key types the provisioner knows how to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Rsa,
    Aes,
    Ec,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyType::Rsa => write!(f, "RSA"),
            KeyType::Aes => write!(f, "AES"),
            KeyType::Ec => write!(f, "EC"),
        }
    }
}

impl FromStr for KeyType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RSA" => Ok(KeyType::Rsa),
            "AES" => Ok(KeyType::Aes),
            "EC" => Ok(KeyType::Ec),
            _ => Err(TokenError::UnsupportedKeyType(s.to_string())),
        }
    }
}

/// A single (kind, value) pair of an attribute template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Class(ObjectClass),
    KeyType(KeyType),
    Label(String),
    Id(Vec<u8>),
    Token(bool),
    Private(bool),
    Sign(bool),
    Verify(bool),
    Encrypt(bool),
    Decrypt(bool),
    Wrap(bool),
    Unwrap(bool),
    Sensitive(bool),
    Extractable(bool),
    EcParams(Vec<u8>),
    EcPoint(Vec<u8>),
    ModulusBits(u64),
    PublicExponent(Vec<u8>),
    ValueLen(u64),
    Value(Vec<u8>),
}

/// Value-less discriminant of [`Attribute`], used for attribute reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Class,
    KeyType,
    Label,
    Id,
    Token,
    Private,
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    Wrap,
    Unwrap,
    Sensitive,
    Extractable,
    EcParams,
    EcPoint,
    ModulusBits,
    PublicExponent,
    ValueLen,
    Value,
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Class(_) => AttributeKind::Class,
            Attribute::KeyType(_) => AttributeKind::KeyType,
            Attribute::Label(_) => AttributeKind::Label,
            Attribute::Id(_) => AttributeKind::Id,
            Attribute::Token(_) => AttributeKind::Token,
            Attribute::Private(_) => AttributeKind::Private,
            Attribute::Sign(_) => AttributeKind::Sign,
            Attribute::Verify(_) => AttributeKind::Verify,
            Attribute::Encrypt(_) => AttributeKind::Encrypt,
            Attribute::Decrypt(_) => AttributeKind::Decrypt,
            Attribute::Wrap(_) => AttributeKind::Wrap,
            Attribute::Unwrap(_) => AttributeKind::Unwrap,
            Attribute::Sensitive(_) => AttributeKind::Sensitive,
            Attribute::Extractable(_) => AttributeKind::Extractable,
            Attribute::EcParams(_) => AttributeKind::EcParams,
            Attribute::EcPoint(_) => AttributeKind::EcPoint,
            Attribute::ModulusBits(_) => AttributeKind::ModulusBits,
            Attribute::PublicExponent(_) => AttributeKind::PublicExponent,
            Attribute::ValueLen(_) => AttributeKind::ValueLen,
            Attribute::Value(_) => AttributeKind::Value,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AttributeKind::Class => "CKA_CLASS",
            AttributeKind::KeyType => "CKA_KEY_TYPE",
            AttributeKind::Label => "CKA_LABEL",
            AttributeKind::Id => "CKA_ID",
            AttributeKind::Token => "CKA_TOKEN",
            AttributeKind::Private => "CKA_PRIVATE",
            AttributeKind::Sign => "CKA_SIGN",
            AttributeKind::Verify => "CKA_VERIFY",
            AttributeKind::Encrypt => "CKA_ENCRYPT",
            AttributeKind::Decrypt => "CKA_DECRYPT",
            AttributeKind::Wrap => "CKA_WRAP",
            AttributeKind::Unwrap => "CKA_UNWRAP",
            AttributeKind::Sensitive => "CKA_SENSITIVE",
            AttributeKind::Extractable => "CKA_EXTRACTABLE",
            AttributeKind::EcParams => "CKA_EC_PARAMS",
            AttributeKind::EcPoint => "CKA_EC_POINT",
            AttributeKind::ModulusBits => "CKA_MODULUS_BITS",
            AttributeKind::PublicExponent => "CKA_PUBLIC_EXPONENT",
            AttributeKind::ValueLen => "CKA_VALUE_LEN",
            AttributeKind::Value => "CKA_VALUE",
        };
        f.write_str(name)
    }
}

/// Ordered attribute list with at most one attribute per kind.
///
/// Pushing an attribute whose kind is already present replaces the earlier
/// value in place, so the order of first insertion is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    attributes: Vec<Attribute>,
}

impl Template {
    /// An empty template matches every object on the token
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: Attribute) -> Self {
        self.push(attribute);
        self
    }

    pub fn push(&mut self, attribute: Attribute) {
        let kind = attribute.kind();
        match self.attributes.iter_mut().find(|a| a.kind() == kind) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    pub fn get(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.kind() == kind)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Short human readable description used in error messages
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for attribute in &self.attributes {
            match attribute {
                Attribute::Class(class) => parts.push(format!("class={}", class)),
                Attribute::Label(label) => parts.push(format!("label='{}'", label)),
                Attribute::Id(id) => {
                    parts.push(format!("id='{}'", String::from_utf8_lossy(id)))
                }
                Attribute::KeyType(key_type) => parts.push(format!("type={}", key_type)),
                _ => {}
            }
        }
        if parts.is_empty() {
            "any object".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl FromIterator<Attribute> for Template {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut template = Template::new();
        for attribute in iter {
            template.push(attribute);
        }
        template
    }
}
