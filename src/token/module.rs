//! Capability interface over a PKCS#11 module.
//!
//! The token core only ever talks to the module through [`TokenModule`], so the
//! signature handling can run against real hardware (see
//! `utils::pkcs11_devices::CryptokiModule`) or an in-memory double.

use std::fmt;

use super::template::{Attribute, AttributeKind, Template};

/// Slot identifier as reported by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a token object.
///
/// Only valid for the session that produced it and never dereferenced by the
/// core, only handed back to the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mechanisms the core asks the module to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismKind {
    EcKeyPairGen,
    RsaPkcsKeyPairGen,
    AesKeyGen,
    Ecdsa,
    AesCbc { iv: [u8; 16] },
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismKind::EcKeyPairGen => write!(f, "CKM_EC_KEY_PAIR_GEN"),
            MechanismKind::RsaPkcsKeyPairGen => write!(f, "CKM_RSA_PKCS_KEY_PAIR_GEN"),
            MechanismKind::AesKeyGen => write!(f, "CKM_AES_KEY_GEN"),
            MechanismKind::Ecdsa => write!(f, "CKM_ECDSA"),
            MechanismKind::AesCbc { .. } => write!(f, "CKM_AES_CBC"),
        }
    }
}

/// Capability flags reported for a mechanism
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MechanismFlags(u32);

impl MechanismFlags {
    pub const HW: Self = Self(1 << 0);
    pub const ENCRYPT: Self = Self(1 << 1);
    pub const DECRYPT: Self = Self(1 << 2);
    pub const DIGEST: Self = Self(1 << 3);
    pub const SIGN: Self = Self(1 << 4);
    pub const SIGN_RECOVER: Self = Self(1 << 5);
    pub const VERIFY: Self = Self(1 << 6);
    pub const VERIFY_RECOVER: Self = Self(1 << 7);
    pub const GENERATE: Self = Self(1 << 8);
    pub const GENERATE_KEY_PAIR: Self = Self(1 << 9);
    pub const WRAP: Self = Self(1 << 10);
    pub const UNWRAP: Self = Self(1 << 11);
    pub const DERIVE: Self = Self(1 << 12);

    const NAMES: [(Self, &'static str); 13] = [
        (Self::HW, "CKF_HW"),
        (Self::ENCRYPT, "CKF_ENCRYPT"),
        (Self::DECRYPT, "CKF_DECRYPT"),
        (Self::DIGEST, "CKF_DIGEST"),
        (Self::SIGN, "CKF_SIGN"),
        (Self::SIGN_RECOVER, "CKF_SIGN_RECOVER"),
        (Self::VERIFY, "CKF_VERIFY"),
        (Self::VERIFY_RECOVER, "CKF_VERIFY_RECOVER"),
        (Self::GENERATE, "CKF_GENERATE"),
        (Self::GENERATE_KEY_PAIR, "CKF_GENERATE_KEY_PAIR"),
        (Self::WRAP, "CKF_WRAP"),
        (Self::UNWRAP, "CKF_UNWRAP"),
        (Self::DERIVE, "CKF_DERIVE"),
    ];

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Self, enabled: bool) {
        if enabled {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Names of the set flags, in no particular order
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::ops::BitOr for MechanismFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mechanism metadata as reported by the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MechanismDescription {
    pub name: String,
    pub min_key_size: u64,
    pub max_key_size: u64,
    pub flags: MechanismFlags,
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The object has no attribute of the requested kind
    #[error("attribute type invalid for object")]
    AttributeTypeInvalid,
    #[error(transparent)]
    Pkcs11(#[from] cryptoki::error::Error),
    #[error("{0}")]
    Device(String),
}

/// An open object search.
///
/// Dropping the search finalizes it, so every exit path of a paging loop
/// releases the search context.
pub trait ObjectSearch {
    /// Next batch of at most `max` handles; an empty batch means exhausted
    fn next_batch(&mut self, max: usize) -> Result<Vec<ObjectId>, ModuleError>;
}

/// Operations the core consumes from a PKCS#11 module
pub trait TokenModule {
    fn initialize(&mut self) -> Result<(), ModuleError>;

    /// Close any open session and unload the module
    fn finalize(&mut self) -> Result<(), ModuleError>;

    /// Slots that currently hold a token
    fn slots(&mut self) -> Result<Vec<SlotId>, ModuleError>;

    fn token_label(&mut self, slot: SlotId) -> Result<String, ModuleError>;

    /// Open a read/write session; all object operations use it afterwards
    fn open_session(&mut self, slot: SlotId) -> Result<(), ModuleError>;

    fn login(&mut self, pin: &str) -> Result<(), ModuleError>;

    fn find_objects<'a>(
        &'a mut self,
        template: &Template,
    ) -> Result<Box<dyn ObjectSearch + 'a>, ModuleError>;

    fn get_attribute(
        &mut self,
        object: ObjectId,
        kind: AttributeKind,
    ) -> Result<Attribute, ModuleError>;

    fn create_object(&mut self, template: &Template) -> Result<ObjectId, ModuleError>;

    fn destroy_object(&mut self, object: ObjectId) -> Result<(), ModuleError>;

    fn generate_key(
        &mut self,
        mechanism: MechanismKind,
        template: &Template,
    ) -> Result<ObjectId, ModuleError>;

    fn generate_key_pair(
        &mut self,
        mechanism: MechanismKind,
        public_template: &Template,
        private_template: &Template,
    ) -> Result<(ObjectId, ObjectId), ModuleError>;

    /// Single-part sign (init + sign)
    fn sign(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError>;

    /// Single-part encrypt (init + encrypt)
    fn encrypt(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError>;

    fn mechanisms(&mut self, slot: SlotId) -> Result<Vec<MechanismDescription>, ModuleError>;
}
