//! PKCS#11 device integration.
//!
//! Locates the PKCS#11 module on disk, acquires the user PIN and exposes the
//! module to the token core through [`CryptokiModule`].

use anyhow::{Context, Result};
use cryptoki::context::{CInitializeArgs, CInitializeFlags, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::{Mechanism, MechanismType};
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::token::module::{
    MechanismDescription, MechanismFlags, MechanismKind, ModuleError, ObjectId, ObjectSearch,
    SlotId, TokenModule,
};
use crate::token::resolver::SEARCH_BATCH_SIZE;
use crate::token::template::{self, AttributeKind, Template};

/// Environment variable holding the PIN for `--auth env`
pub const PIN_ENV_VAR: &str = "EDGE_IDENTITY_PIN";

/// Module file names searched for when no path is configured
const MODULE_NAMES: [&str; 4] = [
    "libsofthsm2.so",
    "opensc-pkcs11.so",
    "libtpm2_pkcs11.so",
    "yubihsm_pkcs11.so",
];

/// Authentication methods for PKCS#11 devices
#[derive(Debug, Clone, PartialEq)]
pub enum Pkcs11AuthMethod {
    None,
    Prompt,
    EnvVar(String),
}

impl FromStr for Pkcs11AuthMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Pkcs11AuthMethod::None),
            "prompt" => Ok(Pkcs11AuthMethod::Prompt),
            "env" => Ok(Pkcs11AuthMethod::EnvVar(PIN_ENV_VAR.to_string())),
            _ => anyhow::bail!(
                "Unsupported auth method '{}'. Supported: none, prompt, env",
                s
            ),
        }
    }
}

/// Get authentication PIN from the user
pub fn get_device_auth(method: &Pkcs11AuthMethod) -> Result<String> {
    match method {
        Pkcs11AuthMethod::None => Ok(String::new()),
        Pkcs11AuthMethod::Prompt => {
            let pin = rpassword::prompt_password("Enter PIN for PKCS#11 token: ")
                .context("Failed to read PIN from prompt")?;
            Ok(pin)
        }
        Pkcs11AuthMethod::EnvVar(var_name) => env::var(var_name).with_context(|| {
            format!(
                "Environment variable '{}' not set. Set it or use --auth prompt",
                var_name
            )
        }),
    }
}

/// Resolve the PKCS#11 module path.
///
/// An explicitly configured path wins, then `PKCS11_MODULE_PATH`, then a
/// search of the standard library directories.
pub fn get_pkcs11_module_path(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("PKCS#11 module does not exist: {}", path.display());
    }

    if let Ok(path) = env::var("PKCS11_MODULE_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Ok(p);
        }
        anyhow::bail!(
            "PKCS11_MODULE_PATH set but file does not exist: {}",
            p.display()
        );
    }

    let search_dirs = get_library_search_paths();
    if let Some(path) = find_module_in(&search_dirs) {
        return Ok(path);
    }

    anyhow::bail!(
        "PKCS#11 module not found. Set PKCS11_MODULE_PATH, pass --module, or install SoftHSM2/OpenSC.\n\
        \n\
        Searched in: {}",
        search_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// First known module found in `dirs` or their `pkcs11`/`softhsm` subdirectories
fn find_module_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in dirs {
        let candidates = [dir.clone(), dir.join("pkcs11"), dir.join("softhsm")];
        for module_name in MODULE_NAMES {
            for candidate_dir in &candidates {
                let path = candidate_dir.join(module_name);
                if path.exists() {
                    return Some(path);
                }

                // Versioned .so files (e.g. .so.1, .so.2.6.1)
                if let Ok(entries) = fs::read_dir(candidate_dir) {
                    for entry in entries.flatten() {
                        if entry.file_name().to_string_lossy().starts_with(module_name) {
                            return Some(entry.path());
                        }
                    }
                }
            }
        }
    }
    None
}

/// Standard library search paths for the current system
fn get_library_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // p11-kit module directory, standard on most systems
    if let Ok(output) = std::process::Command::new("pkg-config")
        .args(["--variable=p11_module_path", "p11-kit-1"])
        .output()
    {
        if output.status.success() {
            let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
            if path.exists() {
                paths.push(path);
            }
        }
    }

    paths.extend(vec![
        PathBuf::from("/usr/lib"),
        PathBuf::from("/usr/local/lib"),
        PathBuf::from("/usr/lib64"),
        PathBuf::from("/lib"),
        PathBuf::from("/lib64"),
    ]);

    if let Ok(ld_path) = env::var("LD_LIBRARY_PATH") {
        for path in ld_path.split(':') {
            if !path.is_empty() {
                paths.push(PathBuf::from(path));
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));

    #[cfg(target_arch = "aarch64")]
    paths.push(PathBuf::from("/usr/lib/aarch64-linux-gnu"));

    #[cfg(target_os = "macos")]
    paths.push(PathBuf::from("/opt/homebrew/lib"));

    paths
}

/// [`TokenModule`] backed by a dynamically loaded PKCS#11 library.
///
/// Object handles are kept in a per-session arena and handed out as indices.
pub struct CryptokiModule {
    module_path: PathBuf,
    pkcs11: Option<Pkcs11>,
    session: Option<Session>,
    slots: Vec<Slot>,
    handles: Vec<ObjectHandle>,
}

impl CryptokiModule {
    pub fn new(module_path: PathBuf) -> Self {
        Self {
            module_path,
            pkcs11: None,
            session: None,
            slots: Vec::new(),
            handles: Vec::new(),
        }
    }

    fn pkcs11(&self) -> Result<&Pkcs11, ModuleError> {
        self.pkcs11
            .as_ref()
            .ok_or_else(|| ModuleError::Device("PKCS#11 module not initialized".to_string()))
    }

    fn session(&self) -> Result<&Session, ModuleError> {
        self.session
            .as_ref()
            .ok_or_else(|| ModuleError::Device("no open PKCS#11 session".to_string()))
    }

    fn slot(&self, slot: SlotId) -> Result<Slot, ModuleError> {
        self.slots
            .iter()
            .copied()
            .find(|s| s.id() == slot.0)
            .ok_or_else(|| ModuleError::Device(format!("unknown slot {}", slot)))
    }

    fn handle(&self, object: ObjectId) -> Result<ObjectHandle, ModuleError> {
        self.handles
            .get(object.get() as usize)
            .copied()
            .ok_or_else(|| ModuleError::Device(format!("unknown object {}", object)))
    }

    fn register(&mut self, handle: ObjectHandle) -> ObjectId {
        register_handle(&mut self.handles, handle)
    }
}

fn register_handle(handles: &mut Vec<ObjectHandle>, handle: ObjectHandle) -> ObjectId {
    let index = match handles.iter().position(|h| *h == handle) {
        Some(index) => index,
        None => {
            handles.push(handle);
            handles.len() - 1
        }
    };
    ObjectId::new(index as u64)
}

fn module_error(err: CryptokiError) -> ModuleError {
    match err {
        CryptokiError::Pkcs11(RvError::AttributeTypeInvalid, ..) => {
            ModuleError::AttributeTypeInvalid
        }
        err => ModuleError::Pkcs11(err),
    }
}

fn to_cryptoki_class(class: template::ObjectClass) -> ObjectClass {
    match class {
        template::ObjectClass::PublicKey => ObjectClass::PUBLIC_KEY,
        template::ObjectClass::PrivateKey => ObjectClass::PRIVATE_KEY,
        template::ObjectClass::SecretKey => ObjectClass::SECRET_KEY,
        template::ObjectClass::Data => ObjectClass::DATA,
        template::ObjectClass::Certificate => ObjectClass::CERTIFICATE,
        template::ObjectClass::Other => ObjectClass::OTP_KEY,
    }
}

fn from_cryptoki_class(class: ObjectClass) -> template::ObjectClass {
    if class == ObjectClass::PUBLIC_KEY {
        template::ObjectClass::PublicKey
    } else if class == ObjectClass::PRIVATE_KEY {
        template::ObjectClass::PrivateKey
    } else if class == ObjectClass::SECRET_KEY {
        template::ObjectClass::SecretKey
    } else if class == ObjectClass::DATA {
        template::ObjectClass::Data
    } else if class == ObjectClass::CERTIFICATE {
        template::ObjectClass::Certificate
    } else {
        template::ObjectClass::Other
    }
}

fn to_cryptoki_key_type(key_type: template::KeyType) -> KeyType {
    match key_type {
        template::KeyType::Rsa => KeyType::RSA,
        template::KeyType::Aes => KeyType::AES,
        template::KeyType::Ec => KeyType::EC,
    }
}

fn to_cryptoki_attribute(attribute: &template::Attribute) -> Attribute {
    use template::Attribute as A;

    match attribute {
        A::Class(class) => Attribute::Class(to_cryptoki_class(*class)),
        A::KeyType(key_type) => Attribute::KeyType(to_cryptoki_key_type(*key_type)),
        A::Label(label) => Attribute::Label(label.as_bytes().to_vec()),
        A::Id(id) => Attribute::Id(id.clone()),
        A::Token(v) => Attribute::Token(*v),
        A::Private(v) => Attribute::Private(*v),
        A::Sign(v) => Attribute::Sign(*v),
        A::Verify(v) => Attribute::Verify(*v),
        A::Encrypt(v) => Attribute::Encrypt(*v),
        A::Decrypt(v) => Attribute::Decrypt(*v),
        A::Wrap(v) => Attribute::Wrap(*v),
        A::Unwrap(v) => Attribute::Unwrap(*v),
        A::Sensitive(v) => Attribute::Sensitive(*v),
        A::Extractable(v) => Attribute::Extractable(*v),
        A::EcParams(params) => Attribute::EcParams(params.clone()),
        A::EcPoint(point) => Attribute::EcPoint(point.clone()),
        A::ModulusBits(bits) => Attribute::ModulusBits((*bits).into()),
        A::PublicExponent(exponent) => Attribute::PublicExponent(exponent.clone()),
        A::ValueLen(len) => Attribute::ValueLen((*len).into()),
        A::Value(value) => Attribute::Value(value.clone()),
    }
}

fn to_cryptoki_template(template: &Template) -> Vec<Attribute> {
    template
        .attributes()
        .iter()
        .map(to_cryptoki_attribute)
        .collect()
}

fn to_attribute_type(kind: AttributeKind) -> AttributeType {
    match kind {
        AttributeKind::Class => AttributeType::Class,
        AttributeKind::KeyType => AttributeType::KeyType,
        AttributeKind::Label => AttributeType::Label,
        AttributeKind::Id => AttributeType::Id,
        AttributeKind::Token => AttributeType::Token,
        AttributeKind::Private => AttributeType::Private,
        AttributeKind::Sign => AttributeType::Sign,
        AttributeKind::Verify => AttributeType::Verify,
        AttributeKind::Encrypt => AttributeType::Encrypt,
        AttributeKind::Decrypt => AttributeType::Decrypt,
        AttributeKind::Wrap => AttributeType::Wrap,
        AttributeKind::Unwrap => AttributeType::Unwrap,
        AttributeKind::Sensitive => AttributeType::Sensitive,
        AttributeKind::Extractable => AttributeType::Extractable,
        AttributeKind::EcParams => AttributeType::EcParams,
        AttributeKind::EcPoint => AttributeType::EcPoint,
        AttributeKind::ModulusBits => AttributeType::ModulusBits,
        AttributeKind::PublicExponent => AttributeType::PublicExponent,
        AttributeKind::ValueLen => AttributeType::ValueLen,
        AttributeKind::Value => AttributeType::Value,
    }
}

/// Convert an attribute read back from the token; `None` for kinds the core does not read
fn from_cryptoki_attribute(attribute: Attribute) -> Option<template::Attribute> {
    use template::Attribute as A;

    let converted = match attribute {
        Attribute::Class(class) => A::Class(from_cryptoki_class(class)),
        Attribute::KeyType(key_type) if key_type == KeyType::RSA => {
            A::KeyType(template::KeyType::Rsa)
        }
        Attribute::KeyType(key_type) if key_type == KeyType::AES => {
            A::KeyType(template::KeyType::Aes)
        }
        Attribute::KeyType(key_type) if key_type == KeyType::EC => {
            A::KeyType(template::KeyType::Ec)
        }
        Attribute::Label(label) => A::Label(String::from_utf8_lossy(&label).into_owned()),
        Attribute::Id(id) => A::Id(id),
        Attribute::Token(v) => A::Token(v),
        Attribute::Private(v) => A::Private(v),
        Attribute::Sign(v) => A::Sign(v),
        Attribute::Verify(v) => A::Verify(v),
        Attribute::Encrypt(v) => A::Encrypt(v),
        Attribute::Decrypt(v) => A::Decrypt(v),
        Attribute::Wrap(v) => A::Wrap(v),
        Attribute::Unwrap(v) => A::Unwrap(v),
        Attribute::Sensitive(v) => A::Sensitive(v),
        Attribute::Extractable(v) => A::Extractable(v),
        Attribute::EcParams(params) => A::EcParams(params),
        Attribute::EcPoint(point) => A::EcPoint(point),
        Attribute::ModulusBits(bits) => A::ModulusBits(u64::from(bits)),
        Attribute::PublicExponent(exponent) => A::PublicExponent(exponent),
        Attribute::ValueLen(len) => A::ValueLen(u64::from(len)),
        Attribute::Value(value) => A::Value(value),
        _ => return None,
    };
    Some(converted)
}

fn to_cryptoki_mechanism(mechanism: MechanismKind) -> Mechanism<'static> {
    match mechanism {
        MechanismKind::EcKeyPairGen => Mechanism::EccKeyPairGen,
        MechanismKind::RsaPkcsKeyPairGen => Mechanism::RsaPkcsKeyPairGen,
        MechanismKind::AesKeyGen => Mechanism::AesKeyGen,
        MechanismKind::Ecdsa => Mechanism::Ecdsa,
        MechanismKind::AesCbc { iv } => Mechanism::AesCbc(iv),
    }
}

/// Search over cryptoki's object iterator; dropping the iterator finalizes the search
struct CryptokiSearch<'a> {
    objects: Box<dyn Iterator<Item = cryptoki::error::Result<ObjectHandle>> + 'a>,
    handles: &'a mut Vec<ObjectHandle>,
}

impl ObjectSearch for CryptokiSearch<'_> {
    fn next_batch(&mut self, max: usize) -> std::result::Result<Vec<ObjectId>, ModuleError> {
        let mut batch = Vec::with_capacity(max);
        while batch.len() < max {
            match self.objects.next() {
                Some(handle) => {
                    let handle = handle.map_err(module_error)?;
                    batch.push(register_handle(self.handles, handle));
                }
                None => break,
            }
        }
        Ok(batch)
    }
}

impl TokenModule for CryptokiModule {
    fn initialize(&mut self) -> std::result::Result<(), ModuleError> {
        let pkcs11 = Pkcs11::new(&self.module_path).map_err(module_error)?;
        pkcs11
            .initialize(CInitializeArgs::new(CInitializeFlags::OS_LOCKING_OK))
            .map_err(module_error)?;
        self.pkcs11 = Some(pkcs11);
        Ok(())
    }

    fn finalize(&mut self) -> std::result::Result<(), ModuleError> {
        self.handles.clear();
        self.slots.clear();

        // The session must be closed before C_Finalize; a failed logout is not fatal
        let closed = match self.session.take() {
            Some(session) => {
                if let Err(e) = session.logout() {
                    tracing::debug!(error = %e, "Logout failed");
                }
                session.close().map_err(module_error)
            }
            None => Ok(()),
        };

        // C_Finalize is only called here, never on drop of the context
        let finalized = match self.pkcs11.take() {
            Some(pkcs11) => pkcs11.finalize().map_err(module_error),
            None => Ok(()),
        };

        closed.and(finalized)
    }

    fn slots(&mut self) -> std::result::Result<Vec<SlotId>, ModuleError> {
        self.slots = self.pkcs11()?.get_slots_with_token().map_err(module_error)?;
        Ok(self.slots.iter().map(|s| SlotId(s.id())).collect())
    }

    fn token_label(&mut self, slot: SlotId) -> std::result::Result<String, ModuleError> {
        let slot = self.slot(slot)?;
        let info = self.pkcs11()?.get_token_info(slot).map_err(module_error)?;
        Ok(info.label().to_string())
    }

    fn open_session(&mut self, slot: SlotId) -> std::result::Result<(), ModuleError> {
        let slot = self.slot(slot)?;
        let session = self.pkcs11()?.open_rw_session(slot).map_err(module_error)?;
        self.session = Some(session);
        Ok(())
    }

    fn login(&mut self, pin: &str) -> std::result::Result<(), ModuleError> {
        let auth_pin = AuthPin::new(pin.into());
        self.session()?
            .login(UserType::User, Some(&auth_pin))
            .map_err(module_error)
    }

    fn find_objects<'a>(
        &'a mut self,
        template: &Template,
    ) -> std::result::Result<Box<dyn ObjectSearch + 'a>, ModuleError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| ModuleError::Device("no open PKCS#11 session".to_string()))?;

        let cache_size = NonZeroUsize::new(SEARCH_BATCH_SIZE)
            .ok_or_else(|| ModuleError::Device("search batch size is zero".to_string()))?;
        let objects = session
            .iter_objects_with_cache_size(&to_cryptoki_template(template), cache_size)
            .map_err(module_error)?;

        Ok(Box::new(CryptokiSearch {
            objects: Box::new(objects),
            handles: &mut self.handles,
        }))
    }

    fn get_attribute(
        &mut self,
        object: ObjectId,
        kind: AttributeKind,
    ) -> std::result::Result<template::Attribute, ModuleError> {
        let handle = self.handle(object)?;
        let attributes = self
            .session()?
            .get_attributes(handle, &[to_attribute_type(kind)])
            .map_err(module_error)?;

        // Attributes the object does not have are left out of the result
        attributes
            .into_iter()
            .filter_map(from_cryptoki_attribute)
            .find(|a| a.kind() == kind)
            .ok_or(ModuleError::AttributeTypeInvalid)
    }

    fn create_object(&mut self, template: &Template) -> std::result::Result<ObjectId, ModuleError> {
        let handle = self
            .session()?
            .create_object(&to_cryptoki_template(template))
            .map_err(module_error)?;
        Ok(self.register(handle))
    }

    fn destroy_object(&mut self, object: ObjectId) -> std::result::Result<(), ModuleError> {
        let handle = self.handle(object)?;
        self.session()?.destroy_object(handle).map_err(module_error)
    }

    fn generate_key(
        &mut self,
        mechanism: MechanismKind,
        template: &Template,
    ) -> std::result::Result<ObjectId, ModuleError> {
        let handle = self
            .session()?
            .generate_key(&to_cryptoki_mechanism(mechanism), &to_cryptoki_template(template))
            .map_err(module_error)?;
        Ok(self.register(handle))
    }

    fn generate_key_pair(
        &mut self,
        mechanism: MechanismKind,
        public_template: &Template,
        private_template: &Template,
    ) -> std::result::Result<(ObjectId, ObjectId), ModuleError> {
        let (public_key, private_key) = self
            .session()?
            .generate_key_pair(
                &to_cryptoki_mechanism(mechanism),
                &to_cryptoki_template(public_template),
                &to_cryptoki_template(private_template),
            )
            .map_err(module_error)?;
        Ok((self.register(public_key), self.register(private_key)))
    }

    fn sign(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> std::result::Result<Vec<u8>, ModuleError> {
        let handle = self.handle(key)?;
        self.session()?
            .sign(&to_cryptoki_mechanism(mechanism), handle, data)
            .map_err(module_error)
    }

    fn encrypt(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> std::result::Result<Vec<u8>, ModuleError> {
        let handle = self.handle(key)?;
        self.session()?
            .encrypt(&to_cryptoki_mechanism(mechanism), handle, data)
            .map_err(module_error)
    }

    fn mechanisms(
        &mut self,
        slot: SlotId,
    ) -> std::result::Result<Vec<MechanismDescription>, ModuleError> {
        let slot = self.slot(slot)?;
        let pkcs11 = self.pkcs11()?;
        let types: Vec<MechanismType> = pkcs11.get_mechanism_list(slot).map_err(module_error)?;

        let mut descriptions = Vec::with_capacity(types.len());
        for mechanism in types {
            let info = pkcs11
                .get_mechanism_info(slot, mechanism)
                .map_err(module_error)?;

            let mut flags = MechanismFlags::empty();
            flags.set(MechanismFlags::HW, info.hardware());
            flags.set(MechanismFlags::ENCRYPT, info.encrypt());
            flags.set(MechanismFlags::DECRYPT, info.decrypt());
            flags.set(MechanismFlags::DIGEST, info.digest());
            flags.set(MechanismFlags::SIGN, info.sign());
            flags.set(MechanismFlags::SIGN_RECOVER, info.sign_recover());
            flags.set(MechanismFlags::VERIFY, info.verify());
            flags.set(MechanismFlags::VERIFY_RECOVER, info.verify_recover());
            flags.set(MechanismFlags::GENERATE, info.generate());
            flags.set(MechanismFlags::GENERATE_KEY_PAIR, info.generate_key_pair());
            flags.set(MechanismFlags::WRAP, info.wrap());
            flags.set(MechanismFlags::UNWRAP, info.unwrap());
            flags.set(MechanismFlags::DERIVE, info.derive());

            descriptions.push(MechanismDescription {
                name: mechanism.to_string(),
                min_key_size: info.min_key_size() as u64,
                max_key_size: info.max_key_size() as u64,
                flags,
            });
        }

        Ok(descriptions)
    }
}
