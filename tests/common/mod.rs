#![allow(dead_code)] // Test utilities - some functions may not be used in all tests

//! In-memory PKCS#11 token for driving `Token` without hardware.
//!
//! EC keys are real secp256k1 keys derived deterministically from the label,
//! so signatures can be checked with `k256`. State lives behind an `Rc` so
//! tests can inspect it after the `Token` has been finalised.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;

use edge_identity::token::{
    Attribute, AttributeKind, KeyType, MechanismDescription, MechanismFlags, MechanismKind,
    ModuleError, ObjectClass, ObjectId, ObjectSearch, SlotId, Template, Token, TokenModule,
};

pub const TOKEN_LABEL: &str = "edge";
pub const PIN: &str = "1234";

/// secp256k1 group order n
const SECP256K1_ORDER_HEX: &str =
    "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

pub struct SoftObject {
    pub attributes: Vec<Attribute>,
    pub ec_key: Option<SigningKey>,
    pub secret: Option<Vec<u8>>,
}

impl SoftObject {
    fn attribute(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.kind() == kind)
    }

    pub fn label(&self) -> Option<&str> {
        match self.attribute(AttributeKind::Label) {
            Some(Attribute::Label(label)) => Some(label),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<ObjectClass> {
        match self.attribute(AttributeKind::Class) {
            Some(Attribute::Class(class)) => Some(*class),
            _ => None,
        }
    }

    pub fn has(&self, attribute: &Attribute) -> bool {
        self.attributes.contains(attribute)
    }

    fn matches(&self, template: &Template) -> bool {
        template
            .attributes()
            .iter()
            .all(|wanted| self.attribute(wanted.kind()) == Some(wanted))
    }
}

#[derive(Default)]
pub struct SoftState {
    /// (slot id, token label)
    pub slots: Vec<(u64, String)>,
    pub objects: BTreeMap<u64, SoftObject>,
    next_handle: u64,
    key_counter: u64,

    pub initialized: bool,
    pub session_slot: Option<u64>,
    pub logged_in: bool,
    pub required_pin: Option<String>,

    pub finalize_calls: usize,
    pub searches_opened: usize,
    pub searches_finalized: usize,
    /// Every module call, in order
    pub calls: Vec<&'static str>,

    /// Fail the n-th (0-based) page of every search
    pub fail_search_page: Option<usize>,
    /// Objects whose label cannot be read
    pub label_read_failures: HashSet<u64>,
    /// Objects that cannot be destroyed
    pub destroy_failures: HashSet<u64>,
    /// Return S from the upper half of the curve order
    pub high_s: bool,
    /// Report CKA_EC_POINT wrapped in a DER OCTET STRING
    pub der_wrap_points: bool,
    /// Make C_Finalize fail
    pub fail_finalize: bool,
}

impl SoftState {
    fn insert(&mut self, object: SoftObject) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle * 10;
        self.objects.insert(handle, object);
        handle
    }

    fn object(&self, id: ObjectId) -> Result<&SoftObject, ModuleError> {
        self.objects
            .get(&id.get())
            .ok_or_else(|| ModuleError::Device("CKR_OBJECT_HANDLE_INVALID".to_string()))
    }

    fn require_session(&self) -> Result<(), ModuleError> {
        if self.session_slot.is_none() {
            return Err(ModuleError::Device("CKR_SESSION_HANDLE_INVALID".to_string()));
        }
        Ok(())
    }

    /// Deterministic key material for the next generated key
    fn derive_material(&mut self, label: &str) -> [u8; 32] {
        self.key_counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        hasher.update(self.key_counter.to_be_bytes());
        hasher.finalize().into()
    }
}

/// Handle for inspecting a [`SoftToken`] from the test
pub type SoftHandle = Rc<RefCell<SoftState>>;

pub struct SoftToken {
    state: SoftHandle,
}

impl SoftToken {
    /// A token labelled [`TOKEN_LABEL`] in slot 4, after an unrelated token in slot 1
    pub fn new() -> Self {
        let state = SoftState {
            slots: vec![(1, "spare".to_string()), (4, TOKEN_LABEL.to_string())],
            required_pin: Some(PIN.to_string()),
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn handle(&self) -> SoftHandle {
        Rc::clone(&self.state)
    }

    /// Place an object on the token directly, bypassing the core
    pub fn insert(&self, attributes: Vec<Attribute>) -> u64 {
        self.state.borrow_mut().insert(SoftObject {
            attributes,
            ec_key: None,
            secret: None,
        })
    }
}

impl Default for SoftToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the default token with the right PIN, returning the token and a state handle
pub fn open_token() -> (Token<SoftToken>, SoftHandle) {
    open_with(SoftToken::new())
}

pub fn open_with(soft: SoftToken) -> (Token<SoftToken>, SoftHandle) {
    let handle = soft.handle();
    let token = Token::open(soft, TOKEN_LABEL, PIN).unwrap();
    (token, handle)
}

fn curve_order() -> BigUint {
    BigUint::parse_bytes(SECP256K1_ORDER_HEX.as_bytes(), 16).unwrap()
}

fn left_pad(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    out
}

/// The same signature with S replaced by n - S and V flipped between 27 and 28
pub fn high_s_twin(signature: &[u8]) -> [u8; 65] {
    let mut twin = [0u8; 65];
    twin.copy_from_slice(signature);
    let s = BigUint::from_bytes_be(&signature[32..64]);
    twin[32..64].copy_from_slice(&left_pad(&(curve_order() - s).to_bytes_be()));
    twin[64] = if signature[64] == 27 { 28 } else { 27 };
    twin
}

/// Uncompressed SEC1 point of `key`
pub fn uncompressed_point(key: &SigningKey) -> Vec<u8> {
    key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
}

/// Single-block AES encryption with a key of any supported size
pub fn aes_encrypt_block(key: &[u8], block: &mut [u8; 16]) -> Result<(), ModuleError> {
    let block = GenericArray::from_mut_slice(block);
    let invalid = |_| ModuleError::Device("CKR_KEY_SIZE_RANGE".to_string());
    match key.len() {
        16 => Aes128::new_from_slice(key).map_err(invalid)?.encrypt_block(block),
        24 => Aes192::new_from_slice(key).map_err(invalid)?.encrypt_block(block),
        32 => Aes256::new_from_slice(key).map_err(invalid)?.encrypt_block(block),
        _ => return Err(ModuleError::Device("CKR_KEY_SIZE_RANGE".to_string())),
    }
    Ok(())
}

fn aes_cbc_encrypt(key: &[u8], iv: [u8; 16], data: &[u8]) -> Result<Vec<u8>, ModuleError> {
    if data.len() % 16 != 0 {
        return Err(ModuleError::Device("CKR_DATA_LEN_RANGE".to_string()));
    }

    let mut previous = iv;
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(16) {
        let mut block = [0u8; 16];
        for (i, b) in chunk.iter().enumerate() {
            block[i] = b ^ previous[i];
        }
        aes_encrypt_block(key, &mut block)?;
        out.extend_from_slice(&block);
        previous = block;
    }
    Ok(out)
}

struct SoftSearch {
    pending: VecDeque<ObjectId>,
    page: usize,
    state: SoftHandle,
}

impl ObjectSearch for SoftSearch {
    fn next_batch(&mut self, max: usize) -> Result<Vec<ObjectId>, ModuleError> {
        let page = self.page;
        self.page += 1;
        if self.state.borrow().fail_search_page == Some(page) {
            return Err(ModuleError::Device("CKR_DEVICE_ERROR".to_string()));
        }

        let take = max.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }
}

impl Drop for SoftSearch {
    fn drop(&mut self) {
        self.state.borrow_mut().searches_finalized += 1;
    }
}

impl TokenModule for SoftToken {
    fn initialize(&mut self) -> Result<(), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("initialize");
        state.initialized = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("finalize");
        state.finalize_calls += 1;
        state.session_slot = None;
        state.logged_in = false;
        state.initialized = false;
        if state.fail_finalize {
            return Err(ModuleError::Device("CKR_GENERAL_ERROR".to_string()));
        }
        Ok(())
    }

    fn slots(&mut self) -> Result<Vec<SlotId>, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("slots");
        Ok(state.slots.iter().map(|(id, _)| SlotId(*id)).collect())
    }

    fn token_label(&mut self, slot: SlotId) -> Result<String, ModuleError> {
        let state = self.state.borrow();
        state
            .slots
            .iter()
            .find(|(id, _)| *id == slot.0)
            // PKCS#11 pads token labels to 32 bytes with spaces
            .map(|(_, label)| format!("{:<32}", label))
            .ok_or_else(|| ModuleError::Device("CKR_SLOT_ID_INVALID".to_string()))
    }

    fn open_session(&mut self, slot: SlotId) -> Result<(), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("open_session");
        state.session_slot = Some(slot.0);
        Ok(())
    }

    fn login(&mut self, pin: &str) -> Result<(), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("login");
        state.require_session()?;
        if let Some(required) = &state.required_pin {
            if required != pin {
                return Err(ModuleError::Device("CKR_PIN_INCORRECT".to_string()));
            }
        }
        state.logged_in = true;
        Ok(())
    }

    fn find_objects<'a>(
        &'a mut self,
        template: &Template,
    ) -> Result<Box<dyn ObjectSearch + 'a>, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("find_objects");
        state.require_session()?;
        state.searches_opened += 1;

        let pending = state
            .objects
            .iter()
            .filter(|(_, object)| object.matches(template))
            .map(|(handle, _)| ObjectId::new(*handle))
            .collect();

        Ok(Box::new(SoftSearch {
            pending,
            page: 0,
            state: Rc::clone(&self.state),
        }))
    }

    fn get_attribute(
        &mut self,
        object: ObjectId,
        kind: AttributeKind,
    ) -> Result<Attribute, ModuleError> {
        let state = self.state.borrow();
        state.require_session()?;
        if kind == AttributeKind::Label && state.label_read_failures.contains(&object.get()) {
            return Err(ModuleError::Device("CKR_DEVICE_ERROR".to_string()));
        }

        let soft = state.object(object)?;
        let attribute = soft
            .attribute(kind)
            .cloned()
            .ok_or(ModuleError::AttributeTypeInvalid)?;

        match attribute {
            Attribute::EcPoint(point) if state.der_wrap_points => {
                let mut wrapped = vec![0x04, point.len() as u8];
                wrapped.extend(point);
                Ok(Attribute::EcPoint(wrapped))
            }
            attribute => Ok(attribute),
        }
    }

    fn create_object(&mut self, template: &Template) -> Result<ObjectId, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("create_object");
        state.require_session()?;

        let secret = match template.get(AttributeKind::Value) {
            Some(Attribute::Value(value)) => Some(value.clone()),
            _ => None,
        };
        let attributes = template
            .attributes()
            .iter()
            .filter(|a| a.kind() != AttributeKind::Value)
            .cloned()
            .collect();

        let handle = state.insert(SoftObject {
            attributes,
            ec_key: None,
            secret,
        });
        Ok(ObjectId::new(handle))
    }

    fn destroy_object(&mut self, object: ObjectId) -> Result<(), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("destroy_object");
        state.require_session()?;
        if state.destroy_failures.contains(&object.get()) {
            return Err(ModuleError::Device("CKR_ACTION_PROHIBITED".to_string()));
        }
        state
            .objects
            .remove(&object.get())
            .map(|_| ())
            .ok_or_else(|| ModuleError::Device("CKR_OBJECT_HANDLE_INVALID".to_string()))
    }

    fn generate_key(
        &mut self,
        mechanism: MechanismKind,
        template: &Template,
    ) -> Result<ObjectId, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("generate_key");
        state.require_session()?;
        if mechanism != MechanismKind::AesKeyGen {
            return Err(ModuleError::Device("CKR_MECHANISM_INVALID".to_string()));
        }

        let len = match template.get(AttributeKind::ValueLen) {
            Some(Attribute::ValueLen(len)) => *len as usize,
            _ => return Err(ModuleError::Device("CKR_TEMPLATE_INCOMPLETE".to_string())),
        };
        let label = match template.get(AttributeKind::Label) {
            Some(Attribute::Label(label)) => label.clone(),
            _ => String::new(),
        };

        let material = state.derive_material(&label);
        let handle = state.insert(SoftObject {
            attributes: template.attributes().to_vec(),
            ec_key: None,
            secret: Some(material[..len].to_vec()),
        });
        Ok(ObjectId::new(handle))
    }

    fn generate_key_pair(
        &mut self,
        mechanism: MechanismKind,
        public_template: &Template,
        private_template: &Template,
    ) -> Result<(ObjectId, ObjectId), ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("generate_key_pair");
        state.require_session()?;

        let mut public_attributes = public_template.attributes().to_vec();
        let ec_key = match mechanism {
            MechanismKind::EcKeyPairGen => {
                let label = match public_template.get(AttributeKind::Label) {
                    Some(Attribute::Label(label)) => label.clone(),
                    _ => String::new(),
                };
                let key = loop {
                    let material = state.derive_material(&label);
                    if let Ok(key) = SigningKey::from_slice(&material) {
                        break key;
                    }
                };
                public_attributes.push(Attribute::EcPoint(uncompressed_point(&key)));
                Some(key)
            }
            MechanismKind::RsaPkcsKeyPairGen => None,
            _ => return Err(ModuleError::Device("CKR_MECHANISM_INVALID".to_string())),
        };

        let public = state.insert(SoftObject {
            attributes: public_attributes,
            ec_key: None,
            secret: None,
        });
        let private = state.insert(SoftObject {
            attributes: private_template.attributes().to_vec(),
            ec_key,
            secret: None,
        });
        Ok((ObjectId::new(public), ObjectId::new(private)))
    }

    fn sign(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("sign");
        state.require_session()?;
        if mechanism != MechanismKind::Ecdsa {
            return Err(ModuleError::Device("CKR_MECHANISM_INVALID".to_string()));
        }

        let signing_key = state
            .object(key)?
            .ec_key
            .clone()
            .ok_or_else(|| ModuleError::Device("CKR_KEY_TYPE_INCONSISTENT".to_string()))?;

        let signature: Signature = signing_key
            .sign_prehash(data)
            .map_err(|e| ModuleError::Device(e.to_string()))?;
        let mut raw = signature.to_bytes().to_vec();

        // k256 always produces low-S; flip it to emulate tokens that do not
        if state.high_s {
            let s = BigUint::from_bytes_be(&raw[32..]);
            let flipped = left_pad(&(curve_order() - s).to_bytes_be());
            raw[32..].copy_from_slice(&flipped);
        }
        Ok(raw)
    }

    fn encrypt(
        &mut self,
        mechanism: MechanismKind,
        key: ObjectId,
        data: &[u8],
    ) -> Result<Vec<u8>, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("encrypt");
        state.require_session()?;

        let iv = match mechanism {
            MechanismKind::AesCbc { iv } => iv,
            _ => return Err(ModuleError::Device("CKR_MECHANISM_INVALID".to_string())),
        };
        let secret = state
            .object(key)?
            .secret
            .clone()
            .ok_or_else(|| ModuleError::Device("CKR_KEY_TYPE_INCONSISTENT".to_string()))?;

        aes_cbc_encrypt(&secret, iv, data)
    }

    fn mechanisms(&mut self, slot: SlotId) -> Result<Vec<MechanismDescription>, ModuleError> {
        let mut state = self.state.borrow_mut();
        state.calls.push("mechanisms");
        if state.session_slot != Some(slot.0) {
            return Err(ModuleError::Device("CKR_SLOT_ID_INVALID".to_string()));
        }

        Ok(vec![
            MechanismDescription {
                name: "CKM_RSA_PKCS_KEY_PAIR_GEN".to_string(),
                min_key_size: 1024,
                max_key_size: 4096,
                flags: MechanismFlags::GENERATE_KEY_PAIR | MechanismFlags::HW,
            },
            MechanismDescription {
                name: "CKM_ECDSA".to_string(),
                min_key_size: 256,
                max_key_size: 521,
                flags: MechanismFlags::VERIFY | MechanismFlags::SIGN | MechanismFlags::HW,
            },
            MechanismDescription {
                name: "CKM_AES_CBC".to_string(),
                min_key_size: 16,
                max_key_size: 32,
                flags: MechanismFlags::WRAP
                    | MechanismFlags::DECRYPT
                    | MechanismFlags::ENCRYPT
                    | MechanismFlags::UNWRAP,
            },
            MechanismDescription {
                name: "CKM_EC_KEY_PAIR_GEN".to_string(),
                min_key_size: 256,
                max_key_size: 521,
                flags: MechanismFlags::GENERATE_KEY_PAIR,
            },
        ])
    }
}

/// Attributes of a private secp256k1 key with the given label and id, without key material
pub fn ec_private_attributes(label: &str, id: &str) -> Vec<Attribute> {
    vec![
        Attribute::Class(ObjectClass::PrivateKey),
        Attribute::KeyType(KeyType::Ec),
        Attribute::Label(label.to_string()),
        Attribute::Id(id.as_bytes().to_vec()),
    ]
}
