//! High level interface to a PKCS#11 token holding Ethereum signing keys.
//!
//! A [`Token`] owns one logged-in session against one slot. Keys are looked up
//! by label and/or id on every operation; object handles are never cached.

pub mod error;
pub mod maintenance;
pub mod module;
pub mod provision;
pub mod resolver;
pub mod signing;
pub mod template;
pub mod verify;

pub use error::{Result, TokenError};
pub use maintenance::{DeletionOutcome, DeletionReport, MechanismSummary, ObjectSummary};
pub use module::{
    MechanismDescription, MechanismFlags, MechanismKind, ModuleError, ObjectId, ObjectSearch,
    SlotId, TokenModule,
};
pub use provision::KeySpec;
pub use signing::RecoverableSignature;
pub use template::{Attribute, AttributeKind, KeyType, ObjectClass, Template};
pub use verify::PublicKeyInfo;

/// A logged-in session against a single token.
///
/// The underlying module is finalized exactly once: by [`Token::finalise`], or
/// when the value is dropped without it.
pub struct Token<M: TokenModule> {
    module: M,
    slot: SlotId,
    finalised: bool,
}

impl<M: TokenModule> Token<M> {
    /// Initialize the module, find the slot holding `token_label` and log in with `pin`.
    ///
    /// An empty PIN skips the login, for tokens that do not require one.
    pub fn open(mut module: M, token_label: &str, pin: &str) -> Result<Self> {
        module
            .initialize()
            .map_err(|e| TokenError::module("initialize", token_label, e))?;

        // From here on the module is finalized on every exit path
        let mut token = Token {
            module,
            slot: SlotId(0),
            finalised: false,
        };

        token.slot = token.find_slot_with_token(token_label)?;
        token
            .module
            .open_session(token.slot)
            .map_err(|e| TokenError::module("open session", token_label, e))?;

        if !pin.is_empty() {
            token
                .module
                .login(pin)
                .map_err(|e| TokenError::module("login", token_label, e))?;
        }

        tracing::debug!(token = token_label, slot = %token.slot, "Opened token session");
        Ok(token)
    }

    /// First slot whose token label matches, ignoring the padding PKCS#11 adds
    fn find_slot_with_token(&mut self, label: &str) -> Result<SlotId> {
        let slots = self
            .module
            .slots()
            .map_err(|e| TokenError::module("list slots", label, e))?;

        let mut available = Vec::new();
        for slot in slots {
            let token_label = self
                .module
                .token_label(slot)
                .map_err(|e| TokenError::module("get token info", format!("slot {}", slot), e))?;

            if token_label.trim() == label.trim() {
                return Ok(slot);
            }
            available.push(format!("'{}'", token_label.trim()));
        }

        Err(TokenError::TokenNotFound {
            label: label.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            },
        })
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Close the session and unload the module
    pub fn finalise(mut self) -> Result<()> {
        self.finalised = true;
        self.module
            .finalize()
            .map_err(|e| TokenError::module("finalize", format!("slot {}", self.slot), e))
    }

    pub(crate) fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }
}

impl<M: TokenModule> Drop for Token<M> {
    fn drop(&mut self) {
        if !self.finalised {
            self.finalised = true;
            if let Err(e) = self.module.finalize() {
                tracing::warn!(error = %e, "Failed to finalize PKCS#11 module");
            }
        }
    }
}
