//! CLI commands.
//!
//! Every command opens one token session from [`TokenSettings`], performs its
//! operation and finalises the session before returning.

pub mod inspect;
pub mod keys;
pub mod sign;
pub mod verify;

use anyhow::{Context, Result};

use crate::ethereum;
use crate::token::Token;
use crate::utils::config::TokenSettings;
use crate::utils::pkcs11_devices::{get_device_auth, get_pkcs11_module_path, CryptokiModule};

/// Locate the module, read the PIN and open the configured token
pub fn open_token(settings: &TokenSettings) -> Result<Token<CryptokiModule>> {
    let module_path = get_pkcs11_module_path(settings.module.as_deref())?;
    tracing::debug!(
        module = %module_path.display(),
        token = %settings.label,
        pin_env = settings.pin_env(),
        "Opening token"
    );

    let pin = get_device_auth(&settings.auth)?;
    let module = CryptokiModule::new(module_path);

    Token::open(module, &settings.label, &pin)
        .with_context(|| format!("Failed to open token '{}'", settings.label))
}

/// What is signed or verified: a message hashed with Keccak-256, or a hex hash
#[derive(Debug, Clone, PartialEq)]
pub enum HashInput {
    Message(String),
    Hash(String),
}

impl HashInput {
    pub fn from_args(message: Option<String>, hash: Option<String>) -> Result<Self> {
        match (message, hash) {
            (Some(message), None) => Ok(HashInput::Message(message)),
            (None, Some(hash)) => Ok(HashInput::Hash(hash)),
            (Some(_), Some(_)) => anyhow::bail!("--message and --hash are mutually exclusive"),
            (None, None) => anyhow::bail!("One of --message or --hash is required"),
        }
    }

    pub fn digest(&self) -> Result<Vec<u8>> {
        match self {
            HashInput::Message(message) => Ok(ethereum::keccak256(message.as_bytes()).to_vec()),
            HashInput::Hash(hash) => ethereum::decode_hex(hash)
                .with_context(|| format!("Invalid hex hash '{}'", hash)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_input_from_args() {
        assert_eq!(
            HashInput::from_args(Some("testmessage".to_string()), None).unwrap(),
            HashInput::Message("testmessage".to_string())
        );
        assert!(HashInput::from_args(Some("a".to_string()), Some("0x00".to_string())).is_err());
        assert!(HashInput::from_args(None, None).is_err());
    }

    #[test]
    fn test_hash_input_digest() {
        let message = HashInput::Message("testmessage".to_string());
        assert_eq!(
            message.digest().unwrap(),
            ethereum::keccak256(b"testmessage").to_vec()
        );

        let hash = HashInput::Hash("0xdeadbeef".to_string());
        assert_eq!(hash.digest().unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);

        assert!(HashInput::Hash("0xnothex".to_string()).digest().is_err());
    }
}
