//! Error taxonomy for token operations.

use super::module::ModuleError;
use super::template::AttributeKind;

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("No matching keys found ({0})")]
    KeyNotFound(String),
    #[error("{count} matching keys found ({template}), please specify both label and key id")]
    AmbiguousKey { template: String, count: usize },
    #[error("Key with label '{0}' already exists")]
    KeyAlreadyExists(String),
    #[error("Invalid key type: {0}")]
    UnsupportedKeyType(String),
    #[error("Invalid {key_type} key size: {size}")]
    InvalidKeySize { key_type: String, size: u32 },
    #[error("Could not derive a recovery id for the signature")]
    SignatureRecoveryFailed,
    #[error("Signature not verified: {0}")]
    VerificationFailed(String),
    #[error("Failed to read {attribute}: {reason}")]
    AttributeReadFailed {
        attribute: AttributeKind,
        reason: String,
    },
    #[error("Token operation '{operation}' failed ({context}): {source}")]
    TokenModule {
        operation: &'static str,
        context: String,
        #[source]
        source: ModuleError,
    },
    #[error("Cannot find token '{label}'. Available tokens: {available}")]
    TokenNotFound { label: String, available: String },
    #[error("Hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),
    #[error("Token returned a malformed {0}-byte signature")]
    MalformedSignature(usize),
}

impl TokenError {
    /// Wrap a module failure with the operation name and the label/id involved
    pub fn module(
        operation: &'static str,
        context: impl Into<String>,
        source: ModuleError,
    ) -> Self {
        TokenError::TokenModule {
            operation,
            context: context.into(),
            source,
        }
    }
}
