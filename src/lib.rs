//! PKCS#11 token key management and Ethereum recoverable ECDSA signatures.

pub mod commands;
pub mod ethereum;
pub mod token;
pub mod utils;
