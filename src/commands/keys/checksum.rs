//! Key checksum command.

use anyhow::{Context, Result};

use crate::commands::open_token;
use crate::ethereum;
use crate::utils::config::TokenSettings;
use crate::utils::output::print_plain;

/// Command to print the AES-CBC checksum of a secret key
pub struct ChecksumCommand {
    pub settings: TokenSettings,
    pub label: String,
}

impl ChecksumCommand {
    pub fn new(settings: TokenSettings, label: String) -> Self {
        Self { settings, label }
    }

    pub fn execute(&self) -> Result<()> {
        let mut token = open_token(&self.settings)?;
        let checksum = token
            .checksum(&self.label)
            .with_context(|| format!("Failed to compute checksum of key '{}'", self.label))?;
        token.finalise()?;

        print_plain(&format!("Checksum {}", ethereum::encode_hex(&checksum)));
        Ok(())
    }
}
