//! Import key command.

use anyhow::{Context, Result};

use crate::commands::open_token;
use crate::ethereum;
use crate::utils::config::TokenSettings;
use crate::utils::output::print_success;

/// Command to import raw AES key material under a label
pub struct ImportKeyCommand {
    pub settings: TokenSettings,
    pub label: String,
    pub value: String,
}

impl ImportKeyCommand {
    pub fn new(settings: TokenSettings, label: String, value: String) -> Self {
        Self {
            settings,
            label,
            value,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let key_bytes = ethereum::decode_hex(&self.value).context("Invalid hex key value")?;

        let mut token = open_token(&self.settings)?;
        token
            .import_aes_key(&self.label, &key_bytes)
            .with_context(|| format!("Failed to import key '{}'", self.label))?;
        token.finalise()?;

        print_success(&format!(
            "Imported {}-bit AES key '{}'",
            key_bytes.len() * 8,
            self.label
        ));
        Ok(())
    }
}
