//! Ethereum address command.

use anyhow::{Context, Result};

use crate::commands::open_token;
use crate::utils::config::TokenSettings;
use crate::utils::output::{print_json, print_plain};

/// Command to print the Ethereum address of an on-token EC key
pub struct AddressCommand {
    pub settings: TokenSettings,
    pub label: String,
    pub keyid: String,
    pub json: bool,
}

impl AddressCommand {
    pub fn new(settings: TokenSettings, label: String, keyid: Option<String>, json: bool) -> Self {
        Self {
            settings,
            label,
            keyid: keyid.unwrap_or_default(),
            json,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let mut token = open_token(&self.settings)?;
        let public_key = token
            .public_key(&self.label, &self.keyid)
            .with_context(|| format!("Failed to read public key '{}'", self.label))?;
        token.finalise()?;

        if self.json {
            print_json(&public_key)?;
        } else {
            print_plain(&format!("Address: {}", public_key.address));
        }
        Ok(())
    }
}
