//! Verify command.

use anyhow::{Context, Result};

use super::{open_token, HashInput};
use crate::ethereum;
use crate::utils::config::TokenSettings;
use crate::utils::output::print_success;

/// Command to check a 65-byte signature against an on-token public key
pub struct VerifyCommand {
    pub settings: TokenSettings,
    pub label: String,
    pub keyid: String,
    pub input: HashInput,
    pub signature: String,
}

impl VerifyCommand {
    pub fn new(
        settings: TokenSettings,
        label: String,
        keyid: Option<String>,
        input: HashInput,
        signature: String,
    ) -> Self {
        Self {
            settings,
            label,
            keyid: keyid.unwrap_or_default(),
            input,
            signature,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let hash = self.input.digest()?;
        let signature = ethereum::decode_hex(&self.signature)
            .with_context(|| format!("Invalid hex signature '{}'", self.signature))?;

        let mut token = open_token(&self.settings)?;
        token
            .verify(&self.label, &self.keyid, &hash, &signature)
            .with_context(|| format!("Signature does not verify against key '{}'", self.label))?;
        token.finalise()?;

        print_success("Signature verified");
        Ok(())
    }
}
