//! Sign command.

use anyhow::{Context, Result};
use serde::Serialize;

use super::{open_token, HashInput};
use crate::utils::config::TokenSettings;
use crate::utils::output::{print_json, print_plain};

/// Command to sign a hash with an on-token secp256k1 key
pub struct SignCommand {
    pub settings: TokenSettings,
    pub label: String,
    pub keyid: String,
    pub input: HashInput,
    pub json: bool,
}

#[derive(Serialize)]
struct SignOutput<'a> {
    label: &'a str,
    hash: String,
    signature: String,
}

impl SignCommand {
    pub fn new(
        settings: TokenSettings,
        label: String,
        keyid: Option<String>,
        input: HashInput,
        json: bool,
    ) -> Self {
        Self {
            settings,
            label,
            keyid: keyid.unwrap_or_default(),
            input,
            json,
        }
    }

    pub fn execute(&self) -> Result<()> {
        let hash = self.input.digest()?;

        let mut token = open_token(&self.settings)?;
        let signature = token
            .sign(&self.label, &self.keyid, &hash)
            .with_context(|| format!("Failed to sign with key '{}'", self.label))?;
        token.finalise()?;

        if self.json {
            print_json(&SignOutput {
                label: &self.label,
                hash: crate::ethereum::encode_hex(&hash),
                signature: signature.to_hex(),
            })?;
        } else {
            print_plain(&format!("Signature {}", signature));
        }

        Ok(())
    }
}
