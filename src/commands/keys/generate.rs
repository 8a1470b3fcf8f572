//! Generate key pair command.

use anyhow::{Context, Result};

use crate::commands::open_token;
use crate::token::KeySpec;
use crate::utils::config::TokenSettings;
use crate::utils::output::print_success;

/// Command to generate a secp256k1 or RSA key pair, or an AES key, on the token
pub struct GenerateKeyPairCommand {
    pub settings: TokenSettings,
    pub spec: KeySpec,
}

impl GenerateKeyPairCommand {
    pub fn new(
        settings: TokenSettings,
        label: String,
        keyid: Option<String>,
        key_type: String,
        key_size: u32,
        algorithm: String,
    ) -> Self {
        let mut spec = KeySpec::new(&label, &key_type, key_size, &algorithm);
        if let Some(keyid) = keyid {
            spec = spec.with_id(&keyid);
        }
        Self { settings, spec }
    }

    pub fn execute(&self) -> Result<()> {
        // Reject bad parameters before asking for a PIN
        self.spec.validate()?;

        let mut token = open_token(&self.settings)?;
        token
            .generate_key_pair(&self.spec)
            .with_context(|| format!("Failed to generate key '{}'", self.spec.label))?;
        token.finalise()?;

        print_success(&format!(
            "Generated {} key '{}' (id '{}')",
            self.spec.key_type.to_uppercase(),
            self.spec.label,
            self.spec.effective_id()
        ));
        Ok(())
    }
}
