//! Configuration utilities for edge-identity.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::pkcs11_devices::Pkcs11AuthMethod;

/// Environment variable naming the token label
pub const TOKEN_ENV_VAR: &str = "EDGE_IDENTITY_TOKEN";

/// Environment variable naming the PKCS#11 module
pub const MODULE_ENV_VAR: &str = "PKCS11_MODULE_PATH";

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file '{0}' not found")]
    FileNotFound(String),
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
    #[error("No token label given. Use --token, set EDGE_IDENTITY_TOKEN, or set [token] label in the config file")]
    MissingTokenLabel,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// `[token]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TokenConfig {
    /// Path to the PKCS#11 module
    pub module: Option<PathBuf>,
    /// Label of the token to open
    pub label: Option<String>,
    /// PIN source: none, prompt or env
    pub auth: Option<String>,
    /// Variable read when `auth = "env"`
    pub pin_env: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub token: Option<TokenConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `explicit` if given, else the per-user file if it exists, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    fn token(&self) -> TokenConfig {
        self.token.clone().unwrap_or_default()
    }
}

/// `<platform config dir>/edge-identity/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "edge-identity").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Token connection settings after applying precedence
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSettings {
    /// Explicit module path; `None` leaves the choice to discovery
    pub module: Option<PathBuf>,
    pub label: String,
    pub auth: Pkcs11AuthMethod,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub module: Option<PathBuf>,
    pub token: Option<String>,
    pub auth: Option<String>,
}

impl TokenSettings {
    /// Merge settings: command line, then environment, then config file.
    ///
    /// The module path falls through to discovery when none of them set it.
    pub fn resolve(cli: &CliOverrides, config: &Config) -> Result<Self> {
        let file = config.token();

        let module = cli
            .module
            .clone()
            .or_else(|| env::var(MODULE_ENV_VAR).ok().map(PathBuf::from))
            .or(file.module);

        let label = cli
            .token
            .clone()
            .or_else(|| env::var(TOKEN_ENV_VAR).ok())
            .or(file.label)
            .filter(|l| !l.is_empty())
            .ok_or(ConfigError::MissingTokenLabel)?;

        let auth_name = cli
            .auth
            .clone()
            .or(file.auth)
            .unwrap_or_else(|| "prompt".to_string());
        let mut auth = Pkcs11AuthMethod::from_str(&auth_name)?;

        if let (Pkcs11AuthMethod::EnvVar(_), Some(var)) = (&auth, file.pin_env) {
            auth = Pkcs11AuthMethod::EnvVar(var);
        }

        Ok(Self {
            module,
            label,
            auth,
        })
    }

    /// Variable the PIN is read from, if the auth method uses one
    pub fn pin_env(&self) -> Option<&str> {
        match &self.auth {
            Pkcs11AuthMethod::EnvVar(var) => Some(var),
            _ => None,
        }
    }
}
