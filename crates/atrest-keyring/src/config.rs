//! Configuration model.
//!
//! Mirrors the on-disk schema consumed by deployment tooling: a map of
//! environments, each holding an ordered cipher list whose first entry is the
//! primary. Parsing the configuration file itself (YAML or otherwise) is the
//! caller's concern; these are the target structures.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use atrest_crypto::{CipherName, Encoding, KeyEncryptingKey, WrapScheme};

use crate::error::KeyringError;

/// Top-level configuration: environment name → cipher list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl AppConfig {
    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig, KeyringError> {
        self.environments
            .get(name)
            .ok_or_else(|| KeyringError::Config(format!("environment {name} is not configured")))
    }
}

/// One environment's ordered cipher list. The head is the primary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub ciphers: Vec<CipherEntry>,
}

impl EnvironmentConfig {
    /// Reject empty lists, version 0, and duplicate versions.
    pub fn validate(&self) -> Result<(), KeyringError> {
        if self.ciphers.is_empty() {
            return Err(KeyringError::Config(
                "environment declares no ciphers".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.ciphers {
            if entry.version == 0 {
                return Err(KeyringError::Config(
                    "cipher version 0 is reserved".into(),
                ));
            }
            if !seen.insert(entry.version) {
                return Err(KeyringError::Config(format!(
                    "duplicate cipher version {}",
                    entry.version
                )));
            }
        }
        Ok(())
    }

    /// Highest declared cipher version.
    pub fn max_version(&self) -> u8 {
        self.ciphers.iter().map(|c| c.version).max().unwrap_or(0)
    }
}

/// One configured cipher: version, algorithm, encoding, keystore selector,
/// and the KEK that wraps its DEK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherEntry {
    pub version: u8,
    #[serde(default = "default_cipher_name")]
    pub cipher_name: CipherName,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_true")]
    pub always_add_header: bool,
    #[serde(flatten)]
    pub keystore: KeystoreConfig,
    /// PEM-encoded KEK, inline. Present while rotation tooling runs; deployed
    /// configurations usually reference a file instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_encrypting_key: Option<String>,
    /// Path to a PEM-encoded KEK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_encrypting_key_filename: Option<PathBuf>,
    #[serde(default)]
    pub wrap_scheme: WrapScheme,
}

impl CipherEntry {
    /// Whether this entry references a KEK at all.
    pub fn has_kek(&self) -> bool {
        self.key_encrypting_key.is_some() || self.key_encrypting_key_filename.is_some()
    }

    /// Load the KEK from the inline PEM or the referenced file.
    pub fn load_kek(&self) -> Result<KeyEncryptingKey, KeyringError> {
        let pem = match (&self.key_encrypting_key, &self.key_encrypting_key_filename) {
            (Some(pem), _) => pem.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                KeyringError::Config(format!(
                    "cannot read key_encrypting_key_filename {}: {e}",
                    path.display()
                ))
            })?,
            (None, None) => {
                return Err(KeyringError::Config(format!(
                    "cipher v{} has no key_encrypting_key",
                    self.version
                )))
            }
        };
        Ok(KeyEncryptingKey::from_pem(&pem, self.wrap_scheme)?)
    }
}

/// Where the wrapped DEK (and optional wrapped IV) lives. Exactly one
/// selector is present per cipher entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeystoreConfig {
    /// Wrapped DEK in a file (owner-read-only), wrapped IV in a sibling file.
    File {
        key_filename: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iv_filename: Option<PathBuf>,
    },
    /// Wrapped DEK as base64 in a named environment variable.
    Env {
        key_env_var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_iv: Option<String>,
    },
    /// Wrapped DEK carried inline in the configuration (test and bootstrap).
    Memory {
        encrypted_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_iv: Option<String>,
    },
}

fn default_cipher_name() -> CipherName {
    CipherName::Aes256Cbc
}

fn default_true() -> bool {
    true
}
