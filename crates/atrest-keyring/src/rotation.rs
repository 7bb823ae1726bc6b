//! Key rotation: mint a new (DEK, KEK) pair per environment and splice it
//! into the configuration.
//!
//! Rotation never touches existing entries and never re-encrypts data; old
//! versions stay resident as decrypt-only secondaries and callers re-encrypt
//! lazily during ordinary writes.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use atrest_crypto::{
    generate_iv, generate_key, KeyEncryptingKey, DEFAULT_KEY_BITS,
};

use crate::config::{AppConfig, CipherEntry, KeystoreConfig};
use crate::error::KeyringError;
use crate::keystore::{self, FileKeystore, MemoryKeystore};

/// Result of rotating one environment.
#[derive(Debug)]
pub enum RotationOutcome {
    Rotated {
        environment: String,
        version: u8,
        /// For environment-variable keystores: the `NAME=value` line the
        /// operator must export before the new cipher can load.
        env_export: Option<String>,
    },
    Skipped {
        environment: String,
        reason: String,
    },
}

/// Rotate the selected environments (all of them when `environments` is
/// empty).
///
/// For each environment whose top cipher references a KEK: generate a new
/// KEK, generate and persist a new wrapped DEK and IV through the same
/// keystore variant as the top entry, and insert the new cipher entry at the
/// head, or at position 1 (staged secondary) when `rolling_deploy` is
/// requested.
pub fn rotate(
    config: &mut AppConfig,
    environments: &[&str],
    app_name: &str,
    rolling_deploy: bool,
) -> Result<Vec<RotationOutcome>, KeyringError> {
    let selected: Vec<String> = if environments.is_empty() {
        config.environments.keys().cloned().collect()
    } else {
        for name in environments {
            if !config.environments.contains_key(*name) {
                return Err(KeyringError::Config(format!(
                    "environment {name} is not configured"
                )));
            }
        }
        environments.iter().map(|s| s.to_string()).collect()
    };

    let mut outcomes = Vec::with_capacity(selected.len());
    for env_name in selected {
        let env_cfg = config
            .environments
            .get_mut(&env_name)
            .expect("selection validated above");

        let Some(top) = env_cfg.ciphers.first().cloned() else {
            outcomes.push(RotationOutcome::Skipped {
                environment: env_name,
                reason: "environment declares no ciphers".into(),
            });
            continue;
        };
        if !top.has_kek() {
            outcomes.push(RotationOutcome::Skipped {
                environment: env_name,
                reason: "top cipher has no key-encrypting key reference".into(),
            });
            continue;
        }

        let max = env_cfg.max_version();
        if max == u8::MAX {
            return Err(KeyringError::Config(format!(
                "environment {env_name} has exhausted the cipher version space"
            )));
        }
        let version = max + 1;

        let kek = KeyEncryptingKey::generate_with(DEFAULT_KEY_BITS, top.wrap_scheme)?;
        let (keystore_cfg, env_export) =
            new_keystore_entry(&top.keystore, &kek, &top, app_name, &env_name, version)?;

        let pem = kek.to_pem()?;
        let entry = CipherEntry {
            version,
            cipher_name: top.cipher_name,
            encoding: top.encoding,
            always_add_header: top.always_add_header,
            keystore: keystore_cfg,
            key_encrypting_key: Some(pem.as_str().to_owned()),
            key_encrypting_key_filename: None,
            wrap_scheme: top.wrap_scheme,
        };

        let at = if rolling_deploy { 1 } else { 0 };
        env_cfg.ciphers.insert(at, entry);
        tracing::info!(
            environment = %env_name,
            version,
            staged = rolling_deploy,
            "rotated data encryption key"
        );
        outcomes.push(RotationOutcome::Rotated {
            environment: env_name,
            version,
            env_export,
        });
    }
    Ok(outcomes)
}

fn new_keystore_entry(
    template: &KeystoreConfig,
    kek: &KeyEncryptingKey,
    top: &CipherEntry,
    app_name: &str,
    env_name: &str,
    version: u8,
) -> Result<(KeystoreConfig, Option<String>), KeyringError> {
    match template {
        KeystoreConfig::File { key_filename, .. } => {
            let dir = match key_filename.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let key_path = dir.join(format!("{app_name}_{env_name}_v{version}.key"));
            let iv_path = dir.join(format!("{app_name}_{env_name}_v{version}.iv"));
            let mut store = FileKeystore::new(key_path.clone(), Some(iv_path.clone()));
            keystore::generate_dek(&mut store, kek, top.cipher_name)?;
            keystore::generate_iv_entry(&mut store, kek, top.cipher_name)?;
            Ok((
                KeystoreConfig::File {
                    key_filename: key_path,
                    iv_filename: Some(iv_path),
                },
                None,
            ))
        }
        KeystoreConfig::Env { .. } => {
            let var = env_var_name(app_name, env_name, version);
            let dek = Zeroizing::new(generate_key(top.cipher_name)?);
            let wrapped_key = STANDARD.encode(kek.wrap(&dek)?);
            let iv = generate_iv(top.cipher_name)?;
            let wrapped_iv = STANDARD.encode(kek.wrap(&iv)?);
            let export = format!("{var}={wrapped_key}");
            Ok((
                KeystoreConfig::Env {
                    key_env_var: var,
                    encrypted_iv: Some(wrapped_iv),
                },
                Some(export),
            ))
        }
        KeystoreConfig::Memory { .. } => {
            let mut store = MemoryKeystore::empty();
            keystore::generate_dek(&mut store, kek, top.cipher_name)?;
            keystore::generate_iv_entry(&mut store, kek, top.cipher_name)?;
            Ok((
                KeystoreConfig::Memory {
                    encrypted_key: store
                        .encrypted_key()
                        .expect("just written")
                        .to_owned(),
                    encrypted_iv: store.encrypted_iv().map(str::to_owned),
                },
                None,
            ))
        }
    }
}

fn env_var_name(app_name: &str, env_name: &str, version: u8) -> String {
    format!("{app_name}_{env_name}_v{version}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_is_sanitized() {
        assert_eq!(env_var_name("my-app", "prod", 3), "MY_APP_PROD_V3");
    }

    #[test]
    fn rotate_unknown_environment_fails() {
        let mut config = AppConfig::default();
        assert!(matches!(
            rotate(&mut config, &["production"], "app", false),
            Err(KeyringError::Config(_))
        ));
    }
}
