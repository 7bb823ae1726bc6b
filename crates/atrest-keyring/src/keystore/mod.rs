//! Pluggable persistence for KEK-wrapped key material.
//!
//! A keystore holds the wrapped DEK (and optionally a wrapped IV) for one
//! cipher version. All variants store only wrapped bytes; the clear DEK
//! exists in memory just long enough to build a cipher or to be wrapped.

mod env;
mod file;
mod memory;

pub use env::EnvKeystore;
pub use file::FileKeystore;
pub use memory::MemoryKeystore;

use zeroize::Zeroizing;

use atrest_crypto::{generate_iv, generate_key, CipherName, KeyEncryptingKey};

use crate::config::KeystoreConfig;
use crate::error::KeyringError;

pub trait Keystore {
    /// Read the wrapped DEK bytes.
    fn read(&self) -> Result<Vec<u8>, KeyringError>;

    /// Atomically replace the wrapped DEK bytes.
    fn write(&mut self, wrapped: &[u8]) -> Result<(), KeyringError>;

    /// Read the wrapped IV bytes, if this keystore carries one.
    fn read_iv(&self) -> Result<Option<Vec<u8>>, KeyringError>;

    /// Atomically replace the wrapped IV bytes.
    fn write_iv(&mut self, wrapped: &[u8]) -> Result<(), KeyringError>;
}

/// Build the keystore named by a configuration selector.
pub fn from_config(config: &KeystoreConfig) -> Box<dyn Keystore> {
    match config {
        KeystoreConfig::File {
            key_filename,
            iv_filename,
        } => Box::new(FileKeystore::new(key_filename.clone(), iv_filename.clone())),
        KeystoreConfig::Env {
            key_env_var,
            encrypted_iv,
        } => Box::new(EnvKeystore::new(key_env_var.clone(), encrypted_iv.clone())),
        KeystoreConfig::Memory {
            encrypted_key,
            encrypted_iv,
        } => Box::new(MemoryKeystore::new(
            Some(encrypted_key.clone()),
            encrypted_iv.clone(),
        )),
    }
}

/// Generate a fresh DEK, wrap it with `kek`, persist the wrapped form, and
/// return the clear DEK so the caller can build a cipher from it.
pub fn generate_dek(
    store: &mut dyn Keystore,
    kek: &KeyEncryptingKey,
    name: CipherName,
) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
    let dek = Zeroizing::new(generate_key(name)?);
    let wrapped = kek.wrap(&dek)?;
    store.write(&wrapped)?;
    Ok(dek)
}

/// Generate a fresh IV, wrap it with `kek`, persist the wrapped form, and
/// return the clear IV.
pub fn generate_iv_entry(
    store: &mut dyn Keystore,
    kek: &KeyEncryptingKey,
    name: CipherName,
) -> Result<Vec<u8>, KeyringError> {
    let iv = generate_iv(name)?;
    let wrapped = kek.wrap(&iv)?;
    store.write_iv(&wrapped)?;
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn test_kek() -> &'static KeyEncryptingKey {
        static KEK: OnceLock<KeyEncryptingKey> = OnceLock::new();
        KEK.get_or_init(|| KeyEncryptingKey::generate().unwrap())
    }

    #[test]
    fn generate_dek_persists_wrapped_form() {
        let mut store = MemoryKeystore::empty();
        let dek = generate_dek(&mut store, test_kek(), CipherName::Aes256Cbc).unwrap();
        assert_eq!(dek.len(), 32);

        let wrapped = store.read().unwrap();
        assert_ne!(&wrapped, &*dek);
        assert_eq!(test_kek().unwrap(&wrapped).unwrap(), *dek);
    }

    #[test]
    fn generate_iv_persists_wrapped_form() {
        let mut store = MemoryKeystore::empty();
        let iv = generate_iv_entry(&mut store, test_kek(), CipherName::Aes256Cbc).unwrap();
        assert_eq!(iv.len(), 16);

        let wrapped = store.read_iv().unwrap().unwrap();
        assert_eq!(test_kek().unwrap(&wrapped).unwrap(), iv);
    }

    #[test]
    fn from_config_builds_each_variant() {
        let memory = KeystoreConfig::Memory {
            encrypted_key: "QUJD".into(),
            encrypted_iv: None,
        };
        assert_eq!(from_config(&memory).read().unwrap(), b"ABC");

        let env = KeystoreConfig::Env {
            key_env_var: "ATREST_NO_SUCH_VAR".into(),
            encrypted_iv: None,
        };
        assert!(from_config(&env).read().is_err());
    }
}
