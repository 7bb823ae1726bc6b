#![allow(dead_code)]

//! Shared fixtures: a process-wide test KEK (RSA keygen is slow) and
//! configuration builders for each keystore variant.

use std::path::Path;
use std::sync::OnceLock;

use atrest_crypto::{CipherName, Encoding, KeyEncryptingKey, WrapScheme};
use atrest_keyring::keystore::{self, FileKeystore, MemoryKeystore};
use atrest_keyring::{CipherEntry, EnvironmentConfig, KeystoreConfig};

pub fn kek() -> &'static KeyEncryptingKey {
    static KEK: OnceLock<KeyEncryptingKey> = OnceLock::new();
    KEK.get_or_init(|| KeyEncryptingKey::generate().unwrap())
}

pub fn kek_pem() -> String {
    kek().to_pem().unwrap().as_str().to_owned()
}

/// A cipher entry whose wrapped DEK and IV live in key files under `dir`.
pub fn file_entry(dir: &Path, version: u8, name: CipherName) -> CipherEntry {
    let key_path = dir.join(format!("testapp_test_v{version}.key"));
    let iv_path = dir.join(format!("testapp_test_v{version}.iv"));
    let mut store = FileKeystore::new(key_path.clone(), Some(iv_path.clone()));
    keystore::generate_dek(&mut store, kek(), name).unwrap();
    keystore::generate_iv_entry(&mut store, kek(), name).unwrap();
    CipherEntry {
        version,
        cipher_name: name,
        encoding: Encoding::Base64,
        always_add_header: true,
        keystore: KeystoreConfig::File {
            key_filename: key_path,
            iv_filename: Some(iv_path),
        },
        key_encrypting_key: Some(kek_pem()),
        key_encrypting_key_filename: None,
        wrap_scheme: WrapScheme::Oaep,
    }
}

/// A cipher entry carrying its wrapped DEK and IV inline.
pub fn memory_entry(version: u8, name: CipherName) -> CipherEntry {
    let mut store = MemoryKeystore::empty();
    keystore::generate_dek(&mut store, kek(), name).unwrap();
    keystore::generate_iv_entry(&mut store, kek(), name).unwrap();
    CipherEntry {
        version,
        cipher_name: name,
        encoding: Encoding::Base64,
        always_add_header: true,
        keystore: KeystoreConfig::Memory {
            encrypted_key: store.encrypted_key().unwrap().to_owned(),
            encrypted_iv: store.encrypted_iv().map(str::to_owned),
        },
        key_encrypting_key: Some(kek_pem()),
        key_encrypting_key_filename: None,
        wrap_scheme: WrapScheme::Oaep,
    }
}

/// Environment with in-memory keystores for the given versions (first entry
/// is the primary).
pub fn memory_environment(versions: &[u8]) -> EnvironmentConfig {
    EnvironmentConfig {
        ciphers: versions
            .iter()
            .map(|&v| memory_entry(v, CipherName::Aes256Cbc))
            .collect(),
    }
}

/// Environment with file keystores under `dir`.
pub fn file_environment(dir: &Path, versions: &[u8]) -> EnvironmentConfig {
    EnvironmentConfig {
        ciphers: versions
            .iter()
            .map(|&v| file_entry(dir, v, CipherName::Aes256Cbc))
            .collect(),
    }
}
