//! Environment-variable keystore: wrapped DEK as base64 in a named variable.
//!
//! Reads are pure lookups. The process environment is not writable
//! persistence, so writes fail; rotation tooling reports the value for the
//! operator to export instead.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::KeyringError;
use crate::keystore::Keystore;

pub struct EnvKeystore {
    var: String,
    encrypted_iv: Option<String>,
}

impl EnvKeystore {
    pub fn new(var: String, encrypted_iv: Option<String>) -> Self {
        Self { var, encrypted_iv }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Keystore for EnvKeystore {
    fn read(&self) -> Result<Vec<u8>, KeyringError> {
        let value = std::env::var(&self.var).map_err(|_| {
            KeyringError::Keystore(format!("environment variable {} is not set", self.var))
        })?;
        STANDARD.decode(value.trim()).map_err(|e| {
            KeyringError::Keystore(format!("environment variable {} is not base64: {e}", self.var))
        })
    }

    fn write(&mut self, _wrapped: &[u8]) -> Result<(), KeyringError> {
        Err(KeyringError::Keystore(format!(
            "the process environment cannot be persisted; export {}=<base64 wrapped key> instead",
            self.var
        )))
    }

    fn read_iv(&self) -> Result<Option<Vec<u8>>, KeyringError> {
        match &self.encrypted_iv {
            Some(value) => STANDARD
                .decode(value.trim())
                .map(Some)
                .map_err(|e| KeyringError::Keystore(format!("encrypted_iv is not base64: {e}"))),
            None => Ok(None),
        }
    }

    fn write_iv(&mut self, wrapped: &[u8]) -> Result<(), KeyringError> {
        self.encrypted_iv = Some(STANDARD.encode(wrapped));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_decodes_base64() {
        std::env::set_var("ATREST_TEST_DEK_READ", STANDARD.encode(b"wrapped"));
        let store = EnvKeystore::new("ATREST_TEST_DEK_READ".into(), None);
        assert_eq!(store.read().unwrap(), b"wrapped");
        std::env::remove_var("ATREST_TEST_DEK_READ");
    }

    #[test]
    fn missing_variable_errors() {
        let store = EnvKeystore::new("ATREST_TEST_DEK_MISSING".into(), None);
        assert!(matches!(store.read(), Err(KeyringError::Keystore(_))));
    }

    #[test]
    fn malformed_base64_errors() {
        std::env::set_var("ATREST_TEST_DEK_BAD", "!!not base64!!");
        let store = EnvKeystore::new("ATREST_TEST_DEK_BAD".into(), None);
        assert!(store.read().is_err());
        std::env::remove_var("ATREST_TEST_DEK_BAD");
    }

    #[test]
    fn write_is_refused() {
        let mut store = EnvKeystore::new("ATREST_TEST_DEK_WRITE".into(), None);
        assert!(store.write(b"wrapped").is_err());
    }

    #[test]
    fn iv_round_trip() {
        let mut store = EnvKeystore::new("ATREST_TEST_DEK_IV".into(), None);
        assert!(store.read_iv().unwrap().is_none());
        store.write_iv(b"wrapped iv").unwrap();
        assert_eq!(store.read_iv().unwrap().unwrap(), b"wrapped iv");
    }
}
