//! In-memory keystore: wrapped key material carried inside the configuration
//! blob itself. Intended for tests and bootstrap configurations.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::KeyringError;
use crate::keystore::Keystore;

#[derive(Default)]
pub struct MemoryKeystore {
    encrypted_key: Option<String>,
    encrypted_iv: Option<String>,
}

impl MemoryKeystore {
    pub fn new(encrypted_key: Option<String>, encrypted_iv: Option<String>) -> Self {
        Self {
            encrypted_key,
            encrypted_iv,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Base64 of the wrapped DEK, for writing back into a configuration.
    pub fn encrypted_key(&self) -> Option<&str> {
        self.encrypted_key.as_deref()
    }

    /// Base64 of the wrapped IV, for writing back into a configuration.
    pub fn encrypted_iv(&self) -> Option<&str> {
        self.encrypted_iv.as_deref()
    }
}

impl Keystore for MemoryKeystore {
    fn read(&self) -> Result<Vec<u8>, KeyringError> {
        let value = self
            .encrypted_key
            .as_ref()
            .ok_or_else(|| KeyringError::Keystore("memory keystore holds no key material".into()))?;
        STANDARD
            .decode(value.trim())
            .map_err(|e| KeyringError::Keystore(format!("encrypted_key is not base64: {e}")))
    }

    fn write(&mut self, wrapped: &[u8]) -> Result<(), KeyringError> {
        self.encrypted_key = Some(STANDARD.encode(wrapped));
        Ok(())
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
