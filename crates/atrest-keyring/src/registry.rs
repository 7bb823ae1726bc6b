//! Process-wide mapping of cipher version to cipher.
//!
//! A registry is built once from an environment's configuration and is
//! immutable afterwards; concurrent readers need no locking. The head cipher
//! is the primary (used for all new encryptions), the tail are secondaries
//! retained to decrypt older data. Replacement is atomic: readers observe
//! either the old or the new registry, never a partial state.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use atrest_crypto::{Cipher, CryptoError, EncryptOptions, Header};

use crate::config::EnvironmentConfig;
use crate::error::KeyringError;
use crate::keystore;

pub struct Registry {
    ciphers: Vec<Cipher>,
    index: HashMap<u8, usize>,
}

impl Registry {
    /// Build a registry from an environment's cipher list: for each entry in
    /// order, read the keystore, unwrap the DEK (and IV) via the KEK, and
    /// construct a cipher. The first entry becomes the primary.
    ///
    /// Any entry that fails to load aborts the whole load; versions are never
    /// silently skipped.
    pub fn load(env: &EnvironmentConfig) -> Result<Self, KeyringError> {
        env.validate()?;
        let mut ciphers = Vec::with_capacity(env.ciphers.len());
        for entry in &env.ciphers {
            let kek = entry.load_kek()?;
            let store = keystore::from_config(&entry.keystore);
            let wrapped_dek = store.read()?;
            let dek = kek.unwrap(&wrapped_dek)?;
            let iv = match store.read_iv()? {
                Some(wrapped_iv) => Some(kek.unwrap(&wrapped_iv)?),
                None => None,
            };
            let cipher = Cipher::new(entry.cipher_name, dek, iv)?
                .with_version(entry.version)
                .with_encoding(entry.encoding)
                .with_always_add_header(entry.always_add_header)
                .with_kek(kek);
            tracing::debug!(
                version = entry.version,
                cipher = entry.cipher_name.as_str(),
                "loaded cipher"
            );
            ciphers.push(cipher);
        }
        Self::from_ciphers(ciphers)
    }

    /// Build a registry from already-constructed ciphers (first is primary).
    pub fn from_ciphers(ciphers: Vec<Cipher>) -> Result<Self, KeyringError> {
        if ciphers.is_empty() {
            return Err(KeyringError::Config("registry needs at least one cipher".into()));
        }
        let mut index = HashMap::with_capacity(ciphers.len());
        for (i, cipher) in ciphers.iter().enumerate() {
            if cipher.version() == 0 {
                return Err(KeyringError::Config("cipher version 0 is reserved".into()));
            }
            if index.insert(cipher.version(), i).is_some() {
                return Err(KeyringError::Config(format!(
                    "duplicate cipher version {}",
                    cipher.version()
                )));
            }
        }
        Ok(Self { ciphers, index })
    }

    /// The cipher used for all new encryptions.
    pub fn primary(&self) -> &Cipher {
        &self.ciphers[0]
    }

    /// Decrypt-only ciphers, most recent first.
    pub fn secondaries(&self) -> &[Cipher] {
        &self.ciphers[1..]
    }

    /// O(1) lookup by version.
    pub fn by_version(&self, version: u8) -> Result<&Cipher, KeyringError> {
        self.index
            .get(&version)
            .map(|&i| &self.ciphers[i])
            .ok_or(KeyringError::UnknownCipherVersion(version))
    }

    /// Declared versions, primary first.
    pub fn versions(&self) -> impl Iterator<Item = u8> + '_ {
        self.ciphers.iter().map(|c| c.version())
    }

    /// Encrypt under the primary cipher.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        opts: &EncryptOptions,
    ) -> Result<Vec<u8>, KeyringError> {
        Ok(self.primary().encrypt(plaintext, opts)?)
    }

    /// Encrypt a string under the primary cipher and its text encoding.
    pub fn encrypt_text(&self, plaintext: &str) -> Result<String, KeyringError> {
        Ok(self.primary().encrypt_text(plaintext)?)
    }

    /// Decrypt, resolving the cipher from the blob's header version. A blob
    /// without a header (or with an unset version) falls back to the primary.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyringError> {
        Ok(self.resolve(ciphertext)?.decrypt(ciphertext)?)
    }

    /// Lenient decrypt: cipher failures yield `None`.
    pub fn try_decrypt(&self, ciphertext: &[u8]) -> Result<Option<Vec<u8>>, KeyringError> {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(KeyringError::Crypto(CryptoError::DecryptionFailed(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reverse the primary's text encoding and decrypt via header resolution.
    pub fn decrypt_text(&self, encoded: &str) -> Result<String, KeyringError> {
        let ciphertext = self.primary().encoding().decode(encoded)?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| {
            KeyringError::Crypto(CryptoError::DecryptionFailed(
                "plaintext is not valid UTF-8".into(),
            ))
        })
    }

    fn resolve(&self, ciphertext: &[u8]) -> Result<&Cipher, KeyringError> {
        if Header::sniff(ciphertext) {
            let (header, _) = Header::parse(ciphertext)?;
            if header.version != 0 {
                return self.by_version(header.version);
            }
        }
        Ok(self.primary())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("versions", &self.versions().collect::<Vec<_>>())
            .finish()
    }
}

/// Atomically-swappable registry holder for callers that do not want the
/// process-global slot.
pub struct RegistryHandle {
    inner: RwLock<Arc<Registry>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    /// Replace the registry. Readers holding the old snapshot are unaffected.
    pub fn install(&self, registry: Registry) {
        *self.inner.write().expect("registry lock poisoned") = Arc::new(registry);
    }

    /// Snapshot the current registry.
    pub fn current(&self) -> Arc<Registry> {
        self.inner.read().expect("registry lock poisoned").clone()
    }
}

static GLOBAL: OnceLock<RwLock<Option<Arc<Registry>>>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Option<Arc<Registry>>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Install (or atomically replace) the process-wide registry. Initialization
/// is explicit; nothing is loaded lazily.
pub fn install(registry: Registry) -> Arc<Registry> {
    let registry = Arc::new(registry);
    *global_slot().write().expect("registry lock poisoned") = Some(registry.clone());
    tracing::info!(
        primary = registry.primary().version(),
        ciphers = registry.ciphers.len(),
        "registry installed"
    );
    registry
}

/// Snapshot the process-wide registry.
pub fn current() -> Result<Arc<Registry>, KeyringError> {
    global_slot()
        .read()
        .expect("registry lock poisoned")
        .clone()
        .ok_or_else(|| KeyringError::Config("no registry installed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrest_crypto::CipherName;

    fn cipher(version: u8) -> Cipher {
        Cipher::new(
            CipherName::Aes256Cbc,
            vec![version; 32],
            Some(vec![0x55; 16]),
        )
        .unwrap()
        .with_version(version)
    }

    #[test]
    fn primary_is_first() {
        let registry = Registry::from_ciphers(vec![cipher(2), cipher(1)]).unwrap();
        assert_eq!(registry.primary().version(), 2);
        assert_eq!(registry.secondaries().len(), 1);
        assert_eq!(registry.secondaries()[0].version(), 1);
    }

    #[test]
    fn by_version_lookup() {
        let registry = Registry::from_ciphers(vec![cipher(2), cipher(1)]).unwrap();
        assert_eq!(registry.by_version(1).unwrap().version(), 1);
        assert!(matches!(
            registry.by_version(99),
            Err(KeyringError::UnknownCipherVersion(99))
        ));
    }

    #[test]
    fn empty_registry_rejected() {
        assert!(Registry::from_ciphers(Vec::new()).is_err());
    }

    #[test]
    fn duplicate_versions_rejected() {
        assert!(Registry::from_ciphers(vec![cipher(1), cipher(1)]).is_err());
    }

    #[test]
    fn version_zero_rejected() {
        assert!(Registry::from_ciphers(vec![cipher(0)]).is_err());
    }

    #[test]
    fn decrypt_resolves_header_version() {
        let registry = Registry::from_ciphers(vec![cipher(2), cipher(1)]).unwrap();
        // Encrypted under the old primary, decrypted after rotation.
        let ct = registry.by_version(1).unwrap().encrypt(b"old data", &Default::default()).unwrap();
        assert_eq!(registry.decrypt(&ct).unwrap(), b"old data");
    }

    #[test]
    fn decrypt_unknown_version_fails() {
        let registry = Registry::from_ciphers(vec![cipher(1)]).unwrap();
        let other = cipher(99);
        let ct = other.encrypt(b"data", &Default::default()).unwrap();
        assert!(matches!(
            registry.decrypt(&ct),
            Err(KeyringError::UnknownCipherVersion(99))
        ));
    }

    #[test]
    fn try_decrypt_swallows_cipher_failures() {
        let registry = Registry::from_ciphers(vec![cipher(1)]).unwrap();
        // Unaligned bytes cannot be valid block-mode ciphertext.
        assert!(registry.try_decrypt(&[0u8; 33]).unwrap().is_none());
        let ct = registry.encrypt(b"ok", &Default::default()).unwrap();
        assert_eq!(registry.try_decrypt(&ct).unwrap().unwrap(), b"ok");
    }

    #[test]
    fn text_round_trip_across_versions() {
        let registry = Registry::from_ciphers(vec![cipher(2), cipher(1)]).unwrap();
        let encoded = registry.by_version(1).unwrap().encrypt_text("hello").unwrap();
        assert_eq!(registry.decrypt_text(&encoded).unwrap(), "hello");
    }

    #[test]
    fn handle_swaps_atomically() {
        let handle = RegistryHandle::new(Registry::from_ciphers(vec![cipher(1)]).unwrap());
        let before = handle.current();
        handle.install(Registry::from_ciphers(vec![cipher(2), cipher(1)]).unwrap());
        // The old snapshot still works; new snapshots see the replacement.
        assert_eq!(before.primary().version(), 1);
        assert_eq!(handle.current().primary().version(), 2);
    }

    #[test]
    fn global_install_and_current() {
        let installed = install(Registry::from_ciphers(vec![cipher(7)]).unwrap());
        assert_eq!(installed.primary().version(), 7);
        assert_eq!(current().unwrap().primary().version(), 7);
    }
}
