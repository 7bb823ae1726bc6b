//! Single-DEK cipher: one-shot encrypt/decrypt of byte buffers and strings.
//!
//! Every emitted blob is either raw block-mode ciphertext (the caller commits
//! to one global key/IV pair) or a self-describing blob: `[header][ciphertext]`
//! where the header can embed a per-message IV, a per-message KEK-wrapped DEK,
//! and a cipher-name override.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::Encoding;
use crate::engine;
use crate::error::CryptoError;
use crate::header::Header;
use crate::kek::KeyEncryptingKey;

/// Supported cipher algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherName {
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    #[serde(rename = "aes-192-cbc")]
    Aes192Cbc,
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherName {
    /// Canonical lowercase name, as carried in headers and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherName::Aes128Cbc => "aes-128-cbc",
            CipherName::Aes192Cbc => "aes-192-cbc",
            CipherName::Aes256Cbc => "aes-256-cbc",
            CipherName::Aes256Gcm => "aes-256-gcm",
        }
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherName::Aes128Cbc => 16,
            CipherName::Aes192Cbc => 24,
            CipherName::Aes256Cbc | CipherName::Aes256Gcm => 32,
        }
    }

    /// IV length in bytes.
    pub fn iv_len(&self) -> usize {
        match self {
            CipherName::Aes256Gcm => 12,
            _ => engine::BLOCK_SIZE,
        }
    }
}

impl std::fmt::Display for CipherName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CipherName {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-128-cbc" => Ok(CipherName::Aes128Cbc),
            "aes-192-cbc" => Ok(CipherName::Aes192Cbc),
            "aes-256-cbc" => Ok(CipherName::Aes256Cbc),
            "aes-256-gcm" => Ok(CipherName::Aes256Gcm),
            other => Err(CryptoError::UnknownCipherName(other.to_string())),
        }
    }
}

/// Generate a random DEK for the given algorithm.
pub fn generate_key(name: CipherName) -> Result<Vec<u8>, CryptoError> {
    random_bytes(name.key_len())
}

/// Generate a random IV for the given algorithm.
pub fn generate_iv(name: CipherName) -> Result<Vec<u8>, CryptoError> {
    random_bytes(name.iv_len())
}

fn random_bytes(n: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; n];
    getrandom::getrandom(&mut buf).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(buf)
}

/// Per-message options for [`Cipher::encrypt`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptOptions {
    /// Force the header on or off; `None` follows the cipher's
    /// `always_add_header`. Compression or per-message key/IV always force
    /// the header on.
    pub add_header: Option<bool>,
    /// Embed a fresh random IV in the header.
    pub random_iv: bool,
    /// Embed a fresh random DEK (KEK-wrapped) in the header. Implies
    /// `random_iv`.
    pub random_key: bool,
    /// Zlib-compress the plaintext before encryption.
    pub compress: bool,
}

/// One configured DEK plus algorithm, IV, and text-encoding choices.
///
/// Constructed when a keystore unwraps its wrapped DEK; immutable for the
/// process lifetime. Key material is zeroized on drop.
pub struct Cipher {
    version: u8,
    name: CipherName,
    key: Vec<u8>,
    iv: Option<Vec<u8>>,
    encoding: Encoding,
    always_add_header: bool,
    kek: Option<KeyEncryptingKey>,
}

impl Cipher {
    /// Build a cipher from raw key material, validating lengths.
    pub fn new(
        name: CipherName,
        key: Vec<u8>,
        iv: Option<Vec<u8>>,
    ) -> Result<Self, CryptoError> {
        if key.len() != name.key_len() {
            return Err(CryptoError::InvalidKeyLength {
                expected: name.key_len(),
                got: key.len(),
            });
        }
        if let Some(iv) = &iv {
            if iv.len() != name.iv_len() {
                return Err(CryptoError::InvalidIvLength {
                    expected: name.iv_len(),
                    got: iv.len(),
                });
            }
        }
        Ok(Self {
            version: 0,
            name,
            key,
            iv,
            encoding: Encoding::default(),
            always_add_header: true,
            kek: None,
        })
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_always_add_header(mut self, always: bool) -> Self {
        self.always_add_header = always;
        self
    }

    /// Attach the KEK of this cipher's version, enabling per-message wrapped
    /// keys on both the encrypt and decrypt paths.
    pub fn with_kek(mut self, kek: KeyEncryptingKey) -> Self {
        self.kek = Some(kek);
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn name(&self) -> CipherName {
        self.name
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn always_add_header(&self) -> bool {
        self.always_add_header
    }

    /// Raw DEK bytes. Use only for immediate cipher construction.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Configured fixed IV, if any.
    pub fn iv(&self) -> Option<&[u8]> {
        self.iv.as_deref()
    }

    /// KEK for this cipher's version, when configured.
    pub fn kek(&self) -> Option<&KeyEncryptingKey> {
        self.kek.as_ref()
    }

    /// Encrypt a byte buffer. Empty input returns empty output.
    pub fn encrypt(&self, plaintext: &[u8], opts: &EncryptOptions) -> Result<Vec<u8>, CryptoError> {
        if plaintext.is_empty() {
            return Ok(Vec::new());
        }

        let random_iv = opts.random_iv || opts.random_key;
        let add_header = opts.compress
            || random_iv
            || opts.add_header.unwrap_or(self.always_add_header);

        let (key, wrapped_key) = if opts.random_key {
            let kek = self.kek.as_ref().ok_or(CryptoError::MissingKek)?;
            let key = Zeroizing::new(generate_key(self.name)?);
            let wrapped = kek.wrap(&key)?;
            (key, Some(wrapped))
        } else {
            (Zeroizing::new(self.key.clone()), None)
        };
        let iv = if random_iv {
            Some(generate_iv(self.name)?)
        } else {
            self.iv.clone()
        };

        let body: Vec<u8> = if opts.compress {
            compress(plaintext)?
        } else {
            plaintext.to_vec()
        };
        let ciphertext = engine::encrypt_once(self.name, &key, iv.as_deref(), &body)?;

        if !add_header {
            return Ok(ciphertext);
        }
        let header = Header {
            version: self.version,
            compressed: opts.compress,
            iv: if random_iv { iv } else { None },
            key: wrapped_key,
            cipher_name: None,
            key_encoded: false,
        };
        let mut out = header.to_bytes();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a byte buffer produced by [`Cipher::encrypt`].
    ///
    /// Input starting with the header magic is parsed as a self-describing
    /// blob; header-embedded key/IV/cipher-name take precedence over this
    /// cipher's configured values. Anything else is treated as raw ciphertext
    /// under the configured key and IV.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        if !Header::sniff(ciphertext) {
            return engine::decrypt_once(self.name, &self.key, self.iv.as_deref(), ciphertext);
        }

        let (header, body) = Header::parse(ciphertext)?;
        let name = match &header.cipher_name {
            Some(s) => s.parse()?,
            None => self.name,
        };
        let key: Zeroizing<Vec<u8>> = match &header.key {
            Some(wrapped) => {
                let kek = self.kek.as_ref().ok_or(CryptoError::MissingKek)?;
                let raw = if header.key_encoded {
                    Encoding::Base64.decode(
                        std::str::from_utf8(wrapped).map_err(|_| {
                            CryptoError::MalformedHeader("encoded key is not UTF-8".into())
                        })?,
                    )?
                } else {
                    wrapped.clone()
                };
                Zeroizing::new(kek.unwrap(&raw)?)
            }
            None => Zeroizing::new(self.key.clone()),
        };
        let iv = header.iv.clone().or_else(|| self.iv.clone());

        let plaintext = engine::decrypt_once(name, &key, iv.as_deref(), body)?;
        if header.compressed {
            decompress(&plaintext)
        } else {
            Ok(plaintext)
        }
    }

    /// Decrypt, mapping [`CryptoError::DecryptionFailed`] to `None`.
    ///
    /// Useful when scanning data that mixes plaintext and ciphertext.
    pub fn try_decrypt(&self, ciphertext: &[u8]) -> Result<Option<Vec<u8>>, CryptoError> {
        match self.decrypt(ciphertext) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(CryptoError::DecryptionFailed(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encrypt a string and apply the configured text encoding.
    pub fn encrypt_text(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt_text_with(plaintext, &EncryptOptions::default())
    }

    /// Encrypt a string with explicit per-message options.
    pub fn encrypt_text_with(
        &self,
        plaintext: &str,
        opts: &EncryptOptions,
    ) -> Result<String, CryptoError> {
        let ciphertext = self.encrypt(plaintext.as_bytes(), opts)?;
        self.encoding.encode_string(&ciphertext)
    }

    /// Reverse the text encoding and decrypt back to a string.
    pub fn decrypt_text(&self, encoded: &str) -> Result<String, CryptoError> {
        let ciphertext = self.encoding.decode(encoded)?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".into()))
    }

    /// Lenient form of [`Cipher::decrypt_text`]: decoding or decryption
    /// failure yields `None`.
    pub fn try_decrypt_text(&self, encoded: &str) -> Result<Option<String>, CryptoError> {
        let ciphertext = match self.encoding.decode(encoded) {
            Ok(bytes) => bytes,
            Err(CryptoError::DecodeFailed(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        match self.decrypt(&ciphertext) {
            Ok(plaintext) => Ok(String::from_utf8(plaintext).ok()),
            Err(CryptoError::DecryptionFailed(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.key.zeroize();
        if let Some(iv) = &mut self.iv {
            iv.zeroize();
        }
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Cipher")
            .field("version", &self.version)
            .field("name", &self.name.as_str())
            .field("key", &"[REDACTED]")
            .field("encoding", &self.encoding)
            .field("always_add_header", &self.always_add_header)
            .finish_non_exhaustive()
    }
}

/// Zlib-compress a buffer.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CryptoError::EncryptionFailed(format!("compression: {e}")))
}

/// Reverse [`compress`].
pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CryptoError::DecryptionFailed(format!("decompression: {e}")))?;
    Ok(out)
}
