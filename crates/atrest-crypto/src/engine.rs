//! Incremental cipher engines.
//!
//! CBC engines consume input block-by-block and apply or strip PKCS#7 padding
//! at finalization. GCM engines buffer the whole message and seal/open at
//! finalization: the authentication tag covers the complete message, so no
//! plaintext can be released before the final call.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use zeroize::Zeroizing;

use crate::cipher::CipherName;
use crate::error::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// GCM authentication tag size in bytes, appended to the ciphertext.
pub const GCM_TAG_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

enum CbcEnc {
    Aes128(Aes128CbcEnc),
    Aes192(Aes192CbcEnc),
    Aes256(Aes256CbcEnc),
}

impl CbcEnc {
    fn encrypt_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            CbcEnc::Aes128(c) => c.encrypt_block_mut(block),
            CbcEnc::Aes192(c) => c.encrypt_block_mut(block),
            CbcEnc::Aes256(c) => c.encrypt_block_mut(block),
        }
    }
}

enum CbcDec {
    Aes128(Aes128CbcDec),
    Aes192(Aes192CbcDec),
    Aes256(Aes256CbcDec),
}

impl CbcDec {
    fn decrypt_block(&mut self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            CbcDec::Aes128(c) => c.decrypt_block_mut(block),
            CbcDec::Aes192(c) => c.decrypt_block_mut(block),
            CbcDec::Aes256(c) => c.decrypt_block_mut(block),
        }
    }
}

fn check_params(name: CipherName, key: &[u8], iv: Option<&[u8]>) -> Result<(), CryptoError> {
    if key.len() != name.key_len() {
        return Err(CryptoError::InvalidKeyLength {
            expected: name.key_len(),
            got: key.len(),
        });
    }
    let iv = iv.ok_or_else(|| CryptoError::MissingIv(name.as_str().to_string()))?;
    if iv.len() != name.iv_len() {
        return Err(CryptoError::InvalidIvLength {
            expected: name.iv_len(),
            got: iv.len(),
        });
    }
    Ok(())
}

enum EncInner {
    Cbc {
        cipher: CbcEnc,
        residue: Vec<u8>,
    },
    Gcm {
        key: Zeroizing<Vec<u8>>,
        iv: Vec<u8>,
        buf: Vec<u8>,
    },
}

/// Streaming encryptor for one message.
pub struct EncryptEngine(EncInner);

impl EncryptEngine {
    pub fn new(name: CipherName, key: &[u8], iv: Option<&[u8]>) -> Result<Self, CryptoError> {
        check_params(name, key, iv)?;
        let iv = iv.expect("validated above");
        let map = |e: aes::cipher::InvalidLength| CryptoError::EncryptionFailed(e.to_string());
        let inner = match name {
            CipherName::Aes128Cbc => EncInner::Cbc {
                cipher: CbcEnc::Aes128(Aes128CbcEnc::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes192Cbc => EncInner::Cbc {
                cipher: CbcEnc::Aes192(Aes192CbcEnc::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes256Cbc => EncInner::Cbc {
                cipher: CbcEnc::Aes256(Aes256CbcEnc::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes256Gcm => EncInner::Gcm {
                key: Zeroizing::new(key.to_vec()),
                iv: iv.to_vec(),
                buf: Vec::new(),
            },
        };
        Ok(EncryptEngine(inner))
    }

    /// Feed plaintext, appending any produced ciphertext to `out`.
    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        match &mut self.0 {
            EncInner::Cbc { cipher, residue } => {
                if !residue.is_empty() {
                    let need = BLOCK_SIZE - residue.len();
                    let take = need.min(input.len());
                    residue.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    if residue.len() < BLOCK_SIZE {
                        return;
                    }
                    let start = out.len();
                    out.extend_from_slice(residue);
                    cipher.encrypt_block(&mut out[start..]);
                    residue.clear();
                }
                let full = input.len() - input.len() % BLOCK_SIZE;
                let start = out.len();
                out.extend_from_slice(&input[..full]);
                for block in out[start..].chunks_exact_mut(BLOCK_SIZE) {
                    cipher.encrypt_block(block);
                }
                residue.extend_from_slice(&input[full..]);
            }
            EncInner::Gcm { buf, .. } => buf.extend_from_slice(input),
        }
    }

    /// Finalize: emit the padded final block (CBC) or the sealed message
    /// with its tag (GCM).
    pub fn finish(self, out: &mut Vec<u8>) -> Result<(), CryptoError> {
        match self.0 {
            EncInner::Cbc {
                mut cipher,
                mut residue,
            } => {
                let pad = (BLOCK_SIZE - residue.len()) as u8;
                residue.resize(BLOCK_SIZE, pad);
                cipher.encrypt_block(&mut residue);
                out.extend_from_slice(&residue);
                Ok(())
            }
            EncInner::Gcm { key, iv, buf } => {
                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
                let sealed = cipher
                    .encrypt(Nonce::from_slice(&iv), buf.as_slice())
                    .map_err(|_| CryptoError::EncryptionFailed("aead seal failed".into()))?;
                out.extend_from_slice(&sealed);
                Ok(())
            }
        }
    }
}

enum DecInner {
    Cbc {
        cipher: CbcDec,
        residue: Vec<u8>,
    },
    Gcm {
        key: Zeroizing<Vec<u8>>,
        iv: Vec<u8>,
        buf: Vec<u8>,
    },
}

/// Streaming decryptor for one message.
pub struct DecryptEngine(DecInner);

impl DecryptEngine {
    pub fn new(name: CipherName, key: &[u8], iv: Option<&[u8]>) -> Result<Self, CryptoError> {
        check_params(name, key, iv)?;
        let iv = iv.expect("validated above");
        let map = |e: aes::cipher::InvalidLength| CryptoError::DecryptionFailed(e.to_string());
        let inner = match name {
            CipherName::Aes128Cbc => DecInner::Cbc {
                cipher: CbcDec::Aes128(Aes128CbcDec::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes192Cbc => DecInner::Cbc {
                cipher: CbcDec::Aes192(Aes192CbcDec::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes256Cbc => DecInner::Cbc {
                cipher: CbcDec::Aes256(Aes256CbcDec::new_from_slices(key, iv).map_err(map)?),
                residue: Vec::new(),
            },
            CipherName::Aes256Gcm => DecInner::Gcm {
                key: Zeroizing::new(key.to_vec()),
                iv: iv.to_vec(),
                buf: Vec::new(),
            },
        };
        Ok(DecryptEngine(inner))
    }

    /// Feed ciphertext, appending any recovered plaintext to `out`.
    ///
    /// CBC holds the trailing block back until [`DecryptEngine::finish`] so
    /// padding is never emitted as plaintext.
    pub fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        match &mut self.0 {
            DecInner::Cbc { cipher, residue } => {
                residue.extend_from_slice(input);
                if residue.len() <= BLOCK_SIZE {
                    return;
                }
                let keep = match residue.len() % BLOCK_SIZE {
                    0 => BLOCK_SIZE,
                    partial => partial,
                };
                let process = residue.len() - keep;
                if process == 0 {
                    return;
                }
                let start = out.len();
                out.extend_from_slice(&residue[..process]);
                for block in out[start..].chunks_exact_mut(BLOCK_SIZE) {
                    cipher.decrypt_block(block);
                }
                residue.drain(..process);
            }
            DecInner::Gcm { buf, .. } => buf.extend_from_slice(input),
        }
    }

    /// Finalize: strip padding from the held-back block (CBC) or open the
    /// buffered message (GCM). An engine that consumed no input produces no
    /// output (an empty stream decrypts to an empty stream).
    pub fn finish(self, out: &mut Vec<u8>) -> Result<(), CryptoError> {
        match self.0 {
            DecInner::Cbc {
                mut cipher,
                mut residue,
            } => {
                if residue.is_empty() {
                    return Ok(());
                }
                if residue.len() != BLOCK_SIZE {
                    return Err(CryptoError::DecryptionFailed(
                        "ciphertext length is not a multiple of the block size".into(),
                    ));
                }
                cipher.decrypt_block(&mut residue);
                let pad = residue[BLOCK_SIZE - 1] as usize;
                if pad == 0 || pad > BLOCK_SIZE {
                    return Err(CryptoError::DecryptionFailed("invalid padding".into()));
                }
                if residue[BLOCK_SIZE - pad..].iter().any(|&b| b as usize != pad) {
                    return Err(CryptoError::DecryptionFailed("invalid padding".into()));
                }
                out.extend_from_slice(&residue[..BLOCK_SIZE - pad]);
                Ok(())
            }
            DecInner::Gcm { key, iv, buf } => {
                if buf.is_empty() {
                    return Ok(());
                }
                let cipher = Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&iv), buf.as_slice())
                    .map_err(|_| {
                        CryptoError::DecryptionFailed(
                            "authentication failed (wrong key or tampered data)".into(),
                        )
                    })?;
                out.extend_from_slice(&plaintext);
                Ok(())
            }
        }
    }
}

/// One-shot encrypt of a whole buffer.
pub fn encrypt_once(
    name: CipherName,
    key: &[u8],
    iv: Option<&[u8]>,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut engine = EncryptEngine::new(name, key, iv)?;
    let mut out = Vec::with_capacity(data.len() + BLOCK_SIZE);
    engine.update(data, &mut out);
    engine.finish(&mut out)?;
    Ok(out)
}

/// One-shot decrypt of a whole buffer.
pub fn decrypt_once(
    name: CipherName,
    key: &[u8],
    iv: Option<&[u8]>,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut engine = DecryptEngine::new(name, key, iv)?;
    let mut out = Vec::with_capacity(data.len());
    engine.update(data, &mut out);
    engine.finish(&mut out)?;
    Ok(out)
}
