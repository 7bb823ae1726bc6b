//! Cipher primitives for versioned, self-describing encrypted blobs.
//!
//! A [`Cipher`] pairs one symmetric data-encryption key (DEK) with an
//! algorithm, optional fixed IV, and a text encoding. Every blob may carry a
//! compact [`Header`] naming the DEK version and any per-message parameters,
//! so multiple DEKs can coexist during key rotation. DEKs are wrapped at rest
//! by an RSA [`KeyEncryptingKey`].

pub mod cipher;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod header;
pub mod kek;

pub use cipher::{generate_iv, generate_key, Cipher, CipherName, EncryptOptions};
pub use encoding::Encoding;
pub use engine::{decrypt_once, encrypt_once, DecryptEngine, EncryptEngine, BLOCK_SIZE};
pub use error::CryptoError;
pub use header::{Header, FORMAT_VERSION, MAGIC};
pub use kek::{KeyEncryptingKey, WrapScheme, DEFAULT_KEY_BITS};
