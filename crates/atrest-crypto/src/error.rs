use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Cipher {0} requires an initialization vector")]
    MissingIv(String),

    #[error("Unknown cipher name: {0}")]
    UnknownCipherName(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key wrap failed: {0}")]
    KeyWrapFailed(String),

    #[error("Key unwrap failed: {0}")]
    KeyUnwrapFailed(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Invalid key-encrypting key: {0}")]
    InvalidKek(String),

    #[error("No key-encrypting key available for per-message keys")]
    MissingKek,

    #[error("Text decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
