use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Keystore failure: {0}")]
    Keystore(String),

    #[error("Insecure permissions on {path}: mode {mode:03o} has group/other bits set")]
    InsecurePermissions { path: PathBuf, mode: u32 },

    #[error("No cipher configured for version {0}")]
    UnknownCipherVersion(u8),

    #[error("Stream is closed")]
    StreamClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] atrest_crypto::CryptoError),
}
