//! Streaming encryption and decryption.
//!
//! Both directions are explicit pipelines fixed at construction:
//!
//! ```text
//! encrypt: caller writes → [zlib] → cipher update → sink   (header emitted once)
//! decrypt: source → cipher update → [zlib] → caller reads  (header sniffed once)
//! ```

pub mod reader;
pub mod writer;

pub use reader::{ReadOptions, Reader};
pub use writer::{WriteOptions, Writer};

use crate::error::KeyringError;
use atrest_crypto::CryptoError;

/// Recover a typed error from an `io::Error` produced inside a pipeline
/// stage (the zlib layers only transport `io::Error`).
pub(crate) fn from_io(e: std::io::Error) -> KeyringError {
    let carries_keyring = e.get_ref().is_some_and(|inner| inner.is::<KeyringError>());
    if carries_keyring {
        let inner = e.into_inner().expect("checked above");
        return *inner.downcast::<KeyringError>().expect("checked above");
    }
    let carries_crypto = e.get_ref().is_some_and(|inner| inner.is::<CryptoError>());
    if carries_crypto {
        let inner = e.into_inner().expect("checked above");
        return KeyringError::Crypto(*inner.downcast::<CryptoError>().expect("checked above"));
    }
    KeyringError::Io(e)
}
