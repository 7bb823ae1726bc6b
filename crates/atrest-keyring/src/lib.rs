//! Envelope key management and streaming encryption.
//!
//! Builds on `atrest-crypto`: keystores persist KEK-wrapped DEKs, a
//! [`Registry`] maps cipher versions to live ciphers (head = primary, tail =
//! decrypt-only secondaries), [`Writer`]/[`Reader`] stream arbitrary-length
//! data through optional compression, and [`rotate`] mints a new (DEK, KEK)
//! pair without disturbing existing versions.

pub mod config;
pub mod error;
pub mod keystore;
pub mod registry;
pub mod rotation;
pub mod stream;

pub use config::{AppConfig, CipherEntry, EnvironmentConfig, KeystoreConfig};
pub use error::KeyringError;
pub use keystore::{EnvKeystore, FileKeystore, Keystore, MemoryKeystore};
pub use registry::{current, install, Registry, RegistryHandle};
pub use rotation::{rotate, RotationOutcome};
pub use stream::{ReadOptions, Reader, WriteOptions, Writer};
