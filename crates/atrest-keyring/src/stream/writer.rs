//! Streaming encryption sink.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use zeroize::Zeroizing;

use atrest_crypto::engine::EncryptEngine;
use atrest_crypto::{generate_iv, generate_key, CipherName, CryptoError, Header};

use crate::error::KeyringError;
use crate::registry::Registry;
use crate::stream::from_io;

/// Construction options for [`Writer`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Cipher version to encrypt under; defaults to the primary.
    pub version: Option<u8>,
    /// Algorithm override for this stream. Requires `random_key` and
    /// `random_iv` (the override travels in the header next to them).
    pub cipher_name: Option<CipherName>,
    /// Force the header on or off; `None` follows the cipher's
    /// `always_add_header`. Compression or per-message key/IV always force
    /// the header on.
    pub header: Option<bool>,
    /// Generate a fresh DEK for this stream, wrapped into the header.
    pub random_key: bool,
    /// Generate a fresh IV for this stream, embedded in the header.
    pub random_iv: bool,
    /// Insert a zlib stage between caller writes and the cipher.
    pub compress: bool,
    /// Emit the legacy header layout (magic + 16-bit flag word). Cannot
    /// carry per-message parameters.
    pub legacy_header: bool,
}

/// Innermost pipeline stage: encrypts whatever is written and forwards the
/// ciphertext to the sink.
struct CipherSink<W: Write> {
    sink: W,
    engine: Option<EncryptEngine>,
}

impl<W: Write> CipherSink<W> {
    fn finish(&mut self) -> Result<(), KeyringError> {
        let engine = self.engine.take().ok_or(KeyringError::StreamClosed)?;
        let mut tail = Vec::with_capacity(64);
        engine.finish(&mut tail)?;
        self.sink.write_all(&tail)?;
        self.sink.flush()?;
        Ok(())
    }

    fn into_sink(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for CipherSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| io::Error::other(KeyringError::StreamClosed))?;
        let mut produced = Vec::with_capacity(buf.len() + 16);
        engine.update(buf, &mut produced);
        self.sink.write_all(&produced)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

enum State<W: Write> {
    Plain(CipherSink<W>),
    Compressed(ZlibEncoder<CipherSink<W>>),
    Closed(Option<W>),
}

/// Streaming encryption sink with optional compression.
///
/// The header (when enabled) is emitted once at construction; `write` feeds
/// plaintext through the pipeline; [`Writer::close`] finalizes the cipher and
/// emits the final block. A writer dropped without closing leaves the sink
/// truncated and the ciphertext undecryptable; [`Writer::encrypt_with`] is
/// the scoped form that guarantees finalization.
pub struct Writer<W: Write> {
    state: State<W>,
    size: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(mut sink: W, registry: &Registry, opts: &WriteOptions) -> Result<Self, KeyringError> {
        if opts.random_key && !opts.random_iv {
            return Err(KeyringError::Config(
                "random_key requires random_iv".into(),
            ));
        }
        if opts.cipher_name.is_some() && !(opts.random_key && opts.random_iv) {
            return Err(KeyringError::Config(
                "a cipher_name override requires random_key and random_iv".into(),
            ));
        }
        if opts.legacy_header && (opts.random_iv || opts.random_key) {
            return Err(KeyringError::Config(
                "the legacy header cannot embed per-message parameters".into(),
            ));
        }

        let cipher = match opts.version {
            Some(v) => registry.by_version(v)?,
            None => registry.primary(),
        };
        let name = opts.cipher_name.unwrap_or_else(|| cipher.name());

        let (key, wrapped_key): (Zeroizing<Vec<u8>>, Option<Vec<u8>>) = if opts.random_key {
            let kek = cipher.kek().ok_or(CryptoError::MissingKek)?;
            let key = Zeroizing::new(generate_key(name)?);
            let wrapped = kek.wrap(&key)?;
            (key, Some(wrapped))
        } else {
            (Zeroizing::new(cipher.key().to_vec()), None)
        };
        let iv = if opts.random_iv {
            Some(generate_iv(name)?)
        } else {
            cipher.iv().map(|iv| iv.to_vec())
        };

        let add_header = opts.compress
            || opts.random_iv
            || opts.random_key
            || opts.header.unwrap_or_else(|| cipher.always_add_header());
        if add_header {
            let header = Header {
                version: cipher.version(),
                compressed: opts.compress,
                iv: if opts.random_iv { iv.clone() } else { None },
                key: wrapped_key,
                cipher_name: opts.cipher_name.map(|n| n.as_str().to_string()),
                key_encoded: false,
            };
            let bytes = if opts.legacy_header {
                header.to_legacy_bytes()
            } else {
                header.to_bytes()
            };
            sink.write_all(&bytes)?;
        }

        let engine = EncryptEngine::new(name, &key, iv.as_deref())?;
        let inner = CipherSink {
            sink,
            engine: Some(engine),
        };
        let state = if opts.compress {
            State::Compressed(ZlibEncoder::new(inner, Compression::default()))
        } else {
            State::Plain(inner)
        };
        Ok(Writer { state, size: 0 })
    }

    /// Uncompressed bytes accepted so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finalize the cipher and emit the final block. Idempotent; the sink is
    /// retained until the writer is dropped or [`Writer::finish`] reclaims it.
    pub fn close(&mut self) -> Result<(), KeyringError> {
        match std::mem::replace(&mut self.state, State::Closed(None)) {
            State::Closed(sink) => {
                self.state = State::Closed(sink);
                Ok(())
            }
            State::Plain(mut inner) => {
                inner.finish()?;
                self.state = State::Closed(Some(inner.into_sink()));
                Ok(())
            }
            State::Compressed(encoder) => {
                let mut inner = encoder.finish().map_err(from_io)?;
                inner.finish()?;
                self.state = State::Closed(Some(inner.into_sink()));
                Ok(())
            }
        }
    }

    /// Close and hand the sink back to the caller.
    pub fn finish(mut self) -> Result<W, KeyringError> {
        self.close()?;
        match std::mem::replace(&mut self.state, State::Closed(None)) {
            State::Closed(Some(sink)) => Ok(sink),
            _ => Err(KeyringError::StreamClosed),
        }
    }

    /// Scoped encryption: builds a writer, runs `f`, and guarantees
    /// finalization. A close failure after a successful `f` is surfaced.
    pub fn encrypt_with<T>(
        sink: W,
        registry: &Registry,
        opts: &WriteOptions,
        f: impl FnOnce(&mut Writer<W>) -> Result<T, KeyringError>,
    ) -> Result<(T, W), KeyringError> {
        let mut writer = Writer::new(sink, registry, opts)?;
        match f(&mut writer) {
            Ok(value) => {
                let sink = writer.finish()?;
                Ok((value, sink))
            }
            Err(e) => {
                let _ = writer.close();
                Err(e)
            }
        }
    }
}

impl<W: Write> Write for Writer<W> {
    /// Returns the count of input bytes accepted, not ciphertext produced.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.state {
            State::Plain(inner) => inner.write(buf)?,
            State::Compressed(encoder) => encoder.write(buf)?,
            State::Closed(_) => return Err(io::Error::other(KeyringError::StreamClosed)),
        };
        self.size += n as u64;
        Ok(n)
    }

    /// Flushes only the sink. Cipher state cannot be finalized mid-stream.
    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Plain(inner) => inner.sink.flush(),
            State::Compressed(encoder) => encoder.get_mut().sink.flush(),
            State::Closed(_) => Ok(()),
        }
    }
}
