//! Self-describing ciphertext header.
//!
//! Current wire format (format version 2, all lengths little-endian):
//!
//! ```text
//! [4 bytes: magic "@EnC"]
//! [1 byte:  format_version = 2]
//! [1 byte:  flags]
//! [1 byte:  cipher_version]
//! optional fields, in order, each prefixed by a u16 LE length:
//!   cipher_name  (flag bit 3)
//!   iv           (flag bit 1)
//!   wrapped_key  (flag bit 2, always the KEK-wrapped form)
//! ```
//!
//! The legacy layout is `[magic][u16 LE flag word]` where only the top bit
//! (compressed) is defined. The byte after the magic disambiguates: `2` is
//! the current format version; anything else is the low byte of the legacy
//! flag word, which compliant writers always emit as zero.

use std::io::Read;

use crate::error::CryptoError;

/// Magic prefix identifying an encrypted blob.
pub const MAGIC: [u8; 4] = *b"@EnC";

/// Current header format version.
pub const FORMAT_VERSION: u8 = 2;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_IV: u8 = 0b0000_0010;
const FLAG_KEY: u8 = 0b0000_0100;
const FLAG_CIPHER_NAME: u8 = 0b0000_1000;
const FLAG_KEY_ENCODED: u8 = 0b0001_0000;

/// Legacy 16-bit flag word: top bit marks compression, all other bits are
/// written as zero and ignored on read.
const LEGACY_FLAG_COMPRESSED: u16 = 0x8000;

/// Parsed ciphertext header.
///
/// `key`, when present, always holds the KEK-wrapped DEK; `iv` must also be
/// present in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Cipher version the payload was encrypted under (0 = unset).
    pub version: u8,
    /// Payload was zlib-compressed before encryption.
    pub compressed: bool,
    /// Per-message IV.
    pub iv: Option<Vec<u8>>,
    /// Per-message DEK, wrapped by the KEK of `version`.
    pub key: Option<Vec<u8>>,
    /// Cipher algorithm override.
    pub cipher_name: Option<String>,
    /// The wrapped key was additionally base64-encoded (legacy writers).
    pub key_encoded: bool,
}

impl Header {
    /// Whether `data` starts with the header magic.
    pub fn sniff(data: &[u8]) -> bool {
        data.len() >= MAGIC.len() && data[..MAGIC.len()] == MAGIC
    }

    /// Serialize in the current format. Bit-exact inverse of [`Header::parse`].
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert!(
            self.key.is_none() || self.iv.is_some(),
            "a wrapped key requires an IV"
        );

        let mut flags = 0u8;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.iv.is_some() {
            flags |= FLAG_IV;
        }
        if self.key.is_some() {
            flags |= FLAG_KEY;
        }
        if self.cipher_name.is_some() {
            flags |= FLAG_CIPHER_NAME;
        }
        if self.key_encoded {
            flags |= FLAG_KEY_ENCODED;
        }

        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&MAGIC);
        out.push(FORMAT_VERSION);
        out.push(flags);
        out.push(self.version);
        if let Some(name) = &self.cipher_name {
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        if let Some(iv) = &self.iv {
            out.extend_from_slice(&(iv.len() as u16).to_le_bytes());
            out.extend_from_slice(iv);
        }
        if let Some(key) = &self.key {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key);
        }
        out
    }

    /// Serialize in the legacy layout.
    ///
    /// Only the compressed flag is representable; cipher version and optional
    /// fields are dropped, so readers resolve such payloads against their
    /// configured cipher.
    pub fn to_legacy_bytes(&self) -> Vec<u8> {
        let word = if self.compressed {
            LEGACY_FLAG_COMPRESSED
        } else {
            0
        };
        let mut out = Vec::with_capacity(6);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&word.to_le_bytes());
        out
    }

    /// Parse a header from the start of `data`, returning it together with
    /// the remaining ciphertext bytes.
    pub fn parse(data: &[u8]) -> Result<(Header, &[u8]), CryptoError> {
        let mut cursor = std::io::Cursor::new(data);
        let header = Header::read_from(&mut cursor)?;
        let consumed = cursor.position() as usize;
        Ok((header, &data[consumed..]))
    }

    /// Read a header (magic included) from a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Header, CryptoError> {
        let magic = read_array::<R, 4>(reader)?;
        if magic != MAGIC {
            return Err(CryptoError::MalformedHeader("magic not found".into()));
        }
        Header::read_body_from(reader)
    }

    /// Read a header body from a stream whose 4-byte magic has already been
    /// consumed (the sniffing reader's situation).
    pub fn read_body_from<R: Read>(reader: &mut R) -> Result<Header, CryptoError> {
        let first = read_array::<R, 1>(reader)?[0];
        if first != FORMAT_VERSION {
            // Legacy layout: `first` is the low byte of the 16-bit flag word.
            let second = read_array::<R, 1>(reader)?[0];
            let word = u16::from_le_bytes([first, second]);
            return Ok(Header {
                compressed: word & LEGACY_FLAG_COMPRESSED != 0,
                ..Header::default()
            });
        }

        let flags = read_array::<R, 1>(reader)?[0];
        let version = read_array::<R, 1>(reader)?[0];

        if flags & FLAG_KEY != 0 && flags & FLAG_IV == 0 {
            return Err(CryptoError::MalformedHeader(
                "wrapped key present without an IV".into(),
            ));
        }

        let cipher_name = if flags & FLAG_CIPHER_NAME != 0 {
            let raw = read_field(reader)?;
            Some(String::from_utf8(raw).map_err(|_| {
                CryptoError::MalformedHeader("cipher name is not valid UTF-8".into())
            })?)
        } else {
            None
        };
        let iv = if flags & FLAG_IV != 0 {
            Some(read_field(reader)?)
        } else {
            None
        };
        let key = if flags & FLAG_KEY != 0 {
            Some(read_field(reader)?)
        } else {
            None
        };

        Ok(Header {
            version,
            compressed: flags & FLAG_COMPRESSED != 0,
            iv,
            key,
            cipher_name,
            key_encoded: flags & FLAG_KEY_ENCODED != 0,
        })
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], CryptoError> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| CryptoError::MalformedHeader(format!("truncated header: {e}")))?;
    Ok(buf)
}

fn read_field<R: Read>(reader: &mut R) -> Result<Vec<u8>, CryptoError> {
    let len = u16::from_le_bytes(read_array::<R, 2>(reader)?) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| CryptoError::MalformedHeader(format!("truncated header field: {e}")))?;
    Ok(buf)
}
