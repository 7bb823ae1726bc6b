//! Text encodings applied to full ciphertexts (header included).
//!
//! The encoding is a property of the cipher configuration, not of any single
//! message: every string produced under a cipher uses that cipher's encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Text encoding for the string encrypt/decrypt API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Raw ciphertext bytes, no transformation.
    #[serde(rename = "none")]
    None,
    /// Standard base64; decoding tolerates embedded whitespace and newlines.
    #[default]
    #[serde(rename = "base64")]
    Base64,
    /// Standard base64; decoding rejects any non-alphabet byte.
    #[serde(rename = "base64strict")]
    Base64Strict,
    /// Lowercase hex.
    #[serde(rename = "base16")]
    Base16,
}

impl Encoding {
    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::None => "none",
            Encoding::Base64 => "base64",
            Encoding::Base64Strict => "base64strict",
            Encoding::Base16 => "base16",
        }
    }

    /// Encode bytes under this encoding.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Encoding::None => data.to_vec(),
            Encoding::Base64 | Encoding::Base64Strict => STANDARD.encode(data).into_bytes(),
            Encoding::Base16 => hex::encode(data).into_bytes(),
        }
    }

    /// Encode bytes to a `String`.
    ///
    /// Fails for [`Encoding::None`] when the raw bytes are not valid UTF-8.
    pub fn encode_string(&self, data: &[u8]) -> Result<String, CryptoError> {
        String::from_utf8(self.encode(data))
            .map_err(|_| CryptoError::DecodeFailed("raw ciphertext is not valid UTF-8".into()))
    }

    /// Decode a string produced by [`Encoding::encode`].
    pub fn decode(&self, data: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            Encoding::None => Ok(data.as_bytes().to_vec()),
            Encoding::Base64 => {
                let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|e| CryptoError::DecodeFailed(format!("base64: {e}")))
            }
            Encoding::Base64Strict => STANDARD
                .decode(data.as_bytes())
                .map_err(|e| CryptoError::DecodeFailed(format!("base64strict: {e}"))),
            Encoding::Base16 => {
                hex::decode(data).map_err(|e| CryptoError::DecodeFailed(format!("base16: {e}")))
            }
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encoding {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Encoding::None),
            "base64" => Ok(Encoding::Base64),
            "base64strict" => Ok(Encoding::Base64Strict),
            "base16" => Ok(Encoding::Base16),
            other => Err(CryptoError::DecodeFailed(format!(
                "unknown encoding: {other}"
            ))),
        }
    }
}
