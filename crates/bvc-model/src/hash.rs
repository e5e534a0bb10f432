//! Content fingerprints
//!
//! [`ContentHash`] is the Blake3 digest of a record's canonical JSON form.
//! Two records with equal fingerprints are treated as content-equal, which
//! is what lets commits skip no-op writes and reviews skip identical versions.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Blake3 fingerprint of record content
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Digest of an arbitrary byte string
    #[inline]
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Digest of a value's JSON encoding
    ///
    /// Map keys are emitted in the order the value's `Serialize` impl yields
    /// them, so callers wanting order-independent fingerprints should hold
    /// fields in sorted maps.
    ///
    /// # Errors
    /// Returns error if the value cannot be encoded as JSON
    pub fn of_json<T>(value: &T) -> Result<Self, HashError>
    where
        T: Serialize + ?Sized,
    {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(HashWriter(&mut hasher), value)?;
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Abbreviated form for log lines (first 8 bytes, hex)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

struct HashWriter<'a>(&'a mut blake3::Hasher);

impl std::io::Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; DIGEST_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| HashError::InvalidLength {
                    expected: DIGEST_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors produced while computing or parsing fingerprints
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Decoded digest has the wrong size
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required byte count
        expected: usize,
        /// Byte count found
        actual: usize,
    },

    /// Not valid hex
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Value could not be encoded
    #[error("content encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
