//! Content-addressed pre-image keys and the oracle client contract.
//!
//! A pre-image key is 32 bytes whose first byte selects the key family. The
//! oracle serves values as 32-byte windows into the 8-byte-length-prefixed
//! byte stream `be64(len) || value`.

use core::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keccak::keccak256;

/// Pre-image key families, identified by the first key byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    /// Caller-scoped bootstrap data, keyed by a local identifier.
    Local = 1,
    /// Globally content-addressed data, keyed by its Keccak-256 digest.
    Keccak256 = 2,
}

impl KeyType {
    /// Maps a key-type byte to its family.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(KeyType::Local),
            2 => Some(KeyType::Keccak256),
            _ => None,
        }
    }
}

/// A typed 32-byte pre-image key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PreimageKey([u8; 32]);

impl PreimageKey {
    /// Wraps raw key bytes without validating the type byte. Validation
    /// happens when the key is dereferenced through an oracle.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Builds a local key from a 64-bit identifier.
    #[must_use]
    pub fn local(ident: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = KeyType::Local as u8;
        bytes[24..].copy_from_slice(&ident.to_be_bytes());
        Self(bytes)
    }

    /// Builds a global key by hashing the pre-image itself.
    #[must_use]
    pub fn hash_keccak256(preimage: &[u8]) -> Self {
        let mut bytes = keccak256(preimage);
        bytes[0] = KeyType::Keccak256 as u8;
        Self(bytes)
    }

    /// Scopes a local key to a caller: `keccak256(key || sender || context)`
    /// with the type byte reset to local.
    #[must_use]
    pub fn localize(&self, sender: &[u8], local_context: &[u8; 32]) -> Self {
        let mut buf = Vec::with_capacity(32 + sender.len() + 32);
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(sender);
        buf.extend_from_slice(local_context);
        let mut bytes = keccak256(&buf);
        bytes[0] = KeyType::Local as u8;
        Self(bytes)
    }

    /// The key family, or an error for an unknown type byte.
    pub fn key_type(&self) -> Result<KeyType, PreimageError> {
        KeyType::from_byte(self.0[0]).ok_or(PreimageError::UnknownKeyType(self.0[0]))
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether the key is all-zero, i.e. no pre-image has been requested.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for PreimageKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PreimageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreimageKey(0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for PreimageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Failures of the pre-image oracle client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreimageError {
    /// A part was requested past the end of the length-prefixed stream.
    #[error("pre-image part offset {offset} out of bounds for value of length {len}")]
    PartOffsetOOB {
        /// The requested offset into the prefixed stream.
        offset: u64,
        /// The raw (unprefixed) value length.
        len: u64,
    },

    /// The key-type byte is not a supported family.
    #[error("unknown pre-image key type {0}")]
    UnknownKeyType(u8),

    /// The oracle has no value bound for the key.
    #[error("missing pre-image for key {0}")]
    PreimageMissing(PreimageKey),
}

/// A 32-byte window into a length-prefixed pre-image stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreimagePart {
    /// The window bytes, zero-padded past the end of the stream.
    pub data: [u8; 32],
    /// The number of meaningful bytes, `min(32, len + 8 - offset)`.
    pub len: usize,
}

/// Computes the 32-byte window of `be64(len) || value` at `offset`.
pub fn preimage_part(value: &[u8], offset: u64) -> Result<PreimagePart, PreimageError> {
    let len = value.len() as u64;
    if offset > len + 8 {
        return Err(PreimageError::PartOffsetOOB { offset, len });
    }
    let avail = (len + 8 - offset).min(32);
    let mut data = [0u8; 32];
    let prefix = len.to_be_bytes();
    for i in 0..avail {
        let pos = offset + i;
        data[i as usize] =
            if pos < 8 { prefix[pos as usize] } else { value[(pos - 8) as usize] };
    }
    Ok(PreimagePart { data, len: avail as usize })
}

/// The injected pre-image dependency of the evaluators.
///
/// The step function is a pure function of `(state, preimage_fn)`; this trait
/// is the `preimage_fn`.
pub trait PreimageReader {
    /// The raw (unprefixed) value bound to `key`.
    fn preimage(&mut self, key: PreimageKey) -> Result<Vec<u8>, PreimageError>;

    /// The 32-byte window of the length-prefixed value at `offset`.
    fn part(&mut self, key: PreimageKey, offset: u64) -> Result<PreimagePart, PreimageError> {
        key.key_type()?;
        let value = self.preimage(key)?;
        preimage_part(&value, offset)
    }
}

/// A map-backed oracle for the fast evaluator and tests.
#[derive(Debug, Clone, Default)]
pub struct MapOracle {
    values: HashMap<PreimageKey, Vec<u8>>,
}

impl MapOracle {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `data` under its Keccak-256 key and returns the key.
    pub fn insert_keccak256(&mut self, data: Vec<u8>) -> PreimageKey {
        let key = PreimageKey::hash_keccak256(&data);
        self.values.insert(key, data);
        key
    }

    /// Binds `data` under the local key for `ident` and returns the key.
    pub fn insert_local(&mut self, ident: u64, data: Vec<u8>) -> PreimageKey {
        let key = PreimageKey::local(ident);
        self.values.insert(key, data);
        key
    }
}

impl PreimageReader for MapOracle {
    fn preimage(&mut self, key: PreimageKey) -> Result<Vec<u8>, PreimageError> {
        self.values.get(&key).cloned().ok_or(PreimageError::PreimageMissing(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_type_dispatch() {
        assert_eq!(PreimageKey::local(7).key_type().unwrap(), KeyType::Local);
        assert_eq!(
            PreimageKey::hash_keccak256(b"data").key_type().unwrap(),
            KeyType::Keccak256
        );
        let mut raw = [0u8; 32];
        raw[0] = 9;
        assert_eq!(
            PreimageKey::from_bytes(raw).key_type(),
            Err(PreimageError::UnknownKeyType(9))
        );
    }

    #[test]
    fn part_windows_of_37_byte_value() {
        let value = vec![0xabu8; 37];

        // Offset 0: the 8-byte big-endian length then the first 24 bytes.
        let part = preimage_part(&value, 0).unwrap();
        assert_eq!(part.len, 32);
        assert_eq!(part.data[..8], 37u64.to_be_bytes());
        assert_eq!(part.data[8..], [0xab; 24]);

        // Offset 32: the trailing 13 bytes, zero-padded.
        let part = preimage_part(&value, 32).unwrap();
        assert_eq!(part.len, 13);
        assert_eq!(part.data[..13], [0xab; 13]);
        assert_eq!(part.data[13..], [0u8; 19]);

        // Offset 45 is the exact end of the prefixed stream: empty but legal.
        assert_eq!(preimage_part(&value, 45).unwrap().len, 0);

        // Offset 46 is strictly past the stream.
        assert_eq!(
            preimage_part(&value, 46),
            Err(PreimageError::PartOffsetOOB { offset: 46, len: 37 })
        );
    }

    #[test]
    fn map_oracle_round_trip() {
        let mut oracle = MapOracle::new();
        let key = oracle.insert_keccak256(b"hello world".to_vec());
        assert_eq!(oracle.preimage(key).unwrap(), b"hello world");

        let missing = PreimageKey::hash_keccak256(b"absent");
        assert_eq!(
            oracle.preimage(missing),
            Err(PreimageError::PreimageMissing(missing))
        );
    }

    #[test]
    fn unknown_key_type_beats_missing_value() {
        let mut oracle = MapOracle::new();
        let mut raw = [0u8; 32];
        raw[0] = 3;
        let key = PreimageKey::from_bytes(raw);
        assert_eq!(oracle.part(key, 0), Err(PreimageError::UnknownKeyType(3)));
    }

    #[test]
    fn localize_rekeys_with_type_byte() {
        let key = PreimageKey::local(1);
        let localized = key.localize(&[0x11; 20], &[0x22; 32]);
        assert_eq!(localized.as_bytes()[0], KeyType::Local as u8);
        assert_ne!(localized, key);
    }
}
