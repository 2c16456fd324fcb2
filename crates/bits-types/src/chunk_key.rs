use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of a chunk key in bytes.
pub const KEY_SIZE: usize = 32;

/// Width of a hex-encoded chunk key in bytes.
pub const KEY_HEX_LEN: usize = 2 * KEY_SIZE;

/// A 32-byte chunk key: the SHA-256 digest of the chunk's plaintext.
///
/// The key both names the chunk (content addressing) and keys its cipher
/// (convergent encryption). Ordering is byte order, which coincides with
/// the ordering of the hex form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey(pub [u8; KEY_SIZE]);

#[derive(Debug, Error)]
pub enum KeyParseError {
    #[error("chunk key has length {0}, expected {KEY_HEX_LEN} hex characters")]
    Length(usize),

    #[error("chunk key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl ChunkKey {
    /// Compute the key for a chunk of plaintext.
    pub fn digest(plaintext: &[u8]) -> Self {
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&Sha256::digest(plaintext));
        ChunkKey(out)
    }

    /// Hex-encode the full key, as it appears on a manifest key line.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex-encoded key, rejecting wrong lengths.
    pub fn from_hex(s: &str) -> Result<Self, KeyParseError> {
        if s.len() != KEY_HEX_LEN {
            return Err(KeyParseError::Length(s.len()));
        }
        let mut out = [0u8; KEY_SIZE];
        hex::decode_to_slice(s, &mut out)?;
        Ok(ChunkKey(out))
    }

    /// First two bytes as a four-char hex string, used for the store shard
    /// directory.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..2])
    }

    /// Remaining thirty bytes as a sixty-char hex string, used for the file
    /// name inside the shard.
    pub fn tail_hex(&self) -> String {
        hex::encode(&self.0[2..])
    }
}

impl fmt::Debug for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_deterministic() {
        let k1 = ChunkKey::digest(b"hello world");
        let k2 = ChunkKey::digest(b"hello world");
        assert_eq!(k1, k2);
    }

    #[test]
    fn digest_different_data_different_key() {
        assert_ne!(ChunkKey::digest(b"hello"), ChunkKey::digest(b"world"));
    }

    #[test]
    fn hex_roundtrip() {
        let key = ChunkKey::digest(b"roundtrip");
        let parsed = ChunkKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn to_hex_length() {
        assert_eq!(ChunkKey::digest(b"test").to_hex().len(), KEY_HEX_LEN);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        assert!(matches!(
            ChunkKey::from_hex("abcdef"),
            Err(KeyParseError::Length(6))
        ));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let bad = "zz".repeat(KEY_SIZE);
        assert!(matches!(
            ChunkKey::from_hex(&bad),
            Err(KeyParseError::Hex(_))
        ));
    }

    #[test]
    fn shard_prefix_and_tail_cover_key() {
        let key = ChunkKey([0xAB; KEY_SIZE]);
        assert_eq!(key.shard_prefix(), "abab");
        assert_eq!(key.tail_hex().len(), KEY_HEX_LEN - 4);
        assert_eq!(format!("{}{}", key.shard_prefix(), key.tail_hex()), key.to_hex());
    }

    #[test]
    fn ordering_matches_hex_ordering() {
        let a = ChunkKey::digest(b"a");
        let b = ChunkKey::digest(b"b");
        assert_eq!(a.cmp(&b), a.to_hex().cmp(&b.to_hex()));
    }

    #[test]
    fn known_sha256_vector() {
        // SHA-256 of the empty string.
        let key = ChunkKey::digest(b"");
        assert_eq!(
            key.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let key = ChunkKey::digest(b"serde");
        let bytes = rmp_serde::to_vec(&key).unwrap();
        let back: ChunkKey = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(key, back);
    }
}
