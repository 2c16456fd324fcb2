//! Convergent chunk encryption.
//!
//! Each chunk is encrypted with AES-256-OFB keyed by its own key (the
//! SHA-256 of its plaintext) and an all-zero IV. The zero IV is sound only
//! because the key is unique per plaintext; identical plaintexts therefore
//! produce identical ciphertexts, which is what makes the store
//! deduplicable. There is no authentication tag: corrupted ciphertext
//! decrypts to silent garbage.

use std::io::{Read, Write};

use ofb::cipher::{KeyIvInit, StreamCipher};

use bits_types::ChunkKey;

use crate::error::Result;

type Aes256Ofb = ofb::Ofb<aes::Aes256>;

const ZERO_IV: [u8; 16] = [0u8; 16];

/// Copy buffer for the streaming decrypt path.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

fn keystream(key: &ChunkKey) -> Aes256Ofb {
    Aes256Ofb::new(&key.0.into(), &ZERO_IV.into())
}

/// Encrypt or decrypt `buf` in place. OFB is a pure keystream XOR, so the
/// two directions are the same operation.
pub fn apply_in_place(key: &ChunkKey, buf: &mut [u8]) {
    keystream(key).apply_keystream(buf);
}

/// Decrypt a ciphertext stream into `w`, returning the byte count.
pub fn decrypt_copy<R: Read, W: Write>(key: &ChunkKey, mut r: R, mut w: W) -> Result<u64> {
    let mut cipher = keystream(key);
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        cipher.apply_keystream(&mut buf[..n]);
        w.write_all(&buf[..n])?;
        total += n as u64;
    }
}
