use std::io::Cursor;

use bits_types::ChunkKey;

use crate::chunker::{Chunker, Pol, CHUNK_BUFFER_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::config::DEFAULT_DEDUPLICATION_SCOPE;
use crate::error::BitsError;
use crate::testutil::seeded_data;

fn test_scope() -> Pol {
    Pol::new(DEFAULT_DEDUPLICATION_SCOPE).unwrap()
}

fn chunk_all(data: &[u8]) -> Vec<Vec<u8>> {
    let mut chunker = Chunker::new(Cursor::new(data), test_scope());
    let mut buf = vec![0u8; CHUNK_BUFFER_SIZE];
    let mut chunks = Vec::new();
    while let Some(n) = chunker.next_chunk(&mut buf).unwrap() {
        chunks.push(buf[..n].to_vec());
    }
    chunks
}

#[test]
fn scope_validation() {
    assert!(matches!(Pol::new(0), Err(BitsError::Config(_))));
    assert!(matches!(Pol::new(0x10), Err(BitsError::Config(_))));
    assert!(matches!(Pol::new(0x3), Err(BitsError::Config(_))));
    assert!(Pol::new(DEFAULT_DEDUPLICATION_SCOPE).is_ok());
}

#[test]
fn chunks_cover_entire_input() {
    let data = seeded_data(7, 3 * 1024 * 1024);
    let chunks = chunk_all(&data);
    let rejoined: Vec<u8> = chunks.concat();
    assert_eq!(rejoined, data);
}

#[test]
fn deterministic_cut_points() {
    // Above the maximum chunk size the clamp guarantees several chunks.
    let data = seeded_data(7, 9 * 1024 * 1024);
    let lengths1: Vec<usize> = chunk_all(&data).iter().map(Vec::len).collect();
    let lengths2: Vec<usize> = chunk_all(&data).iter().map(Vec::len).collect();
    assert_eq!(lengths1, lengths2);
    assert!(lengths1.len() > 1, "expected multiple chunks");
}

#[test]
fn cut_points_independent_of_read_granularity() {
    // A reader that trickles bytes must produce the same boundaries as a
    // single contiguous slice.
    struct Trickle<'a>(&'a [u8]);
    impl std::io::Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.0.len().min(buf.len()).min(997);
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    let data = seeded_data(11, 2 * 1024 * 1024);
    let direct: Vec<usize> = chunk_all(&data).iter().map(Vec::len).collect();

    let mut chunker = Chunker::new(Trickle(&data), test_scope());
    let mut buf = vec![0u8; CHUNK_BUFFER_SIZE];
    let mut trickled = Vec::new();
    while let Some(n) = chunker.next_chunk(&mut buf).unwrap() {
        trickled.push(n);
    }
    assert_eq!(direct, trickled);
}

#[test]
fn empty_input_yields_no_chunks() {
    assert!(chunk_all(b"").is_empty());
}

#[test]
fn input_below_min_size_is_one_chunk() {
    let data = seeded_data(3, 100);
    let chunks = chunk_all(&data);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0], data);

    let chunks = chunk_all(b"x");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0], b"x");
}

#[test]
fn size_bounds_hold() {
    let data = seeded_data(5, 6 * 1024 * 1024);
    let chunks = chunk_all(&data);
    for (i, chunk) in chunks.iter().enumerate() {
        assert!(chunk.len() <= MAX_CHUNK_SIZE, "chunk {i} above max");
        if i + 1 < chunks.len() {
            assert!(chunk.len() >= MIN_CHUNK_SIZE, "chunk {i} below min");
        }
    }
}

#[test]
fn zero_digest_cuts_at_min_size() {
    // An all-zero window rolls to a zero digest, so uniform zero input is
    // cut at exactly the minimum size.
    let data = vec![0u8; MIN_CHUNK_SIZE * 3];
    let chunks = chunk_all(&data);
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert_eq!(chunk.len(), MIN_CHUNK_SIZE);
    }
}

#[test]
fn undersized_buffer_is_reported() {
    let data = vec![0u8; MIN_CHUNK_SIZE];
    let mut chunker = Chunker::new(Cursor::new(&data), test_scope());
    let mut buf = vec![0u8; MIN_CHUNK_SIZE / 2];
    match chunker.next_chunk(&mut buf) {
        Err(BitsError::BufferExhausted { limit }) => assert_eq!(limit, MIN_CHUNK_SIZE / 2),
        other => panic!("expected BufferExhausted, got {other:?}"),
    }
}

#[test]
fn single_byte_edit_shifts_few_boundaries() {
    let a = seeded_data(1, 5 * 1024 * 1024);
    let mut b = a.clone();
    b[2_621_440] ^= 0xFF;

    let keys_a: Vec<ChunkKey> = chunk_all(&a).iter().map(|c| ChunkKey::digest(c)).collect();
    let keys_b: Vec<ChunkKey> = chunk_all(&b).iter().map(|c| ChunkKey::digest(c)).collect();
    assert_ne!(keys_a, keys_b);

    // Keys of A found in B, preserving relative order.
    let mut shared = 0usize;
    let mut cursor = 0usize;
    for key in &keys_a {
        if let Some(at) = keys_b[cursor..].iter().position(|k| k == key) {
            shared += 1;
            cursor += at + 1;
        }
    }
    assert!(
        shared + 2 >= keys_a.len(),
        "only {shared} of {} keys survive a one-byte edit",
        keys_a.len()
    );
}

#[test]
fn shared_prefix_until_edit() {
    let a = seeded_data(9, 4 * 1024 * 1024);
    let mut b = a.clone();
    let last = b.len() - 1;
    b[last] ^= 0x01;

    let keys_a: Vec<ChunkKey> = chunk_all(&a).iter().map(|c| ChunkKey::digest(c)).collect();
    let keys_b: Vec<ChunkKey> = chunk_all(&b).iter().map(|c| ChunkKey::digest(c)).collect();

    // Editing the final byte leaves every chunk but the last untouched.
    assert_eq!(keys_a.len(), keys_b.len());
    assert_eq!(keys_a[..keys_a.len() - 1], keys_b[..keys_b.len() - 1]);
    assert_ne!(keys_a.last(), keys_b.last());
}
