//! Content-defined chunking with a Rabin rolling hash.
//!
//! Boundaries depend only on the bytes inside a 64-byte window and the
//! deduplication scope (a polynomial over GF(2)), so two repositories
//! sharing a scope cut identical chunks and deduplicate against each other.

use std::io::Read;

use crate::error::{BitsError, Result};

/// Smallest chunk the chunker will emit, except for a final short chunk.
pub const MIN_CHUNK_SIZE: usize = 512 * 1024;

/// Largest chunk the chunker will emit; a cut is forced at this size.
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Canonical size for the caller-provided chunk buffer.
pub const CHUNK_BUFFER_SIZE: usize = MAX_CHUNK_SIZE;

/// A boundary is cut where `digest & SPLIT_MASK == 0`, giving an expected
/// chunk size of 1 MiB between the min/max clamps.
const SPLIT_MASK: u64 = (1 << 20) - 1;

/// Rolling-hash window width in bytes.
const WINDOW_SIZE: usize = 64;

/// Size of the internal read-ahead buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Degree of a polynomial over GF(2); `deg(0) == -1`.
fn deg(p: u64) -> i32 {
    63 - p.leading_zeros() as i32
}

/// Reduce `nom` modulo `denom` in GF(2).
fn pol_mod(mut nom: u64, denom: u64) -> u64 {
    while deg(nom) >= deg(denom) {
        nom ^= denom << (deg(nom) - deg(denom));
    }
    nom
}

/// The deduplication scope: an odd polynomial over GF(2) of degree 9..=53
/// that parameterises the rolling hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pol(u64);

impl Pol {
    pub fn new(value: u64) -> Result<Self> {
        if value == 0 {
            return Err(BitsError::Config(
                "deduplication scope must not be zero".into(),
            ));
        }
        if value & 1 == 0 {
            return Err(BitsError::Config(format!(
                "deduplication scope {value:#x} must be an odd polynomial"
            )));
        }
        let d = deg(value);
        if !(9..=53).contains(&d) {
            return Err(BitsError::Config(format!(
                "deduplication scope {value:#x} has degree {d}, expected 9..=53"
            )));
        }
        Ok(Pol(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    fn degree(&self) -> i32 {
        deg(self.0)
    }

    /// Append one byte to a reduced hash state.
    fn append_byte(&self, hash: u64, b: u8) -> u64 {
        pol_mod((hash << 8) | b as u64, self.0)
    }
}

/// Per-scope lookup tables.
///
/// `out[b]` is the hash of byte `b` followed by `WINDOW_SIZE - 1` zero
/// bytes; XOR-ing it removes the byte sliding out of the window. `mod_[i]`
/// folds the top eight bits of the shifted digest back under the scope
/// polynomial in a single XOR.
struct Tables {
    out: [u64; 256],
    mod_: [u64; 256],
}

impl Tables {
    fn build(pol: Pol) -> Box<Tables> {
        let mut tables = Box::new(Tables {
            out: [0u64; 256],
            mod_: [0u64; 256],
        });
        for b in 0..256usize {
            let mut h = pol.append_byte(0, b as u8);
            for _ in 0..WINDOW_SIZE - 1 {
                h = pol.append_byte(h, 0);
            }
            tables.out[b] = h;
        }
        let k = pol.degree();
        for b in 0..256u64 {
            tables.mod_[b as usize] = pol_mod(b << k, pol.0) | (b << k);
        }
        tables
    }
}

/// Streaming content-defined chunker.
///
/// The caller provides the chunk buffer and it is reused across calls; the
/// filled prefix is exactly the byte range of the chunk, so concatenating
/// all chunks reproduces the input.
pub struct Chunker<R> {
    reader: R,
    tables: Box<Tables>,
    pol_shift: u32,
    window: [u8; WINDOW_SIZE],
    wpos: usize,
    digest: u64,
    rbuf: Vec<u8>,
    rpos: usize,
    rlen: usize,
    eof: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(reader: R, scope: Pol) -> Self {
        Self {
            reader,
            tables: Tables::build(scope),
            pol_shift: scope.degree() as u32 - 8,
            window: [0u8; WINDOW_SIZE],
            wpos: 0,
            digest: 0,
            rbuf: vec![0u8; READ_BUFFER_SIZE],
            rpos: 0,
            rlen: 0,
            eof: false,
        }
    }

    fn append(&mut self, b: u8) {
        let index = (self.digest >> self.pol_shift) as usize;
        self.digest <<= 8;
        self.digest |= b as u64;
        self.digest ^= self.tables.mod_[index];
    }

    fn slide(&mut self, b: u8) {
        let out = self.window[self.wpos];
        self.window[self.wpos] = b;
        self.digest ^= self.tables.out[out as usize];
        self.wpos = (self.wpos + 1) % WINDOW_SIZE;
        self.append(b);
    }

    fn refill(&mut self) -> Result<()> {
        loop {
            match self.reader.read(&mut self.rbuf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.rpos = 0;
                    self.rlen = n;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read the next chunk into `buf[..n]` and return `n`, or `None` at end
    /// of input. Fails with `BufferExhausted` when a chunk would outgrow
    /// `buf` before a boundary or the maximum size is reached.
    pub fn next_chunk(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.digest = 0;
        self.window = [0u8; WINDOW_SIZE];
        self.wpos = 0;

        let mut n = 0usize;
        loop {
            if self.rpos == self.rlen {
                if self.eof {
                    break;
                }
                self.refill()?;
                if self.eof {
                    break;
                }
            }
            if n == buf.len() {
                return Err(BitsError::BufferExhausted { limit: buf.len() });
            }
            let b = self.rbuf[self.rpos];
            self.rpos += 1;
            buf[n] = b;
            n += 1;
            self.slide(b);

            if n >= MIN_CHUNK_SIZE && self.digest & SPLIT_MASK == 0 {
                return Ok(Some(n));
            }
            if n >= MAX_CHUNK_SIZE {
                return Ok(Some(n));
            }
        }

        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(n))
        }
    }
}
