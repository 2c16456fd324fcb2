//! Manifest framing: the fixed header/footer sentinels and the key-line
//! codec shared by every pipeline operation.

use std::io::{BufRead, Read};

use bits_types::{ChunkKey, KEY_HEX_LEN};

use crate::error::{BitsError, Result};

/// First line of every manifest. 64 ASCII characters plus a newline, so a
/// header line is indistinguishable in length from a key line.
pub const MANIFEST_HEADER: &[u8; 65] =
    b"--- to use this file decode it with the 'git-bits' extension ---\n";

/// Last line of every manifest. Same length contract as the header.
pub const MANIFEST_FOOTER: &[u8; 65] =
    b"----------------------- end of chunks --------------------------\n";

/// Length of one manifest line: a hex-encoded key plus its newline. Every
/// manifest blob's size is a multiple of this.
pub const KEY_LINE_LEN: usize = KEY_HEX_LEN + 1;

/// One decoded line of a manifest stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestLine {
    Header,
    Footer,
    Key(ChunkKey),
}

/// Streaming reader over manifest lines.
///
/// Frame sentinels are reported as their own variants so callers decide
/// whether to echo them (fetch) or skip them (combine, push). Inputs without
/// framing (a bare key list, e.g. scan output) parse fine: every line is
/// simply a key line.
pub struct ManifestReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(KEY_LINE_LEN),
        }
    }

    fn decode(line: &[u8]) -> Result<ManifestLine> {
        if line == &MANIFEST_HEADER[..KEY_HEX_LEN] {
            return Ok(ManifestLine::Header);
        }
        if line == &MANIFEST_FOOTER[..KEY_HEX_LEN] {
            return Ok(ManifestLine::Footer);
        }
        let text = std::str::from_utf8(line)
            .map_err(|_| BitsError::framing(line, "line is not valid UTF-8"))?;
        let key = ChunkKey::from_hex(text)
            .map_err(|e| BitsError::framing(line, e.to_string()))?;
        Ok(ManifestLine::Key(key))
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<ManifestLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        // A valid line is at most one key line; reading past that is a
        // framing error, never an unbounded buffer.
        let mut limited = (&mut self.inner).take(KEY_LINE_LEN as u64 + 1);
        match limited.read_until(b'\n', &mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                if self.line.len() > KEY_LINE_LEN {
                    return Some(Err(BitsError::framing(
                        &self.line,
                        "line exceeds the key line length",
                    )));
                }
                if self.line.last() == Some(&b'\n') {
                    self.line.pop();
                }
                Some(Self::decode(&self.line))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Run `f` for every chunk key in the stream, skipping frame lines.
pub fn for_each_key<R, F>(reader: R, mut f: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(ChunkKey) -> Result<()>,
{
    for line in ManifestReader::new(reader) {
        if let ManifestLine::Key(key) = line? {
            f(key)?;
        }
    }
    Ok(())
}
