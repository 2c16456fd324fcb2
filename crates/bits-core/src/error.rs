use thiserror::Error;

use bits_types::ChunkKey;

pub type Result<T> = std::result::Result<T, BitsError>;

#[derive(Debug, Error)]
pub enum BitsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid manifest line '{line}': {reason}")]
    Framing { line: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("no chunk remote configured")]
    NoRemote,

    #[error("chunk {0} not found in the local store")]
    ChunkMissing(ChunkKey),

    #[error("chunk exceeds buffer of {limit} bytes")]
    BufferExhausted { limit: usize },

    #[error("not a git repository: {0}")]
    RepoNotFound(String),

    #[error("`git {args}` exited with {status}: {stderr}")]
    Git {
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("index branch does not exist on the remote")]
    RemoteBranchMissing,

    #[error("index blob version {0} is not supported")]
    IndexVersion(u32),

    #[error("index serialization error: {0}")]
    IndexEncode(#[from] rmp_serde::encode::Error),

    #[error("index deserialization error: {0}")]
    IndexDecode(#[from] rmp_serde::decode::Error),

    #[error("{0}")]
    Other(String),
}

impl BitsError {
    /// Build a framing error with an excerpt of the offending line.
    pub(crate) fn framing(line: &[u8], reason: impl Into<String>) -> Self {
        let mut excerpt = String::from_utf8_lossy(line).into_owned();
        // Truncate on a char boundary; lossy decoding produces multibyte
        // replacement chars that can straddle a fixed byte offset.
        let end = excerpt
            .char_indices()
            .nth(80)
            .map_or(excerpt.len(), |(i, _)| i);
        if end < excerpt.len() {
            excerpt.truncate(end);
            excerpt.push('…');
        }
        BitsError::Framing {
            line: excerpt,
            reason: reason.into(),
        }
    }
}
