//! Remote chunk stores.
//!
//! A remote is a capability set: per-key read stream, per-key write stream,
//! and a full listing of known keys. The S3 implementation talks to any
//! S3-compatible bucket; the directory implementation serves the same
//! contract from a plain filesystem path.

pub mod dir;
pub mod s3;

use std::io::Read;

use bits_types::ChunkKey;

use crate::config::{BitsConfig, DEFAULT_S3_DOMAIN, DEFAULT_S3_REGION};
use crate::error::{BitsError, Result};

pub trait Remote: Send + Sync {
    /// Open a read stream for a chunk's ciphertext.
    fn chunk_read(&self, key: &ChunkKey) -> Result<Box<dyn Read + Send>>;

    /// Stream a chunk's ciphertext to the remote. Returns the byte count.
    fn chunk_write(&self, key: &ChunkKey, body: &mut dyn Read) -> Result<u64>;

    /// Visit every chunk key in the remote exactly once. Objects whose
    /// names do not decode as a full-width key are skipped; the backing
    /// bucket may hold unrelated objects.
    fn list_keys(&self, visit: &mut dyn FnMut(ChunkKey) -> Result<()>) -> Result<()>;
}

/// Build the configured remote, if any. A bucket takes precedence over a
/// directory path; neither configured means no remote, and operations that
/// need one fail cleanly later.
pub fn from_config(conf: &BitsConfig) -> Result<Option<Box<dyn Remote>>> {
    if let Some(bucket) = &conf.bucket {
        let access_key = conf.access_key.as_deref().ok_or_else(|| {
            BitsError::Config("bucket configured but access key is missing".into())
        })?;
        let secret_key = conf.secret_key.as_deref().ok_or_else(|| {
            BitsError::Config("bucket configured but secret key is missing".into())
        })?;
        let remote = s3::S3Remote::new(
            bucket,
            conf.domain.as_deref().unwrap_or(DEFAULT_S3_DOMAIN),
            conf.region.as_deref().unwrap_or(DEFAULT_S3_REGION),
            access_key,
            secret_key,
        )?;
        return Ok(Some(Box::new(remote)));
    }
    if let Some(path) = &conf.remote_path {
        return Ok(Some(Box::new(dir::DirRemote::new(path)?)));
    }
    Ok(None)
}
