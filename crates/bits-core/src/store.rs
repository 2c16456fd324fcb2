//! Local content-addressed chunk store.
//!
//! A chunk with key `K` lives at `<root>/<hex(K[0..2])>/<hex(K[2..32])>` and
//! holds the raw ciphertext, nothing else. Creation uses the filesystem's
//! exclusive-create: whoever wins writes the file, and `AlreadyExists` is a
//! success signal for everyone else. Chunks are never mutated or deleted.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use bits_types::ChunkKey;

use crate::error::{BitsError, Result};

pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the chunk file for `key`, optionally creating the shard
    /// directory.
    pub fn path_for(&self, key: &ChunkKey, create_dirs: bool) -> Result<PathBuf> {
        let shard = self.root.join(key.shard_prefix());
        if create_dirs {
            fs::create_dir_all(&shard)?;
        }
        Ok(shard.join(key.tail_hex()))
    }

    /// Exclusively create the chunk file. Returns `None` when the chunk
    /// already exists (a concurrent or earlier writer won, which counts as
    /// success), `Some(file)` when this caller owns the write.
    pub fn create(&self, key: &ChunkKey) -> Result<Option<File>> {
        let path = self.path_for(key, true)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(key = %key, "chunk already present");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a chunk from `body`. Returns `true` when bytes were written,
    /// `false` when the chunk was already present. A failed copy removes
    /// the partial file so no torn chunk is ever observable.
    pub fn put(&self, key: &ChunkKey, body: &mut dyn Read) -> Result<bool> {
        let Some(mut file) = self.create(key)? else {
            return Ok(false);
        };
        if let Err(e) = io::copy(body, &mut file) {
            drop(file);
            self.remove_partial(key);
            return Err(e.into());
        }
        Ok(true)
    }

    /// Read-only handle to a chunk's ciphertext.
    pub fn open_chunk(&self, key: &ChunkKey) -> Result<File> {
        let path = self.path_for(key, false)?;
        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BitsError::ChunkMissing(*key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the chunk exists, by path stat.
    pub fn has(&self, key: &ChunkKey) -> bool {
        self.path_for(key, false)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Best-effort removal of a partially written chunk file.
    pub(crate) fn remove_partial(&self, key: &ChunkKey) {
        if let Ok(path) = self.path_for(key, false) {
            let _ = fs::remove_file(path);
        }
    }
}
