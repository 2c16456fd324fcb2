use std::fs::{self, File};
use std::io::{self, Read};
use std::path::PathBuf;

use bits_types::{ChunkKey, KEY_HEX_LEN};

use crate::error::{BitsError, Result};
use crate::remote::Remote;

/// Chunk remote backed by a flat directory: one file per chunk, named by
/// the full hex form of its key, mirroring the bucket layout.
pub struct DirRemote {
    root: PathBuf,
}

impl DirRemote {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl Remote for DirRemote {
    fn chunk_read(&self, key: &ChunkKey) -> Result<Box<dyn Read + Send>> {
        let path = self.root.join(key.to_hex());
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BitsError::Remote(format!(
                "chunk {key} not found at remote path"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn chunk_write(&self, key: &ChunkKey, body: &mut dyn Read) -> Result<u64> {
        let mut file = File::create(self.root.join(key.to_hex()))?;
        Ok(io::copy(body, &mut file)?)
    }

    fn list_keys(&self, visit: &mut dyn FnMut(ChunkKey) -> Result<()>) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() != KEY_HEX_LEN {
                continue;
            }
            if let Ok(key) = ChunkKey::from_hex(name) {
                visit(key)?;
            }
        }
        Ok(())
    }
}
