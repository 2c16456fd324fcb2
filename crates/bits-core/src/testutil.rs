use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::TempDir;

use bits_types::ChunkKey;

use crate::config::BitsConfig;
use crate::error::{BitsError, Result};
use crate::git::Git;
use crate::remote::Remote;
use crate::repo::Repository;
use crate::store::ChunkStore;

/// In-memory chunk remote with operation counters. Thread-safe via Mutex.
pub struct MemoryRemote {
    objects: Mutex<HashMap<ChunkKey, Vec<u8>>>,
    pub uploads: AtomicUsize,
    pub downloads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn insert(&self, key: ChunkKey, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key, data);
    }
}

impl Remote for Arc<MemoryRemote> {
    fn chunk_read(&self, key: &ChunkKey) -> Result<Box<dyn Read + Send>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock().unwrap();
        match objects.get(key) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(BitsError::Remote(format!("chunk {key} not in remote"))),
        }
    }

    fn chunk_write(&self, key: &ChunkKey, body: &mut dyn Read) -> Result<u64> {
        let mut data = Vec::new();
        body.read_to_end(&mut data)?;
        let n = data.len() as u64;
        self.objects.lock().unwrap().insert(*key, data);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    fn list_keys(&self, visit: &mut dyn FnMut(ChunkKey) -> Result<()>) -> Result<()> {
        let keys: Vec<ChunkKey> = self.objects.lock().unwrap().keys().copied().collect();
        for key in keys {
            visit(key)?;
        }
        Ok(())
    }
}

/// A repository rooted in a scratch directory, without any git state.
/// Suitable for the pure pipeline operations (split, combine, fetch).
pub fn scratch_repo(dir: &TempDir, remote: Option<Box<dyn Remote>>) -> Repository {
    let root = dir.path().to_path_buf();
    let store = ChunkStore::open(root.join("chunks")).expect("chunk store");
    Repository::from_parts(Git::new(&root), root, store, BitsConfig::default(), remote)
}

/// Deterministic pseudo-random payload.
pub fn seeded_data(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Extract the key sequence from manifest bytes.
pub fn manifest_keys(manifest: &[u8]) -> Vec<ChunkKey> {
    let mut keys = Vec::new();
    crate::manifest::for_each_key(Cursor::new(manifest), |k| {
        keys.push(k);
        Ok(())
    })
    .expect("valid manifest");
    keys
}

/// Whether a usable git executable is on the PATH. Tests that drive real
/// git plumbing return early when it is absent.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure (test setup only).
pub fn git_cmd(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a bare repository to act as the shared git remote.
pub fn git_init_remote() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    git_cmd(dir.path(), &["init", "--bare", "--quiet"]);
    dir
}

/// Clone `remote` into a fresh workspace and give it a commit identity.
pub fn git_clone_workspace(remote: &Path) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("ws");
    git_cmd(
        dir.path(),
        &[
            "clone",
            "--quiet",
            remote.to_str().expect("utf-8 path"),
            target.to_str().expect("utf-8 path"),
        ],
    );
    git_cmd(&target, &["config", "user.email", "bits@example.com"]);
    git_cmd(&target, &["config", "user.name", "bits tests"]);
    dir
}

/// Workspace path inside a `git_clone_workspace` tempdir.
pub fn workspace_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("ws")
}

/// Initialize a standalone (non-clone) workspace with a commit identity.
pub fn git_init_workspace() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    git_cmd(dir.path(), &["init", "--quiet"]);
    git_cmd(dir.path(), &["config", "user.email", "bits@example.com"]);
    git_cmd(dir.path(), &["config", "user.name", "bits tests"]);
    dir
}
