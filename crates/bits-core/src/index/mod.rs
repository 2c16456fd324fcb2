//! Remote-known chunk index.
//!
//! An in-memory set of chunk keys believed to exist at the remote, persisted
//! as a single blob on a dedicated branch of the host repository. Sharing
//! the branch gives collaborators knowledge of uploaded chunks, so push can
//! skip re-uploads. The index is advisory: losing it costs redundant
//! uploads, never correctness.
//!
//! Persistence uses git plumbing only: `hash-object` for the blob, `mktree`
//! for the single-entry tree, `commit-tree` for the commit, `update-ref`
//! for the branch. Save keeps a single-parent chain; concurrent writers are
//! reconciled by a set-union merge commit with both heads as parents.

use std::collections::HashSet;
use std::process::Output;

use serde::{Deserialize, Serialize};
use tracing::debug;

use bits_types::ChunkKey;

use crate::error::{BitsError, Result};
use crate::git::Git;

/// Branch the index lives on.
pub const INDEX_BRANCH: &str = "refs/heads/bits_chunk_idx";

/// Name of the single tree entry holding the serialized set.
const INDEX_FILE: &str = "remote.cidx";

/// Fixed message for every index commit.
const COMMIT_MESSAGE: &str = "chunk index updated";

const INDEX_FORMAT_VERSION: u32 = 1;

/// Versioned on-disk envelope. Keys are sorted before encoding so equal
/// sets serialize to identical bytes.
#[derive(Serialize, Deserialize)]
struct IndexBlob {
    version: u32,
    keys: Vec<ChunkKey>,
}

pub struct RemoteIndex {
    branch: String,
    set: HashSet<ChunkKey>,
}

impl Default for RemoteIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteIndex {
    pub fn new() -> Self {
        Self {
            branch: INDEX_BRANCH.to_string(),
            set: HashSet::new(),
        }
    }

    pub fn has(&self, key: &ChunkKey) -> bool {
        self.set.contains(key)
    }

    pub fn add(&mut self, key: ChunkKey) {
        self.set.insert(key);
    }

    pub fn clear(&mut self) {
        self.set.clear();
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub(crate) fn serialize(set: &HashSet<ChunkKey>) -> Result<Vec<u8>> {
        let mut keys: Vec<ChunkKey> = set.iter().copied().collect();
        keys.sort();
        let blob = IndexBlob {
            version: INDEX_FORMAT_VERSION,
            keys,
        };
        Ok(rmp_serde::to_vec(&blob)?)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> Result<HashSet<ChunkKey>> {
        let blob: IndexBlob = rmp_serde::from_slice(bytes)?;
        if blob.version != INDEX_FORMAT_VERSION {
            return Err(BitsError::IndexVersion(blob.version));
        }
        Ok(blob.keys.into_iter().collect())
    }

    /// Head commit of the index branch, `None` when the branch does not
    /// exist yet (`show-ref` exits 1).
    fn branch_head(&self, git: &Git) -> Result<Option<String>> {
        let output = git.run_unchecked(&["show-ref", "-s", &self.branch], None)?;
        if output.status.success() {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if sha.is_empty() {
                return Err(BitsError::Git {
                    args: "show-ref".into(),
                    status: 0,
                    stderr: "show-ref produced no commit".into(),
                });
            }
            return Ok(Some(sha));
        }
        match output.status.code() {
            Some(1) => Ok(None),
            _ => Err(Git::command_error(
                &["show-ref", "-s", &self.branch],
                &output,
            )),
        }
    }

    /// Write blob, tree and commit for `set`, returning the commit sha.
    fn write_commit(git: &Git, set: &HashSet<ChunkKey>, parents: &[&str]) -> Result<String> {
        let blob = Self::serialize(set)?;
        let blob_sha = run_object_write(git, &["hash-object", "--stdin", "-w"], &blob)?;

        let tree_entry = format!("100644 blob {blob_sha}\t{INDEX_FILE}");
        let tree_sha = run_object_write(git, &["mktree"], tree_entry.as_bytes())?;

        let mut args: Vec<&str> = vec!["commit-tree", &tree_sha];
        for &parent in parents {
            args.push("-p");
            args.push(parent);
        }
        run_object_write(git, &args, COMMIT_MESSAGE.as_bytes())
    }

    /// Read and decode the blob of an index commit.
    fn read_commit(&self, git: &Git, commit: &str) -> Result<HashSet<ChunkKey>> {
        let spec = format!("{commit}:{INDEX_FILE}");
        let bytes = git.run(&["cat-file", "blob", &spec], None)?;
        Self::deserialize(&bytes)
    }

    /// Persist the in-memory set as a new commit on top of the current
    /// branch head, keeping the single-parent chain.
    pub fn save(&self, git: &Git) -> Result<()> {
        let head = self.branch_head(git)?;
        let parents: Vec<&str> = head.as_deref().into_iter().collect();
        let commit = Self::write_commit(git, &self.set, &parents)?;
        git.run(&["update-ref", &self.branch, &commit], None)?;
        debug!(commit = %commit, keys = self.set.len(), "saved chunk index");
        Ok(())
    }

    /// Replace the in-memory set with the branch's persisted contents. A
    /// missing branch is a no-op.
    pub fn load(&mut self, git: &Git) -> Result<()> {
        let Some(head) = self.branch_head(git)? else {
            return Ok(());
        };
        self.set = self.read_commit(git, &head)?;
        debug!(keys = self.set.len(), "loaded chunk index");
        Ok(())
    }

    /// Fetch the index branch from `remote` into the local branch.
    ///
    /// A fast-forward completes in the single fetch. A non-fast-forward is
    /// expected under concurrent writers: both heads' sets are decoded,
    /// unioned, and committed with both heads as parents. The in-memory set
    /// is not refreshed; call `load` afterwards.
    pub fn pull(&self, git: &Git, remote: &str) -> Result<()> {
        let refspec = format!("{0}:{0}", self.branch);
        let fetch_args = ["fetch", remote, refspec.as_str()];
        let output = git.run_unchecked(&fetch_args, None)?;
        if output.status.success() {
            return Ok(());
        }

        // The fetch still records what it found in FETCH_HEAD; if even that
        // is unresolvable the remote branch does not exist yet.
        let fetched_head = match git.run_unchecked(&["rev-parse", "FETCH_HEAD"], None)? {
            out if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            }
            _ => return Err(BitsError::RemoteBranchMissing),
        };

        let local_head = self
            .branch_head(git)?
            .ok_or_else(|| Git::command_error(&fetch_args, &output))?;

        debug!(
            local = %local_head,
            fetched = %fetched_head,
            "non-fast-forward on index pull, union-merging"
        );

        let mut union = self.read_commit(git, &local_head)?;
        union.extend(self.read_commit(git, &fetched_head)?);

        let merge = Self::write_commit(git, &union, &[&local_head, &fetched_head])?;
        git.run(&["update-ref", &self.branch, &merge], None)?;
        Ok(())
    }

    /// Send the local index branch to `remote`.
    pub fn push_ref(&self, git: &Git, remote: &str) -> Result<()> {
        let refspec = format!("{0}:{0}", self.branch);
        git.run(&["push", remote, &refspec], None)?;
        Ok(())
    }
}

/// Run a plumbing command that writes an object and prints its sha.
fn run_object_write(git: &Git, args: &[&str], stdin: &[u8]) -> Result<String> {
    let output: Output = git.run_unchecked(args, Some(stdin))?;
    if !output.status.success() {
        return Err(Git::command_error(args, &output));
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(BitsError::Git {
            args: args.join(" "),
            status: 0,
            stderr: "command produced no object id".into(),
        });
    }
    Ok(sha)
}
