//! Repository handle and the split/combine/fetch/push/pull pipeline driver.
//!
//! A handle is created inside a git worktree and owns the git invoker, the
//! local chunk store (under the git directory), the configured remote, and
//! the remote-known index. All five operations are stream filters: stdout
//! carries data, every diagnostic goes through tracing to stderr.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use bits_types::{ChunkKey, KEY_HEX_LEN};

use crate::chunker::{Chunker, Pol, CHUNK_BUFFER_SIZE};
use crate::config::BitsConfig;
use crate::crypto;
use crate::error::{BitsError, Result};
use crate::git::Git;
use crate::index::RemoteIndex;
use crate::manifest::{
    for_each_key, ManifestLine, ManifestReader, KEY_LINE_LEN, MANIFEST_FOOTER, MANIFEST_HEADER,
};
use crate::remote::{self, Remote};
use crate::store::ChunkStore;

pub struct Repository {
    git: Git,
    root_dir: PathBuf,
    store: ChunkStore,
    config: BitsConfig,
    remote: Option<Box<dyn Remote>>,
    index: RemoteIndex,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root_dir", &self.root_dir)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Open the repository containing `dir`.
    ///
    /// Fails with `RepoNotFound` when `dir` is not inside a git worktree.
    /// The chunk store lives at `<git-dir>/chunks`; configuration comes
    /// from the repository's `bits.*` git config.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let probe = Git::new(dir);
        let root_dir = match probe.run_trimmed(&["rev-parse", "--show-toplevel"]) {
            Ok(root) if !root.is_empty() => PathBuf::from(root),
            _ => return Err(BitsError::RepoNotFound(dir.display().to_string())),
        };

        let git = Git::new(&root_dir);
        let git_dir = root_dir.join(git.run_trimmed(&["rev-parse", "--git-dir"])?);
        let store = ChunkStore::open(git_dir.join("chunks"))?;
        let config = BitsConfig::load(&git)?;
        let remote = remote::from_config(&config)?;

        Ok(Self {
            git,
            root_dir,
            store,
            config,
            remote,
            index: RemoteIndex::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        git: Git,
        root_dir: PathBuf,
        store: ChunkStore,
        config: BitsConfig,
        remote: Option<Box<dyn Remote>>,
    ) -> Self {
        Self {
            git,
            root_dir,
            store,
            config,
            remote,
            index: RemoteIndex::new(),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn config(&self) -> &BitsConfig {
        &self.config
    }

    pub fn index(&self) -> &RemoteIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut RemoteIndex {
        &mut self.index
    }

    /// Split a plaintext stream into encrypted, deduplicated chunks and
    /// write the manifest to `writer`.
    ///
    /// Input that already is a manifest is copied through verbatim, which
    /// makes split idempotent when git runs the clean filter twice. The
    /// footer is written on the error path too; a failed split exits
    /// non-zero and its partial output is not a valid result.
    pub fn split<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<()> {
        let scope = Pol::new(self.config.deduplication_scope)?;

        let mut head = [0u8; KEY_LINE_LEN];
        let head_len = read_up_to(&mut reader, &mut head)?;
        if head_len == KEY_LINE_LEN && head == *MANIFEST_HEADER {
            writer.write_all(&head)?;
            io::copy(&mut reader, &mut writer)?;
            return Ok(());
        }

        writer.write_all(MANIFEST_HEADER)?;
        let input = Cursor::new(head[..head_len].to_vec()).chain(reader);
        let split_result = self.split_chunks(input, &mut writer, scope);
        let footer_result = writer.write_all(MANIFEST_FOOTER);
        split_result?;
        footer_result?;
        Ok(())
    }

    fn split_chunks<R: Read, W: Write>(
        &self,
        input: R,
        writer: &mut W,
        scope: Pol,
    ) -> Result<()> {
        let mut chunker = Chunker::new(input, scope);
        let mut buf = vec![0u8; CHUNK_BUFFER_SIZE];
        while let Some(len) = chunker.next_chunk(&mut buf)? {
            let chunk = &mut buf[..len];
            let key = ChunkKey::digest(chunk);
            match self.store.create(&key)? {
                None => debug!(key = %key, size = len, "chunk staged (deduplicated)"),
                Some(mut file) => {
                    crypto::apply_in_place(&key, chunk);
                    if let Err(e) = file.write_all(chunk) {
                        drop(file);
                        self.store.remove_partial(&key);
                        return Err(e.into());
                    }
                    debug!(key = %key, size = len, "chunk staged");
                }
            }
            writeln!(writer, "{}", key.to_hex())?;
        }
        Ok(())
    }

    /// Reconstitute the plaintext named by a manifest from the local store.
    ///
    /// Combine is local-only: a key whose chunk is absent fails with
    /// `ChunkMissing` (run fetch first).
    pub fn combine<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<()> {
        for_each_key(io::BufReader::new(reader), |key| {
            let file = self.store.open_chunk(&key)?;
            let n = crypto::decrypt_copy(&key, file, &mut writer)?;
            debug!(key = %key, bytes = n, "chunk combined");
            Ok(())
        })
    }

    /// Fill the local store with any chunks named by the manifest that are
    /// missing, streaming them from the remote. Frame lines and keys are
    /// echoed in order, so the output is itself a valid manifest.
    pub fn fetch<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<()> {
        for line in ManifestReader::new(io::BufReader::new(reader)) {
            match line? {
                ManifestLine::Header => writer.write_all(MANIFEST_HEADER)?,
                ManifestLine::Footer => writer.write_all(MANIFEST_FOOTER)?,
                ManifestLine::Key(key) => {
                    self.fetch_chunk(&key)?;
                    writeln!(writer, "{}", key.to_hex())?;
                }
            }
        }
        Ok(())
    }

    fn fetch_chunk(&self, key: &ChunkKey) -> Result<()> {
        if self.store.has(key) {
            debug!(key = %key, "fetch: chunk already present");
            return Ok(());
        }
        let remote = self.remote.as_deref().ok_or(BitsError::NoRemote)?;

        // Exclusive create: losing the race to a concurrent fetch is success.
        let Some(mut file) = self.store.create(key)? else {
            debug!(key = %key, "fetch: chunk fetched concurrently");
            return Ok(());
        };
        let copied = remote
            .chunk_read(key)
            .and_then(|mut body| Ok(io::copy(&mut body, &mut file)?));
        match copied {
            Ok(n) => {
                info!(key = %key, bytes = n, "chunk fetched");
                Ok(())
            }
            Err(e) => {
                drop(file);
                self.store.remove_partial(key);
                Err(e)
            }
        }
    }

    /// Upload every chunk named on `reader` that the remote-known index
    /// does not already record, then persist and publish the index.
    ///
    /// The index pre-check is advisory: a stale or lost index causes
    /// redundant uploads, never incorrect behavior. Uploaded chunks stay
    /// uploaded if a later step fails.
    pub fn push<R: Read>(&mut self, reader: R, remote_name: &str) -> Result<()> {
        let Repository {
            git,
            store,
            remote,
            index,
            ..
        } = self;
        let remote = remote.as_deref().ok_or(BitsError::NoRemote)?;

        // Best effort: on the very first push the remote branch is absent.
        match index.pull(git, remote_name) {
            Ok(()) => {}
            Err(BitsError::RemoteBranchMissing) => {
                debug!("index branch not on remote yet, continuing with local index");
            }
            Err(e) => return Err(e),
        }
        index.load(git)?;

        let mut newly_indexed = 0usize;
        for_each_key(io::BufReader::new(reader), |key| {
            if index.has(&key) {
                debug!(key = %key, "push: chunk already at remote");
                return Ok(());
            }
            let mut file = store.open_chunk(&key)?;
            let n = remote.chunk_write(&key, &mut file)?;
            info!(key = %key, bytes = n, "chunk pushed");
            index.add(key);
            newly_indexed += 1;
            Ok(())
        })?;

        if newly_indexed == 0 {
            debug!("push: nothing new, index unchanged");
            return Ok(());
        }

        index.save(git)?;
        if let Err(rejected) = index.push_ref(git, remote_name) {
            // A collaborator moved the branch between save and push; merge
            // their set with ours and retry once.
            warn!("index push rejected, union-merging and retrying: {rejected}");
            index.pull(git, remote_name)?;
            index.load(git)?;
            index.push_ref(git, remote_name)?;
        }
        Ok(())
    }

    /// Reconstitute every manifest blob of `rev` in the working tree:
    /// fetch missing chunks, combine into a sibling temp file that keeps
    /// the original's mode, rename over the original, and refresh the git
    /// index for the replaced paths. Replaced paths are echoed to `out`.
    pub fn pull<W: Write>(&self, rev: &str, out: &mut W) -> Result<()> {
        let listing = {
            let args = ["ls-tree", "-r", "-l", rev];
            let output = self.git.run_unchecked(&args, None)?;
            if !output.status.success() {
                // A repository without commits has nothing to pull.
                warn!(
                    rev,
                    "ls-tree failed, treating as empty: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return Ok(());
            }
            output.stdout
        };

        let mut replaced: Vec<String> = Vec::new();
        for line in String::from_utf8_lossy(&listing).lines() {
            // <mode> SP <type> SP <object> SP <size> TAB <path>; the tab
            // separates cleanly even when the path contains spaces.
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let fields: Vec<&str> = meta.split_whitespace().collect();
            if fields.len() < 4 || fields[1] != "blob" {
                continue;
            }
            let Ok(size) = fields[3].parse::<u64>() else {
                continue;
            };
            if size == 0 || size % KEY_LINE_LEN as u64 != 0 {
                continue;
            }

            if self.reconstitute(&self.root_dir.join(path))? {
                replaced.push(path.to_string());
            }
        }

        if !replaced.is_empty() {
            let mut stdin_data = replaced.join("\n");
            stdin_data.push('\n');
            self.git.run(
                &["update-index", "-q", "--refresh", "--stdin"],
                Some(stdin_data.as_bytes()),
            )?;
            for path in &replaced {
                info!(path = %path, "reconstituted");
                writeln!(out, "{path}")?;
            }
        }
        Ok(())
    }

    /// Replace one working-tree manifest file with its plaintext. Returns
    /// `false` when the file is absent or does not start with the header.
    fn reconstitute(&self, path: &Path) -> Result<bool> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let mut head = [0u8; KEY_HEX_LEN];
        if read_up_to(&mut file, &mut head)? < KEY_HEX_LEN
            || head != MANIFEST_HEADER[..KEY_HEX_LEN]
        {
            return Ok(false);
        }
        file.seek(SeekFrom::Start(0))?;

        let metadata = file.metadata()?;
        let dir = path.parent().ok_or_else(|| {
            BitsError::Other(format!("file '{}' has no parent directory", path.display()))
        })?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".bits_tmp_")
            .tempfile_in(dir)?;
        fs::set_permissions(tmp.path(), metadata.permissions())?;

        // The fetched manifest is key lines only; buffering it is bounded
        // by the manifest size, not the file size.
        let mut manifest = Vec::new();
        self.fetch(&mut file, &mut manifest)?;
        self.combine(Cursor::new(manifest), tmp.as_file_mut())?;

        tmp.persist(path).map_err(|e| BitsError::Io(e.error))?;
        Ok(true)
    }
}

/// Read until `buf` is full or the stream ends; returns the filled length.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
