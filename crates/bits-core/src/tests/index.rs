use std::collections::HashSet;

use bits_types::ChunkKey;

use crate::error::BitsError;
use crate::git::Git;
use crate::index::{RemoteIndex, INDEX_BRANCH};
use crate::testutil::{
    git_available, git_clone_workspace, git_cmd, git_init_remote, git_init_workspace,
    workspace_path,
};

#[test]
fn serialization_is_deterministic() {
    let keys = [
        ChunkKey::digest(b"k1"),
        ChunkKey::digest(b"k2"),
        ChunkKey::digest(b"k3"),
    ];
    let forward: HashSet<ChunkKey> = keys.iter().copied().collect();
    let reverse: HashSet<ChunkKey> = keys.iter().rev().copied().collect();

    let b1 = RemoteIndex::serialize(&forward).unwrap();
    let b2 = RemoteIndex::serialize(&reverse).unwrap();
    assert_eq!(b1, b2, "equal sets must serialize to identical bytes");
}

#[test]
fn clear_empties_the_set() {
    let mut idx = RemoteIndex::new();
    idx.add(ChunkKey::digest(b"gone"));
    assert_eq!(idx.len(), 1);
    idx.clear();
    assert!(idx.is_empty());
}

#[test]
fn serialization_roundtrip() {
    let set: HashSet<ChunkKey> = (0..100u32)
        .map(|i| ChunkKey::digest(&i.to_le_bytes()))
        .collect();
    let bytes = RemoteIndex::serialize(&set).unwrap();
    let back = RemoteIndex::deserialize(&bytes).unwrap();
    assert_eq!(set, back);
}

#[test]
fn unknown_version_is_rejected() {
    // Same positional layout as the on-disk envelope.
    #[derive(serde::Serialize)]
    struct Blob {
        version: u32,
        keys: Vec<ChunkKey>,
    }
    let bytes = rmp_serde::to_vec(&Blob {
        version: 99,
        keys: Vec::new(),
    })
    .unwrap();
    assert!(matches!(
        RemoteIndex::deserialize(&bytes),
        Err(BitsError::IndexVersion(99))
    ));
}

#[test]
fn save_then_load_roundtrip() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let remote = git_init_remote();
    let ws = git_clone_workspace(remote.path());
    let root = workspace_path(&ws);
    let git = Git::new(&root);

    let k1 = ChunkKey::digest(b"my-key-1");
    let k2 = ChunkKey::digest(b"my-key-2");
    let k3 = ChunkKey::digest(b"my-key-3");

    let mut idx = RemoteIndex::new();
    idx.add(k1);
    idx.add(k2);
    assert!(idx.has(&k1) && idx.has(&k2));
    idx.save(&git).unwrap();

    // Added after save: lives only in memory.
    idx.add(k3);

    let head = git_cmd(&root, &["show-ref", "-s", INDEX_BRANCH]);
    assert!(!head.is_empty(), "save must create the index branch");

    idx.load(&git).unwrap();
    assert!(idx.has(&k1));
    assert!(idx.has(&k2));
    assert!(!idx.has(&k3), "unsaved key must not survive a load");
}

#[test]
fn save_keeps_single_parent_chain() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let remote = git_init_remote();
    let ws = git_clone_workspace(remote.path());
    let root = workspace_path(&ws);
    let git = Git::new(&root);

    let mut idx = RemoteIndex::new();
    idx.add(ChunkKey::digest(b"first"));
    idx.save(&git).unwrap();
    idx.add(ChunkKey::digest(b"second"));
    idx.save(&git).unwrap();

    let count = git_cmd(&root, &["rev-list", "--count", INDEX_BRANCH]);
    assert_eq!(count, "2");
}

#[test]
fn load_without_branch_is_a_noop() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let ws = git_init_workspace();
    let git = Git::new(ws.path());

    let mut idx = RemoteIndex::new();
    let key = ChunkKey::digest(b"kept");
    idx.add(key);
    idx.load(&git).unwrap();
    assert!(idx.has(&key), "load on a missing branch must not clear memory");
}

#[test]
fn pull_reports_missing_remote_branch() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let remote = git_init_remote();
    let ws = git_clone_workspace(remote.path());
    let git = Git::new(workspace_path(&ws));

    let idx = RemoteIndex::new();
    assert!(matches!(
        idx.pull(&git, "origin"),
        Err(BitsError::RemoteBranchMissing)
    ));
}

#[test]
fn concurrent_writers_union_merge() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let remote = git_init_remote();
    let ws1 = git_clone_workspace(remote.path());
    let ws2 = git_clone_workspace(remote.path());
    let ws3 = git_clone_workspace(remote.path());
    let git1 = Git::new(workspace_path(&ws1));
    let git2 = Git::new(workspace_path(&ws2));
    let git3 = Git::new(workspace_path(&ws3));

    let k1 = ChunkKey::digest(b"writer-1-key-1");
    let k2 = ChunkKey::digest(b"writer-1-key-2");
    let k3 = ChunkKey::digest(b"writer-2-key");

    // Writer 1 publishes first.
    let mut idx1 = RemoteIndex::new();
    idx1.add(k1);
    idx1.add(k2);
    idx1.save(&git1).unwrap();
    idx1.push_ref(&git1, "origin").unwrap();

    // Writer 2 saved without pulling; its push must be rejected.
    let mut idx2 = RemoteIndex::new();
    idx2.add(k3);
    idx2.save(&git2).unwrap();
    assert!(
        idx2.push_ref(&git2, "origin").is_err(),
        "non-fast-forward push must be rejected"
    );

    // The union-merge pull resolves the conflict; memory refreshes on load.
    idx2.pull(&git2, "origin").unwrap();
    assert!(!idx2.has(&k1), "pull must not refresh the in-memory set");
    idx2.load(&git2).unwrap();
    assert!(idx2.has(&k1) && idx2.has(&k2) && idx2.has(&k3));
    idx2.push_ref(&git2, "origin").unwrap();

    // The merge commit carries both heads as parents.
    let parents = git_cmd(
        &workspace_path(&ws2),
        &["rev-list", "--parents", "-n", "1", INDEX_BRANCH],
    );
    assert_eq!(parents.split_whitespace().count(), 3, "merge commit with two parents");

    // A third handle sees the union.
    let mut idx3 = RemoteIndex::new();
    idx3.pull(&git3, "origin").unwrap();
    idx3.load(&git3).unwrap();
    assert!(idx3.has(&k1) && idx3.has(&k2) && idx3.has(&k3));
}
