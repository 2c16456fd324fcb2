use crate::config::{BitsConfig, DEFAULT_DEDUPLICATION_SCOPE};
use crate::error::BitsError;
use crate::git::Git;
use crate::repo::Repository;
use crate::testutil::{git_available, git_cmd, git_init_workspace};

#[test]
fn open_outside_a_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    match Repository::open(dir.path()) {
        Err(BitsError::RepoNotFound(_)) => {}
        other => panic!("expected RepoNotFound, got {other:?}"),
    }
}

#[test]
fn defaults_when_unconfigured() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let ws = git_init_workspace();
    let conf = BitsConfig::load(&Git::new(ws.path())).unwrap();

    assert_eq!(conf.deduplication_scope, DEFAULT_DEDUPLICATION_SCOPE);
    assert!(conf.bucket.is_none());
    assert!(conf.remote_path.is_none());
}

#[test]
fn reads_bits_keys_from_git_config() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let ws = git_init_workspace();
    git_cmd(ws.path(), &["config", "bits.deduplication-scope", "12345"]);
    git_cmd(ws.path(), &["config", "bits.aws-s3-bucket-name", "my-bucket"]);
    git_cmd(ws.path(), &["config", "bits.aws-s3-bucket-region", "eu-west-1"]);
    git_cmd(ws.path(), &["config", "bits.aws-access-key-id", "AKID"]);
    git_cmd(ws.path(), &["config", "bits.remote-path", "/srv/chunks"]);

    let conf = BitsConfig::load(&Git::new(ws.path())).unwrap();
    assert_eq!(conf.deduplication_scope, 12345);
    assert_eq!(conf.bucket.as_deref(), Some("my-bucket"));
    assert_eq!(conf.region.as_deref(), Some("eu-west-1"));
    assert_eq!(conf.access_key.as_deref(), Some("AKID"));
    assert_eq!(conf.remote_path.as_deref(), Some("/srv/chunks"));
}

#[test]
fn scope_accepts_hex_notation() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let ws = git_init_workspace();
    git_cmd(
        ws.path(),
        &["config", "bits.deduplication-scope", "0x3DA3358B4DC173"],
    );
    let conf = BitsConfig::load(&Git::new(ws.path())).unwrap();
    assert_eq!(conf.deduplication_scope, 0x3DA3358B4DC173);
}

#[test]
fn malformed_scope_is_a_config_error() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let ws = git_init_workspace();
    git_cmd(ws.path(), &["config", "bits.deduplication-scope", "banana"]);
    match BitsConfig::load(&Git::new(ws.path())) {
        Err(BitsError::Config(msg)) => assert!(msg.contains("banana")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn bucket_without_credentials_fails_at_remote_construction() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    // Credentials could still come from the environment; only run where
    // they are absent.
    if std::env::var_os("AWS_ACCESS_KEY_ID").is_some() {
        eprintln!("AWS credentials in environment, skipping");
        return;
    }
    let ws = git_init_workspace();
    git_cmd(ws.path(), &["config", "bits.aws-s3-bucket-name", "my-bucket"]);
    match Repository::open(ws.path()) {
        Err(BitsError::Config(msg)) => assert!(msg.contains("access key")),
        other => panic!("expected Config error, got {other:?}"),
    }
}
