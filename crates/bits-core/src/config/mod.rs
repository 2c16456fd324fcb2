//! Repository configuration.
//!
//! Layered read-through: built-in defaults, then `bits.*` keys from git
//! config, then process environment variables for remote credentials that
//! git config leaves unset. Absent configuration is not an error; each
//! operation validates what it actually needs.

use tracing::debug;

use crate::error::{BitsError, Result};
use crate::git::Git;

/// Default chunking polynomial. Repositories sharing a scope produce
/// compatible chunk boundaries and can deduplicate against each other.
pub const DEFAULT_DEDUPLICATION_SCOPE: u64 = 0x3DA3358B4DC173;

pub const DEFAULT_S3_DOMAIN: &str = "s3.amazonaws.com";
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct BitsConfig {
    /// Rolling-hash polynomial seeding the chunker.
    pub deduplication_scope: u64,

    /// S3 bucket holding remote chunks.
    pub bucket: Option<String>,

    /// S3 endpoint domain.
    pub domain: Option<String>,

    /// S3 bucket region.
    pub region: Option<String>,

    /// Access key for the bucket.
    pub access_key: Option<String>,

    /// Secret authorizing access to the bucket.
    pub secret_key: Option<String>,

    /// Directory remote root, an alternative to the S3 bucket.
    pub remote_path: Option<String>,
}

impl Default for BitsConfig {
    fn default() -> Self {
        Self {
            deduplication_scope: DEFAULT_DEDUPLICATION_SCOPE,
            bucket: None,
            domain: None,
            region: None,
            access_key: None,
            secret_key: None,
            remote_path: None,
        }
    }
}

/// Parse a scope value as decimal or `0x`-prefixed hex.
fn parse_scope(value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| {
        BitsError::Config(format!(
            "unexpected format for deduplication scope '{value}', expected a number"
        ))
    })
}

impl BitsConfig {
    /// Load configuration from the repository's git config, falling back to
    /// the environment for missing credentials.
    pub fn load(git: &Git) -> Result<Self> {
        let mut conf = Self::default();

        // A non-zero exit just means there is no bits configuration yet.
        let output = git.run_unchecked(&["config", "--get-regexp", "^bits"], None)?;
        if output.status.success() {
            conf.apply_git_config(&String::from_utf8_lossy(&output.stdout))?;
        } else {
            debug!("no bits configuration in git config");
        }

        conf.apply_env();
        Ok(conf)
    }

    fn apply_git_config(&mut self, listing: &str) -> Result<()> {
        for line in listing.lines() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                return Err(BitsError::Config(format!(
                    "unexpected configuration returned from git: '{line}'"
                )));
            };
            match key {
                "bits.deduplication-scope" => self.deduplication_scope = parse_scope(value)?,
                "bits.aws-s3-bucket-name" => self.bucket = Some(value.to_string()),
                "bits.aws-s3-bucket-domain" => self.domain = Some(value.to_string()),
                "bits.aws-s3-bucket-region" => self.region = Some(value.to_string()),
                "bits.aws-access-key-id" => self.access_key = Some(value.to_string()),
                "bits.aws-secret-access-key" => self.secret_key = Some(value.to_string()),
                "bits.remote-path" => self.remote_path = Some(value.to_string()),
                other => debug!(key = other, "ignoring unknown bits configuration key"),
            }
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        let env_fallback = |slot: &mut Option<String>, var: &str| {
            if slot.is_none() {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        *slot = Some(value);
                    }
                }
            }
        };
        env_fallback(&mut self.access_key, "AWS_ACCESS_KEY_ID");
        env_fallback(&mut self.secret_key, "AWS_SECRET_ACCESS_KEY");
        env_fallback(&mut self.region, "AWS_REGION");
    }
}
