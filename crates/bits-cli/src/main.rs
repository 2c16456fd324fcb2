use std::io::{self, BufReader};

use clap::{Parser, Subcommand};

use bits_core::repo::Repository;
use bits_core::{scan, BitsError};

#[derive(Parser)]
#[command(
    name = "git-bits",
    version,
    about = "Content-addressed, deduplicated, encrypted large-file storage for git",
    after_help = "\
Configure as a filter to keep large files out of the object database:
  git config filter.bits.clean  'git bits split'
  git config filter.bits.smudge 'git bits fetch | git bits combine'
  git config filter.bits.required true

Configuration keys (git config, bits.* prefix):
  bits.deduplication-scope      chunking polynomial; repos sharing it dedupe together
  bits.aws-s3-bucket-name       S3 bucket for remote chunks
  bits.aws-s3-bucket-domain     S3 endpoint domain
  bits.aws-s3-bucket-region     S3 region
  bits.aws-access-key-id        bucket access key (or AWS_ACCESS_KEY_ID)
  bits.aws-secret-access-key    bucket secret key (or AWS_SECRET_ACCESS_KEY)
  bits.remote-path              directory remote, an alternative to a bucket"
)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split plaintext on stdin into local chunks; write the manifest to stdout
    Split,

    /// Combine the manifest on stdin back into plaintext on stdout
    Combine,

    /// Fetch chunks missing locally for the manifest on stdin; echo the manifest
    Fetch,

    /// Upload chunks named on stdin and publish the remote-known index
    Push {
        /// Git remote holding the shared index branch
        #[arg(default_value = "origin")]
        remote: String,
    },

    /// List distinct manifest keys reachable from RIGHT but not LEFT
    Scan {
        /// Revision whose history is scanned (reads pre-push hook lines
        /// from stdin when omitted)
        right: Option<String>,

        /// Revision excluded from the scan
        left: Option<String>,
    },

    /// Reconstitute every manifest file of a revision in the working tree
    Pull {
        /// Revision to reconstitute
        #[arg(default_value = "HEAD")]
        rev: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // stdout is the data stream of a filter; all diagnostics go to stderr.
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli.command) {
        eprintln!("git-bits: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn run(command: Commands) -> Result<(), BitsError> {
    let cwd = std::env::current_dir()?;
    let mut repo = Repository::open(&cwd)?;
    tracing::debug!(root = %repo.root_dir().display(), "repository opened");

    let stdin = io::stdin();
    let stdout = io::stdout();

    match command {
        Commands::Split => repo.split(stdin.lock(), stdout.lock()),
        Commands::Combine => repo.combine(stdin.lock(), stdout.lock()),
        Commands::Fetch => repo.fetch(stdin.lock(), stdout.lock()),
        Commands::Push { remote } => repo.push(stdin.lock(), &remote),
        Commands::Scan { right, left } => match right {
            Some(right) => scan::scan(repo.git(), left.as_deref(), &right, &mut stdout.lock()),
            None => scan::scan_each(repo.git(), BufReader::new(stdin.lock()), &mut stdout.lock()),
        },
        Commands::Pull { rev } => repo.pull(&rev, &mut stdout.lock()),
    }
}

/// 0 success, 1 configuration error, 2 not a repository, 3 operation
/// failure.
fn exit_code(e: &BitsError) -> i32 {
    match e {
        BitsError::Config(_) => 1,
        BitsError::RepoNotFound(_) => 2,
        _ => 3,
    }
}
