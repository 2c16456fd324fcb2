//! Thin invoker for the external git executable.
//!
//! All repository plumbing (refs, object database, revision walks) goes
//! through child processes of this binary. The executable path is resolved
//! once at construction; `BITS_GIT` overrides the default `git` lookup.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

use tracing::trace;

use crate::error::{BitsError, Result};

pub struct Git {
    exe: OsString,
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let exe = std::env::var_os("BITS_GIT").unwrap_or_else(|| OsString::from("git"));
        Self {
            exe,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Build a `Command` for a git invocation; callers wire up stdio for
    /// pipeline stages themselves.
    pub fn command(&self, args: &[&str]) -> Command {
        trace!(?args, "git");
        let mut cmd = Command::new(&self.exe);
        cmd.args(args).current_dir(&self.workdir);
        cmd
    }

    /// Spawn a stage with explicit stdio wiring.
    pub fn spawn(&self, args: &[&str], stdin: Stdio, stdout: Stdio) -> Result<Child> {
        let child = self
            .command(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(child)
    }

    fn run_inner(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        let mut cmd = self.command(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            // Plumbing commands consume all of stdin before producing
            // output, so a sequential write does not deadlock.
            let mut handle = child.stdin.take().expect("stdin was piped");
            handle.write_all(input)?;
        }
        Ok(child.wait_with_output()?)
    }

    /// Run git to completion, returning captured stdout. A non-zero exit
    /// becomes a `Git` error carrying the child's stderr verbatim.
    pub fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let output = self.run_inner(args, stdin)?;
        if !output.status.success() {
            return Err(Self::command_error(args, &output));
        }
        Ok(output.stdout)
    }

    /// Like `run`, but hands back the full `Output` so callers can treat
    /// certain exit codes (missing ref, non-fast-forward) as expected.
    pub fn run_unchecked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        self.run_inner(args, stdin)
    }

    /// Run git and return stdout as a whitespace-trimmed string.
    pub fn run_trimmed(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run(args, None)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Map a failed invocation to the error type.
    pub fn command_error(args: &[&str], output: &Output) -> BitsError {
        BitsError::Git {
            args: args.join(" "),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Map a status from a pipeline stage (stderr already inherited).
    pub fn stage_error(args: &[&str], status: std::process::ExitStatus) -> BitsError {
        BitsError::Git {
            args: args.join(" "),
            status: status.code().unwrap_or(-1),
            stderr: String::new(),
        }
    }
}
