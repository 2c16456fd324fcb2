//! Repository scanner.
//!
//! Finds every distinct chunk key recorded in manifest blobs between two
//! revisions, as a pipeline of concurrently running stages joined by OS
//! pipes: object enumeration, metadata filtering, and content scanning.
//! Only the current line of the current blob is ever held in memory.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::Stdio;

use bits_types::KEY_HEX_LEN;

use crate::error::{BitsError, Result};
use crate::git::Git;
use crate::manifest::{KEY_LINE_LEN, MANIFEST_FOOTER, MANIFEST_HEADER};

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Longest line the content stage will buffer. The batch stream traverses
/// every size-matched blob, manifest or not; a line past this bound fails
/// the scan instead of ballooning into memory.
const MAX_SCAN_LINE_LEN: usize = 64 * 1024;

/// Stream the distinct key lines of all manifest blobs reachable from
/// `right` but not `left` to `out`. An absent `left` scans from the
/// beginning of history.
///
/// A blob qualifies when its size is a positive multiple of the key-line
/// length; inside it, lines between a header line and a footer line are
/// recorded. A non-manifest blob that happens to match both is
/// misidentified; the header is chosen to make that vanishingly unlikely.
pub fn scan(git: &Git, left: Option<&str>, right: &str, out: &mut dyn Write) -> Result<()> {
    let left_exclusion = left.map(|l| format!("^{l}"));
    let mut revlist_args = vec!["rev-list", "--objects", right];
    if let Some(excl) = &left_exclusion {
        revlist_args.push(excl);
    }

    let mut revlist = git.spawn(&revlist_args, Stdio::null(), Stdio::piped())?;
    let check_args = ["cat-file", "--batch-check"];
    let mut check = git.spawn(&check_args, Stdio::piped(), Stdio::piped())?;
    let batch_args = ["cat-file", "--batch"];
    let mut batch = git.spawn(&batch_args, Stdio::piped(), Stdio::piped())?;

    let revlist_out = revlist.stdout.take().expect("stdout was piped");
    let mut check_in = check.stdin.take().expect("stdin was piped");
    let check_out = check.stdout.take().expect("stdout was piped");
    let mut batch_in = batch.stdin.take().expect("stdin was piped");
    let batch_out = batch.stdout.take().expect("stdout was piped");

    let scan_result: Result<()> = std::thread::scope(|s| {
        // Stage 2: object names from rev-list into batch-check.
        let objects = s.spawn(move || -> Result<()> {
            for line in BufReader::new(revlist_out).lines() {
                let line = line?;
                let Some(object) = line.split_whitespace().next() else {
                    continue;
                };
                writeln!(check_in, "{object}")?;
            }
            Ok(())
        });

        // Stage 3: keep blobs whose size fits the manifest contract, feed
        // their ids to cat-file --batch.
        let sizes = s.spawn(move || -> Result<()> {
            for line in BufReader::new(check_out).lines() {
                let line = line?;
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 3 || fields[1] != "blob" {
                    continue;
                }
                let Ok(size) = fields[2].parse::<u64>() else {
                    continue;
                };
                if size == 0 || size % KEY_LINE_LEN as u64 != 0 {
                    continue;
                }
                writeln!(batch_in, "{}", fields[0])?;
            }
            Ok(())
        });

        // Final stage: record lines between header and footer, once each.
        let collect = || -> Result<()> {
            let mut seen: HashSet<Vec<u8>> = HashSet::new();
            let mut recording = false;
            let mut reader = BufReader::new(batch_out);
            let mut line = Vec::new();
            loop {
                line.clear();
                let mut limited = (&mut reader).take(MAX_SCAN_LINE_LEN as u64 + 1);
                if limited.read_until(b'\n', &mut line)? == 0 {
                    return Ok(());
                }
                if line.len() > MAX_SCAN_LINE_LEN {
                    return Err(BitsError::framing(&line, "line exceeds the scan limit"));
                }
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                if line == &MANIFEST_HEADER[..KEY_HEX_LEN] {
                    recording = true;
                    continue;
                }
                if line == &MANIFEST_FOOTER[..KEY_HEX_LEN] {
                    recording = false;
                    continue;
                }
                if recording && !seen.contains(&line) {
                    out.write_all(&line)?;
                    out.write_all(b"\n")?;
                    seen.insert(line.clone());
                }
            }
        };
        let collected = collect();

        if collected.is_err() {
            // Stop the children so blocked stage writers wake up and the
            // joins below cannot hang; their errors are secondary.
            let _ = revlist.kill();
            let _ = check.kill();
            let _ = batch.kill();
            let _ = objects.join();
            let _ = sizes.join();
            return collected;
        }

        join_stage(objects)?;
        join_stage(sizes)?;
        Ok(())
    });

    let revlist_status = revlist.wait()?;
    let check_status = check.wait()?;
    let batch_status = batch.wait()?;
    scan_result?;

    if !revlist_status.success() {
        return Err(Git::stage_error(&revlist_args, revlist_status));
    }
    if !check_status.success() {
        return Err(Git::stage_error(&check_args, check_status));
    }
    if !batch_status.success() {
        return Err(Git::stage_error(&batch_args, batch_status));
    }
    Ok(())
}

fn join_stage(handle: std::thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    handle
        .join()
        .unwrap_or_else(|_| Err(BitsError::Other("scan pipeline stage panicked".into())))
}

/// Scan for every revision pair named on `input`, writing key lines to
/// `out`. Lines are either `<right>`, `<right> <left>`, or the four-field
/// pre-push hook form `<local-ref> <local-sha> <remote-ref> <remote-sha>`;
/// an all-zero sha means the bound is absent.
pub fn scan_each(git: &Git, input: impl BufRead, out: &mut dyn Write) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (right, left) = match fields.len() {
            // Pre-push hook: local ref deletions have a zero local sha and
            // carry nothing to scan.
            4 => {
                let left = (fields[3] != ZERO_SHA).then_some(fields[3]);
                (fields[1], left)
            }
            1 => (fields[0], None),
            2 => (fields[0], Some(fields[1])),
            _ => {
                return Err(BitsError::Other(format!(
                    "unexpected input for scanning: '{line}'"
                )))
            }
        };
        if right == ZERO_SHA {
            continue;
        }
        scan(git, left, right, out)?;
    }
    Ok(())
}
