// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Subprocess wrapper around `redsea` (spec.md §6 "Subprocess contracts").
//!
//! `redsea` reads 171 kHz mono PCM on stdin and writes one JSON object per
//! line on stdout. This crate owns the child handle, hands callers the
//! stdin pipe to feed PCM into, and spawns the stdout line reader that
//! turns each line into a [`rds_core::DecodedGroup`]. Bit-level RDS
//! decoding itself is out of scope (spec.md Non-goals) — the teacher's
//! from-scratch baseband decoder (`decoders/trx-rds`) isn't carried
//! forward, only its PTY-name-table idiom of wrapping an external tool
//! (`trx-wspr/src/wsprd_wrapper.rs`) generalized to a long-lived,
//! streaming child instead of a one-shot `Command::output()` call.

use std::process::Stdio;

use rds_core::{DecodedGroup, RdsError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

/// A running `redsea` child process with its stdin pipe handed to the
/// caller (the Audio Tee writes PCM there) and its stdout still attached.
pub struct RedseaProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl RedseaProcess {
    /// Spawns `redsea_bin`, piping stdin/stdout and discarding stderr
    /// (redsea logs diagnostics there; the pipeline doesn't parse it).
    pub fn spawn(redsea_bin: &str) -> Result<Self, RdsError> {
        let mut child = Command::new(redsea_bin)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RdsError::Pipeline(format!("spawning {redsea_bin}: {e}")))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        Ok(Self { child, stdin, stdout })
    }

    /// Takes the stdin pipe the Audio Tee writes PCM chunks to. Returns
    /// `None` if already taken.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Takes the stdout pipe for [`spawn_line_reader`]. Returns `None` if
    /// already taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Waits for the child to exit, e.g. from the Pipeline Supervisor's
    /// restart loop (spec.md §4.5).
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Counts produced during one run of [`spawn_line_reader`] — malformed
/// lines are counted and discarded, never surfaced (spec.md §4.5 step 2,
/// §7 `DecodeError`).
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeStats {
    pub groups_parsed: u64,
    pub lines_malformed: u64,
}

/// Reads one JSON object per line from `stdout`, parsing each into a
/// [`DecodedGroup`] and forwarding it on `tx`. Returns once stdout hits EOF
/// or the receiver is dropped.
pub async fn run_line_reader(
    stdout: ChildStdout,
    tx: mpsc::Sender<DecodedGroup>,
) -> DecodeStats {
    let mut lines = BufReader::new(stdout).lines();
    let mut stats = DecodeStats::default();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "redsea stdout read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match DecodedGroup::parse_line(&line, chrono::Utc::now()) {
            Ok(group) => {
                stats.groups_parsed += 1;
                if tx.send(group).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                stats.lines_malformed += 1;
                tracing::debug!(error = %e, line = %line, "malformed redsea line, discarding");
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_lines_are_counted_and_dropped() {
        let (read, mut write) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::channel(8);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            write
                .write_all(b"{\"pi\":\"0x9E04\",\"group\":\"0A\",\"ta\":true}\nnot json\n")
                .await
                .unwrap();
        });

        let mut lines = BufReader::new(read).lines();
        let mut stats = DecodeStats::default();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                break;
            }
            match DecodedGroup::parse_line(&line, chrono::Utc::now()) {
                Ok(group) => {
                    stats.groups_parsed += 1;
                    tx.send(group).await.unwrap();
                }
                Err(_) => stats.lines_malformed += 1,
            }
        }
        writer.await.unwrap();
        drop(tx);

        assert_eq!(stats.groups_parsed, 1);
        assert_eq!(stats.lines_malformed, 1);
        assert!(rx.recv().await.is_some());
    }
}
