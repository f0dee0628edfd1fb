// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spawns provider processes and owns them until they are reaped.
//
// Each launch produces a `TunnelProcess` handle backed by three tasks: two
// forwarders that turn stdout/stderr into one line stream, and a reaper that
// owns the `Child`, waits for it to exit, and carries out termination
// requests (SIGTERM, grace period, then SIGKILL).

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use relayprint_core::TunnelProvider;
use relayprint_core::error::{RelayError, Result};

use crate::catalog::ProviderSpec;

/// Grace period used when a handle is dropped without an explicit stop.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Longest output line kept; the rest of a longer line is dropped.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Log target for raw provider output.
pub const OUTPUT_TARGET: &str = "relayprint::tunnel::output";

/// Identity of one launch; a relaunch never reuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Merged stdout and stderr of a provider, one line at a time.
///
/// Ends once both streams are closed. Dropping it does not stall the
/// process: the forwarders keep draining the pipes.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutputLines {
    /// A line stream fed by the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next line, or `None` once the process has closed its output.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Handle to a spawned provider process.
#[derive(Debug)]
pub struct TunnelProcess {
    run_id: RunId,
    provider: TunnelProvider,
    pid: Option<u32>,
    exited: watch::Receiver<bool>,
    stop_tx: Option<oneshot::Sender<Duration>>,
    reaper: Option<JoinHandle<()>>,
    output: Option<OutputLines>,
}

impl TunnelProcess {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn provider(&self) -> TunnelProvider {
        self.provider
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    /// Receiver that flips to `true` once the process has been reaped.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited.clone()
    }

    /// Take the output stream; only the first call returns it.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    /// Wait for the process to exit on its own.
    pub async fn wait_exit(&mut self) {
        let _ = self.exited.wait_for(|exited| *exited).await;
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Returns once reaped.
    #[instrument(skip(self), fields(run = %self.run_id, provider = %self.provider, pid = ?self.pid))]
    pub async fn terminate(mut self, grace: Duration) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The reaper may already be gone if the process exited.
            let _ = stop_tx.send(grace);
        }
        if let Some(reaper) = self.reaper.take() {
            reaper
                .await
                .map_err(|e| RelayError::Termination(format!("reaper task failed: {e}")))?;
        }
        Ok(())
    }
}

/// Starts provider processes described by a [`ProviderSpec`].
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Spawn the provider and return its handle.
    ///
    /// Returns `SpawnFailure` if the executable cannot be started. A process
    /// that starts and exits immediately is reported through the handle.
    #[instrument(skip(self, spec), fields(provider = %spec.provider()))]
    pub fn launch(&self, spec: &ProviderSpec) -> Result<TunnelProcess> {
        let mut child = Command::new(spec.program())
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::SpawnFailure(format!("{}: {e}", spec.program())))?;

        let run_id = RunId::new();
        let provider = spec.provider();
        let pid = child.id();
        info!(run = %run_id, ?pid, command = %spec.command_line(), "spawned tunnel process");

        let (line_tx, output) = OutputLines::channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone(), run_id, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone(), run_id, "stderr"));
        }
        drop(line_tx);

        let (exited_tx, exited) = watch::channel(false);
        let (stop_tx, stop_rx) = oneshot::channel();
        let reaper = tokio::spawn(reap(child, stop_rx, exited_tx, run_id, provider));

        Ok(TunnelProcess {
            run_id,
            provider,
            pid,
            exited,
            stop_tx: Some(stop_tx),
            reaper: Some(reaper),
            output: Some(output),
        })
    }
}

/// Forward one pipe line by line, logging each line. Lines longer than
/// [`MAX_LINE_BYTES`] are cut to that length.
async fn forward_lines<R>(
    reader: R,
    tx: mpsc::UnboundedSender<String>,
    run_id: RunId,
    stream: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    // Inside the tail of an oversized line.
    let mut discarding = false;
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let complete = buf.last() == Some(&b'\n');
                if discarding {
                    discarding = !complete;
                    continue;
                }
                if !complete && buf.len() == MAX_LINE_BYTES {
                    debug!(run = %run_id, stream, "truncated oversized output line");
                    discarding = true;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                debug!(target: OUTPUT_TARGET, run = %run_id, stream, "{line}");
                // Keep draining after the watcher stops listening.
                let _ = tx.send(line.to_string());
            }
            Err(e) => {
                debug!(run = %run_id, stream, error = %e, "output stream read failed");
                break;
            }
        }
    }
}

async fn reap(
    mut child: Child,
    stop_rx: oneshot::Receiver<Duration>,
    exited: watch::Sender<bool>,
    run_id: RunId,
    provider: TunnelProvider,
) {
    let outcome = tokio::select! {
        status = child.wait() => status,
        request = stop_rx => {
            // A dropped handle counts as a stop request.
            let grace = request.unwrap_or(DEFAULT_GRACE);
            terminate_child(&mut child, grace).await
        }
    };

    match outcome {
        Ok(status) => info!(run = %run_id, %provider, %status, "tunnel process exited"),
        Err(e) => warn!(run = %run_id, %provider, error = %e, "failed to reap tunnel process"),
    }
    exited.send_replace(true);
}

async fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    let signalled = child.id().is_some_and(request_termination);
    if signalled {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status;
        }
        warn!(
            pid = ?child.id(),
            grace_ms = grace.as_millis() as u64,
            "tunnel process ignored SIGTERM, killing"
        );
    }

    child.kill().await?;
    child.wait().await
}

/// Ask a process to exit (SIGTERM). Returns whether the signal was delivered.
#[cfg(unix)]
pub fn request_termination(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub fn request_termination(_pid: u32) -> bool {
    false
}
