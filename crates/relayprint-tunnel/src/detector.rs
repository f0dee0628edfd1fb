// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Best-effort detection of provider processes this process does not own
// (started by a previous instance, or by the init system for named tunnels).
//
// Only used to report status and to clean up on stop. A failed or slow scan
// reports nothing found; it never blocks a start.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use relayprint_core::TunnelProvider;

use crate::catalog::{ProcessSignature, ProviderCatalog};
use crate::launcher::request_termination;

/// Default upper bound on one process-table scan.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);

/// Looks for provider processes in the system process table.
#[async_trait]
pub trait ProcessDetector: Send + Sync {
    /// Whether any process of `provider` (any provider if `None`) is running.
    async fn is_running(&self, provider: Option<TunnelProvider>) -> bool;

    /// Ask every matching process to exit. Returns how many were signalled.
    async fn terminate_matching(&self, provider: Option<TunnelProvider>) -> usize;
}

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
}

/// Parse `ps -axo pid=,args=` output. Malformed rows are skipped.
pub fn parse_process_table(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse().ok()?;
            let command_line = rest.trim();
            (!command_line.is_empty()).then(|| ProcessEntry {
                pid,
                command_line: command_line.to_string(),
            })
        })
        .collect()
}

/// [`ProcessDetector`] backed by `ps`.
#[derive(Debug, Clone)]
pub struct PsProcessDetector {
    signatures: Vec<(TunnelProvider, ProcessSignature)>,
    program: String,
    timeout: Duration,
}

impl PsProcessDetector {
    pub fn new(catalog: &ProviderCatalog) -> Self {
        Self {
            signatures: catalog
                .specs()
                .map(|spec| (spec.provider(), spec.signature().clone()))
                .collect(),
            program: "ps".into(),
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different `ps` executable.
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// PIDs in `entries` that belong to `provider` (any provider if `None`).
    ///
    /// The current process is never included.
    pub fn matching_pids(&self, entries: &[ProcessEntry], provider: Option<TunnelProvider>) -> Vec<u32> {
        let own_pid = std::process::id();
        entries
            .iter()
            .filter(|entry| entry.pid != own_pid)
            .filter(|entry| {
                self.signatures
                    .iter()
                    .filter(|(p, _)| provider.is_none_or(|wanted| *p == wanted))
                    .any(|(_, signature)| signature.matches(&entry.command_line))
            })
            .map(|entry| entry.pid)
            .collect()
    }

    async fn scan(&self) -> Vec<ProcessEntry> {
        let run = Command::new(&self.program)
            .args(["-axo", "pid=,args="])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_process_table(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(status = %output.status, "process scan failed");
                Vec::new()
            }
            Ok(Err(e)) => {
                debug!(program = %self.program, error = %e, "process scan unavailable");
                Vec::new()
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "process scan timed out");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ProcessDetector for PsProcessDetector {
    async fn is_running(&self, provider: Option<TunnelProvider>) -> bool {
        if provider == Some(TunnelProvider::None) {
            return false;
        }
        let entries = self.scan().await;
        !self.matching_pids(&entries, provider).is_empty()
    }

    async fn terminate_matching(&self, provider: Option<TunnelProvider>) -> usize {
        if provider == Some(TunnelProvider::None) {
            return 0;
        }
        let entries = self.scan().await;
        let mut signalled = 0;
        for pid in self.matching_pids(&entries, provider) {
            if request_termination(pid) {
                info!(pid, "sent SIGTERM to external tunnel process");
                signalled += 1;
            } else {
                debug!(pid, "could not signal external tunnel process");
            }
        }
        signalled
    }
}
