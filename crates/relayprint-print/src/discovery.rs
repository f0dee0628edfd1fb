// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer discovery against the local CUPS installation.
//
// Queue names and device URIs come from `lpstat -v`, the default queue from
// `lpstat -d`. Each queue is then enriched with its IPP printer attributes.
// Every step is best-effort: a missing `lpstat` or an unreachable queue
// yields fewer printers, never an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use relayprint_core::{ActiveJob, Connection, PrinterInfo, PrinterListing, PrinterSummary, job_progress};

use crate::spooler::{PrintSpooler, first_value};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A CUPS queue and the device it prints to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterDevice {
    pub name: String,
    pub device_uri: String,
}

impl PrinterDevice {
    pub fn connection(&self) -> Connection {
        Connection::from_device_uri(&self.device_uri)
    }
}

/// Parse `lpstat -v` output.
///
/// Accepts `device for NAME: URI` and the bare `NAME: URI` form some
/// locales print. Lines without a URI-looking value are ignored.
pub fn parse_lpstat_devices(output: &str) -> Vec<PrinterDevice> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let line = line.strip_prefix("device for ").unwrap_or(line);
            let (name, uri) = line.split_once(": ")?;
            let (name, uri) = (name.trim(), uri.trim());
            if name.is_empty() || name.contains(char::is_whitespace) || !has_uri_scheme(uri) {
                return None;
            }
            Some(PrinterDevice {
                name: name.to_string(),
                device_uri: uri.to_string(),
            })
        })
        .collect()
}

/// Parse `lpstat -d` output into the default queue name.
pub fn parse_lpstat_default(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let name = line.trim().strip_prefix("system default destination:")?.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

fn has_uri_scheme(value: &str) -> bool {
    match value.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Lists CUPS queues with their attributes and active jobs.
pub struct PrinterDiscovery {
    spooler: Arc<dyn PrintSpooler>,
    program: String,
    prefix_args: Vec<String>,
    timeout: Duration,
}

impl PrinterDiscovery {
    pub fn new(spooler: Arc<dyn PrintSpooler>) -> Self {
        Self {
            spooler,
            program: "lpstat".into(),
            prefix_args: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Run a different command in place of `lpstat`; the flag is appended
    /// after `args`.
    pub fn with_command(mut self, program: &str, args: &[&str]) -> Self {
        self.program = program.to_string();
        self.prefix_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `lpstat <flag>` and return stdout, or an empty string on failure.
    async fn lpstat(&self, flag: &str) -> String {
        let run = Command::new(&self.program)
            .args(&self.prefix_args)
            .arg(flag)
            .env("LC_ALL", "C")
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            Ok(Ok(output)) => {
                // lpstat exits non-zero when no queues exist.
                debug!(flag, status = %output.status, "lpstat reported failure");
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "could not run lpstat");
                String::new()
            }
            Err(_) => {
                warn!(flag, timeout_secs = self.timeout.as_secs(), "lpstat timed out");
                String::new()
            }
        }
    }

    pub async fn devices(&self) -> Vec<PrinterDevice> {
        parse_lpstat_devices(&self.lpstat("-v").await)
    }

    pub async fn default_printer(&self) -> Option<String> {
        let default = parse_lpstat_default(&self.lpstat("-d").await);
        match &default {
            Some(name) => debug!(printer = %name, "default printer"),
            None => debug!("no default printer set"),
        }
        default
    }

    /// Details for one queue. Unreadable attributes keep their defaults.
    #[instrument(skip(self, device), fields(printer = %device.name))]
    pub async fn printer_info(&self, device: &PrinterDevice) -> PrinterInfo {
        let mut info = PrinterInfo {
            name: device.name.clone(),
            uri: device.device_uri.clone(),
            ..PrinterInfo::default()
        };

        let attrs = match self.spooler.printer_attributes(&device.name).await {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!(error = %e, "failed to read printer attributes");
                return info;
            }
        };

        let text = |name: &str| first_value(&attrs, name).unwrap_or_default().to_string();
        info.info = text("printer-info");
        info.location = text("printer-location");
        info.make_model = text("printer-make-and-model");
        info.state_message = text("printer-state-message");
        info.state = first_value(&attrs, "printer-state")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        info.is_shared = first_value(&attrs, "printer-is-shared") == Some("true");
        info.supported_formats = attrs
            .get("document-format-supported")
            .cloned()
            .unwrap_or_default();
        info
    }

    /// Every queue with its active jobs.
    #[instrument(skip(self))]
    pub async fn list_printers(&self) -> Vec<PrinterListing> {
        let devices = self.devices().await;
        let jobs = match self.spooler.active_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "failed to read active jobs");
                Vec::new()
            }
        };

        let mut listings = Vec::with_capacity(devices.len());
        for device in &devices {
            let printer = self.printer_info(device).await;
            let active_jobs = jobs
                .iter()
                .filter(|job| job.printer_name() == Some(device.name.as_str()))
                .map(|job| ActiveJob {
                    id: job.job_id,
                    name: job.name.clone(),
                    progress: job_progress(job.state),
                })
                .collect();
            listings.push(PrinterListing { printer, active_jobs });
        }
        info!(count = listings.len(), "listed printers");
        listings
    }

    /// Queues split into network and local printers, plus the default.
    pub async fn summary(&self) -> PrinterSummary {
        let devices = self.devices().await;
        let default_printer = self.default_printer().await;

        let mut summary = PrinterSummary {
            default_printer,
            total_printers: devices.len(),
            ..PrinterSummary::default()
        };
        for device in &devices {
            match device.connection() {
                Connection::Network => summary.network_printers.push(self.printer_info(device).await),
                Connection::Local => summary.local_printers.push(self.printer_info(device).await),
                Connection::Other => {}
            }
        }
        summary
    }
}
