// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for RelayPrint: tunnel providers and their observable
// state, plus the print-job and printer records served by the REST API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

// ---------------------------------------------------------------------------
// Tunnels
// ---------------------------------------------------------------------------

/// External program used to expose the local API on a public address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelProvider {
    /// No tunnel configured.
    #[serde(rename = "none")]
    None,
    /// `lt` from the localtunnel project; URL assigned at start (`*.loca.lt`).
    #[default]
    #[serde(rename = "localtunnel")]
    LocalTunnel,
    /// `cloudflared` quick tunnel; URL assigned at start (`*.trycloudflare.com`).
    #[serde(rename = "cloudflare_quick")]
    CloudflareQuick,
    /// `cloudflared` named tunnel bound to a pre-issued token.
    #[serde(rename = "cloudflare_named")]
    CloudflareNamed,
}

impl TunnelProvider {
    /// Every provider, including `None`.
    pub const ALL: [TunnelProvider; 4] = [
        Self::None,
        Self::LocalTunnel,
        Self::CloudflareQuick,
        Self::CloudflareNamed,
    ];

    /// Wire identifier used in JSON and in the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LocalTunnel => "localtunnel",
            Self::CloudflareQuick => "cloudflare_quick",
            Self::CloudflareNamed => "cloudflare_named",
        }
    }

    /// Human-readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::LocalTunnel => "LocalTunnel",
            Self::CloudflareQuick => "Cloudflare Quick Tunnel",
            Self::CloudflareNamed => "Cloudflare Named Tunnel",
        }
    }

    /// Named tunnels are the only mode that needs a secret token.
    pub fn requires_token(&self) -> bool {
        matches!(self, Self::CloudflareNamed)
    }
}

impl fmt::Display for TunnelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelProvider {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "localtunnel" => Ok(Self::LocalTunnel),
            "cloudflare_quick" => Ok(Self::CloudflareQuick),
            "cloudflare_named" => Ok(Self::CloudflareNamed),
            other => Err(RelayError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Snapshot returned by the tunnel supervisor's status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub enabled: bool,
    pub running: bool,
    pub provider: TunnelProvider,
    /// Last published public URL. Published does not imply reachable.
    pub url: Option<String>,
    pub has_token: bool,
}

/// Result of an accepted tunnel start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    /// Always true: the process is launched, the URL arrives later.
    pub starting: bool,
    pub provider: TunnelProvider,
    pub provider_name: String,
}

/// Unauthenticated view handed to remote clients (the URL is the secret).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfigView {
    pub enabled: bool,
    pub active: bool,
    pub url: Option<String>,
    pub provider: TunnelProvider,
}

impl From<&TunnelStatus> for RemoteConfigView {
    fn from(status: &TunnelStatus) -> Self {
        Self {
            enabled: status.enabled,
            active: status.enabled && status.running && status.url.is_some(),
            url: status.url.clone(),
            provider: status.provider,
        }
    }
}

// ---------------------------------------------------------------------------
// Print jobs
// ---------------------------------------------------------------------------

/// Lifecycle states of a print job as tracked by the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Held,
    Printing,
    Stopped,
    Canceled,
    Aborted,
    Completed,
}

impl JobState {
    /// Map an IPP `job-state` enum value (RFC 8011 §5.3.7).
    pub fn from_ipp(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::Held),
            5 => Some(Self::Printing),
            6 => Some(Self::Stopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Printing => "printing",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }

    /// Completed, canceled and aborted jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Aborted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted)
    }
}

impl FromStr for JobState {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "held" => Ok(Self::Held),
            "printing" => Ok(Self::Printing),
            "stopped" => Ok(Self::Stopped),
            "canceled" => Ok(Self::Canceled),
            "aborted" => Ok(Self::Aborted),
            "completed" => Ok(Self::Completed),
            other => Err(RelayError::Database(format!("unknown job state '{other}'"))),
        }
    }
}

/// Rough completion percentage shown next to active jobs in printer listings.
pub fn job_progress(ipp_state: i32) -> u8 {
    match ipp_state {
        3 => 0,
        4 => 25,
        5 => 50,
        6 => 75,
        7 => 90,
        8 => 95,
        9 => 100,
        _ => 0,
    }
}

/// A submitted job as remembered by the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJobRecord {
    /// Job id assigned by the spooler.
    pub job_id: i32,
    pub printer_name: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PrintJobRecord {
    pub fn new(job_id: i32, printer_name: impl Into<String>) -> Self {
        Self {
            job_id,
            printer_name: printer_name.into(),
            status: JobState::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// Job status as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: i32,
    pub printer_name: String,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_reasons: Option<Vec<String>>,
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

/// IPP `print-quality` values (RFC 8011 §5.2.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintQuality {
    Draft,
    Normal,
    High,
}

impl PrintQuality {
    pub fn ipp_enum_value(&self) -> i32 {
        match self {
            Self::Draft => 3,
            Self::Normal => 4,
            Self::High => 5,
        }
    }
}

impl FromStr for PrintQuality {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" | "3" => Ok(Self::Draft),
            "normal" | "4" => Ok(Self::Normal),
            "high" | "5" => Ok(Self::High),
            other => Err(RelayError::InvalidRequest(format!(
                "unknown print quality '{other}'"
            ))),
        }
    }
}

/// Options forwarded to the spooler with a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintOptions {
    pub copies: Option<u32>,
    /// `Some(true)` = two-sided-long-edge, `Some(false)` = one-sided.
    pub duplex: Option<bool>,
    pub quality: Option<PrintQuality>,
}

impl PrintOptions {
    /// IPP `sides` keyword (RFC 8011 §5.2.8).
    pub fn sides_keyword(&self) -> Option<&'static str> {
        self.duplex.map(|duplex| {
            if duplex {
                "two-sided-long-edge"
            } else {
                "one-sided"
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

/// A queue configured in the local CUPS server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: String,
    pub info: String,
    pub location: String,
    pub make_model: String,
    /// IPP `printer-state` (3 idle, 4 processing, 5 stopped).
    pub state: i32,
    pub state_message: String,
    pub is_shared: bool,
    pub uri: String,
    pub supported_formats: Vec<String>,
}

/// A job currently active on a printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub id: i32,
    pub name: String,
    pub progress: u8,
}

/// Printer entry in the REST listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterListing {
    #[serde(flatten)]
    pub printer: PrinterInfo,
    pub active_jobs: Vec<ActiveJob>,
}

/// How a printer is attached, inferred from its device URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    Network,
    Local,
    Other,
}

impl Connection {
    pub fn from_device_uri(uri: &str) -> Self {
        let scheme = uri.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "socket" | "ipp" | "ipps" | "http" | "https" => Self::Network,
            "usb" | "parallel" | "serial" => Self::Local,
            _ => Self::Other,
        }
    }
}

/// Full discovery result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterSummary {
    pub default_printer: Option<String>,
    pub network_printers: Vec<PrinterInfo>,
    pub local_printers: Vec<PrinterInfo>,
    pub total_printers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_wire_names_round_trip() {
        for provider in TunnelProvider::ALL {
            let parsed: TunnelProvider = provider.as_str().parse().expect("parse");
            assert_eq!(parsed, provider);
            let json = serde_json::to_string(&provider).expect("serialize");
            assert_eq!(json, format!("\"{}\"", provider.as_str()));
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = "ngrok".parse::<TunnelProvider>().unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedProvider(_)));
    }

    #[test]
    fn ipp_job_states_map_to_cache_states() {
        assert_eq!(JobState::from_ipp(3), Some(JobState::Pending));
        assert_eq!(JobState::from_ipp(5), Some(JobState::Printing));
        assert_eq!(JobState::from_ipp(9), Some(JobState::Completed));
        assert_eq!(JobState::from_ipp(42), None);
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Held.is_terminal());
    }

    #[test]
    fn remote_view_is_active_only_with_url() {
        let mut status = TunnelStatus {
            enabled: true,
            running: true,
            provider: TunnelProvider::CloudflareQuick,
            url: None,
            has_token: false,
        };
        assert!(!RemoteConfigView::from(&status).active);
        status.url = Some("https://abc.trycloudflare.com".into());
        assert!(RemoteConfigView::from(&status).active);
    }

    #[test]
    fn device_uri_scheme_decides_connection() {
        assert_eq!(Connection::from_device_uri("ipps://printer.local"), Connection::Network);
        assert_eq!(Connection::from_device_uri("socket://10.0.0.9:9100"), Connection::Network);
        assert_eq!(Connection::from_device_uri("usb://HP/LaserJet"), Connection::Local);
        assert_eq!(Connection::from_device_uri("file:///dev/null"), Connection::Other);
    }

    #[test]
    fn progress_follows_job_state() {
        assert_eq!(job_progress(5), 50);
        assert_eq!(job_progress(9), 100);
        assert_eq!(job_progress(0), 0);
    }
}
