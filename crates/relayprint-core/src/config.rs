// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application and tunnel configuration records.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::TunnelProvider;

/// Persistent server settings (`relayprint.json` in the data directory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the REST API binds to.
    pub bind_address: String,
    /// Port for the REST API (reached through the Home Assistant ingress).
    pub api_port: u16,
    /// Local port that tunnel providers forward public traffic to.
    pub tunnel_target_port: u16,
    /// Base IPP URI of the CUPS scheduler.
    pub cups_uri: String,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Completed jobs older than this are dropped from the cache.
    pub job_retention_hours: u64,
    /// Grace period between SIGTERM and SIGKILL for tunnel processes.
    pub termination_grace_secs: u64,
    /// Timeout for process-table scans.
    pub detection_timeout_secs: u64,
    /// Optional bearer token accepted in place of the ingress header.
    pub api_token: Option<String>,
    /// Address of the ingress proxy. `X-Ingress-Path` is honoured only on
    /// connections from this peer; `None` never honours it.
    pub ingress_peer: Option<IpAddr>,
}

/// Home Assistant Supervisor's ingress gateway on the hassio network.
pub const DEFAULT_INGRESS_PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(172, 30, 32, 2));

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            api_port: 7779,
            tunnel_target_port: 7779,
            cups_uri: "ipp://localhost:631".into(),
            max_upload_bytes: 50 * 1024 * 1024,
            job_retention_hours: 24,
            termination_grace_secs: 5,
            detection_timeout_secs: 2,
            api_token: None,
            ingress_peer: Some(DEFAULT_INGRESS_PEER),
        }
    }
}

/// Desired tunnel state, persisted as a whole (`tunnel.json`).
///
/// `provider == CloudflareNamed` holds exactly when `secret_token` is
/// non-empty; [`TunnelConfiguration::normalize`] re-derives it on every write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfiguration {
    /// Whether the user wants a tunnel running.
    pub enabled: bool,
    pub provider: TunnelProvider,
    /// Token for a named Cloudflare tunnel; empty for token-less providers.
    pub secret_token: String,
    /// Last URL captured from a provider's output.
    pub public_url: Option<String>,
}

/// A user-facing configuration change. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfigUpdate {
    pub provider: Option<TunnelProvider>,
    /// `Some("")` clears the stored token.
    pub token: Option<String>,
}

impl TunnelConfiguration {
    pub fn has_token(&self) -> bool {
        !self.secret_token.is_empty()
    }

    /// Restore the record's invariants after any mutation.
    pub fn normalize(&mut self) {
        self.secret_token = self.secret_token.trim().to_string();
        if self.has_token() {
            self.provider = TunnelProvider::CloudflareNamed;
        } else if self.provider == TunnelProvider::CloudflareNamed {
            self.provider = TunnelProvider::LocalTunnel;
        }
        if !self.enabled {
            self.public_url = None;
        }
    }

    /// Apply a user update; a token always wins over the supplied provider.
    pub fn apply_update(&mut self, update: &TunnelConfigUpdate) {
        if let Some(provider) = update.provider {
            self.provider = provider;
        }
        if let Some(ref token) = update.token {
            self.secret_token = token.clone();
        }
        self.normalize();
    }
}
