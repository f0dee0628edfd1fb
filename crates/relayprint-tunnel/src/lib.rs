// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RelayPrint Tunnel — supervises the provider process (LocalTunnel or a
// Cloudflare quick tunnel) that exposes the local API publicly, captures the
// URL it announces, and persists the tunnel configuration.

pub mod catalog;
pub mod detector;
pub mod launcher;
pub mod manager;
pub mod store;
pub mod watcher;

pub use catalog::{ProcessSignature, ProviderCatalog, ProviderSpec};
pub use detector::{ProcessDetector, ProcessEntry, PsProcessDetector, parse_process_table};
pub use launcher::{OutputLines, ProcessLauncher, RunId, TunnelProcess};
pub use manager::TunnelManager;
pub use store::{ConfigStore, PublishedUrlFile};
pub use watcher::{OutputWatcher, PublishOutcome, UrlSink, capture_url};
