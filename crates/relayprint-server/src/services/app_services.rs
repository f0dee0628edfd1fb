// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: initialises the backend subsystems once at startup
// and hands them to the HTTP handlers.
//
// The job cache is synchronous SQLite behind a mutex inside
// `JobQueueManager`; everything else is async and shares by `Arc`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relayprint_core::ServerConfig;
use relayprint_core::error::Result;
use relayprint_print::{CupsClient, JobQueueManager, JobStore, PrintSpooler, PrinterDiscovery};
use relayprint_tunnel::{ProviderCatalog, PsProcessDetector, TunnelManager};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::data_dir;

/// Server settings file inside the data directory.
pub const CONFIG_FILE: &str = "relayprint.json";

const JOBS_DB: &str = "jobs.db";
const UPLOAD_DIR: &str = "print_jobs";
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shared application services, cloned into every request handler.
///
/// All fields are cheaply cloneable (Arc-wrapped).
#[derive(Clone)]
pub struct AppServices {
    config: Arc<ServerConfig>,
    upload_dir: PathBuf,
    queue: Arc<JobQueueManager>,
    discovery: Arc<PrinterDiscovery>,
    tunnel: Arc<TunnelManager>,
}

impl AppServices {
    /// Initialise all services rooted at `dir`. Call once at startup.
    ///
    /// Opens the job cache, prepares the CUPS client and the tunnel
    /// supervisor (but does not start a tunnel).
    pub fn init(dir: &Path) -> Result<Self> {
        info!(path = %dir.display(), "initialising app services");

        let config = load_config(dir);
        let upload_dir = data_dir::data_subdir(dir, UPLOAD_DIR)?;

        let spooler: Arc<dyn PrintSpooler> = Arc::new(CupsClient::new(&config.cups_uri)?);
        let store = match JobStore::open(dir.join(JOBS_DB)) {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "job cache unavailable, using in-memory fallback");
                JobStore::open_in_memory()?
            }
        };
        let queue = JobQueueManager::new(Arc::clone(&spooler), store);
        let discovery = PrinterDiscovery::new(spooler);

        let catalog = ProviderCatalog::new(config.tunnel_target_port);
        let detector = PsProcessDetector::new(&catalog)
            .with_timeout(Duration::from_secs(config.detection_timeout_secs));
        let tunnel = TunnelManager::new(dir, catalog, Arc::new(detector))?
            .with_grace_period(Duration::from_secs(config.termination_grace_secs));

        info!("app services initialised");
        Ok(Self::new(config, upload_dir, queue, discovery, tunnel))
    }

    /// Assemble services from already-built parts.
    pub fn new(
        config: ServerConfig,
        upload_dir: PathBuf,
        queue: JobQueueManager,
        discovery: PrinterDiscovery,
        tunnel: TunnelManager,
    ) -> Self {
        Self {
            config: Arc::new(config),
            upload_dir,
            queue: Arc::new(queue),
            discovery: Arc::new(discovery),
            tunnel: Arc::new(tunnel),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Where uploads are staged until the spooler has them.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn queue(&self) -> &JobQueueManager {
        &self.queue
    }

    pub fn discovery(&self) -> &PrinterDiscovery {
        &self.discovery
    }

    pub fn tunnel(&self) -> &TunnelManager {
        &self.tunnel
    }

    /// Bring back the tunnel the persisted configuration asks for.
    pub async fn restore_tunnel(&self) {
        match self.tunnel.restore().await {
            Ok(Some(outcome)) => info!(provider = %outcome.provider, "resumed tunnel"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not resume tunnel"),
        }
    }

    /// Drop completed jobs past their retention, once now and then hourly.
    pub fn spawn_job_cleanup(&self) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let retention = self.config.job_retention_hours;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = queue.clean_old_jobs(retention) {
                    warn!(error = %e, "job cleanup failed");
                }
            }
        })
    }
}

// -- Config file -------------------------------------------------------------

/// Read `relayprint.json`; a missing or unreadable file means defaults.
pub fn load_config(data_dir: &Path) -> ServerConfig {
    let path = data_dir.join(CONFIG_FILE);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no server config, using defaults");
            return ServerConfig::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read server config, using defaults");
            return ServerConfig::default();
        }
    };
    match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid server config, using defaults");
            ServerConfig::default()
        }
    }
}
