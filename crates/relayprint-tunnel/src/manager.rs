// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tunnel supervisor: start, stop and status for the single tunnel process
// this instance owns.
//
// Two locks are involved. `owned` (async) serializes start/stop so only one
// provider process exists at a time. `current` (sync) is the publication gate:
// it names the run whose URL may be published, and it is cleared before a
// process is terminated so a late URL from the old run is discarded.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use relayprint_core::error::{RelayError, Result};
use relayprint_core::{
    StartOutcome, TunnelConfigUpdate, TunnelConfiguration, TunnelProvider, TunnelStatus,
};

use crate::catalog::ProviderCatalog;
use crate::detector::ProcessDetector;
use crate::launcher::{DEFAULT_GRACE, ProcessLauncher, RunId, TunnelProcess};
use crate::store::{ConfigStore, PublishedUrlFile};
use crate::watcher::{OutputWatcher, PublishOutcome, UrlSink};

/// Configuration record inside the state directory.
pub const CONFIG_FILE: &str = "tunnel.json";
/// Published URL inside the state directory.
pub const URL_FILE: &str = "tunnel_url";

#[derive(Debug)]
struct CurrentRun {
    run_id: RunId,
    exited: watch::Receiver<bool>,
}

/// Durable state plus the publication gate, shared with output watchers.
#[derive(Debug)]
struct Publication {
    store: ConfigStore,
    url_file: PublishedUrlFile,
    current: Mutex<Option<CurrentRun>>,
}

impl Publication {
    fn current(&self) -> MutexGuard<'_, Option<CurrentRun>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_current(&self, run: Option<CurrentRun>) {
        *self.current() = run;
    }

    fn owned_alive(&self) -> bool {
        self.current()
            .as_ref()
            .is_some_and(|run| !*run.exited.borrow())
    }
}

impl UrlSink for Publication {
    fn publish(&self, run_id: RunId, url: &str) -> Result<PublishOutcome> {
        // Held across both writes so stop/start cannot interleave.
        let current = self.current();
        if current.as_ref().map(|run| run.run_id) != Some(run_id) {
            return Ok(PublishOutcome::Stale);
        }
        self.url_file.publish(url)?;
        self.store.update(|cfg| cfg.public_url = Some(url.to_string()))?;
        Ok(PublishOutcome::Published)
    }
}

/// Supervises the tunnel provider process.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct TunnelManager {
    catalog: ProviderCatalog,
    launcher: ProcessLauncher,
    detector: Arc<dyn ProcessDetector>,
    publication: Arc<Publication>,
    owned: tokio::sync::Mutex<Option<TunnelProcess>>,
    grace: Duration,
}

impl TunnelManager {
    /// Open (or create) the tunnel state in `state_dir`.
    pub fn new(
        state_dir: &Path,
        catalog: ProviderCatalog,
        detector: Arc<dyn ProcessDetector>,
    ) -> Result<Self> {
        let store = ConfigStore::open(state_dir.join(CONFIG_FILE))?;
        let url_file = PublishedUrlFile::new(state_dir.join(URL_FILE));
        info!(
            state_dir = %state_dir.display(),
            target_port = catalog.target_port(),
            "tunnel manager ready"
        );
        Ok(Self {
            catalog,
            launcher: ProcessLauncher::new(),
            detector,
            publication: Arc::new(Publication {
                store,
                url_file,
                current: Mutex::new(None),
            }),
            owned: tokio::sync::Mutex::new(None),
            grace: DEFAULT_GRACE,
        })
    }

    /// Time a provider gets between SIGTERM and SIGKILL.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Launch `provider`, replacing any tunnel this instance owns.
    ///
    /// Returns as soon as the process is spawned; the URL is published
    /// asynchronously once it appears in the output.
    #[instrument(skip(self, token), fields(provider = %provider))]
    pub async fn start(&self, provider: TunnelProvider, token: Option<&str>) -> Result<StartOutcome> {
        if token.is_some_and(|t| !t.trim().is_empty()) {
            return Err(RelayError::UnsupportedProvider(format!(
                "{} needs a full add-on restart and cannot be started directly",
                TunnelProvider::CloudflareNamed.display_name()
            )));
        }
        let spec = self.catalog.launchable(provider)?;
        let Some(pattern) = spec.url_pattern().cloned() else {
            return Err(RelayError::UnsupportedProvider(provider.to_string()));
        };

        let mut owned = self.owned.lock().await;

        self.publication.set_current(None);
        if let Some(previous) = owned.take() {
            info!(previous_run = %previous.run_id(), "replacing running tunnel");
            if let Err(e) = previous.terminate(self.grace).await {
                warn!(error = %e, "previous tunnel did not shut down cleanly");
            }
        }
        self.publication.url_file.clear()?;
        self.publication.store.update(|cfg| {
            cfg.enabled = true;
            cfg.provider = provider;
            cfg.secret_token.clear();
            cfg.public_url = None;
        })?;

        let mut process = self.launcher.launch(spec)?;
        let run_id = process.run_id();
        let watcher = process
            .take_output()
            .map(|lines| OutputWatcher::new(run_id, provider, pattern, lines));
        self.publication.set_current(Some(CurrentRun {
            run_id,
            exited: process.exit_signal(),
        }));
        *owned = Some(process);
        drop(owned);

        if let Some(watcher) = watcher {
            let sink: Arc<dyn UrlSink> = self.publication.clone();
            watcher.spawn(sink);
        }

        info!(run = %run_id, "tunnel starting");
        Ok(StartOutcome {
            starting: true,
            provider,
            provider_name: spec.display_name().to_string(),
        })
    }

    /// Stop the tunnel and record that none is wanted.
    ///
    /// Also asks any externally started provider process to exit. A no-op
    /// apart from the persisted flag when nothing is running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut owned = self.owned.lock().await;

        self.publication.set_current(None);
        let persisted = self.publication.store.update(|cfg| {
            cfg.enabled = false;
            cfg.public_url = None;
        });

        if let Some(process) = owned.take() {
            info!(run = %process.run_id(), "stopping tunnel");
            if let Err(e) = process.terminate(self.grace).await {
                warn!(error = %e, "tunnel did not shut down cleanly");
            }
        }
        let cleared = self.publication.url_file.clear();

        // Still under the lock, so a start queued behind us is not swept.
        let external = self.detector.terminate_matching(None).await;
        if external > 0 {
            info!(count = external, "stopped external tunnel processes");
        }
        drop(owned);

        persisted?;
        cleared
    }

    /// Snapshot of the tunnel state. Does not wait for start/stop.
    pub async fn status(&self) -> TunnelStatus {
        let config = self.publication.store.snapshot();
        let running = self.publication.owned_alive() || {
            let probe = (config.provider != TunnelProvider::None).then_some(config.provider);
            self.detector.is_running(probe).await
        };
        let url = self
            .publication
            .url_file
            .read()
            .or_else(|| config.public_url.clone());

        TunnelStatus {
            enabled: config.enabled,
            running,
            provider: config.provider,
            url,
            has_token: config.has_token(),
        }
    }

    pub fn configuration(&self) -> TunnelConfiguration {
        self.publication.store.snapshot()
    }

    /// Apply a provider/token change. Takes effect on the next start.
    pub fn update_configuration(&self, update: &TunnelConfigUpdate) -> Result<TunnelConfiguration> {
        let updated = self.publication.store.update(|cfg| cfg.apply_update(update))?;
        debug!(provider = %updated.provider, has_token = updated.has_token(), "tunnel configuration updated");
        Ok(updated)
    }

    /// Relaunch the persisted tunnel after a restart of this process.
    ///
    /// Providers that cannot be launched here (named tunnels) are left to
    /// whatever manages them.
    pub async fn restore(&self) -> Result<Option<StartOutcome>> {
        let config = self.configuration();
        if !config.enabled {
            return Ok(None);
        }
        if self.catalog.launchable(config.provider).is_err() {
            info!(provider = %config.provider, "tunnel is managed externally, not relaunching");
            return Ok(None);
        }
        self.start(config.provider, None).await.map(Some)
    }

    /// Terminate the owned process without changing the persisted intent.
    pub async fn shutdown(&self) {
        let mut owned = self.owned.lock().await;
        self.publication.set_current(None);
        if let Some(process) = owned.take() {
            info!(run = %process.run_id(), "shutting down tunnel");
            if let Err(e) = process.terminate(self.grace).await {
                warn!(error = %e, "tunnel did not shut down cleanly");
            }
        }
        if let Err(e) = self.publication.url_file.clear() {
            warn!(error = %e, "could not clear published tunnel URL");
        }
    }
}
