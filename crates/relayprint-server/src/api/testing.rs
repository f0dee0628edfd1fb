// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test fixtures: a fake spooler, a fake process detector, shell stand-ins
// for lpstat and the tunnel clients, all rooted in a temporary directory.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use relayprint_core::error::{RelayError, Result};
use relayprint_core::{PrintOptions, ServerConfig, TunnelProvider};
use relayprint_print::{JobQueueManager, JobStore, PrintSpooler, PrinterAttributes, PrinterDiscovery, SpoolerJob};
use relayprint_tunnel::{ProcessDetector, ProviderCatalog, TunnelManager};

use crate::services::app_services::AppServices;

pub const LT_URL: &str = "https://quiet-fox-12.loca.lt";
pub const QUICK_URL: &str = "https://calm-river.trycloudflare.com";

const LPSTAT_SCRIPT: &str = r#"case "$0" in
  -v) printf 'device for Lab: ipp://10.0.0.5/ipp/print\ndevice for Desk: usb://HP/DeskJet\n' ;;
  -d) echo 'system default destination: Lab' ;;
esac"#;

#[derive(Default)]
pub struct FakeSpooler {
    next_id: AtomicI32,
    jobs: Mutex<Vec<SpoolerJob>>,
    submissions: Mutex<Vec<(String, String, Vec<u8>)>>,
    refuse: AtomicBool,
}

impl FakeSpooler {
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// `(printer, staged path, contents)` for every accepted job.
    pub fn submissions(&self) -> Vec<(String, String, Vec<u8>)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintSpooler for FakeSpooler {
    async fn print_file(&self, printer: &str, file: &Path, title: &str, _options: &PrintOptions) -> Result<i32> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::Spooler("server-error-not-accepting-jobs".into()));
        }
        let contents = std::fs::read(file)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.submissions
            .lock()
            .unwrap()
            .push((printer.to_string(), file.display().to_string(), contents));
        self.jobs.lock().unwrap().push(SpoolerJob {
            job_id: id,
            name: title.to_string(),
            state: 3,
            state_reasons: vec!["none".into()],
            printer_uri: Some(format!("ipp://localhost:631/printers/{printer}")),
        });
        Ok(id)
    }

    async fn active_jobs(&self) -> Result<Vec<SpoolerJob>> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn cancel_job(&self, job_id: i32) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::Spooler("client-error-not-possible".into()));
        }
        self.jobs.lock().unwrap().retain(|j| j.job_id != job_id);
        Ok(())
    }

    async fn printer_attributes(&self, _printer: &str) -> Result<PrinterAttributes> {
        Ok(PrinterAttributes::new())
    }
}

/// Sees no external tunnel processes.
pub struct IdleDetector;

#[async_trait]
impl ProcessDetector for IdleDetector {
    async fn is_running(&self, _provider: Option<TunnelProvider>) -> bool {
        false
    }

    async fn terminate_matching(&self, _provider: Option<TunnelProvider>) -> usize {
        0
    }
}

pub struct Fixture {
    pub services: AppServices,
    pub spooler: Arc<FakeSpooler>,
    _dir: TempDir,
}

impl Fixture {
    /// Test clients connect over loopback, which stands in for the ingress
    /// gateway here.
    pub fn new(api_token: Option<&str>) -> Self {
        Self::with_config(ServerConfig {
            api_token: api_token.map(str::to_string),
            ingress_peer: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let spooler = Arc::new(FakeSpooler::default());

        let upload_dir = dir.path().join("print_jobs");
        std::fs::create_dir_all(&upload_dir).expect("upload dir");

        let queue = JobQueueManager::new(spooler.clone(), JobStore::open_in_memory().expect("store"));
        let discovery = PrinterDiscovery::new(spooler.clone()).with_command("sh", &["-c", LPSTAT_SCRIPT]);

        let lt_script = format!("echo 'your url is: {LT_URL}'; exec sleep 30");
        let quick_script = format!("echo 'INF |  {QUICK_URL}  |' 1>&2; exec sleep 30");
        let catalog = ProviderCatalog::new(config.tunnel_target_port)
            .with_command(TunnelProvider::LocalTunnel, "sh", &["-c", lt_script.as_str()])
            .with_command(TunnelProvider::CloudflareQuick, "sh", &["-c", quick_script.as_str()]);
        let tunnel = TunnelManager::new(dir.path(), catalog, Arc::new(IdleDetector))
            .expect("tunnel manager")
            .with_grace_period(Duration::from_millis(500));

        let services = AppServices::new(config, upload_dir, queue, discovery, tunnel);
        Self {
            services,
            spooler,
            _dir: dir,
        }
    }
}
