// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable tunnel state: the JSON configuration record and the published-URL
// file read by other processes. Both are replaced atomically so readers only
// ever see a complete old value or a complete new one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use relayprint_core::TunnelConfiguration;
use relayprint_core::error::{RelayError, Result};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".into());
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = parent.join(format!(".{name}.tmp.{}.{seq}", std::process::id()));

    if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// File-backed [`TunnelConfiguration`] with an in-memory copy.
///
/// Every mutation goes through [`ConfigStore::update`], which normalizes the
/// record and persists it before the cached copy changes.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<TunnelConfiguration>,
}

impl ConfigStore {
    /// Open the store, creating the file with defaults if it is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<TunnelConfiguration>(&raw) {
                Ok(mut config) => {
                    config.normalize();
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable tunnel configuration, using defaults");
                    Self::persist(&path, &TunnelConfiguration::default())?;
                    TunnelConfiguration::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "creating default tunnel configuration");
                Self::persist(&path, &TunnelConfiguration::default())?;
                TunnelConfiguration::default()
            }
            Err(e) => {
                return Err(RelayError::ConfigStore(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            current: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> TunnelConfiguration {
        self.lock().clone()
    }

    /// Apply `mutate`, normalize, persist, then expose the new record.
    ///
    /// If persisting fails the cached record is left untouched.
    pub fn update<F>(&self, mutate: F) -> Result<TunnelConfiguration>
    where
        F: FnOnce(&mut TunnelConfiguration),
    {
        let mut current = self.lock();
        let mut next = current.clone();
        mutate(&mut next);
        next.normalize();
        Self::persist(&self.path, &next)?;
        *current = next.clone();
        Ok(next)
    }

    fn persist(path: &Path, config: &TunnelConfiguration) -> Result<()> {
        let json = serde_json::to_vec_pretty(config)?;
        write_atomic(path, &json)
            .map_err(|e| RelayError::ConfigStore(format!("write {}: {e}", path.display())))
    }

    fn lock(&self) -> MutexGuard<'_, TunnelConfiguration> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Plain-text file holding the live public URL, absent when there is none.
#[derive(Debug, Clone)]
pub struct PublishedUrlFile {
    path: PathBuf,
}

impl PublishedUrlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(&self, url: &str) -> Result<()> {
        write_atomic(&self.path, url.as_bytes())
            .map_err(|e| RelayError::ConfigStore(format!("write {}: {e}", self.path.display())))
    }

    /// Trimmed contents, `None` if the file is missing or blank.
    pub fn read(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let url = raw.trim();
        (!url.is_empty()).then(|| url.to_string())
    }

    /// Remove the file; an already missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::ConfigStore(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayprint_core::TunnelProvider;

    #[test]
    fn first_open_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnel.json");
        let store = ConfigStore::open(&path).expect("open");

        assert!(path.exists());
        assert_eq!(store.snapshot(), TunnelConfiguration::default());
    }

    #[test]
    fn updates_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnel.json");
        {
            let store = ConfigStore::open(&path).expect("open");
            store
                .update(|cfg| {
                    cfg.enabled = true;
                    cfg.provider = TunnelProvider::CloudflareQuick;
                    cfg.public_url = Some("https://a-b.trycloudflare.com".into());
                })
                .expect("update");
        }

        let reopened = ConfigStore::open(&path).expect("reopen");
        let cfg = reopened.snapshot();
        assert!(cfg.enabled);
        assert_eq!(cfg.provider, TunnelProvider::CloudflareQuick);
        assert_eq!(cfg.public_url.as_deref(), Some("https://a-b.trycloudflare.com"));
    }

    #[test]
    fn update_normalizes_token_into_named_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::open(dir.path().join("tunnel.json")).expect("open");

        let cfg = store
            .update(|cfg| cfg.secret_token = "  eyJhIjoi  ".into())
            .expect("update");
        assert_eq!(cfg.provider, TunnelProvider::CloudflareNamed);
        assert_eq!(cfg.secret_token, "eyJhIjoi");
        assert!(cfg.has_token());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnel.json");
        fs::write(&path, "{ not json").expect("seed");

        let store = ConfigStore::open(&path).expect("open");
        assert_eq!(store.snapshot(), TunnelConfiguration::default());
        let raw = fs::read_to_string(&path).expect("read back");
        assert!(serde_json::from_str::<TunnelConfiguration>(&raw).is_ok());
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("tunnel_url");
        write_atomic(&path, b"one").expect("first");
        write_atomic(&path, b"two").expect("second");

        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn url_file_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = PublishedUrlFile::new(dir.path().join("tunnel_url"));

        assert_eq!(file.read(), None);
        file.publish("https://shy-cat.loca.lt").expect("publish");
        assert_eq!(file.read().as_deref(), Some("https://shy-cat.loca.lt"));

        file.clear().expect("clear");
        assert_eq!(file.read(), None);
        file.clear().expect("clearing twice is fine");
    }

    #[test]
    fn blank_url_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnel_url");
        fs::write(&path, "  \n").expect("seed");
        assert_eq!(PublishedUrlFile::new(&path).read(), None);

        fs::write(&path, "https://x.trycloudflare.com\n").expect("seed");
        assert_eq!(
            PublishedUrlFile::new(&path).read().as_deref(),
            Some("https://x.trycloudflare.com")
        );
    }
}
