// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output watcher: scans a provider's output for its public URL and hands the
// first match to a sink that checks the run is still current.

use std::sync::Arc;

use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use relayprint_core::TunnelProvider;
use relayprint_core::error::Result;

use crate::launcher::{OutputLines, RunId};

/// Result of offering a URL to a [`UrlSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The run was superseded or stopped; nothing was written.
    Stale,
}

/// Destination for captured URLs.
pub trait UrlSink: Send + Sync {
    /// Record `url` for `run_id` if that run is still the current one.
    fn publish(&self, run_id: RunId, url: &str) -> Result<PublishOutcome>;
}

/// Read lines until one matches `pattern`; return the matched text.
///
/// Returns `None` when the stream ends without a match.
pub async fn capture_url(lines: &mut OutputLines, pattern: &Regex) -> Option<String> {
    while let Some(line) = lines.next_line().await {
        if let Some(found) = pattern.find(&line) {
            return Some(found.as_str().to_string());
        }
    }
    None
}

/// Watches one run's output for its public URL.
#[derive(Debug)]
pub struct OutputWatcher {
    run_id: RunId,
    provider: TunnelProvider,
    pattern: Regex,
    lines: OutputLines,
}

impl OutputWatcher {
    pub fn new(run_id: RunId, provider: TunnelProvider, pattern: Regex, lines: OutputLines) -> Self {
        Self {
            run_id,
            provider,
            pattern,
            lines,
        }
    }

    pub fn spawn(self, sink: Arc<dyn UrlSink>) -> JoinHandle<Option<String>> {
        tokio::spawn(self.run(sink))
    }

    /// Capture at most one URL and publish it. Returns the published URL.
    #[instrument(skip_all, fields(run = %self.run_id, provider = %self.provider))]
    pub async fn run(mut self, sink: Arc<dyn UrlSink>) -> Option<String> {
        let Some(url) = capture_url(&mut self.lines, &self.pattern).await else {
            debug!("output closed before a public URL appeared");
            return None;
        };

        match sink.publish(self.run_id, &url) {
            Ok(PublishOutcome::Published) => {
                info!(%url, "tunnel URL published");
                Some(url)
            }
            Ok(PublishOutcome::Stale) => {
                debug!(%url, "discarding URL from superseded run");
                None
            }
            Err(e) => {
                error!(%url, error = %e, "failed to publish tunnel URL");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        accept: bool,
        seen: Mutex<Vec<(RunId, String)>>,
    }

    impl RecordingSink {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl UrlSink for RecordingSink {
        fn publish(&self, run_id: RunId, url: &str) -> Result<PublishOutcome> {
            self.seen.lock().unwrap().push((run_id, url.to_string()));
            Ok(if self.accept {
                PublishOutcome::Published
            } else {
                PublishOutcome::Stale
            })
        }
    }

    fn quick_pattern() -> Regex {
        Regex::new(r"https://[a-zA-Z0-9-]+\.trycloudflare\.com").unwrap()
    }

    #[tokio::test]
    async fn publishes_first_match_once() {
        let (tx, lines) = OutputLines::channel();
        for line in [
            "INF Requesting new quick Tunnel on trycloudflare.com...",
            "INF |  https://first-one.trycloudflare.com  |",
            "INF |  https://second-one.trycloudflare.com  |",
        ] {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);

        let sink = RecordingSink::new(true);
        let run = RunId::new();
        let published = OutputWatcher::new(run, TunnelProvider::CloudflareQuick, quick_pattern(), lines)
            .run(sink.clone())
            .await;

        assert_eq!(published.as_deref(), Some("https://first-one.trycloudflare.com"));
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (run, "https://first-one.trycloudflare.com".to_string()));
    }

    #[tokio::test]
    async fn no_match_publishes_nothing() {
        let (tx, lines) = OutputLines::channel();
        tx.send("ERR failed to connect to edge".to_string()).unwrap();
        drop(tx);

        let sink = RecordingSink::new(true);
        let published = OutputWatcher::new(RunId::new(), TunnelProvider::CloudflareQuick, quick_pattern(), lines)
            .spawn(sink.clone())
            .await
            .unwrap();

        assert!(published.is_none());
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_run_reports_nothing_published() {
        let (tx, lines) = OutputLines::channel();
        tx.send("https://late.trycloudflare.com".to_string()).unwrap();

        let sink = RecordingSink::new(false);
        let published = OutputWatcher::new(RunId::new(), TunnelProvider::CloudflareQuick, quick_pattern(), lines)
            .run(sink.clone())
            .await;

        assert!(published.is_none());
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capture_url_skips_non_matching_lines() {
        let (tx, mut lines) = OutputLines::channel();
        tx.send("your url is: nothing yet".to_string()).unwrap();
        tx.send("your url is: https://shy-cat.loca.lt".to_string()).unwrap();
        drop(tx);

        let pattern = Regex::new(r"https://[a-z0-9-]+\.loca\.lt").unwrap();
        assert_eq!(
            capture_url(&mut lines, &pattern).await.as_deref(),
            Some("https://shy-cat.loca.lt")
        );
        assert_eq!(capture_url(&mut lines, &pattern).await, None);
    }
}
