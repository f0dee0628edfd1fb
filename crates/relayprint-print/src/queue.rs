// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job queue manager: submits documents to the spooler and keeps the local
// job cache in step with what the spooler reports.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{error, info, instrument, warn};

use relayprint_core::error::{RelayError, Result};
use relayprint_core::{JobState, JobStatusReport, PrintJobRecord, PrintOptions, QueueStatus};

use crate::spooler::PrintSpooler;
use crate::store::JobStore;

/// Title CUPS shows for jobs submitted through the relay.
pub const DEFAULT_JOB_TITLE: &str = "Print Job";

/// Upper bound on retention, keeps the cutoff arithmetic in range.
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Completion time at the precision the job store keeps, so a report and
/// every later read of the same record agree.
fn completion_stamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub struct JobQueueManager {
    spooler: Arc<dyn PrintSpooler>,
    store: Mutex<JobStore>,
}

impl JobQueueManager {
    pub fn new(spooler: Arc<dyn PrintSpooler>, store: JobStore) -> Self {
        Self {
            spooler,
            store: Mutex::new(store),
        }
    }

    pub fn spooler(&self) -> &Arc<dyn PrintSpooler> {
        &self.spooler
    }

    fn store(&self) -> MutexGuard<'_, JobStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `file` to `printer` and remember the job as pending.
    #[instrument(skip(self, file, options), fields(printer = %printer))]
    pub async fn submit_job(&self, printer: &str, file: &Path, options: &PrintOptions) -> Result<i32> {
        let job_id = match self
            .spooler
            .print_file(printer, file, DEFAULT_JOB_TITLE, options)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to submit job");
                return Err(e);
            }
        };

        self.store().insert(&PrintJobRecord::new(job_id, printer))?;
        info!(job_id, "submitted job");
        Ok(job_id)
    }

    /// Current state of a job submitted through the relay.
    ///
    /// A job the spooler no longer lists has finished; unless it was already
    /// canceled or aborted it is recorded as completed. `completed_at` is
    /// stamped the first time a job is seen in any terminal state.
    #[instrument(skip(self))]
    pub async fn job_status(&self, job_id: i32) -> Result<JobStatusReport> {
        if self.store().get(job_id)?.is_none() {
            return Err(RelayError::JobNotFound(job_id));
        }

        let active = self.spooler.active_jobs().await?;
        let spooled = active.into_iter().find(|job| job.job_id == job_id);

        let store = self.store();
        let mut record = store.get(job_id)?.ok_or(RelayError::JobNotFound(job_id))?;
        let state_reasons = match spooled {
            Some(job) => {
                if let Some(state) = JobState::from_ipp(job.state) {
                    record.status = state;
                    if state.is_terminal() && record.completed_at.is_none() {
                        record.completed_at = Some(completion_stamp());
                    }
                }
                Some(job.state_reasons)
            }
            None => {
                if !record.status.is_terminal() {
                    record.status = JobState::Completed;
                    record.completed_at = Some(completion_stamp());
                }
                None
            }
        };
        store.update(&record)?;

        Ok(JobStatusReport {
            job_id: record.job_id,
            printer_name: record.printer_name,
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
            state_reasons,
        })
    }

    /// Ask the spooler to cancel a job. Spooler failures yield `false`.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: i32) -> Result<bool> {
        if let Err(e) = self.spooler.cancel_job(job_id).await {
            warn!(error = %e, "failed to cancel job");
            return Ok(false);
        }

        let store = self.store();
        if let Some(mut record) = store.get(job_id)? {
            record.status = JobState::Canceled;
            record.completed_at.get_or_insert_with(completion_stamp);
            store.update(&record)?;
        }
        info!(job_id, "canceled job");
        Ok(true)
    }

    /// Forget jobs that completed more than `max_age_hours` ago.
    #[instrument(skip(self))]
    pub fn clean_old_jobs(&self, max_age_hours: u64) -> Result<usize> {
        let hours = max_age_hours.min(MAX_RETENTION_HOURS) as i64;
        let cutoff = Utc::now() - Duration::hours(hours);
        let removed = self.store().delete_completed_before(cutoff)?;
        if removed > 0 {
            info!(removed, "cleaned up old jobs");
        }
        Ok(removed)
    }

    /// Counts across the cache, plus the spooler's active job count.
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let active_jobs = self.spooler.active_jobs().await?.len();
        let records = self.store().all()?;

        let count = |pred: fn(&JobState) -> bool| records.iter().filter(|r| pred(&r.status)).count();
        Ok(QueueStatus {
            total_jobs: records.len(),
            active_jobs,
            queued_jobs: count(|s| *s == JobState::Pending),
            completed_jobs: count(|s| *s == JobState::Completed),
            failed_jobs: count(JobState::is_failed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spooler::{PrinterAttributes, SpoolerJob};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    #[derive(Default)]
    struct FakeSpooler {
        next_id: AtomicI32,
        jobs: Mutex<Vec<SpoolerJob>>,
        refuse: AtomicBool,
    }

    impl FakeSpooler {
        fn set_state(&self, job_id: i32, state: i32) {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.job_id == job_id) {
                job.state = state;
            }
        }

        fn forget(&self, job_id: i32) {
            self.jobs.lock().unwrap().retain(|j| j.job_id != job_id);
        }
    }

    #[async_trait]
    impl PrintSpooler for FakeSpooler {
        async fn print_file(&self, printer: &str, _file: &Path, title: &str, _options: &PrintOptions) -> Result<i32> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RelayError::Spooler("client-error-not-possible".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
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
                return Err(RelayError::Spooler("client-error-not-found".into()));
            }
            self.forget(job_id);
            Ok(())
        }

        async fn printer_attributes(&self, _printer: &str) -> Result<PrinterAttributes> {
            Ok(PrinterAttributes::new())
        }
    }

    fn manager() -> (JobQueueManager, Arc<FakeSpooler>) {
        let spooler = Arc::new(FakeSpooler::default());
        let manager = JobQueueManager::new(spooler.clone(), JobStore::open_in_memory().expect("store"));
        (manager, spooler)
    }

    async fn submit(manager: &JobQueueManager) -> i32 {
        manager
            .submit_job("Office_Laser", Path::new("/tmp/report.pdf"), &PrintOptions::default())
            .await
            .expect("submit")
    }

    #[tokio::test]
    async fn submitted_job_starts_pending() {
        let (manager, _spooler) = manager();
        let job_id = submit(&manager).await;

        let report = manager.job_status(job_id).await.expect("status");
        assert_eq!(report.status, JobState::Pending);
        assert_eq!(report.printer_name, "Office_Laser");
        assert_eq!(report.state_reasons, Some(vec!["none".to_string()]));
        assert!(report.completed_at.is_none());
    }

    #[tokio::test]
    async fn spooler_refusal_propagates() {
        let (manager, spooler) = manager();
        spooler.refuse.store(true, Ordering::SeqCst);
        let err = manager
            .submit_job("Office_Laser", Path::new("/tmp/a.pdf"), &PrintOptions::default())
            .await
            .expect_err("refused");
        assert!(matches!(err, RelayError::Spooler(_)));
        assert_eq!(manager.queue_status().await.expect("status").total_jobs, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (manager, _spooler) = manager();
        let err = manager.job_status(404).await.expect_err("unknown");
        assert!(matches!(err, RelayError::JobNotFound(404)));
    }

    #[tokio::test]
    async fn spooler_states_map_onto_job_states() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;

        spooler.set_state(job_id, 5);
        assert_eq!(manager.job_status(job_id).await.expect("status").status, JobState::Printing);

        spooler.set_state(job_id, 9);
        let report = manager.job_status(job_id).await.expect("status");
        assert_eq!(report.status, JobState::Completed);
        let first_completed = report.completed_at.expect("completed_at set");

        let again = manager.job_status(job_id).await.expect("status");
        assert_eq!(again.completed_at, Some(first_completed));
    }

    #[tokio::test]
    async fn vanished_job_is_completed() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;
        spooler.forget(job_id);

        let report = manager.job_status(job_id).await.expect("status");
        assert_eq!(report.status, JobState::Completed);
        assert!(report.completed_at.is_some());
        assert!(report.state_reasons.is_none());
    }

    #[tokio::test]
    async fn vanished_aborted_job_stays_aborted() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;
        spooler.set_state(job_id, 8);
        manager.job_status(job_id).await.expect("status");
        spooler.forget(job_id);

        let report = manager.job_status(job_id).await.expect("status");
        assert_eq!(report.status, JobState::Aborted);
    }

    #[tokio::test]
    async fn cancel_marks_job_canceled() {
        let (manager, _spooler) = manager();
        let job_id = submit(&manager).await;

        assert!(manager.cancel_job(job_id).await.expect("cancel"));
        let report = manager.job_status(job_id).await.expect("status");
        assert_eq!(report.status, JobState::Canceled);
    }

    #[tokio::test]
    async fn canceled_completion_time_is_stable() {
        let (manager, _spooler) = manager();
        let job_id = submit(&manager).await;
        manager.cancel_job(job_id).await.expect("cancel");

        let first = manager.job_status(job_id).await.expect("status").completed_at;
        assert!(first.is_some());
        let again = manager.job_status(job_id).await.expect("status").completed_at;
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn vanished_job_completion_time_is_stable() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;
        spooler.forget(job_id);

        let first = manager.job_status(job_id).await.expect("status").completed_at;
        let again = manager.job_status(job_id).await.expect("status").completed_at;
        assert!(first.is_some());
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn cancel_failure_is_false_not_error() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;
        spooler.refuse.store(true, Ordering::SeqCst);

        assert!(!manager.cancel_job(job_id).await.expect("cancel"));
    }

    #[tokio::test]
    async fn queue_status_counts() {
        let (manager, spooler) = manager();
        let _pending = submit(&manager).await;
        let done = submit(&manager).await;
        let canceled = submit(&manager).await;

        spooler.forget(done);
        manager.job_status(done).await.expect("status");
        manager.cancel_job(canceled).await.expect("cancel");

        let status = manager.queue_status().await.expect("queue status");
        assert_eq!(status.total_jobs, 3);
        assert_eq!(status.active_jobs, 1);
        assert_eq!(status.queued_jobs, 1);
        assert_eq!(status.completed_jobs, 1);
        assert_eq!(status.failed_jobs, 1);
    }

    #[tokio::test]
    async fn clean_removes_only_expired_completions() {
        let (manager, spooler) = manager();
        let job_id = submit(&manager).await;
        spooler.forget(job_id);
        manager.job_status(job_id).await.expect("status");

        assert_eq!(manager.clean_old_jobs(24).expect("clean"), 0);
        assert_eq!(manager.clean_old_jobs(0).expect("clean"), 1);
        assert!(matches!(
            manager.job_status(job_id).await,
            Err(RelayError::JobNotFound(_))
        ));
    }
}
