//! Daily backup trigger
//!
//! Sleeps until the next occurrence of a local wall-clock time, runs the
//! backup on a blocking thread and loops. A failed run is logged and the
//! trigger waits for the next day; it never retries the same run.

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::VaultError;

/// The work run at each tick, usually `Vault::backup`
pub type BackupJob = Arc<dyn Fn() -> Result<PathBuf, VaultError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "detail")]
pub enum ScheduleOutcome {
    Succeeded(PathBuf),
    Failed(String),
}

impl ScheduleOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Observability only; nothing in the trigger reads it back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_outcome: Option<ScheduleOutcome>,
}

pub struct ScheduleTrigger {
    at: NaiveTime,
    job: BackupJob,
    status: Arc<Mutex<ScheduleStatus>>,
}

impl std::fmt::Debug for ScheduleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleTrigger")
            .field("at", &self.at)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

impl ScheduleTrigger {
    pub fn new<F>(at: NaiveTime, job: F) -> Self
    where
        F: Fn() -> Result<PathBuf, VaultError> + Send + Sync + 'static,
    {
        Self {
            at,
            job: Arc::new(job),
            status: Arc::new(Mutex::new(ScheduleStatus::default())),
        }
    }

    #[must_use]
    pub fn at(&self) -> NaiveTime {
        self.at
    }

    #[must_use]
    pub fn status(&self) -> ScheduleStatus {
        self.status.lock().clone()
    }

    /// Shared handle to the status, still readable after `run` consumed the
    /// trigger
    #[must_use]
    pub fn status_handle(&self) -> Arc<Mutex<ScheduleStatus>> {
        Arc::clone(&self.status)
    }

    /// Run the job once, now, and record the outcome.
    pub async fn fire(&self) -> ScheduleOutcome {
        let job = Arc::clone(&self.job);
        let started = Utc::now();

        let outcome = match tokio::task::spawn_blocking(move || job()).await {
            Ok(Ok(path)) => {
                tracing::info!("Scheduled backup written to {}", path.display());
                ScheduleOutcome::Succeeded(path)
            }
            Ok(Err(e)) => {
                tracing::error!("Scheduled backup failed: {}", e);
                ScheduleOutcome::Failed(e.to_string())
            }
            Err(e) => {
                tracing::error!("Scheduled backup task aborted: {}", e);
                ScheduleOutcome::Failed(e.to_string())
            }
        };

        let mut status = self.status.lock();
        status.last_attempt = Some(started);
        status.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut last_target: Option<DateTime<Local>> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Local::now();
            // never schedule the same slot twice, even if the wall clock lags
            let after = match last_target {
                Some(prev) if prev >= now => prev,
                _ => now,
            };
            let target = next_run_after(&after, self.at);
            let wait = (target - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!("Next scheduled backup at {}", target.to_rfc3339());

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    last_target = Some(target);
                    self.fire().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Backup schedule stopped");
    }
}

/// First instant strictly after `now` whose local time is `at`.
///
/// Days where `at` falls in a DST gap are skipped; an ambiguous time picks
/// the earlier instant.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    for offset in 0..=3 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
    }

    now.clone() + chrono::Duration::days(1)
}
