//! Pipeline manager: queue, dedup, schedule, cancel, and await scrape jobs.
//!
//! Jobs live in memory only. The manager owns the job table (a mutex-held
//! map handing out snapshots) and a FIFO scheduler that keeps at most
//! `concurrency` jobs running; a fair semaphore preserves enqueue order.
//!
//! State machine:
//!
//! ```text
//! QUEUED ──start──► RUNNING ──ok──► COMPLETED
//!                   │
//!                   ├──err──► FAILED
//!                   │
//!                   └──cancel──► CANCELLED
//! ```
//!
//! Enqueueing a job for a `(library, version)` that already has a QUEUED
//! or RUNNING job cancels the old one and waits for it to settle before
//! the new job enters the queue, so the key has at most one active job at
//! any time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::{DocdexError, Result};
use crate::scraper::{ScrapeOptions, StrategyRegistry};
use crate::store::DocumentStore;
use crate::urls::parse_url;
use crate::version::is_valid_version;
use crate::worker::{self, JobProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Snapshot of a job's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub library: String,
    pub version: String,
    #[serde(skip)]
    pub options: ScrapeOptions,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    pub error: Option<String>,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

struct Inner {
    store: Arc<DocumentStore>,
    registry: Arc<StrategyRegistry>,
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    semaphore: Arc<Semaphore>,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

pub struct PipelineManager {
    inner: Arc<Inner>,
}

impl PipelineManager {
    pub fn new(
        store: Arc<DocumentStore>,
        registry: Arc<StrategyRegistry>,
        concurrency: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                jobs: Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Start the scheduler. Jobs enqueued earlier begin running now.
    pub fn start(&self) {
        let Some(mut queue_rx) = self.inner.queue_rx.lock().expect("queue lock").take() else {
            return; // already started
        };
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            while let Some(job_id) = queue_rx.recv().await {
                let permit = match inner.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let Some((options, cancel)) = claim_job(&inner, job_id) else {
                    drop(permit);
                    continue;
                };
                let task_inner = inner.clone();
                tokio::spawn(async move {
                    execute_job(task_inner, job_id, options, cancel).await;
                    drop(permit);
                });
            }
        });
        *self.inner.scheduler.lock().expect("scheduler lock") = Some(handle);
    }

    /// Stop scheduling, cancel whatever is active, and wait for every job
    /// to settle.
    pub async fn stop(&self) {
        let handle = self.inner.scheduler.lock().expect("scheduler lock").take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let waiters: Vec<(Uuid, watch::Receiver<bool>)> = {
            let mut jobs = self.inner.jobs.lock().expect("jobs lock");
            let now = Utc::now();
            let mut waiters = Vec::new();
            for entry in jobs.values_mut() {
                match entry.job.status {
                    JobStatus::Queued => {
                        entry.cancel.cancel();
                        settle(entry, JobStatus::Cancelled, None, now);
                    }
                    JobStatus::Running => {
                        entry.cancel.cancel();
                        waiters.push((entry.job.id, entry.done_rx.clone()));
                    }
                    _ => {}
                }
            }
            waiters
        };
        for (id, mut rx) in waiters {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    warn!(job = %id, "job settled channel closed");
                    break;
                }
            }
        }
    }

    /// Queue a scrape job. Any QUEUED or RUNNING job for the same
    /// `(library, version)` is cancelled first and awaited until it
    /// settles as CANCELLED.
    pub async fn enqueue_job(
        &self,
        library: &str,
        version: Option<&str>,
        options: ScrapeOptions,
    ) -> Result<Uuid> {
        parse_url(&options.url)?;
        if library.trim().is_empty() {
            return Err(DocdexError::Other("library must not be empty".to_string()));
        }
        let version = version.unwrap_or("");
        if !is_valid_version(version) {
            return Err(DocdexError::InvalidVersion(version.to_string()));
        }
        let library = library.to_lowercase();
        let version = version.to_lowercase();

        // Dedup: cancel active jobs on the same key, then wait for them.
        let superseded: Vec<watch::Receiver<bool>> = {
            let mut jobs = self.inner.jobs.lock().expect("jobs lock");
            let now = Utc::now();
            let mut waiters = Vec::new();
            for entry in jobs.values_mut() {
                if entry.job.library != library || entry.job.version != version {
                    continue;
                }
                match entry.job.status {
                    JobStatus::Queued => {
                        entry.cancel.cancel();
                        settle(entry, JobStatus::Cancelled, None, now);
                        info!(job = %entry.job.id, %library, %version, "queued job superseded");
                    }
                    JobStatus::Running => {
                        entry.cancel.cancel();
                        waiters.push(entry.done_rx.clone());
                        info!(job = %entry.job.id, %library, %version, "running job superseded");
                    }
                    _ => {}
                }
            }
            waiters
        };
        for mut rx in superseded {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }

        let id = Uuid::new_v4();
        let mut job_options = options;
        job_options.library = library.clone();
        job_options.version = version.clone();
        let (done_tx, done_rx) = watch::channel(false);
        let entry = JobEntry {
            job: Job {
                id,
                library,
                version,
                options: job_options,
                status: JobStatus::Queued,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                progress: JobProgress::default(),
                error: None,
            },
            cancel: CancellationToken::new(),
            done_tx,
            done_rx,
        };
        self.inner
            .jobs
            .lock()
            .expect("jobs lock")
            .insert(id, entry);
        // The unbounded queue is only closed when the manager drops.
        let _ = self.inner.queue_tx.send(id);
        Ok(id)
    }

    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner
            .jobs
            .lock()
            .expect("jobs lock")
            .get(&id)
            .map(|entry| entry.job.clone())
    }

    /// Snapshot of all jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .lock()
            .expect("jobs lock")
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Request cancellation. Idempotent; a terminal job is left alone.
    pub fn cancel_job(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().expect("jobs lock");
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| DocdexError::UnknownJob(id.to_string()))?;
        match entry.job.status {
            JobStatus::Queued => {
                entry.cancel.cancel();
                settle(entry, JobStatus::Cancelled, None, Utc::now());
            }
            JobStatus::Running => entry.cancel.cancel(),
            _ => {}
        }
        Ok(())
    }

    /// Wait until the job reaches a terminal state; returns the final
    /// snapshot.
    pub async fn wait_for_job(&self, id: Uuid) -> Result<Job> {
        let mut rx = {
            let jobs = self.inner.jobs.lock().expect("jobs lock");
            let entry = jobs
                .get(&id)
                .ok_or_else(|| DocdexError::UnknownJob(id.to_string()))?;
            entry.done_rx.clone()
        };
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.get_job(id)
            .ok_or_else(|| DocdexError::UnknownJob(id.to_string()))
    }
}

/// Transition a QUEUED job to RUNNING, returning what the worker needs.
/// Skips jobs that were cancelled while waiting in the queue.
fn claim_job(inner: &Inner, id: Uuid) -> Option<(ScrapeOptions, CancellationToken)> {
    let mut jobs = inner.jobs.lock().expect("jobs lock");
    let entry = jobs.get_mut(&id)?;
    if entry.job.status != JobStatus::Queued {
        return None;
    }
    if entry.cancel.is_cancelled() {
        settle(entry, JobStatus::Cancelled, None, Utc::now());
        return None;
    }
    entry.job.status = JobStatus::Running;
    entry.job.started_at = Some(Utc::now());
    Some((entry.job.options.clone(), entry.cancel.clone()))
}

async fn execute_job(
    inner: Arc<Inner>,
    id: Uuid,
    options: ScrapeOptions,
    cancel: CancellationToken,
) {
    let hook_inner = inner.clone();
    let hook: worker::ProgressHook = Arc::new(move |progress: &JobProgress| {
        let mut jobs = hook_inner.jobs.lock().expect("jobs lock");
        if let Some(entry) = jobs.get_mut(&id) {
            entry.job.progress = progress.clone();
        }
    });

    let result = worker::run_job(
        &options,
        &inner.store,
        &inner.registry,
        cancel.clone(),
        Some(hook),
    )
    .await;

    let mut jobs = inner.jobs.lock().expect("jobs lock");
    let Some(entry) = jobs.get_mut(&id) else {
        return;
    };
    let now = Utc::now();
    match result {
        _ if cancel.is_cancelled() => {
            settle(entry, JobStatus::Cancelled, None, now);
        }
        Ok(progress) => {
            entry.job.progress = progress;
            settle(entry, JobStatus::Completed, None, now);
        }
        Err(DocdexError::Cancelled) => {
            settle(entry, JobStatus::Cancelled, None, now);
        }
        Err(e) => {
            warn!(job = %id, error = %e, "job failed");
            settle(entry, JobStatus::Failed, Some(e.to_string()), now);
        }
    }
}

/// Enter a terminal state and resolve the completion future.
fn settle(entry: &mut JobEntry, status: JobStatus, error: Option<String>, now: DateTime<Utc>) {
    entry.job.status = status;
    entry.job.error = error;
    entry.job.finished_at = Some(now);
    let _ = entry.done_tx.send(true);
}
