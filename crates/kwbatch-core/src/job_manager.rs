//! Background batch jobs.
//!
//! A submitted batch becomes a [`Job`] whose keywords are split into chunks and
//! queued for a fixed pool of [`ChunkWorker`]s. Only one job is active at a
//! time; the last job stays queryable until the next one replaces it.
//! Chunks leave the queue at least `chunk_delay` apart.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::BatchOrchestrator;
use crate::cache::CacheStore;
use crate::error::AppError;
use crate::job::{Job, JobSnapshot};
use crate::models::{Keyword, normalize_batch};
use crate::traits::{BulkMetricsProvider, TrendScoreProvider};
use crate::worker::{
    ChunkQueue, ChunkReceiver, ChunkTask, ChunkWorker, WorkerEvent, WorkerReporter,
};

/// Configuration for the job worker pool.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Keywords per chunk handed to one worker.
    pub chunk_size: usize,
    pub workers: usize,
    /// Largest job accepted after deduplication.
    pub max_keywords: usize,
    /// Minimum pause between two chunks leaving the queue, pool-wide.
    pub chunk_delay: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            workers: 2,
            max_keywords: 200,
            chunk_delay: Duration::from_secs(5),
        }
    }
}

/// Returned by [`JobManager::submit`] before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub keywords_count: usize,
    pub estimated_seconds: u64,
}

pub struct JobManager<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    orchestrator: Arc<BatchOrchestrator<B, T, S>>,
    config: JobConfig,
    current: Mutex<Option<Arc<Job>>>,
    sender: mpsc::UnboundedSender<ChunkTask>,
    receiver: ChunkReceiver,
    reporter: Arc<dyn WorkerReporter>,
}

impl<B, T, S> JobManager<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    pub fn new(
        orchestrator: Arc<BatchOrchestrator<B, T, S>>,
        config: JobConfig,
        reporter: Arc<dyn WorkerReporter>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(ChunkQueue::new(receiver, config.chunk_delay));
        Self {
            orchestrator,
            config,
            current: Mutex::new(None),
            sender,
            receiver,
            reporter,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Spawn the worker pool. Workers exit when `cancel_token` fires.
    pub fn spawn_workers(&self, cancel_token: &CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|i| {
                let worker = ChunkWorker::new(
                    format!("worker-{}", i + 1),
                    self.orchestrator.clone(),
                    self.receiver.clone(),
                );
                let reporter = self.reporter.clone();
                let cancel_token = cancel_token.clone();
                tokio::spawn(async move { worker.run(cancel_token, reporter.as_ref()).await })
            })
            .collect()
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<Job>>> {
        self.current.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Job manager mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Id of the job still being processed, if any.
    pub fn active_job(&self) -> Option<Uuid> {
        self.lock_current()
            .as_ref()
            .filter(|job| !job.status().is_terminal())
            .map(|job| job.id)
    }

    /// Validate `raw`, register a job and queue its chunks. Returns immediately.
    pub fn submit<K: AsRef<str>>(&self, raw: &[K]) -> Result<SubmitReceipt, AppError> {
        let keywords = normalize_batch(raw, self.config.max_keywords)?;

        let mut current = self.lock_current();
        if let Some(active) = current.as_ref() {
            let status = active.status();
            if !status.is_terminal() {
                tracing::debug!(active = %active.id, %status, "Rejecting submit while a job is active");
                return Err(AppError::JobConflict { active: active.id });
            }
        }

        let job = Arc::new(Job::new(keywords));
        let chunks: Vec<Vec<Keyword>> = job
            .keywords
            .chunks(self.config.chunk_size.max(1))
            .map(<[Keyword]>::to_vec)
            .collect();
        let chunk_count = chunks.len();

        for keywords in chunks {
            self.sender
                .send(ChunkTask {
                    job: job.clone(),
                    keywords,
                })
                .map_err(|_| AppError::Generic("job queue is closed".into()))?;
        }

        let pauses = self.config.chunk_delay * (chunk_count.saturating_sub(1) as u32);
        let receipt = SubmitReceipt {
            job_id: job.id,
            keywords_count: job.keywords.len(),
            estimated_seconds: self.orchestrator.estimate_seconds(job.keywords.len())
                + pauses.as_secs(),
        };

        self.reporter.report(WorkerEvent::JobSubmitted {
            job_id: job.id,
            keywords: job.keywords.len(),
            chunks: chunk_count,
        });

        *current = Some(job);
        Ok(receipt)
    }

    /// Snapshot of `job_id`. Only the current job is retained.
    pub fn status<K: AsRef<str>>(
        &self,
        job_id: Uuid,
        filter: Option<&[K]>,
    ) -> Result<JobSnapshot, AppError> {
        let job = self
            .lock_current()
            .clone()
            .filter(|job| job.id == job_id)
            .ok_or(AppError::JobNotFound(job_id))?;
        let filter = parse_filter(filter)?;
        Ok(job.snapshot(filter.as_deref()))
    }

    /// Snapshot of the current job, if one was ever submitted.
    pub fn latest_status<K: AsRef<str>>(
        &self,
        filter: Option<&[K]>,
    ) -> Result<Option<JobSnapshot>, AppError> {
        let Some(job) = self.lock_current().clone() else {
            return Ok(None);
        };
        let filter = parse_filter(filter)?;
        Ok(Some(job.snapshot(filter.as_deref())))
    }
}

/// Normalize a status filter. Blank entries are skipped.
fn parse_filter<K: AsRef<str>>(filter: Option<&[K]>) -> Result<Option<Vec<Keyword>>, AppError> {
    filter
        .map(|raw| {
            raw.iter()
                .filter(|k| !k.as_ref().trim().is_empty())
                .map(|k| Keyword::parse(k.as_ref()))
                .collect()
        })
        .transpose()
}
