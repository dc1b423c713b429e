use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::BatchOrchestrator;
use crate::cache::CacheStore;
use crate::job::Job;
use crate::models::Keyword;
use crate::traits::{BulkMetricsProvider, TrendScoreProvider};

/// One slice of a job, processed by a single worker.
#[derive(Debug)]
pub struct ChunkTask {
    pub job: Arc<Job>,
    pub keywords: Vec<Keyword>,
}

/// Receiving end shared by the worker pool.
///
/// Successive chunks are handed out at least `spacing` apart across the whole
/// pool, so queued batches reach the providers in paced waves.
#[derive(Debug)]
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    spacing: Duration,
}

#[derive(Debug)]
struct QueueState {
    receiver: mpsc::UnboundedReceiver<ChunkTask>,
    last_dispatch: Option<Instant>,
}

pub type ChunkReceiver = Arc<ChunkQueue>;

impl ChunkQueue {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChunkTask>, spacing: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                receiver,
                last_dispatch: None,
            }),
            spacing,
        }
    }

    /// Next chunk, or `None` once every sender is gone.
    ///
    /// Cancel-safe: the pause happens before a chunk is taken off the channel.
    pub async fn next(&self) -> Option<ChunkTask> {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_dispatch
            && !self.spacing.is_zero()
        {
            let ready = last + self.spacing;
            if ready > Instant::now() {
                tracing::debug!(
                    wait_ms = (ready - Instant::now()).as_millis() as u64,
                    "Pausing before next chunk"
                );
                tokio::time::sleep_until(ready).await;
            }
        }
        let task = state.receiver.recv().await?;
        state.last_dispatch = Some(Instant::now());
        Some(task)
    }
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    JobSubmitted {
        job_id: Uuid,
        keywords: usize,
        chunks: usize,
    },
    ChunkStarted {
        worker_id: &'a str,
        job_id: Uuid,
        keywords: usize,
    },
    ChunkCompleted {
        worker_id: &'a str,
        job_id: Uuid,
        resolved: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// The worker stopped mid-chunk; unresolved keywords were marked failed.
    ChunkAbandoned {
        worker_id: &'a str,
        job_id: Uuid,
        keywords: usize,
    },
    JobCompleted {
        job_id: Uuid,
        completed: usize,
        failed: usize,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::JobSubmitted {
                job_id,
                keywords,
                chunks,
            } => {
                tracing::info!(%job_id, keywords, chunks, "Job submitted");
            }
            WorkerEvent::ChunkStarted {
                worker_id,
                job_id,
                keywords,
            } => {
                tracing::debug!(%worker_id, %job_id, keywords, "Processing chunk");
            }
            WorkerEvent::ChunkCompleted {
                worker_id,
                job_id,
                resolved,
                failed,
                duration_ms,
            } => {
                tracing::info!(%worker_id, %job_id, resolved, failed, duration_ms, "Chunk completed");
            }
            WorkerEvent::ChunkAbandoned {
                worker_id,
                job_id,
                keywords,
            } => {
                tracing::warn!(%worker_id, %job_id, keywords, "Chunk abandoned, keywords marked failed");
            }
            WorkerEvent::JobCompleted {
                job_id,
                completed,
                failed,
            } => {
                tracing::info!(%job_id, completed, failed, "Job completed");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Pulls chunks off the shared queue and resolves them through the orchestrator.
pub struct ChunkWorker<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    worker_id: String,
    orchestrator: Arc<BatchOrchestrator<B, T, S>>,
    receiver: ChunkReceiver,
}

impl<B, T, S> ChunkWorker<B, T, S>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    pub fn new(
        worker_id: impl Into<String>,
        orchestrator: Arc<BatchOrchestrator<B, T, S>>,
        receiver: ChunkReceiver,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            orchestrator,
            receiver,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until cancelled or the queue is closed.
    pub async fn run<WR: WorkerReporter + ?Sized>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.worker_id,
        });

        loop {
            let task = tokio::select! {
                () = cancel_token.cancelled() => break,
                task = self.next_task() => task,
            };
            let Some(task) = task else {
                break;
            };

            let interrupted = tokio::select! {
                () = cancel_token.cancelled() => true,
                () = self.process_chunk(&task, reporter) => false,
            };
            if interrupted {
                self.abandon_chunk(&task, reporter);
                break;
            }
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.worker_id,
        });
    }

    async fn next_task(&self) -> Option<ChunkTask> {
        self.receiver.next().await
    }

    /// Fail whatever the interrupted chunk left unresolved, so the job can
    /// still finish and stop blocking new submissions.
    fn abandon_chunk<WR: WorkerReporter + ?Sized>(&self, task: &ChunkTask, reporter: &WR) {
        let job = &task.job;
        let finished = job.abandon(&task.keywords);
        reporter.report(WorkerEvent::ChunkAbandoned {
            worker_id: &self.worker_id,
            job_id: job.id,
            keywords: task.keywords.len(),
        });
        if finished {
            let counts = job.counts();
            reporter.report(WorkerEvent::JobCompleted {
                job_id: job.id,
                completed: counts.completed,
                failed: counts.failed,
            });
        }
    }

    async fn process_chunk<WR: WorkerReporter + ?Sized>(&self, task: &ChunkTask, reporter: &WR) {
        let job = &task.job;
        reporter.report(WorkerEvent::ChunkStarted {
            worker_id: &self.worker_id,
            job_id: job.id,
            keywords: task.keywords.len(),
        });

        let started = Instant::now();
        job.mark_processing(&task.keywords);

        let results = self
            .orchestrator
            .process_keywords(&task.keywords, self.orchestrator.timeouts())
            .await;
        let failed = results.iter().filter(|r| r.is_empty()).count();
        let resolved = results.len() - failed;

        let finished = job.record_results(results);

        reporter.report(WorkerEvent::ChunkCompleted {
            worker_id: &self.worker_id,
            job_id: job.id,
            resolved,
            failed,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        if finished {
            let counts = job.counts();
            reporter.report(WorkerEvent::JobCompleted {
                job_id: job.id,
                completed: counts.completed,
                failed: counts.failed,
            });
        }
    }
}
