use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Keyword, MetricResult};

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of a single keyword inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordStatus {
    Pending,
    Processing,
    Completed,
    /// Resolved with neither provider's value.
    Failed,
}

impl KeywordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, KeywordStatus::Completed | KeywordStatus::Failed)
    }
}

/// Per-status keyword counts. Always sums to the job's keyword count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    fn slot(&mut self, status: KeywordStatus) -> &mut usize {
        match status {
            KeywordStatus::Pending => &mut self.pending,
            KeywordStatus::Processing => &mut self.processing,
            KeywordStatus::Completed => &mut self.completed,
            KeywordStatus::Failed => &mut self.failed,
        }
    }

    fn shift(&mut self, from: KeywordStatus, to: KeywordStatus) {
        let from_slot = self.slot(from);
        *from_slot = from_slot.saturating_sub(1);
        *self.slot(to) += 1;
    }
}

/// Mutable part of a job. Statuses, results and counts change together
/// under one lock, so a snapshot never sees them disagree.
#[derive(Debug)]
struct JobProgress {
    statuses: HashMap<Keyword, KeywordStatus>,
    results: HashMap<Keyword, MetricResult>,
    counts: JobCounts,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// A submitted batch split into chunks for the worker pool.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    /// Normalized keywords in submission order.
    pub keywords: Vec<Keyword>,
    pub created_at: DateTime<Utc>,
    progress: Mutex<JobProgress>,
}

impl Job {
    pub fn new(keywords: Vec<Keyword>) -> Self {
        let statuses = keywords
            .iter()
            .map(|kw| (kw.clone(), KeywordStatus::Pending))
            .collect();
        let counts = JobCounts {
            pending: keywords.len(),
            ..Default::default()
        };
        Self {
            id: Uuid::new_v4(),
            keywords,
            created_at: Utc::now(),
            progress: Mutex::new(JobProgress {
                statuses,
                results: HashMap::new(),
                counts,
                started_at: None,
                completed_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobProgress> {
        self.progress.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(job_id = %self.id, "Job progress mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn status(&self) -> JobStatus {
        Self::derive_status(&self.lock())
    }

    fn derive_status(progress: &JobProgress) -> JobStatus {
        if progress.completed_at.is_some() {
            JobStatus::Completed
        } else if progress.started_at.is_some() {
            JobStatus::Processing
        } else {
            JobStatus::Pending
        }
    }

    pub fn counts(&self) -> JobCounts {
        self.lock().counts
    }

    /// Move pending keywords of a chunk to processing.
    pub fn mark_processing(&self, chunk: &[Keyword]) {
        let mut progress = self.lock();
        if progress.started_at.is_none() {
            progress.started_at = Some(Utc::now());
        }
        for keyword in chunk {
            let Some(status) = progress.statuses.get_mut(keyword) else {
                continue;
            };
            if *status == KeywordStatus::Pending {
                *status = KeywordStatus::Processing;
                progress.counts.shift(KeywordStatus::Pending, KeywordStatus::Processing);
            }
        }
    }

    /// Store results for a chunk. Returns true when this call finished the job.
    ///
    /// Keywords already resolved are left alone, so completed counts only grow.
    pub fn record_results(&self, results: Vec<MetricResult>) -> bool {
        let mut progress = self.lock();
        if progress.started_at.is_none() {
            progress.started_at = Some(Utc::now());
        }

        for result in results {
            let Some(&previous) = progress.statuses.get(&result.keyword) else {
                continue;
            };
            if previous.is_terminal() {
                continue;
            }
            let next = if result.is_empty() {
                KeywordStatus::Failed
            } else {
                KeywordStatus::Completed
            };
            progress.statuses.insert(result.keyword.clone(), next);
            progress.counts.shift(previous, next);
            progress.results.insert(result.keyword.clone(), result);
        }

        let done = progress.counts.completed + progress.counts.failed == self.keywords.len();
        if done && progress.completed_at.is_none() {
            progress.completed_at = Some(Utc::now());
            return true;
        }
        false
    }

    /// Mark every unresolved keyword of `chunk` failed, as if its providers
    /// returned nothing. Returns true when this finished the job.
    pub fn abandon(&self, chunk: &[Keyword]) -> bool {
        self.record_results(chunk.iter().cloned().map(MetricResult::empty).collect())
    }

    /// Point-in-time view. With a filter, per-keyword rows are included for
    /// the requested keywords that belong to this job, in filter order.
    pub fn snapshot(&self, filter: Option<&[Keyword]>) -> JobSnapshot {
        let progress = self.lock();

        let keywords = filter.map(|wanted| {
            wanted
                .iter()
                .filter_map(|keyword| {
                    let status = *progress.statuses.get(keyword)?;
                    let result = progress.results.get(keyword);
                    Some(KeywordProgress {
                        keyword: keyword.clone(),
                        status,
                        ads_avg_monthly_searches: result.and_then(|r| r.ads_avg_monthly_searches),
                        trends_score: result.and_then(|r| r.trends_score),
                    })
                })
                .collect()
        });

        JobSnapshot {
            job_id: self.id,
            status: Self::derive_status(&progress),
            total: self.keywords.len(),
            counts: progress.counts,
            created_at: self.created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
            keywords,
        }
    }
}

/// Status view of one keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordProgress {
    pub keyword: Keyword,
    pub status: KeywordStatus,
    pub ads_avg_monthly_searches: Option<i64>,
    pub trends_score: Option<f64>,
}

/// Consistent point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: usize,
    #[serde(flatten)]
    pub counts: JobCounts,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<KeywordProgress>>,
}
