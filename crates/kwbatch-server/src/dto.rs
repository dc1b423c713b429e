use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Raw keywords; normalized and deduplicated server-side.
    pub keywords: Vec<String>,
}

// ---------------------------------------------------------------------------
// Async status
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Comma-separated keyword filter.
    pub keywords: Option<String>,
    /// Defaults to the latest job.
    pub job_id: Option<Uuid>,
}

impl StatusQuery {
    pub fn keyword_filter(&self) -> Option<Vec<&str>> {
        self.keywords
            .as_deref()
            .map(|raw| raw.split(',').map(str::trim).filter(|k| !k.is_empty()).collect())
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Unix seconds.
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
