use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Longest keyword accepted, in characters.
pub const MAX_KEYWORD_LEN: usize = 80;

/// The two external data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Bulk search-volume provider, one call for many keywords.
    Ads,
    /// Trend-score provider, one call per keyword.
    Trends,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ads => "ads",
            Provider::Trends => "trends",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized (trimmed, lowercase) keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyword(String);

impl Keyword {
    /// Normalize and validate a raw keyword.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AppError::Validation("keyword must not be empty".into()));
        }
        let len = normalized.chars().count();
        if len > MAX_KEYWORD_LEN {
            return Err(AppError::Validation(format!(
                "keyword '{}' is {len} characters, limit is {MAX_KEYWORD_LEN}",
                normalized.chars().take(20).collect::<String>()
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Keyword {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize, validate and deduplicate a caller-supplied keyword list.
///
/// The first occurrence of each keyword wins, so output order follows input order.
/// Empty batches and batches with more than `max` unique keywords are rejected.
pub fn normalize_batch<S: AsRef<str>>(raw: &[S], max: usize) -> Result<Vec<Keyword>, AppError> {
    if raw.is_empty() {
        return Err(AppError::Validation("at least one keyword is required".into()));
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut keywords = Vec::with_capacity(raw.len());
    for item in raw {
        let keyword = Keyword::parse(item.as_ref())?;
        if seen.insert(keyword.clone()) {
            keywords.push(keyword);
        }
    }

    if keywords.len() < raw.len() {
        tracing::debug!(
            received = raw.len(),
            unique = keywords.len(),
            "Duplicate keywords removed"
        );
    }

    if keywords.len() > max {
        return Err(AppError::Validation(format!(
            "batch has {} unique keywords, limit is {max}",
            keywords.len()
        )));
    }

    Ok(keywords)
}

/// Merged per-keyword metrics. Absent fields mean the provider failed or was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub keyword: Keyword,
    pub ads_avg_monthly_searches: Option<i64>,
    pub trends_score: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl MetricResult {
    pub fn new(keyword: Keyword, ads: Option<i64>, trends: Option<f64>) -> Self {
        Self {
            keyword,
            ads_avg_monthly_searches: ads,
            trends_score: trends,
            fetched_at: Utc::now(),
        }
    }

    /// A record with neither provider's value.
    pub fn empty(keyword: Keyword) -> Self {
        Self::new(keyword, None, None)
    }

    pub fn is_empty(&self) -> bool {
        self.ads_avg_monthly_searches.is_none() && self.trends_score.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.ads_avg_monthly_searches.is_some() && self.trends_score.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_is_trimmed_and_lowercased() {
        let kw = Keyword::parse("  Rust Programming ").unwrap();
        assert_eq!(kw.as_str(), "rust programming");
    }

    #[test]
    fn keyword_rejects_empty_and_overlong() {
        assert!(matches!(Keyword::parse("   "), Err(AppError::Validation(_))));
        let long = "a".repeat(MAX_KEYWORD_LEN + 1);
        assert!(matches!(Keyword::parse(&long), Err(AppError::Validation(_))));
        assert!(Keyword::parse(&"a".repeat(MAX_KEYWORD_LEN)).is_ok());
    }

    #[test]
    fn normalize_batch_dedups_preserving_order() {
        let batch = normalize_batch(&["beta", "Alpha", "BETA", "gamma", "alpha "], 200).unwrap();
        let names: Vec<_> = batch.iter().map(Keyword::as_str).collect();
        assert_eq!(names, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn normalize_batch_rejects_empty_batch() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            normalize_batch(&empty, 200),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn normalize_batch_enforces_ceiling_after_dedup() {
        let raw: Vec<String> = (0..201).map(|i| format!("kw{i}")).collect();
        assert!(matches!(
            normalize_batch(&raw, 200),
            Err(AppError::Validation(_))
        ));

        let mut with_dupes: Vec<String> = (0..200).map(|i| format!("kw{i}")).collect();
        with_dupes.push("kw0".into());
        assert_eq!(normalize_batch(&with_dupes, 200).unwrap().len(), 200);
    }

    #[test]
    fn metric_result_serializes_camel_case() {
        let result = MetricResult::new(Keyword::parse("alpha").unwrap(), Some(100), None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["keyword"], "alpha");
        assert_eq!(json["adsAvgMonthlySearches"], 100);
        assert!(json["trendsScore"].is_null());
        assert!(json.get("fetchedAt").is_some());
    }

    #[test]
    fn completeness_flags() {
        let kw = Keyword::parse("x").unwrap();
        assert!(MetricResult::empty(kw.clone()).is_empty());
        assert!(MetricResult::new(kw.clone(), Some(1), Some(2.0)).is_complete());
        let partial = MetricResult::new(kw, Some(1), None);
        assert!(!partial.is_empty());
        assert!(!partial.is_complete());
    }
}
