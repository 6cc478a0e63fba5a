//! `report.json`: what happened to every source and feed in one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Event;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Error,
    Disabled,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceReport {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: SourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub raw_count: usize,
    pub count: usize,
    pub dropped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CombinedReport {
    pub count: usize,
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FeedReport {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub count: usize,
    pub manual_count: usize,
    pub auto_count: usize,
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CuratedReport {
    pub total_feeds: usize,
    pub enabled_feeds: usize,
    pub feeds: Vec<FeedReport>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub combined: CombinedReport,
    pub curated_feeds: CuratedReport,
    pub events_preview: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    /// Report for a run that could not get as far as fetching.
    pub fn failed(now: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            generated_at: now,
            sources: Vec::new(),
            combined: CombinedReport::default(),
            curated_feeds: CuratedReport::default(),
            events_preview: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn succeeded_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|source| source.status == SourceStatus::Ok)
            .count()
    }

    pub fn enabled_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|source| source.status != SourceStatus::Disabled)
            .count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self).map(|mut json| {
            json.push('\n');
            json
        })
    }
}
