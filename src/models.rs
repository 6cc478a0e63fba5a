use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical event, produced fresh by every pipeline run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub uid: String, // stable hash: source_id|native_id, or source_id|title|start_utc
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub source_id: String,
    pub url: Option<String>,
}

impl Event {
    /// Ordering used for every emitted list: start time, then uid for ties.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.start_utc, self.uid.as_str())
    }
}

pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// A timestamp as a source handed it over, before timezone resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawTime {
    Instant(DateTime<Utc>),
    Floating(NaiveDateTime),
    Zoned { local: NaiveDateTime, tzid: String },
    Date(NaiveDate),
    Text(String),
    Parts { date: String, time: Option<String> },
}

/// Source record before normalization. Every field is optional because
/// fetchers report what they found and the normalizer decides what is usable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub native_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub start: Option<RawTime>,
    pub end: Option<RawTime>,
    pub all_day: bool,
}

impl RawEvent {
    /// Key used to drop the same listing seen on two pages of one source.
    /// Recurring listings share a link, so without a native id the start time
    /// is part of the key.
    pub fn identity(&self) -> Option<String> {
        if let Some(id) = &self.native_id {
            return Some(id.clone());
        }
        let key = self.url.as_deref().or(self.title.as_deref())?;
        Some(format!("{key}|{:?}", self.start))
    }
}
