use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::combine;
use crate::config::{Settings, SourceConfig};
use crate::error::NormalizeSkip;
use crate::models::{sort_events, Event, RawEvent, RawTime};
use crate::scraping::base;

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y%m%dT%H%M%S%z",
];

/// Per-source parameters for turning raw records into events.
pub struct Normalizer<'a> {
    pub source_id: &'a str,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
    pub default_duration: Duration,
}

impl<'a> Normalizer<'a> {
    pub fn new(source: &'a SourceConfig, settings: &Settings, now: DateTime<Utc>) -> Self {
        Self {
            source_id: &source.id,
            timezone: source.timezone(settings),
            now,
            default_duration: Duration::minutes(settings.default_duration_minutes.max(1)),
        }
    }

    pub fn normalize(&self, raw: RawEvent) -> Result<Event, NormalizeSkip> {
        let title = raw
            .title
            .as_deref()
            .and_then(base::non_empty)
            .ok_or(NormalizeSkip::MissingTitle)?;
        let start_raw = raw.start.as_ref().ok_or(NormalizeSkip::MissingStart)?;
        let (start_utc, date_only) = self.resolve(start_raw)?;
        let all_day = raw.all_day || date_only;

        let default_end = if all_day {
            start_utc + Duration::days(1)
        } else {
            start_utc + self.default_duration
        };
        let end_utc = raw
            .end
            .as_ref()
            .and_then(|end| self.resolve(end).ok())
            .map(|(end, _)| end)
            .filter(|end| *end > start_utc)
            .unwrap_or(default_end);

        let uid = derive_uid(self.source_id, raw.native_id.as_deref(), &title, start_utc);

        Ok(Event {
            uid,
            title,
            description: raw.description.as_deref().and_then(base::non_empty_lines),
            location: raw.location.as_deref().and_then(base::non_empty),
            start_utc,
            end_utc,
            source_id: self.source_id.to_string(),
            url: raw.url.as_deref().and_then(base::non_empty),
        })
    }

    /// Resolves a raw time to UTC. The flag is set for date-only values.
    fn resolve(&self, raw: &RawTime) -> Result<(DateTime<Utc>, bool), NormalizeSkip> {
        match raw {
            RawTime::Instant(dt) => Ok((*dt, false)),
            RawTime::Floating(naive) => self.localize(*naive, self.timezone).map(|dt| (dt, false)),
            RawTime::Zoned { local, tzid } => {
                let tz = parse_tz(tzid).unwrap_or_else(|| {
                    debug!(source = %self.source_id, %tzid, "unknown tzid, using source timezone");
                    self.timezone
                });
                self.localize(*local, tz).map(|dt| (dt, false))
            }
            RawTime::Date(date) => self.localize_date(*date).map(|dt| (dt, true)),
            RawTime::Text(text) => self.resolve_text(text),
            RawTime::Parts { date, time } => {
                let today = self.now.with_timezone(&self.timezone).date_naive();
                let day = base::parse_date_text(date, today)
                    .ok_or_else(|| NormalizeSkip::UnparseableStart(date.clone()))?;
                match time.as_deref().and_then(base::parse_time_text) {
                    Some(time) => self
                        .localize(NaiveDateTime::new(day, time), self.timezone)
                        .map(|dt| (dt, false)),
                    None => self.localize_date(day).map(|dt| (dt, true)),
                }
            }
        }
    }

    fn resolve_text(&self, text: &str) -> Result<(DateTime<Utc>, bool), NormalizeSkip> {
        let trimmed = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok((dt.with_timezone(&Utc), false));
        }
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
                return Ok((dt.with_timezone(&Utc), false));
            }
        }
        if let Some(naive) = trimmed.strip_suffix('Z').and_then(parse_naive) {
            return Ok((naive.and_utc(), false));
        }
        if let Some(naive) = parse_naive(trimmed) {
            return self.localize(naive, self.timezone).map(|dt| (dt, false));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return self.localize_date(date).map(|dt| (dt, true));
        }

        let (date, time) = base::split_date_time(trimmed);
        self.resolve(&RawTime::Parts { date, time })
            .map_err(|_| NormalizeSkip::UnparseableStart(text.to_string()))
    }

    fn localize(&self, naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, NormalizeSkip> {
        base::to_timezone_datetime(naive, tz)
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| NormalizeSkip::NonexistentLocalTime(format!("{naive} {tz}")))
    }

    fn localize_date(&self, date: NaiveDate) -> Result<DateTime<Utc>, NormalizeSkip> {
        self.localize(NaiveDateTime::new(date, NaiveTime::MIN), self.timezone)
    }
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

fn parse_tz(tzid: &str) -> Option<Tz> {
    tzid.trim().trim_matches('"').parse().ok()
}

/// Stable identifier: the same logical event hashes the same on every run.
pub fn derive_uid(
    source_id: &str,
    native_id: Option<&str>,
    title: &str,
    start_utc: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    match native_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => hasher.update(id.as_bytes()),
        None => {
            hasher.update(base::clean_text(title).to_lowercase().as_bytes());
            hasher.update(b"|");
            hasher.update(start_utc.to_rfc3339().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// A source's events after normalization and windowing.
#[derive(Debug, Clone)]
pub struct NormalizedSource {
    pub events: Vec<Event>,
    pub dropped: usize,
}

/// Normalizes a source's raw records, then keeps only upcoming events inside
/// the source window, deduplicated, sorted and capped at `max_events`.
pub fn normalize_source(
    raw: Vec<RawEvent>,
    source: &SourceConfig,
    settings: &Settings,
    now: DateTime<Utc>,
) -> NormalizedSource {
    let normalizer = Normalizer::new(source, settings, now);
    let horizon = now + Duration::days(i64::from(source.days_ahead(settings)));
    let mut dropped = 0;
    let mut events = Vec::with_capacity(raw.len());

    for record in raw {
        match normalizer.normalize(record) {
            Ok(event) => events.push(event),
            Err(reason) => {
                dropped += 1;
                debug!(source = %source.id, %reason, "dropping raw event");
            }
        }
    }

    let mut events = combine::dedup(events);
    events.retain(|event| event.start_utc >= now && event.start_utc <= horizon);
    sort_events(&mut events);
    if let Some(max) = source.max_events.filter(|max| *max > 0) {
        events.truncate(max);
    }

    NormalizedSource { events, dropped }
}
