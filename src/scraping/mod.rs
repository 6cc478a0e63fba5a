pub mod ai1ec;
pub mod base;
pub mod growthzone;
pub mod ics;
pub mod jsonld;
pub mod listing;
pub mod simpleview;
pub mod tec;

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::{Config, Settings, SourceConfig, SourceKind};
use crate::error::FetchError;
use crate::http::PageFetcher;
use crate::models::RawEvent;

/// One way of turning a source URL into raw events.
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError>;
}

/// Everything a strategy needs for one source during one run.
pub struct FetchContext<'a> {
    pub source: &'a SourceConfig,
    pub settings: &'a Settings,
    pub fetcher: &'a dyn PageFetcher,
    pub now: DateTime<Utc>,
}

impl<'a> FetchContext<'a> {
    pub fn new(
        source: &'a SourceConfig,
        settings: &'a Settings,
        fetcher: &'a dyn PageFetcher,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            settings,
            fetcher,
            now,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.source.timezone(self.settings)
    }

    /// First local day of the fetch window.
    pub fn window_start(&self) -> NaiveDate {
        self.now.with_timezone(&self.timezone()).date_naive()
    }

    /// Last local day of the fetch window.
    pub fn window_end(&self) -> NaiveDate {
        let days = i64::from(self.source.days_ahead(self.settings));
        (self.now + Duration::days(days))
            .with_timezone(&self.timezone())
            .date_naive()
    }

    /// First day of every month touched by the window.
    pub fn months(&self) -> Vec<NaiveDate> {
        let end = self.window_end();
        let mut months = Vec::new();
        let mut cursor = self.window_start().with_day(1);
        while let Some(month) = cursor {
            if month > end {
                break;
            }
            months.push(month);
            cursor = if month.month() == 12 {
                NaiveDate::from_ymd_opt(month.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(month.year(), month.month() + 1, 1)
            };
        }
        months
    }
}

impl SourceKind {
    /// Strategies in the order they are tried. Only `tec_auto` has a fallback.
    pub fn strategies(&self) -> Vec<Box<dyn FetchStrategy>> {
        match self {
            SourceKind::Ics => vec![Box::new(ics::IcsFeed)],
            SourceKind::TecRest => vec![Box::new(tec::TecRest)],
            SourceKind::TecAuto => vec![Box::new(tec::TecRest), Box::new(tec::TecHtml)],
            SourceKind::GrowthzoneHtml => vec![Box::new(growthzone::GrowthZoneHtml)],
            SourceKind::SimpleviewHtml => vec![Box::new(simpleview::SimpleviewHtml)],
            SourceKind::Ai1ecHtml => vec![Box::new(ai1ec::Ai1ecHtml)],
        }
    }
}

/// Raw events for one source and the strategy that produced them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub strategy: &'static str,
    pub events: Vec<RawEvent>,
}

/// Tries each strategy of the source in turn until one returns events. An
/// empty result counts as a failure while another strategy remains; the last
/// strategy's result goes through the `allow_zero` rule.
pub fn fetch_source(ctx: &FetchContext<'_>) -> Result<Fetched, FetchError> {
    let strategies = ctx.source.kind.strategies();
    let count = strategies.len();
    let mut errors = Vec::new();
    let mut allowed_empty = None;

    for (index, strategy) in strategies.into_iter().enumerate() {
        let last = index + 1 == count;
        let result = strategy.fetch(ctx).and_then(|events| {
            debug!(source = %ctx.source.id, strategy = strategy.name(), count = events.len(), "fetched source");
            if events.is_empty() && !last {
                Err(FetchError::Empty(ctx.source.id.clone()))
            } else {
                base::ensure_events(&ctx.source.id, ctx.source.allow_zero, events)
            }
        });
        match result {
            Ok(events) => {
                return Ok(Fetched {
                    strategy: strategy.name(),
                    events,
                });
            }
            Err(err) if count == 1 => return Err(err),
            Err(err) => {
                warn!(source = %ctx.source.id, strategy = strategy.name(), error = %err, "strategy failed");
                if matches!(err, FetchError::Empty(_)) && ctx.source.allow_zero {
                    allowed_empty.get_or_insert(strategy.name());
                }
                errors.push(format!("{}: {err}", strategy.name()));
            }
        }
    }

    // A source allowed to be empty stays empty when later strategies error out.
    if let Some(strategy) = allowed_empty {
        return Ok(Fetched {
            strategy,
            events: Vec::new(),
        });
    }
    Err(FetchError::Exhausted(errors.join("; ")))
}

/// Fetches one page per month of the window. A failing page is skipped as
/// long as at least one page loads; repeats across pages are dropped.
pub fn fetch_month_pages(
    ctx: &FetchContext<'_>,
    page_url: fn(&str, NaiveDate) -> Result<String, FetchError>,
    parse: fn(&str, &str) -> Vec<RawEvent>,
) -> Result<Vec<RawEvent>, FetchError> {
    let mut seen = HashSet::new();
    let mut events = Vec::new();
    let mut last_error = None;
    let mut loaded = 0;

    for month in ctx.months() {
        let url = page_url(&ctx.source.url, month)?;
        let html = match ctx.fetcher.get(&url) {
            Ok(html) => html,
            Err(err) => {
                warn!(source = %ctx.source.id, %url, error = %err, "month page failed");
                last_error = Some(err);
                continue;
            }
        };
        loaded += 1;
        for event in parse(&html, &url) {
            let fresh = event
                .identity()
                .map(|key| seen.insert(key))
                .unwrap_or(true);
            if fresh {
                events.push(event);
            }
        }
    }

    match (loaded, last_error) {
        (0, Some(err)) => Err(err),
        _ => Ok(events),
    }
}

#[derive(Clone, serde::Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
    pub enabled: bool,
}

pub fn list_sources(config: &Config) -> Vec<SourceInfo> {
    config
        .sources
        .iter()
        .map(|source| SourceInfo {
            id: source.id.clone(),
            name: source.name.clone(),
            kind: source.kind.as_str(),
            url: source.url.clone(),
            enabled: source.enabled,
        })
        .collect()
}
