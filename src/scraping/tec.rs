//! The Events Calendar (WordPress): REST API and list-view HTML.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::base;
use super::jsonld;
use super::listing::{self, selector, ListingSelectors};
use super::{FetchContext, FetchStrategy};
use crate::error::FetchError;
use crate::models::{RawEvent, RawTime};

const REST_PATH: &str = "/wp-json/tribe/events/v1/events";
const PER_PAGE: &str = "50";
const MAX_PAGES: usize = 20;

static LIST_SELECTORS: Lazy<ListingSelectors> = Lazy::new(|| ListingSelectors {
    card: selector("article.tribe-events-calendar-list__event, div.type-tribe_events"),
    title: selector(".tribe-events-calendar-list__event-title, .tribe-events-list-event-title"),
    link: selector(
        ".tribe-events-calendar-list__event-title a, .tribe-events-list-event-title a",
    ),
    datetime_attr: Some(selector("time.tribe-events-calendar-list__event-datetime[datetime]")),
    date: selector(".tribe-event-date-start, .tribe-events-schedule"),
    time: Some(selector(".tribe-event-date-start, .tribe-events-schedule")),
    location: Some(selector(
        ".tribe-events-calendar-list__event-venue, .tribe-events-venue-details",
    )),
    description: Some(selector(
        ".tribe-events-calendar-list__event-description, .tribe-events-list-event-description",
    )),
});

#[derive(Debug, Deserialize)]
struct TecPage {
    events: Option<Vec<TecEvent>>,
    #[serde(default)]
    next_rest_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TecEvent {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    utc_start_date: Option<String>,
    #[serde(default)]
    utc_end_date: Option<String>,
    #[serde(default)]
    all_day: bool,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    venue: Value,
}

pub struct TecRest;

impl FetchStrategy for TecRest {
    fn name(&self) -> &'static str {
        "tec_rest"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        let mut next = Some(first_page_url(ctx)?);
        let mut visited = HashSet::new();
        let mut events = Vec::new();

        while let Some(url) = next.take() {
            if visited.len() >= MAX_PAGES || !visited.insert(url.clone()) {
                break;
            }
            let body = ctx.fetcher.get(&url)?;
            let page = parse_page(&body)?;
            debug!(source = %ctx.source.id, %url, count = page.0.len(), "fetched tec page");
            events.extend(page.0);
            next = page.1;
        }

        Ok(events)
    }
}

fn first_page_url(ctx: &FetchContext<'_>) -> Result<String, FetchError> {
    let mut url = reqwest::Url::parse(&ctx.source.url)
        .map_err(|err| FetchError::InvalidUrl(format!("{}: {err}", ctx.source.url)))?;
    if !url.path().contains("/wp-json/") {
        url.set_path(REST_PATH);
        url.set_query(None);
    }
    url.query_pairs_mut()
        .append_pair("start_date", &ctx.window_start().format("%Y-%m-%d").to_string())
        .append_pair("end_date", &ctx.window_end().format("%Y-%m-%d").to_string())
        .append_pair("per_page", PER_PAGE);
    Ok(url.to_string())
}

fn parse_page(body: &str) -> Result<(Vec<RawEvent>, Option<String>), FetchError> {
    let page: TecPage = serde_json::from_str(body)
        .map_err(|err| FetchError::Parse(format!("tec payload: {err}")))?;
    let events = page
        .events
        .ok_or_else(|| FetchError::Parse("tec payload has no events field".to_string()))?;
    Ok((
        events.into_iter().map(to_raw_event).collect(),
        page.next_rest_url.filter(|url| !url.is_empty()),
    ))
}

fn to_raw_event(event: TecEvent) -> RawEvent {
    let native_id = match &event.id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let start = tec_time(
        event.all_day,
        event.start_date.as_deref(),
        event.utc_start_date.as_deref(),
        event.timezone.as_deref(),
    );
    let end = tec_time(
        event.all_day,
        event.end_date.as_deref(),
        event.utc_end_date.as_deref(),
        event.timezone.as_deref(),
    );

    RawEvent {
        native_id,
        title: base::strip_html(&event.title),
        description: event.description.as_deref().and_then(base::strip_html),
        location: venue_text(&event.venue),
        url: event.url.filter(|url| !url.is_empty()),
        start,
        end,
        all_day: event.all_day,
    }
}

fn tec_time(
    all_day: bool,
    local: Option<&str>,
    utc: Option<&str>,
    tz: Option<&str>,
) -> Option<RawTime> {
    let parse = |text: &str| NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S").ok();

    if all_day {
        let text = local.or(utc)?;
        return NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d")
            .ok()
            .map(RawTime::Date);
    }
    if let Some(naive) = utc.and_then(parse) {
        return Some(RawTime::Instant(Utc.from_utc_datetime(&naive)));
    }
    let text = local?;
    match (parse(text), tz) {
        (Some(naive), Some(tzid)) if !tzid.is_empty() => Some(RawTime::Zoned {
            local: naive,
            tzid: tzid.to_string(),
        }),
        (Some(naive), _) => Some(RawTime::Floating(naive)),
        (None, _) => Some(RawTime::Text(text.to_string())),
    }
}

/// TEC sends an object for a venue and an empty array for none.
fn venue_text(venue: &Value) -> Option<String> {
    if !venue.is_object() {
        return None;
    }
    let parts = ["venue", "address", "city", "state"]
        .iter()
        .filter_map(|key| venue.get(key).and_then(Value::as_str))
        .filter_map(base::strip_html)
        .collect::<Vec<_>>();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

pub struct TecHtml;

impl FetchStrategy for TecHtml {
    fn name(&self) -> &'static str {
        "tec_html"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        let url = list_page_url(&ctx.source.url)?;
        let html = ctx.fetcher.get(&url)?;
        Ok(parse_list_page(&html, &url))
    }
}

/// A bare site root is pointed at TEC's default list view.
fn list_page_url(source_url: &str) -> Result<String, FetchError> {
    let mut url = reqwest::Url::parse(source_url)
        .map_err(|err| FetchError::InvalidUrl(format!("{source_url}: {err}")))?;
    if url.path().contains("/wp-json/") || url.path() == "/" || url.path().is_empty() {
        url.set_path("/events/list/");
        url.set_query(None);
    }
    Ok(url.to_string())
}

pub fn parse_list_page(html: &str, page_url: &str) -> Vec<RawEvent> {
    let structured = jsonld::extract_events(html, page_url);
    if !structured.is_empty() {
        return structured;
    }
    listing::extract_cards(html, page_url, &LIST_SELECTORS)
}
