//! GrowthZone / ChamberMaster community calendars: one listing page per month.

use chrono::NaiveDate;
use once_cell::sync::Lazy;

use super::jsonld;
use super::listing::{self, selector, ListingSelectors};
use super::{fetch_month_pages, FetchContext, FetchStrategy};
use crate::error::FetchError;
use crate::models::RawEvent;

static CARD_SELECTORS: Lazy<ListingSelectors> = Lazy::new(|| ListingSelectors {
    card: selector("div.gz-events-card, div.mn-CalendarItem"),
    title: selector(".card-title, .mn-CalendarItemTitle"),
    link: selector(".card-title a, .mn-CalendarItemTitle a"),
    datetime_attr: Some(selector("time[datetime], meta[itemprop=\"startDate\"]")),
    date: selector(".gz-event-card-date, .card-date, .mn-CalendarItemDate"),
    time: Some(selector(".gz-event-card-time, .card-time, .mn-CalendarItemTime")),
    location: Some(selector(".gz-event-card-location, .card-location, .mn-CalendarItemLocation")),
    description: Some(selector(".card-text, .mn-CalendarItemDesc")),
});

pub struct GrowthZoneHtml;

impl FetchStrategy for GrowthZoneHtml {
    fn name(&self) -> &'static str {
        "growthzone_html"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        fetch_month_pages(ctx, month_url, parse_page)
    }
}

/// `https://chamber.example/events/calendar/` becomes
/// `https://chamber.example/events/calendar/2025-07-01`.
fn month_url(base: &str, month: NaiveDate) -> Result<String, FetchError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|err| FetchError::InvalidUrl(format!("{base}: {err}")))?;
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{path}/{}", month.format("%Y-%m-%d")));
    Ok(url.to_string())
}

pub fn parse_page(html: &str, page_url: &str) -> Vec<RawEvent> {
    let structured = jsonld::extract_events(html, page_url);
    if !structured.is_empty() {
        return structured;
    }
    listing::extract_cards(html, page_url, &CARD_SELECTORS)
}
