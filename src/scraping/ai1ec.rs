//! All-in-One Event Calendar (WordPress) agenda view.

use once_cell::sync::Lazy;

use super::jsonld;
use super::listing::{self, selector, ListingSelectors};
use super::{FetchContext, FetchStrategy};
use crate::error::FetchError;
use crate::models::RawEvent;

static AGENDA_SELECTORS: Lazy<ListingSelectors> = Lazy::new(|| ListingSelectors {
    card: selector("div.ai1ec-event"),
    title: selector(".ai1ec-event-title"),
    link: selector("a.ai1ec-load-event"),
    datetime_attr: None,
    date: selector(".ai1ec-event-time"),
    time: None,
    location: Some(selector(".ai1ec-event-location")),
    description: Some(selector(".ai1ec-event-description")),
});

pub struct Ai1ecHtml;

impl FetchStrategy for Ai1ecHtml {
    fn name(&self) -> &'static str {
        "ai1ec_html"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        let html = ctx.fetcher.get(&ctx.source.url)?;
        Ok(parse_agenda(&html, &ctx.source.url))
    }
}

pub fn parse_agenda(html: &str, page_url: &str) -> Vec<RawEvent> {
    let structured = jsonld::extract_events(html, page_url);
    if !structured.is_empty() {
        return structured;
    }
    listing::extract_cards(html, page_url, &AGENDA_SELECTORS)
        .into_iter()
        .map(|mut event| {
            // Locations are rendered as "@ Venue".
            event.location = event
                .location
                .map(|loc| loc.trim_start_matches('@').trim().to_string())
                .filter(|loc| !loc.is_empty());
            event
        })
        .collect()
}
