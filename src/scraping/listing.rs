//! Card-based DOM extraction shared by the HTML listing scrapers, used when a
//! page carries no JSON-LD.

use scraper::{ElementRef, Html, Selector};

use super::base;
use crate::models::{RawEvent, RawTime};

/// CSS selectors describing one listing layout. Every selector other than
/// `card` is evaluated relative to a card.
pub struct ListingSelectors {
    pub card: Selector,
    pub title: Selector,
    pub link: Selector,
    pub datetime_attr: Option<Selector>,
    pub date: Selector,
    pub time: Option<Selector>,
    pub location: Option<Selector>,
    pub description: Option<Selector>,
}

pub fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css}: {err:?}"))
}

pub fn extract_cards(html: &str, page_url: &str, selectors: &ListingSelectors) -> Vec<RawEvent> {
    let document = Html::parse_document(html);
    document
        .select(&selectors.card)
        .filter_map(|card| parse_card(&card, page_url, selectors))
        .collect()
}

fn parse_card(
    card: &ElementRef<'_>,
    page_url: &str,
    selectors: &ListingSelectors,
) -> Option<RawEvent> {
    let title = base::first_text(card, &selectors.title)?;
    let url = base::absolute_url(page_url, base::first_attr(card, &selectors.link, "href"));

    let time_text = selectors
        .time
        .as_ref()
        .and_then(|sel| base::first_text(card, sel));
    let start = start_from_attr(card, selectors, time_text.as_deref())
        .or_else(|| start_from_text(card, selectors, time_text.as_deref()))?;
    let all_day = matches!(start, RawTime::Parts { time: None, .. });

    Some(RawEvent {
        native_id: card
            .value()
            .attr("data-event-id")
            .or_else(|| card.value().attr("id"))
            .map(str::to_string),
        title: Some(title),
        description: selectors
            .description
            .as_ref()
            .and_then(|sel| base::first_text(card, sel)),
        location: selectors
            .location
            .as_ref()
            .and_then(|sel| base::first_text(card, sel)),
        url,
        start: Some(start),
        end: None,
        all_day,
    })
}

/// `<time datetime="...">` carries either a full timestamp or just the day.
fn start_from_attr(
    card: &ElementRef<'_>,
    selectors: &ListingSelectors,
    time_text: Option<&str>,
) -> Option<RawTime> {
    let value = base::first_attr(card, selectors.datetime_attr.as_ref()?, "datetime")?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return None;
    }
    if value.contains('T') || value.contains(':') {
        return Some(RawTime::Text(value));
    }
    let time = time_text.and_then(base::find_first_time);
    Some(RawTime::Parts { date: value, time })
}

fn start_from_text(
    card: &ElementRef<'_>,
    selectors: &ListingSelectors,
    time_text: Option<&str>,
) -> Option<RawTime> {
    let date_text = base::first_text(card, &selectors.date)?;
    let (date, inline_time) = base::split_date_time(&date_text);
    let time = time_text
        .and_then(base::find_first_time)
        .or_else(|| inline_time.as_deref().and_then(base::find_first_time));
    Some(RawTime::Parts { date, time })
}
