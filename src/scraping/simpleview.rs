//! Simpleview CMS event listings, requested one month at a time.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;

use super::jsonld;
use super::listing::{self, selector, ListingSelectors};
use super::{fetch_month_pages, FetchContext, FetchStrategy};
use crate::error::FetchError;
use crate::models::RawEvent;

static CARD_SELECTORS: Lazy<ListingSelectors> = Lazy::new(|| ListingSelectors {
    card: selector("div[data-type=\"events\"], div.shared-item.event, article.event-card"),
    title: selector(".title, h4"),
    link: selector("a.title, .title a, h4 a"),
    datetime_attr: Some(selector("time[datetime]")),
    date: selector(".dates, .mini-date-container, .event-date"),
    time: Some(selector(".time, .hours")),
    location: Some(selector(".address, .location")),
    description: Some(selector(".desc, .teaser")),
});

pub struct SimpleviewHtml;

impl FetchStrategy for SimpleviewHtml {
    fn name(&self) -> &'static str {
        "simpleview_html"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        fetch_month_pages(ctx, month_url, parse_page)
    }
}

fn month_url(base: &str, month: NaiveDate) -> Result<String, FetchError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|err| FetchError::InvalidUrl(format!("{base}: {err}")))?;
    let last_day = last_day_of_month(month);
    url.query_pairs_mut()
        .append_pair("startDate", &month.format("%Y-%m-%d").to_string())
        .append_pair("endDate", &last_day.format("%Y-%m-%d").to_string());
    Ok(url.to_string())
}

fn last_day_of_month(month: NaiveDate) -> NaiveDate {
    let (year, next) = if month.month() == 12 {
        (month.year() + 1, 1)
    } else {
        (month.year(), month.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, next, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(month)
}

pub fn parse_page(html: &str, page_url: &str) -> Vec<RawEvent> {
    let structured = jsonld::extract_events(html, page_url);
    if !structured.is_empty() {
        return structured;
    }
    listing::extract_cards(html, page_url, &CARD_SELECTORS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawTime;

    #[test]
    fn month_urls_cover_the_whole_month() {
        let feb = NaiveDate::from_ymd_opt(2028, 2, 1).unwrap();
        assert_eq!(
            month_url("https://www.visit.example/events/", feb).unwrap(),
            "https://www.visit.example/events/?startDate=2028-02-01&endDate=2028-02-29"
        );
        let dec = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(
            last_day_of_month(dec),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
        );
    }

    #[test]
    fn parses_listing_cards() {
        let html = r#"
        <div class="shared-item event" data-type="events">
            <a class="title" href="/event/summer-concert/4411/">Summer Concert Series</a>
            <div class="dates">Fri, Aug 1, 2025</div>
            <div class="time">6:30 PM to 9:00 PM</div>
            <div class="address">Julia Davis Park</div>
            <div class="teaser">Bring a chair.</div>
        </div>
        "#;
        let events = parse_page(html, "https://www.visit.example/events/");
        assert_eq!(events.len(), 1);
        let concert = &events[0];
        assert_eq!(concert.title.as_deref(), Some("Summer Concert Series"));
        assert_eq!(
            concert.url.as_deref(),
            Some("https://www.visit.example/event/summer-concert/4411/")
        );
        assert_eq!(concert.location.as_deref(), Some("Julia Davis Park"));
        assert_eq!(concert.description.as_deref(), Some("Bring a chair."));
        assert_eq!(
            concert.start,
            Some(RawTime::Parts {
                date: "Fri, Aug 1, 2025".to_string(),
                time: Some("06:30 PM".to_string()),
            })
        );
    }
}
