use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::FetchError;

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s*m\b\.?").expect("valid time regex")
});
static NOON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bnoon\b").expect("valid noon regex"));
static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,2})(st|nd|rd|th)\b").expect("valid ordinal regex"));

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans text and maps empty results to `None`.
pub fn non_empty(input: &str) -> Option<String> {
    let cleaned = clean_text(input);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Like `non_empty`, but keeps line breaks: each line is cleaned on its own
/// and blank runs shrink to one empty line.
pub fn non_empty_lines(input: &str) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in input.lines().map(clean_text) {
        if line.is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|node| non_empty(&inner_text(node)))
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

/// Drops markup and decodes entities, e.g. TEC titles like `Rock &#038; Roll`.
pub fn strip_html(input: &str) -> Option<String> {
    if !input.contains('<') && !input.contains('&') {
        return non_empty(input);
    }
    let fragment = Html::parse_fragment(input);
    non_empty(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

/// Finds the first `7pm` / `7:30 p.m.` / `noon` style time and returns it as `HH:MM AM`.
pub fn find_first_time(text: &str) -> Option<String> {
    let cleaned = clean_text(text);
    if let Some(caps) = TIME_RE.captures(&cleaned) {
        let hour = caps.get(1)?.as_str().parse::<u32>().ok()?;
        let minute = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        let period = caps.get(3)?.as_str().to_uppercase();
        return Some(format!("{:02}:{:02} {}M", hour, minute, period));
    }
    if NOON_RE.is_match(&cleaned) {
        return Some("12:00 PM".to_string());
    }
    None
}

pub fn parse_time_text(text: &str) -> Option<NaiveTime> {
    if let Some(normalized) = find_first_time(text) {
        for fmt in ["%I:%M %p", "%I %p"] {
            if let Ok(time) = NaiveTime::parse_from_str(&normalized, fmt) {
                return Some(time);
            }
        }
    }
    let trimmed = text.trim();
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
}

/// Parses listing-style dates. Yearless dates resolve to their next occurrence
/// on or after `today`.
pub fn parse_date_text(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let cleaned = clean_text(&ORDINAL_RE.replace_all(input, "$1"))
        .trim_end_matches(['@', '-', '|', ','])
        .trim()
        .to_string();
    if cleaned.is_empty() {
        return None;
    }

    let with_year = [
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%m/%d/%y",
        "%B %d, %Y",
        "%b %d, %Y",
        "%B %d %Y",
        "%b %d %Y",
        "%A, %B %d, %Y",
        "%a, %b %d, %Y",
        "%A %B %d, %Y",
        "%a %b %d, %Y",
        "%A %m/%d/%Y",
        "%d %B %Y",
    ];
    for fmt in with_year {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Some(date);
        }
    }

    let without_year = [
        "%B %d", "%b %d", "%A, %B %d", "%a, %b %d", "%A %B %d", "%a %b %d", "%m/%d",
    ];
    for fmt in without_year {
        let candidate = format!("{cleaned} {}", today.year());
        let fmt_with_year = format!("{fmt} %Y");
        if let Ok(date) = NaiveDate::parse_from_str(&candidate, &fmt_with_year) {
            if date < today {
                return date.with_year(today.year() + 1);
            }
            return Some(date);
        }
    }

    None
}

/// Splits "May 5, 2025 @ 7:00 pm" into its date and time halves.
pub fn split_date_time(text: &str) -> (String, Option<String>) {
    let cleaned = clean_text(text);
    match TIME_RE.find(&cleaned) {
        Some(found) => {
            let date = cleaned[..found.start()]
                .trim()
                .trim_end_matches(['@', '-', '|', ','])
                .trim()
                .to_string();
            (date, Some(found.as_str().to_string()))
        }
        None => (cleaned, None),
    }
}

/// Attaches a zone to a wall-clock time. DST gaps have no instant; overlaps
/// take the earlier one.
pub fn to_timezone_datetime(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(dt, _) => Some(dt),
        LocalResult::None => None,
    }
}

pub fn ensure_events<T>(
    source_id: &str,
    allow_zero: bool,
    events: Vec<T>,
) -> Result<Vec<T>, FetchError> {
    if events.is_empty() && !allow_zero {
        Err(FetchError::Empty(source_id.to_string()))
    } else {
        Ok(events)
    }
}
