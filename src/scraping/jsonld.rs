//! schema.org `Event` extraction from `<script type="application/ld+json">` blocks.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::base;
use crate::models::{RawEvent, RawTime};

static SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("json-ld script selector")
});

/// Returns every event found in the document's JSON-LD, in document order.
/// Blocks that fail to parse are skipped.
pub fn extract_events(html: &str, page_url: &str) -> Vec<RawEvent> {
    let document = Html::parse_document(html);
    let mut events = Vec::new();

    for script in document.select(&SCRIPT_SELECTOR) {
        let body = script.text().collect::<String>();
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(value) => collect(&value, page_url, &mut events),
            Err(err) => debug!(url = %page_url, error = %err, "skipping malformed json-ld block"),
        }
    }

    events
}

fn collect(value: &Value, page_url: &str, out: &mut Vec<RawEvent>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, page_url, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect(graph, page_url, out);
            }
            if is_event(value) {
                if let Some(event) = to_raw_event(value, page_url) {
                    out.push(event);
                }
            } else if let Some(items) = map.get("itemListElement") {
                for item in items.as_array().into_iter().flatten() {
                    collect(item.get("item").unwrap_or(item), page_url, out);
                }
            }
        }
        _ => {}
    }
}

fn is_event(value: &Value) -> bool {
    let matches = |kind: &str| kind.ends_with("Event");
    match value.get("@type") {
        Some(Value::String(kind)) => matches(kind),
        Some(Value::Array(kinds)) => kinds.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).and_then(base::strip_html)
}

fn to_raw_event(value: &Value, page_url: &str) -> Option<RawEvent> {
    let title = text_field(value, "name");
    let start = value
        .get("startDate")
        .and_then(Value::as_str)
        .map(|text| RawTime::Text(text.trim().to_string()));
    if title.is_none() && start.is_none() {
        return None;
    }

    let url = value
        .get("url")
        .and_then(Value::as_str)
        .and_then(|href| base::absolute_url(page_url, Some(href.to_string())));
    let native_id = value
        .get("@id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let all_day = value
        .get("startDate")
        .and_then(Value::as_str)
        .map(|text| !text.contains('T') && !text.contains(':'))
        .unwrap_or(false);

    Some(RawEvent {
        native_id,
        title,
        description: text_field(value, "description"),
        location: value.get("location").and_then(location_text),
        url,
        start,
        end: value
            .get("endDate")
            .and_then(Value::as_str)
            .map(|text| RawTime::Text(text.trim().to_string())),
        all_day,
    })
}

/// `location` may be a string, a `Place`, or a list of either.
fn location_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => base::strip_html(text),
        Value::Array(items) => items.iter().find_map(location_text),
        Value::Object(_) => {
            let name = text_field(value, "name");
            let address = value.get("address").and_then(address_text);
            match (name, address) {
                (Some(name), Some(address)) if !address.contains(&name) => {
                    Some(format!("{name}, {address}"))
                }
                (Some(name), _) => Some(name),
                (None, address) => address,
            }
        }
        _ => None,
    }
}

fn address_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => base::strip_html(text),
        Value::Object(_) => {
            let parts = ["streetAddress", "addressLocality", "addressRegion", "postalCode"]
                .iter()
                .filter_map(|key| text_field(value, key))
                .collect::<Vec<_>>();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}
