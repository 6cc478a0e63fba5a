//! ICS output.

use chrono::{DateTime, Utc};
use icalendar::{Calendar, Component, EventLike, Property};

use crate::models::Event;

const PRODID: &str = "PRODID:-//event-aggregator//EN";

fn ics_time(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Renders `events` as one VCALENDAR. `now` becomes every DTSTAMP, so the same
/// events and the same `now` always give the same bytes.
pub fn render_calendar(
    name: &str,
    description: Option<&str>,
    events: &[Event],
    now: DateTime<Utc>,
) -> String {
    let mut cal = Calendar::new();
    cal.append_property(Property::new("X-WR-CALNAME", name));
    if let Some(description) = description {
        cal.append_property(Property::new("X-WR-CALDESC", description));
    }

    let dtstamp = ics_time(&now);
    for event in events {
        let mut ics_event = icalendar::Event::new();
        ics_event.uid(&event.uid);
        ics_event.summary(&event.title);
        ics_event.add_property("DTSTAMP", &dtstamp);
        ics_event.add_property("DTSTART", ics_time(&event.start_utc));
        ics_event.add_property("DTEND", ics_time(&event.end_utc));
        if let Some(ref desc) = event.description {
            ics_event.description(desc);
        }
        if let Some(ref loc) = event.location {
            ics_event.location(loc);
        }
        if let Some(ref url) = event.url {
            ics_event.add_property("URL", url);
        }
        cal.push(ics_event.done());
    }

    tidy(&cal.done().to_string())
}

/// Stamps our PRODID and drops CALSCALE:GREGORIAN, which is the default.
fn tidy(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str(PRODID);
            result.push_str("\r\n");
            continue;
        }
        if line == "CALSCALE:GREGORIAN" {
            continue;
        }
        result.push_str(line);
        result.push_str("\r\n");
    }
    result
}
