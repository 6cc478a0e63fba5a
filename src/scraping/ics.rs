use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use icalendar::{
    parser::{read_calendar, unfold, Component},
    CalendarDateTime, DatePerhapsTime,
};
use rrule::RRuleSet;
use tracing::debug;

use super::base;
use super::{FetchContext, FetchStrategy};
use crate::error::FetchError;
use crate::models::{RawEvent, RawTime};

/// Recurring events are expanded at most this many times per master.
const MAX_OCCURRENCES: u16 = 500;

pub struct IcsFeed;

impl FetchStrategy for IcsFeed {
    fn name(&self) -> &'static str {
        "ics"
    }

    fn fetch(&self, ctx: &FetchContext<'_>) -> Result<Vec<RawEvent>, FetchError> {
        let body = ctx.fetcher.get(&ctx.source.url)?;
        // Padded by a day on both ends; normalization applies the exact window.
        let days = i64::from(ctx.source.days_ahead(ctx.settings));
        let after = ctx.now - Duration::days(1);
        let before = ctx.now + Duration::days(days + 1);
        parse_calendar(&body, after, before)
    }
}

/// One VEVENT before recurrence expansion.
struct Vevent {
    event: RawEvent,
    rule: Option<String>,
    exdates: Vec<String>,
    is_override: bool,
    cancelled: bool,
}

/// Parses every VEVENT and expands RRULEs into the occurrences that fall
/// between `after` and `before`.
pub fn parse_calendar(
    content: &str,
    after: DateTime<Utc>,
    before: DateTime<Utc>,
) -> Result<Vec<RawEvent>, FetchError> {
    if !content.contains("BEGIN:VCALENDAR") {
        return Err(FetchError::Parse("response is not an iCalendar document".to_string()));
    }
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(|err| FetchError::Parse(err.to_string()))?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    // RECURRENCE-ID instances, cancelled or not, replace the generated ones.
    let overridden = vevents
        .iter()
        .filter(|vevent| vevent.is_override)
        .filter_map(|vevent| vevent.event.native_id.clone())
        .collect::<HashSet<_>>();

    let mut events = Vec::new();
    for vevent in vevents {
        if vevent.cancelled {
            continue;
        }
        match vevent.rule.as_deref() {
            Some(rule) if !vevent.is_override => {
                match expand(&vevent.event, rule, &vevent.exdates, after, before) {
                    Ok(occurrences) => events.extend(occurrences.into_iter().filter(|event| {
                        event
                            .native_id
                            .as_ref()
                            .map_or(true, |id| !overridden.contains(id))
                    })),
                    Err(err) => {
                        debug!(uid = ?vevent.event.native_id, error = %err, "keeping unexpanded recurring event");
                        events.push(vevent.event);
                    }
                }
            }
            _ => events.push(vevent.event),
        }
    }
    Ok(events)
}

fn collect_vevents(components: &[Component<'_>], out: &mut Vec<Vevent>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(to_vevent(component));
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn text_prop(component: &Component<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .and_then(|prop| base::non_empty(&unescape_text(prop.val.as_ref())))
}

fn multiline_prop(component: &Component<'_>, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .and_then(|prop| base::non_empty_lines(&unescape_text(prop.val.as_ref())))
}

fn time_prop(component: &Component<'_>, name: &str) -> Option<RawTime> {
    component
        .find_prop(name)
        .and_then(|prop| DatePerhapsTime::try_from(prop).ok())
        .map(to_raw_time)
}

fn to_vevent(vevent: &Component<'_>) -> Vevent {
    let cancelled = vevent
        .find_prop("STATUS")
        .map(|prop| prop.val.as_ref().eq_ignore_ascii_case("CANCELLED"))
        .unwrap_or(false);

    let start = time_prop(vevent, "DTSTART");
    let end = time_prop(vevent, "DTEND").or_else(|| {
        let duration = vevent
            .find_prop("DURATION")
            .and_then(|prop| parse_duration(prop.val.as_ref()))?;
        shift(start.as_ref()?, duration)
    });
    let all_day = matches!(start, Some(RawTime::Date(_)));

    // Recurring instances share a UID and are told apart by RECURRENCE-ID.
    let recurrence_id = vevent.find_prop("RECURRENCE-ID");
    let native_id = text_prop(vevent, "UID").map(|uid| match recurrence_id {
        Some(rid) => format!("{uid}#{}", rid.val.as_ref()),
        None => uid,
    });

    let exdates = vevent
        .properties
        .iter()
        .filter(|prop| prop.name == "EXDATE")
        .flat_map(|prop| {
            prop.val
                .as_ref()
                .split(',')
                .map(|value| value.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|value| !value.is_empty())
        .collect();

    Vevent {
        event: RawEvent {
            native_id,
            title: text_prop(vevent, "SUMMARY"),
            description: multiline_prop(vevent, "DESCRIPTION"),
            location: text_prop(vevent, "LOCATION"),
            url: text_prop(vevent, "URL"),
            start,
            end,
            all_day,
        },
        rule: vevent
            .find_prop("RRULE")
            .map(|prop| prop.val.as_ref().trim().to_string()),
        exdates,
        is_override: recurrence_id.is_some(),
        cancelled,
    }
}

fn to_raw_time(value: DatePerhapsTime) -> RawTime {
    match value {
        DatePerhapsTime::Date(date) => RawTime::Date(date),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => RawTime::Instant(dt),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => RawTime::Floating(naive),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            RawTime::Zoned {
                local: date_time,
                tzid,
            }
        }
    }
}

/// `PT1H30M`, `P1D`, `P1W`. Negative durations are ignored.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().trim_start_matches('+');
    if value.starts_with('-') {
        return None;
    }
    let duration = iso8601::duration(value).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

/// The time as written, ignoring its zone.
fn wall_clock(time: &RawTime) -> Option<NaiveDateTime> {
    match time {
        RawTime::Instant(dt) => Some(dt.naive_utc()),
        RawTime::Floating(naive) => Some(*naive),
        RawTime::Zoned { local, .. } => Some(*local),
        RawTime::Date(date) => date.and_hms_opt(0, 0, 0),
        RawTime::Text(_) | RawTime::Parts { .. } => None,
    }
}

/// Same kind of time as `template`, moved to `wall`.
fn with_wall_clock(template: &RawTime, wall: NaiveDateTime) -> Option<RawTime> {
    match template {
        RawTime::Instant(_) => Some(RawTime::Instant(Utc.from_utc_datetime(&wall))),
        RawTime::Floating(_) => Some(RawTime::Floating(wall)),
        RawTime::Zoned { tzid, .. } => Some(RawTime::Zoned {
            local: wall,
            tzid: tzid.clone(),
        }),
        RawTime::Date(_) => Some(RawTime::Date(wall.date())),
        RawTime::Text(_) | RawTime::Parts { .. } => None,
    }
}

fn shift(time: &RawTime, by: Duration) -> Option<RawTime> {
    with_wall_clock(time, wall_clock(time)? + by)
}

/// RECURRENCE-ID value an occurrence starting at `wall` would carry.
fn recurrence_key(template: &RawTime, wall: NaiveDateTime) -> String {
    match template {
        RawTime::Instant(_) => wall.format("%Y%m%dT%H%M%SZ").to_string(),
        RawTime::Date(_) => wall.format("%Y%m%d").to_string(),
        _ => wall.format("%Y%m%dT%H%M%S").to_string(),
    }
}

/// Rules are evaluated on wall-clock times written as UTC, so zoned and
/// floating masters repeat at the same local time across DST changes.
fn as_utc_stamp(value: &str) -> String {
    if value.len() == 8 {
        format!("{value}T000000Z")
    } else if value.ends_with('Z') {
        value.to_string()
    } else {
        format!("{value}Z")
    }
}

fn utc_rule(rule: &str) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") && !value.ends_with('Z') => {
                if value.len() == 8 {
                    format!("{key}={value}T235959Z")
                } else {
                    format!("{key}={value}Z")
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn expand(
    master: &RawEvent,
    rule: &str,
    exdates: &[String],
    after: DateTime<Utc>,
    before: DateTime<Utc>,
) -> Result<Vec<RawEvent>, String> {
    let start = master.start.as_ref().ok_or("recurring event has no start")?;
    let start_wall = wall_clock(start).ok_or("recurring event has no usable start")?;
    let length = master
        .end
        .as_ref()
        .and_then(wall_clock)
        .map(|end| end - start_wall);

    let mut lines = vec![
        format!("DTSTART:{}", start_wall.format("%Y%m%dT%H%M%SZ")),
        format!("RRULE:{}", utc_rule(rule)),
    ];
    lines.extend(exdates.iter().map(|value| format!("EXDATE:{}", as_utc_stamp(value))));

    let set: RRuleSet = lines.join("\n").parse().map_err(|err| format!("{err}"))?;
    let tz: rrule::Tz = Utc.into();
    let occurrences = set
        .after(after.with_timezone(&tz))
        .before(before.with_timezone(&tz))
        .all(MAX_OCCURRENCES);

    let uid = master.native_id.as_deref();
    Ok(occurrences
        .dates
        .iter()
        .filter_map(|occurrence| {
            let wall = occurrence.naive_utc();
            let mut event = master.clone();
            event.start = with_wall_clock(start, wall);
            event.end = match (master.end.as_ref(), length) {
                (Some(end), Some(length)) => with_wall_clock(end, wall + length),
                _ => None,
            };
            event.native_id = uid.map(|uid| format!("{uid}#{}", recurrence_key(start, wall)));
            event.start.is_some().then_some(event)
        })
        .collect())
}

/// Reverses RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    const SAMPLE_ICS: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Library//Events//EN\r\n\
BEGIN:VEVENT\r\n\
UID:story-time@library.example\r\n\
SUMMARY:Story Time\\, Ages 3-5\r\n\
DESCRIPTION:Songs and stories.\\nBring a blanket.\r\n\
LOCATION:Main Branch\r\n\
DTSTART:20250704T160000Z\r\n\
DTEND:20250704T170000Z\r\n\
URL:https://library.example/events/story-time\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:book-club@library.example\r\n\
SUMMARY:Book Club\r\n\
DTSTART;TZID=America/Boise:20250705T183000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:closure@library.example\r\n\
SUMMARY:Closed for the ho\r\n \
liday\r\n\
DTSTART;VALUE=DATE:20250707\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:cancelled@library.example\r\n\
SUMMARY:Cancelled talk\r\n\
STATUS:CANCELLED\r\n\
DTSTART:20250708T180000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn july() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 7, 28, 0, 0, 0).unwrap(),
        )
    }

    fn calendar(body: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Library//Events//EN\r\n\
{body}END:VCALENDAR\r\n"
        )
    }

    #[test]
    fn parses_vevents() {
        let (after, before) = july();
        let events = parse_calendar(SAMPLE_ICS, after, before).expect("parse ics");
        assert_eq!(events.len(), 3, "cancelled events are skipped");

        let story = &events[0];
        assert_eq!(story.native_id.as_deref(), Some("story-time@library.example"));
        assert_eq!(story.title.as_deref(), Some("Story Time, Ages 3-5"));
        assert_eq!(
            story.description.as_deref(),
            Some("Songs and stories.\nBring a blanket.")
        );
        assert_eq!(
            story.start,
            Some(RawTime::Instant(
                Utc.with_ymd_and_hms(2025, 7, 4, 16, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            story.url.as_deref(),
            Some("https://library.example/events/story-time")
        );

        let book_club = &events[1];
        match &book_club.start {
            Some(RawTime::Zoned { local, tzid }) => {
                assert_eq!(tzid, "America/Boise");
                assert_eq!(local.to_string(), "2025-07-05 18:30:00");
            }
            other => panic!("expected zoned start, got {other:?}"),
        }
        assert_eq!(book_club.end, None);

        let closure = &events[2];
        assert_eq!(closure.title.as_deref(), Some("Closed for the holiday"));
        assert!(closure.all_day);
        assert_eq!(
            closure.start,
            Some(RawTime::Date(NaiveDate::from_ymd_opt(2025, 7, 7).unwrap()))
        );
    }

    #[test]
    fn duration_sets_the_end() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
UID:workshop@library.example\r\n\
SUMMARY:Workshop\r\n\
DTSTART;TZID=America/Boise:20250705T183000\r\n\
DURATION:PT1H30M\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:book-sale@library.example\r\n\
SUMMARY:Book Sale\r\n\
DTSTART;VALUE=DATE:20250710\r\n\
DURATION:P2D\r\n\
END:VEVENT\r\n",
        );
        let (after, before) = july();
        let events = parse_calendar(&ics, after, before).expect("parse ics");

        match &events[0].end {
            Some(RawTime::Zoned { local, tzid }) => {
                assert_eq!(tzid, "America/Boise");
                assert_eq!(local.to_string(), "2025-07-05 20:00:00");
            }
            other => panic!("expected zoned end, got {other:?}"),
        }
        assert_eq!(
            events[1].end,
            Some(RawTime::Date(NaiveDate::from_ymd_opt(2025, 7, 12).unwrap()))
        );
    }

    #[test]
    fn expands_recurring_events_with_exceptions() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
UID:story@library.example\r\n\
SUMMARY:Story Time\r\n\
DTSTART:20250703T160000Z\r\n\
DTEND:20250703T170000Z\r\n\
RRULE:FREQ=WEEKLY;COUNT=6\r\n\
EXDATE:20250710T160000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:story@library.example\r\n\
RECURRENCE-ID:20250717T160000Z\r\n\
SUMMARY:Story Time (moved)\r\n\
DTSTART:20250717T180000Z\r\n\
DTEND:20250717T190000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:story@library.example\r\n\
RECURRENCE-ID:20250724T160000Z\r\n\
STATUS:CANCELLED\r\n\
SUMMARY:Story Time\r\n\
DTSTART:20250724T160000Z\r\n\
END:VEVENT\r\n",
        );
        let (after, before) = july();
        let events = parse_calendar(&ics, after, before).expect("parse ics");

        let ids = events
            .iter()
            .map(|event| event.native_id.as_deref().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "story@library.example#20250703T160000Z",
                "story@library.example#20250717T160000Z",
            ]
        );
        assert_eq!(
            events[0].end,
            Some(RawTime::Instant(
                Utc.with_ymd_and_hms(2025, 7, 3, 17, 0, 0).unwrap()
            ))
        );
        assert_eq!(events[1].title.as_deref(), Some("Story Time (moved)"));
    }

    #[test]
    fn zoned_rules_keep_local_time_across_dst() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
UID:chess@library.example\r\n\
SUMMARY:Chess Club\r\n\
DTSTART;TZID=America/Boise:20251025T100000\r\n\
RRULE:FREQ=WEEKLY;COUNT=3\r\n\
END:VEVENT\r\n",
        );
        let after = Utc.with_ymd_and_hms(2025, 10, 20, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap();
        let events = parse_calendar(&ics, after, before).expect("parse ics");

        let locals = events
            .iter()
            .map(|event| match &event.start {
                Some(RawTime::Zoned { local, .. }) => local.to_string(),
                other => panic!("expected zoned start, got {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(
            locals,
            vec![
                "2025-10-25 10:00:00",
                "2025-11-01 10:00:00",
                "2025-11-08 10:00:00",
            ]
        );
    }

    #[test]
    fn unreadable_rules_keep_the_first_instance() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
UID:odd@library.example\r\n\
SUMMARY:Odd Rule\r\n\
DTSTART:20250703T160000Z\r\n\
RRULE:FREQ=SOMETIMES\r\n\
END:VEVENT\r\n",
        );
        let (after, before) = july();
        let events = parse_calendar(&ics, after, before).expect("parse ics");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].native_id.as_deref(), Some("odd@library.example"));
    }

    #[test]
    fn rejects_non_calendar_bodies() {
        let (after, before) = july();
        assert!(matches!(
            parse_calendar("<html>maintenance</html>", after, before),
            Err(FetchError::Parse(_))
        ));
    }
}
