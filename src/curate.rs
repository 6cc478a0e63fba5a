//! Curated feeds: manually pinned events plus preference-driven auto picks.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::config::{CuratedFeed, FeedPreferences};
use crate::models::{sort_events, Event};

/// Preferences with patterns lowercased and blanks removed.
#[derive(Debug, Clone)]
pub struct FeedMatcher {
    include_sources: BTreeSet<String>,
    exclude_sources: BTreeSet<String>,
    locations: Vec<String>,
    keywords: Vec<String>,
    exclude_keywords: Vec<String>,
}

fn patterns(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

impl FeedMatcher {
    pub fn new(prefs: &FeedPreferences) -> Self {
        Self {
            include_sources: prefs.include_sources.clone(),
            exclude_sources: prefs.exclude_sources.clone(),
            locations: patterns(&prefs.locations),
            keywords: patterns(&prefs.keywords),
            exclude_keywords: patterns(&prefs.exclude_keywords),
        }
    }

    pub fn source_allowed(&self, event: &Event) -> bool {
        (self.include_sources.is_empty() || self.include_sources.contains(&event.source_id))
            && !self.exclude_sources.contains(&event.source_id)
    }

    pub fn location_matches(&self, event: &Event) -> bool {
        if self.locations.is_empty() {
            return true;
        }
        let location = event.location.as_deref().unwrap_or_default().to_lowercase();
        self.locations.iter().any(|loc| location.contains(loc.as_str()))
    }

    pub fn keyword_matches(&self, haystack: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|kw| haystack.contains(kw.as_str()))
    }

    pub fn excluded(&self, haystack: &str) -> bool {
        self.exclude_keywords
            .iter()
            .any(|kw| haystack.contains(kw.as_str()))
    }

    /// Source, location, keyword and exclude-keyword filters. Exclusion wins
    /// over a keyword match.
    pub fn accepts(&self, event: &Event) -> bool {
        if !self.source_allowed(event) || !self.location_matches(event) {
            return false;
        }
        let haystack = searchable_text(event);
        self.keyword_matches(&haystack) && !self.excluded(&haystack)
    }
}

fn searchable_text(event: &Event) -> String {
    [
        Some(event.title.as_str()),
        event.description.as_deref(),
        event.location.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n")
    .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuratedSelection {
    pub events: Vec<Event>,
    pub manual_count: usize,
    pub auto_count: usize,
}

/// Computes a feed's event list from the combined set.
pub fn select(
    feed: &CuratedFeed,
    combined: &[Event],
    default_days_ahead: u32,
    now: DateTime<Utc>,
) -> CuratedSelection {
    let manual = combined
        .iter()
        .filter(|event| feed.selected_events.contains(&event.uid) && event.start_utc >= now)
        .cloned()
        .collect::<Vec<_>>();
    let manual_uids = manual
        .iter()
        .map(|event| event.uid.as_str())
        .collect::<HashSet<_>>();

    let matcher = FeedMatcher::new(&feed.preferences);
    let days_ahead = feed.preferences.days_ahead.unwrap_or(default_days_ahead);
    let horizon = now + Duration::days(i64::from(days_ahead));

    let mut auto = combined
        .iter()
        .filter(|event| !manual_uids.contains(event.uid.as_str()))
        .filter(|event| event.start_utc >= now && event.start_utc <= horizon)
        .filter(|event| matcher.accepts(event))
        .cloned()
        .collect::<Vec<_>>();
    sort_events(&mut auto);
    if feed.preferences.max_auto_events > 0 {
        auto.truncate(feed.preferences.max_auto_events);
    }

    let manual_count = manual.len();
    let auto_count = auto.len();
    let mut events = manual;
    events.extend(auto);
    sort_events(&mut events);

    CuratedSelection {
        events,
        manual_count,
        auto_count,
    }
}

/// Source ids named in a feed's preferences that no configured source has.
pub fn unknown_sources(feed: &CuratedFeed, known: &HashSet<&str>) -> Vec<String> {
    feed.preferences
        .include_sources
        .iter()
        .chain(feed.preferences.exclude_sources.iter())
        .filter(|id| !known.contains(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    fn event(uid: &str, source: &str, title: &str, days: i64) -> Event {
        let start = now() + Duration::days(days);
        Event {
            uid: uid.to_string(),
            title: title.to_string(),
            description: None,
            location: None,
            start_utc: start,
            end_utc: start + Duration::hours(2),
            source_id: source.to_string(),
            url: None,
        }
    }

    fn feed(prefs: FeedPreferences, selected: &[&str]) -> CuratedFeed {
        CuratedFeed {
            id: "picks".to_string(),
            name: "Picks".to_string(),
            enabled: true,
            description: None,
            selected_events: selected.iter().map(|s| s.to_string()).collect(),
            preferences: prefs,
        }
    }

    fn uids(selection: &CuratedSelection) -> Vec<&str> {
        selection.events.iter().map(|e| e.uid.as_str()).collect()
    }

    #[test]
    fn pinned_past_events_are_dropped() {
        let combined = vec![event("past", "a", "Old", -1), event("future", "a", "New", 1)];
        let prefs = FeedPreferences {
            keywords: vec!["nothing-matches".to_string()],
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &["past", "future"]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["future"]);
        assert_eq!(selection.manual_count, 1);
        assert_eq!(selection.auto_count, 0);
    }

    #[test]
    fn pinned_events_ignore_preferences_and_window() {
        let combined = vec![
            event("far", "excluded-source", "21+ Night", 200),
            event("near", "a", "Festival", 2),
        ];
        let prefs = FeedPreferences {
            exclude_sources: ["excluded-source".to_string()].into_iter().collect(),
            exclude_keywords: vec!["21+".to_string()],
            days_ahead: Some(7),
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &["far"]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["near", "far"]);
        assert_eq!(selection.manual_count, 1);
        assert_eq!(selection.auto_count, 1);
    }

    #[test]
    fn exclude_keywords_beat_keywords() {
        let combined = vec![
            event("beer", "a", "21+ Beer Festival", 1),
            event("folk", "a", "Folk Festival", 2),
        ];
        let prefs = FeedPreferences {
            keywords: vec!["festival".to_string()],
            exclude_keywords: vec!["21+".to_string()],
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["folk"]);
    }

    #[test]
    fn max_cap_keeps_the_earliest() {
        let combined = vec![
            event("e5", "a", "Five", 5),
            event("e2", "a", "Two", 2),
            event("e4", "a", "Four", 4),
            event("e1", "a", "One", 1),
            event("e3", "a", "Three", 3),
        ];
        let prefs = FeedPreferences {
            max_auto_events: 2,
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["e1", "e2"]);
        assert_eq!(selection.auto_count, 2);
    }

    #[test]
    fn source_and_location_filters() {
        let mut downtown = event("d", "parks", "Concert", 1);
        downtown.location = Some("Downtown Plaza".to_string());
        let mut suburb = event("s", "parks", "Concert", 2);
        suburb.location = Some("Meridian Library".to_string());
        let mut other = event("o", "arts", "Concert", 3);
        other.location = Some("DOWNTOWN Gallery".to_string());
        let nowhere = event("n", "parks", "Concert", 4);
        let combined = vec![downtown, suburb, other, nowhere];

        let prefs = FeedPreferences {
            include_sources: ["parks".to_string()].into_iter().collect(),
            locations: vec!["downtown".to_string()],
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["d"]);

        let prefs = FeedPreferences {
            exclude_sources: ["parks".to_string()].into_iter().collect(),
            locations: vec!["Downtown".to_string()],
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["o"]);
    }

    #[test]
    fn keywords_search_description_and_location() {
        let mut by_description = event("desc", "a", "Saturday Morning", 1);
        by_description.description = Some("Free YOGA in the park".to_string());
        let mut by_location = event("loc", "a", "Stretch", 2);
        by_location.location = Some("Yoga Studio".to_string());
        let unrelated = event("none", "a", "Chess", 3);
        let combined = vec![by_description, by_location, unrelated];

        let prefs = FeedPreferences {
            keywords: vec![" yoga ".to_string(), "".to_string()],
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["desc", "loc"]);
    }

    #[test]
    fn date_window_uses_feed_override_then_default() {
        let combined = vec![event("soon", "a", "Soon", 3), event("later", "a", "Later", 20)];

        let selection = select(&feed(FeedPreferences::default(), &[]), &combined, 10, now());
        assert_eq!(uids(&selection), vec!["soon"]);

        let prefs = FeedPreferences {
            days_ahead: Some(30),
            ..FeedPreferences::default()
        };
        let selection = select(&feed(prefs, &[]), &combined, 10, now());
        assert_eq!(uids(&selection), vec!["soon", "later"]);
    }

    #[test]
    fn unknown_sources_degrade_to_no_matches() {
        let combined = vec![event("x", "a", "Anything", 1)];
        let prefs = FeedPreferences {
            include_sources: ["typo".to_string()].into_iter().collect(),
            ..FeedPreferences::default()
        };
        let feed = feed(prefs, &[]);
        let selection = select(&feed, &combined, 60, now());
        assert!(selection.events.is_empty());

        let known = ["a"].into_iter().collect::<HashSet<_>>();
        assert_eq!(unknown_sources(&feed, &known), vec!["typo".to_string()]);
    }

    #[test]
    fn ties_are_ordered_by_uid() {
        let combined = vec![event("b", "a", "Same time", 1), event("a", "a", "Same time", 1)];
        let selection = select(&feed(FeedPreferences::default(), &["b"]), &combined, 60, now());
        assert_eq!(uids(&selection), vec!["a", "b"]);
    }
}
