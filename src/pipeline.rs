//! One run: fetch every source, normalize, combine, curate, emit.
//!
//! `generate` is pure so reruns with the same fetch results and the same `now`
//! produce the same files. All disk I/O lives in `write_outputs`.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::combine;
use crate::config::{Config, CuratedConfig, FeedEntry, SourceConfig};
use crate::curate;
use crate::emit;
use crate::error::{FetchError, PipelineError};
use crate::http::PageFetcher;
use crate::models::{sort_events, Event};
use crate::normalize;
use crate::report::{
    CombinedReport, CuratedReport, FeedReport, Report, SourceReport, SourceStatus,
};
use crate::scraping::{self, FetchContext};
use crate::utils;

pub const COMBINED_PATH: &str = "combined.ics";
pub const REPORT_PATH: &str = "report.json";
pub const BY_SOURCE_DIR: &str = "by-source";
pub const CURATED_DIR: &str = "curated";

const MISSING_OUTCOME: &str = "source was not fetched";

/// What happened to one configured source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Disabled,
    Failed(FetchError),
    Fetched {
        strategy: &'static str,
        raw_count: usize,
        events: Vec<Event>,
        dropped: usize,
    },
}

impl SourceOutcome {
    pub fn events(&self) -> &[Event] {
        match self {
            SourceOutcome::Fetched { events, .. } => events,
            _ => &[],
        }
    }
}

/// Fetches and normalizes a single source.
pub fn fetch_one(
    source: &SourceConfig,
    config: &Config,
    fetcher: &dyn PageFetcher,
    now: DateTime<Utc>,
) -> SourceOutcome {
    if !source.enabled {
        return SourceOutcome::Disabled;
    }
    let ctx = FetchContext::new(source, &config.settings, fetcher, now);
    match scraping::fetch_source(&ctx) {
        Ok(fetched) => {
            let raw_count = fetched.events.len();
            let normalized =
                normalize::normalize_source(fetched.events, source, &config.settings, now);
            info!(
                source = %source.id,
                strategy = fetched.strategy,
                raw_count,
                count = normalized.events.len(),
                dropped = normalized.dropped,
                "source ok"
            );
            SourceOutcome::Fetched {
                strategy: fetched.strategy,
                raw_count,
                events: normalized.events,
                dropped: normalized.dropped,
            }
        }
        Err(err) => {
            warn!(source = %source.id, error = %err, "source failed");
            SourceOutcome::Failed(err)
        }
    }
}

/// One outcome per configured source, in config order.
pub fn fetch_sources(
    config: &Config,
    fetcher: &dyn PageFetcher,
    now: DateTime<Utc>,
) -> Vec<SourceOutcome> {
    if config.settings.parallel_fetch {
        config
            .sources
            .par_iter()
            .map(|source| fetch_one(source, config, fetcher, now))
            .collect()
    } else {
        config
            .sources
            .iter()
            .map(|source| fetch_one(source, config, fetcher, now))
            .collect()
    }
}

/// A file to write, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub files: Vec<OutputFile>,
    pub report: Report,
}

impl RunOutput {
    pub fn file(&self, path: &str) -> Option<&OutputFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Ids of the calendars produced under `dir` (`by-source` or `curated`).
    fn written_ids(&self, dir: &str) -> Vec<&str> {
        self.files
            .iter()
            .filter_map(|file| file.path.strip_prefix(dir)?.strip_prefix('/'))
            .filter_map(|name| name.strip_suffix(".ics"))
            .collect()
    }
}

fn source_path(id: &str) -> String {
    format!("{BY_SOURCE_DIR}/{id}.ics")
}

fn feed_path(id: &str) -> String {
    format!("{CURATED_DIR}/{id}.ics")
}

/// Builds every calendar and the report from already fetched outcomes.
/// `outcomes` pairs with `config.sources` by position; a source without an
/// outcome is reported as an error.
pub fn generate(
    config: &Config,
    outcomes: &[SourceOutcome],
    curated: &CuratedConfig,
    now: DateTime<Utc>,
) -> RunOutput {
    let settings = &config.settings;
    let mut files = Vec::new();
    let mut sources = Vec::with_capacity(config.sources.len());

    for (index, source) in config.sources.iter().enumerate() {
        let mut entry = SourceReport {
            id: source.id.clone(),
            name: source.name.clone(),
            kind: source.kind.as_str().to_string(),
            status: SourceStatus::Disabled,
            strategy: None,
            raw_count: 0,
            count: 0,
            dropped: 0,
            error: None,
            path: None,
        };
        match outcomes.get(index) {
            None => {
                warn!(source = %source.id, "source has no fetch outcome");
                entry.status = SourceStatus::Error;
                entry.error = Some(MISSING_OUTCOME.to_string());
            }
            Some(SourceOutcome::Disabled) => {}
            Some(SourceOutcome::Failed(err)) => {
                entry.status = SourceStatus::Error;
                entry.error = Some(err.to_string());
            }
            Some(SourceOutcome::Fetched {
                strategy,
                raw_count,
                events,
                dropped,
            }) => {
                let path = source_path(&source.id);
                files.push(OutputFile {
                    path: path.clone(),
                    contents: emit::render_calendar(&source.name, None, events, now),
                });
                entry.status = SourceStatus::Ok;
                entry.strategy = Some(strategy.to_string());
                entry.raw_count = *raw_count;
                entry.count = events.len();
                entry.dropped = *dropped;
                entry.path = Some(path);
            }
        }
        sources.push(entry);
    }

    let lists = outcomes
        .iter()
        .take(config.sources.len())
        .map(|outcome| outcome.events().to_vec());
    let mut combined = combine::combine(lists);
    sort_events(&mut combined);
    files.push(OutputFile {
        path: COMBINED_PATH.to_string(),
        contents: emit::render_calendar(&settings.calendar_name, None, &combined, now),
    });

    let known = config.source_ids();
    let feeds = curated
        .feeds
        .iter()
        .map(|entry| build_feed(entry, &combined, &known, config, now, &mut files))
        .collect();

    let report = Report {
        generated_at: now,
        sources,
        combined: CombinedReport {
            count: combined.len(),
            path: Some(COMBINED_PATH.to_string()),
        },
        curated_feeds: CuratedReport {
            total_feeds: curated.total_feeds(),
            enabled_feeds: curated.enabled_feeds(),
            feeds,
        },
        events_preview: combined
            .iter()
            .take(settings.preview_limit)
            .cloned()
            .collect(),
        error: None,
    };

    RunOutput { files, report }
}

fn build_feed(
    entry: &FeedEntry,
    combined: &[Event],
    known: &HashSet<&str>,
    config: &Config,
    now: DateTime<Utc>,
    files: &mut Vec<OutputFile>,
) -> FeedReport {
    let mut report = FeedReport {
        id: entry.id.clone(),
        name: entry.name.clone(),
        enabled: entry.enabled,
        count: 0,
        manual_count: 0,
        auto_count: 0,
        path: None,
        unknown_sources: Vec::new(),
        error: None,
    };

    let feed = match &entry.feed {
        Ok(feed) => feed,
        Err(err) => {
            warn!(feed = %entry.id, error = %err, "skipping curated feed");
            report.error = Some(err.to_string());
            return report;
        }
    };
    if !feed.enabled {
        return report;
    }

    report.unknown_sources = curate::unknown_sources(feed, known);
    if !report.unknown_sources.is_empty() {
        warn!(feed = %feed.id, unknown = ?report.unknown_sources, "feed names unknown sources");
    }

    let selection = curate::select(feed, combined, config.settings.default_days_ahead, now);
    let path = feed_path(&feed.id);
    files.push(OutputFile {
        path: path.clone(),
        contents: emit::render_calendar(
            &feed.name,
            feed.description.as_deref(),
            &selection.events,
            now,
        ),
    });
    info!(
        feed = %feed.id,
        count = selection.events.len(),
        manual = selection.manual_count,
        auto = selection.auto_count,
        "curated feed built"
    );

    report.count = selection.events.len();
    report.manual_count = selection.manual_count;
    report.auto_count = selection.auto_count;
    report.path = Some(path);
    report
}

/// Fetch plus generate: the whole run minus writing.
pub fn run(
    config: &Config,
    curated: &CuratedConfig,
    fetcher: &dyn PageFetcher,
    now: DateTime<Utc>,
) -> RunOutput {
    let outcomes = fetch_sources(config, fetcher, now);
    generate(config, &outcomes, curated, now)
}

/// Writes every calendar, removes calendars this run did not produce, then
/// writes the report last. A source that failed or a feed that is broken
/// leaves no calendar behind.
pub fn write_outputs(dir: &Path, output: &RunOutput) -> Result<(), PipelineError> {
    for file in &output.files {
        utils::write_atomic(&dir.join(&file.path), file.contents.as_bytes())?;
    }

    for sub in [BY_SOURCE_DIR, CURATED_DIR] {
        let keep = output.written_ids(sub);
        for path in utils::remove_stale_calendars(&dir.join(sub), &keep)? {
            info!(path = %path.display(), "removed stale calendar");
        }
    }

    write_report(dir, &output.report)
}

pub fn write_report(dir: &Path, report: &Report) -> Result<(), PipelineError> {
    let json = report.to_json()?;
    utils::write_atomic(&dir.join(REPORT_PATH), json.as_bytes())?;
    Ok(())
}

/// Fails the run when sources are required and none of the enabled ones
/// produced events.
pub fn ensure_success(config: &Config, report: &Report) -> Result<(), PipelineError> {
    if !config.settings.require_source_success
        || report.enabled_sources() == 0
        || report.succeeded_sources() > 0
    {
        return Ok(());
    }
    let failures = report
        .sources
        .iter()
        .filter_map(|source| {
            source
                .error
                .as_ref()
                .map(|err| format!("{}: {err}", source.id))
        })
        .collect::<Vec<_>>()
        .join("; ");
    Err(PipelineError::NoSourcesSucceeded(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::fs;

    use crate::config::{parse_curated, parse_sources, Settings, SourceKind};
    use crate::http::testing::StubFetcher;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    fn event(uid: &str, source: &str, days: i64) -> Event {
        let start = now() + Duration::days(days);
        Event {
            uid: uid.to_string(),
            title: format!("E{uid}"),
            description: None,
            location: None,
            start_utc: start,
            end_utc: start + Duration::hours(1),
            source_id: source.to_string(),
            url: None,
        }
    }

    fn source(id: &str) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind: SourceKind::Ics,
            url: format!("https://{id}.example.org/cal.ics"),
            days_ahead: None,
            max_events: None,
            allow_zero: false,
            timezone: None,
            enabled: true,
        }
    }

    fn config(ids: &[&str]) -> Config {
        Config {
            settings: Settings::default(),
            sources: ids.iter().map(|id| source(id)).collect(),
        }
    }

    fn fetched(events: Vec<Event>) -> SourceOutcome {
        SourceOutcome::Fetched {
            strategy: "ics",
            raw_count: events.len(),
            events,
            dropped: 0,
        }
    }

    fn two_source_outcomes() -> Vec<SourceOutcome> {
        vec![
            fetched(vec![event("1", "a", 1), event("2", "a", 2)]),
            fetched(vec![event("2", "b", 2)]),
        ]
    }

    #[test]
    fn overlapping_uid_across_sources_is_combined_once() {
        let output = generate(
            &config(&["a", "b"]),
            &two_source_outcomes(),
            &CuratedConfig::default(),
            now(),
        );
        let combined = output.file(COMBINED_PATH).expect("combined.ics");
        assert_eq!(combined.contents.matches("BEGIN:VEVENT").count(), 2);
        assert!(combined.contents.contains("UID:1\r\n"));
        assert!(combined.contents.contains("UID:2\r\n"));
        assert_eq!(output.report.combined.count, 2);
        assert_eq!(output.report.events_preview[1].source_id, "a");
        assert!(output.file("by-source/a.ics").is_some());
        assert!(output.file("by-source/b.ics").is_some());
    }

    #[test]
    fn generation_is_deterministic() {
        let curated = parse_curated(
            r#"{"feeds":[{"id":"picks","name":"Picks","selected_events":["2"],"preferences":{"max_auto_events":1}}]}"#,
        )
        .unwrap();
        let config = config(&["a", "b"]);
        let first = generate(&config, &two_source_outcomes(), &curated, now());
        let second = generate(&config, &two_source_outcomes(), &curated, now());
        assert_eq!(first, second);

        let picks = first.report.curated_feeds.feeds[0].clone();
        assert_eq!(picks.manual_count, 1);
        assert_eq!(picks.auto_count, 1);
        assert_eq!(picks.path.as_deref(), Some("curated/picks.ics"));
    }

    #[test]
    fn broken_feed_does_not_stop_the_others() {
        let curated = parse_curated(
            r#"{"feeds":[
                {"id":"broken","name":"Broken","preferences":{"max_auto_events":"lots"}},
                {"id":"off","name":"Off","enabled":false},
                {"id":"all","name":"All"}
            ]}"#,
        )
        .unwrap();
        let output = generate(&config(&["a", "b"]), &two_source_outcomes(), &curated, now());
        let feeds = &output.report.curated_feeds;

        assert_eq!(feeds.total_feeds, 3);
        assert_eq!(feeds.enabled_feeds, 2);
        assert!(feeds.feeds[0].error.is_some());
        assert!(feeds.feeds[0].path.is_none());
        assert!(!feeds.feeds[1].enabled);
        assert!(feeds.feeds[1].path.is_none());
        assert_eq!(feeds.feeds[2].count, 2);
        assert!(output.file("curated/all.ics").is_some());
        assert!(output.file("curated/broken.ics").is_none());
        assert!(output.file("curated/off.ics").is_none());
    }

    #[test]
    fn failed_and_disabled_sources_are_reported() {
        let outcomes = vec![
            SourceOutcome::Failed(FetchError::Status {
                url: "https://a.example.org/cal.ics".to_string(),
                status: 503,
            }),
            SourceOutcome::Disabled,
        ];
        let mut config = config(&["a", "b"]);
        config.sources[1].enabled = false;
        let output = generate(&config, &outcomes, &CuratedConfig::default(), now());

        let a = &output.report.sources[0];
        assert_eq!(a.status, SourceStatus::Error);
        assert_eq!(
            a.error.as_deref(),
            Some("status 503 for https://a.example.org/cal.ics")
        );
        assert_eq!(output.report.sources[1].status, SourceStatus::Disabled);
        assert_eq!(output.report.combined.count, 0);
        assert!(output.file(COMBINED_PATH).is_some());

        match ensure_success(&config, &output.report) {
            Err(PipelineError::NoSourcesSucceeded(message)) => assert!(message.starts_with("a: ")),
            other => panic!("expected failure, got {other:?}"),
        }

        config.settings.require_source_success = false;
        assert!(ensure_success(&config, &output.report).is_ok());
    }

    #[test]
    fn run_fetches_through_the_page_fetcher() {
        let config = parse_sources(
            r#"{
                "settings": { "parallel_fetch": true },
                "sources": [
                    { "id": "lib", "name": "Library", "type": "ics", "url": "https://lib.example.org/cal.ics" },
                    { "id": "gone", "name": "Gone", "type": "ics", "url": "https://gone.example.org/cal.ics" }
                ]
            }"#,
        )
        .unwrap();
        let ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:TEST\r\n\
BEGIN:VEVENT\r\nUID:story-time\r\nSUMMARY:Story Time\r\nDTSTART:20250703T160000Z\r\nDTEND:20250703T170000Z\r\nEND:VEVENT\r\n\
END:VCALENDAR\r\n";
        let stub = StubFetcher::new().page("https://lib.example.org/cal.ics", ics);

        let output = run(&config, &CuratedConfig::default(), &stub, now());
        assert_eq!(output.report.sources[0].id, "lib");
        assert_eq!(output.report.sources[0].status, SourceStatus::Ok);
        assert_eq!(output.report.sources[0].count, 1);
        assert_eq!(output.report.sources[1].status, SourceStatus::Error);
        assert_eq!(output.report.events_preview[0].title, "Story Time");
        assert!(ensure_success(&config, &output.report).is_ok());
    }

    #[test]
    fn writes_outputs_and_removes_stale_calendars() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("by-source")).unwrap();
        fs::write(dir.path().join("by-source/retired.ics"), "old").unwrap();
        fs::create_dir_all(dir.path().join("curated")).unwrap();
        fs::write(dir.path().join("curated/old-feed.ics"), "old").unwrap();

        let output = generate(
            &config(&["a", "b"]),
            &two_source_outcomes(),
            &CuratedConfig::default(),
            now(),
        );
        write_outputs(dir.path(), &output).unwrap();

        assert!(dir.path().join("combined.ics").is_file());
        assert!(dir.path().join("by-source/a.ics").is_file());
        assert!(!dir.path().join("by-source/retired.ics").exists());
        assert!(!dir.path().join("curated/old-feed.ics").exists());
        assert!(!dir.path().join("combined.ics.tmp").exists());

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report["combined"]["count"], 2);
        assert_eq!(report["sources"][0]["status"], "ok");
        assert_eq!(report["generated_at"], "2025-07-01T12:00:00Z");
    }

    #[test]
    fn calendars_of_failed_sources_and_broken_feeds_are_removed_on_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&["a", "b"]);
        let good = parse_curated(r#"{"feeds":[{"id":"picks","name":"Picks"}]}"#).unwrap();

        let first = generate(
            &config,
            &[fetched(vec![event("1", "a", 1)]), fetched(vec![event("2", "b", 2)])],
            &good,
            now(),
        );
        write_outputs(dir.path(), &first).unwrap();
        assert!(dir.path().join("by-source/a.ics").is_file());
        assert!(dir.path().join("curated/picks.ics").is_file());

        let broken = parse_curated(
            r#"{"feeds":[{"id":"picks","name":"Picks","preferences":{"max_auto_events":"lots"}}]}"#,
        )
        .unwrap();
        let later = now() + Duration::days(3);
        let second = generate(
            &config,
            &[
                SourceOutcome::Failed(FetchError::Http("connection refused".to_string())),
                fetched(vec![event("2", "b", 5)]),
            ],
            &broken,
            later,
        );
        write_outputs(dir.path(), &second).unwrap();

        assert!(!dir.path().join("by-source/a.ics").exists());
        assert!(dir.path().join("by-source/b.ics").is_file());
        assert!(!dir.path().join("curated/picks.ics").exists());
        let combined = fs::read_to_string(dir.path().join("combined.ics")).unwrap();
        assert!(!combined.contains("UID:1\r\n"));

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(report["sources"][0]["status"], "error");
        assert!(report["sources"][0]["path"].is_null());
        assert!(report["curated_feeds"]["feeds"][0]["path"].is_null());
    }

    #[test]
    fn sources_without_an_outcome_are_reported_as_errors() {
        let outcomes = vec![fetched(vec![event("1", "a", 1)])];
        let output = generate(&config(&["a", "b"]), &outcomes, &CuratedConfig::default(), now());
        assert_eq!(output.report.sources.len(), 2);
        assert_eq!(output.report.sources[1].status, SourceStatus::Error);
        assert_eq!(
            output.report.sources[1].error.as_deref(),
            Some("source was not fetched")
        );
        assert!(output.file("by-source/b.ics").is_none());
    }
}
