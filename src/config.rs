use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::Path,
};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FeedError, PipelineError};
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_days_ahead: u32,
    pub default_timezone: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub user_agent: String,
    pub parallel_fetch: bool,
    pub preview_limit: usize,
    pub require_source_success: bool,
    pub calendar_name: String,
    pub default_duration_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_days_ahead: 60,
            default_timezone: "UTC".to_string(),
            request_timeout_secs: 20,
            max_attempts: 3,
            retry_backoff_ms: 500,
            user_agent: concat!("event-aggregator/", env!("CARGO_PKG_VERSION")).to_string(),
            parallel_fetch: true,
            preview_limit: 50,
            require_source_success: true,
            calendar_name: "All Events".to_string(),
            default_duration_minutes: 120,
        }
    }
}

impl Settings {
    pub fn timezone(&self) -> Tz {
        self.default_timezone.parse().unwrap_or(Tz::UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "ics")]
    Ics,
    #[serde(rename = "tec_rest")]
    TecRest,
    #[serde(rename = "tec_auto")]
    TecAuto,
    #[serde(rename = "growthzone_html")]
    GrowthzoneHtml,
    #[serde(rename = "simpleview_html")]
    SimpleviewHtml,
    #[serde(rename = "ai1ec_html")]
    Ai1ecHtml,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Ics => "ics",
            SourceKind::TecRest => "tec_rest",
            SourceKind::TecAuto => "tec_auto",
            SourceKind::GrowthzoneHtml => "growthzone_html",
            SourceKind::SimpleviewHtml => "simpleview_html",
            SourceKind::Ai1ecHtml => "ai1ec_html",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub days_ahead: Option<u32>,
    #[serde(default)]
    pub max_events: Option<usize>,
    #[serde(default)]
    pub allow_zero: bool,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn days_ahead(&self, settings: &Settings) -> u32 {
        self.days_ahead.unwrap_or(settings.default_days_ahead)
    }

    /// Zone assumed for timezone-naive timestamps from this source.
    pub fn timezone(&self, settings: &Settings) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| name.parse().ok())
            .unwrap_or_else(|| settings.timezone())
    }
}

/// Sources plus run settings, loaded once and passed explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn find_source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn source_ids(&self) -> HashSet<&str> {
        self.sources.iter().map(|source| source.id.as_str()).collect()
    }
}

pub fn load_sources(path: &Path) -> Result<Config, PipelineError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| PipelineError::Config(format!("unable to read {}: {err}", path.display())))?;
    parse_sources(&contents)
        .map_err(|err| PipelineError::Config(format!("{}: {err}", path.display())))
}

pub fn parse_sources(contents: &str) -> Result<Config, String> {
    let config: Config = serde_json::from_str(contents).map_err(|err| err.to_string())?;
    validate_sources(&config)?;
    Ok(config)
}

fn validate_sources(config: &Config) -> Result<(), String> {
    if config.settings.default_timezone.parse::<Tz>().is_err() {
        return Err(format!(
            "unknown default_timezone {}",
            config.settings.default_timezone
        ));
    }

    let mut seen = HashSet::new();
    for source in &config.sources {
        if !utils::is_slug(&source.id) {
            return Err(format!("invalid source id {:?}", source.id));
        }
        if !seen.insert(source.id.as_str()) {
            return Err(format!("duplicate source id {}", source.id));
        }
        let url = reqwest::Url::parse(&source.url)
            .map_err(|err| format!("source {}: bad url {}: {err}", source.id, source.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("source {}: url must be http(s)", source.id));
        }
        if let Some(tz) = &source.timezone {
            if tz.parse::<Tz>().is_err() {
                return Err(format!("source {}: unknown timezone {tz}", source.id));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedPreferences {
    pub include_sources: BTreeSet<String>,
    pub exclude_sources: BTreeSet<String>,
    pub locations: Vec<String>,
    pub keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub max_auto_events: usize,
    pub days_ahead: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedFeed {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub selected_events: BTreeSet<String>,
    #[serde(default)]
    pub preferences: FeedPreferences,
}

/// One entry of the curated file. A malformed entry keeps whatever identity
/// could be read so the report can still name it.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub feed: Result<CuratedFeed, FeedError>,
}

#[derive(Debug, Clone, Default)]
pub struct CuratedConfig {
    pub feeds: Vec<FeedEntry>,
}

impl CuratedConfig {
    pub fn total_feeds(&self) -> usize {
        self.feeds.len()
    }

    pub fn enabled_feeds(&self) -> usize {
        self.feeds.iter().filter(|entry| entry.enabled).count()
    }
}

#[derive(Deserialize)]
struct CuratedFile {
    #[serde(default)]
    feeds: Vec<Value>,
}

pub fn load_curated(path: &Path) -> Result<CuratedConfig, PipelineError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| PipelineError::Config(format!("unable to read {}: {err}", path.display())))?;
    parse_curated(&contents)
        .map_err(|err| PipelineError::Config(format!("{}: {err}", path.display())))
}

pub fn parse_curated(contents: &str) -> Result<CuratedConfig, String> {
    let file: CuratedFile = serde_json::from_str(contents).map_err(|err| err.to_string())?;
    let mut seen = HashSet::new();
    let feeds = file
        .feeds
        .into_iter()
        .enumerate()
        .map(|(index, raw)| parse_feed_entry(index, raw, &mut seen))
        .collect();
    Ok(CuratedConfig { feeds })
}

fn parse_feed_entry(index: usize, raw: Value, seen: &mut HashSet<String>) -> FeedEntry {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("feed-{index}"));
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    let enabled = raw.get("enabled").and_then(Value::as_bool).unwrap_or(true);

    let feed = serde_json::from_value::<CuratedFeed>(raw)
        .map_err(|err| FeedError::Invalid(err.to_string()))
        .and_then(|feed| {
            if !utils::is_slug(&feed.id) {
                return Err(FeedError::BadId(feed.id));
            }
            if !seen.insert(feed.id.clone()) {
                return Err(FeedError::DuplicateId(feed.id));
            }
            Ok(feed)
        });

    FeedEntry {
        id,
        name,
        enabled,
        feed,
    }
}
