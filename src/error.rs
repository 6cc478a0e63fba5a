use thiserror::Error;

/// Why a single source produced no events this run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(String),
    #[error("status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no events fetched for {0}")]
    Empty(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("all strategies failed: {0}")]
    Exhausted(String),
}

/// Why one raw record was dropped during normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeSkip {
    #[error("missing title")]
    MissingTitle,
    #[error("missing start time")]
    MissingStart,
    #[error("unparseable start time: {0}")]
    UnparseableStart(String),
    #[error("local time does not exist: {0}")]
    NonexistentLocalTime(String),
}

/// A curated feed entry that could not be built. Reported per feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("invalid feed entry: {0}")]
    Invalid(String),
    #[error("feed id {0:?} must be non-empty and use only letters, digits, '-' or '_'")]
    BadId(String),
    #[error("duplicate feed id {0}")]
    DuplicateId(String),
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no sources succeeded: {0}")]
    NoSourcesSucceeded(String),
}
