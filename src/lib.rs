pub mod combine;
pub mod config;
pub mod curate;
pub mod emit;
pub mod error;
pub mod http;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod scraping;
mod utils;

pub use config::{load_curated, load_sources, Config, CuratedConfig};
pub use error::{FetchError, PipelineError};
pub use http::{HttpClient, PageFetcher};
pub use models::Event;
pub use pipeline::{run, RunOutput};
pub use report::Report;
