use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use event_aggregator::{
    config, curate, normalize, pipeline, scraping, Config, CuratedConfig, HttpClient,
    PipelineError, Report,
};

#[derive(Parser)]
#[command(name = "event-aggregator")]
#[command(about = "Fetch event calendars and publish combined, per-source and curated ICS feeds")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source and write all outputs
    Run {
        #[arg(long)]
        sources: PathBuf,

        #[arg(long)]
        curated: Option<PathBuf>,

        /// Output directory
        #[arg(long)]
        out: PathBuf,

        /// Logical run time (RFC 3339), defaults to the current time
        #[arg(long)]
        now: Option<String>,
    },
    /// List configured sources
    Sources {
        #[arg(long)]
        sources: PathBuf,
    },
    /// Fetch one source and print its normalized events as JSON
    Fetch {
        #[arg(long)]
        sources: PathBuf,

        source_id: String,

        #[arg(long)]
        now: Option<String>,
    },
    /// Check both config files without fetching anything
    Validate {
        #[arg(long)]
        sources: PathBuf,

        #[arg(long)]
        curated: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>> {
    match now {
        Some(value) => Ok(DateTime::parse_from_rfc3339(value)
            .with_context(|| format!("invalid --now value {value}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn load_curated(path: Option<&Path>) -> Result<CuratedConfig, PipelineError> {
    match path {
        Some(path) => config::load_curated(path),
        None => Ok(CuratedConfig::default()),
    }
}

fn load_configs(
    sources: &Path,
    curated: Option<&Path>,
) -> Result<(Config, CuratedConfig), PipelineError> {
    Ok((config::load_sources(sources)?, load_curated(curated)?))
}

fn run(sources: &Path, curated: Option<&Path>, out: &Path, now: DateTime<Utc>) -> Result<()> {
    let (config, curated) = match load_configs(sources, curated) {
        Ok(configs) => configs,
        Err(err) => {
            error!(error = %err, "unable to load config");
            pipeline::write_report(out, &Report::failed(now, err.to_string()))
                .context("unable to write report")?;
            return Err(err.into());
        }
    };

    let client = HttpClient::from_settings(&config.settings)
        .map_err(|err| anyhow::anyhow!("unable to build http client: {err}"))?;
    let mut output = pipeline::run(&config, &curated, &client, now);

    let outcome = pipeline::ensure_success(&config, &output.report);
    if let Err(err) = &outcome {
        output.report.error = Some(err.to_string());
    }
    pipeline::write_outputs(out, &output)
        .with_context(|| format!("unable to write outputs to {}", out.display()))?;

    info!(
        combined = output.report.combined.count,
        sources_ok = output.report.succeeded_sources(),
        sources = output.report.enabled_sources(),
        feeds = output.report.curated_feeds.enabled_feeds,
        out = %out.display(),
        "run complete"
    );
    outcome.map_err(Into::into)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            sources,
            curated,
            out,
            now,
        } => {
            let now = parse_now(now.as_deref())?;
            run(&sources, curated.as_deref(), &out, now)
        }
        Commands::Sources { sources } => {
            let config = config::load_sources(&sources)?;
            for source in scraping::list_sources(&config) {
                let state = if source.enabled { "" } else { " (disabled)" };
                println!("{}\t{}\t{}\t{}{state}", source.id, source.kind, source.name, source.url);
            }
            Ok(())
        }
        Commands::Fetch {
            sources,
            source_id,
            now,
        } => {
            let now = parse_now(now.as_deref())?;
            let config = config::load_sources(&sources)?;
            let source = config
                .find_source(&source_id)
                .ok_or_else(|| anyhow::anyhow!("unknown source id: {source_id}"))?;
            let client = HttpClient::from_settings(&config.settings)
                .map_err(|err| anyhow::anyhow!("unable to build http client: {err}"))?;
            let ctx = scraping::FetchContext::new(source, &config.settings, &client, now);
            let fetched = scraping::fetch_source(&ctx)
                .map_err(|err| anyhow::anyhow!("{source_id}: {err}"))?;
            let normalized =
                normalize::normalize_source(fetched.events, source, &config.settings, now);
            info!(
                source = %source_id,
                strategy = fetched.strategy,
                count = normalized.events.len(),
                dropped = normalized.dropped,
                "fetched"
            );
            println!("{}", serde_json::to_string_pretty(&normalized.events)?);
            Ok(())
        }
        Commands::Validate { sources, curated } => {
            let (config, curated) = load_configs(&sources, curated.as_deref())?;
            println!("{} sources ok", config.sources.len());
            let known = config.source_ids();
            let mut broken = 0;
            for entry in &curated.feeds {
                match &entry.feed {
                    Ok(feed) => {
                        let unknown = curate::unknown_sources(feed, &known);
                        if unknown.is_empty() {
                            println!("feed {}: ok", entry.id);
                        } else {
                            println!("feed {}: ok (unknown sources: {})", entry.id, unknown.join(", "));
                        }
                    }
                    Err(err) => {
                        broken += 1;
                        println!("feed {}: {err}", entry.id);
                    }
                }
            }
            if broken > 0 {
                anyhow::bail!("{broken} curated feed(s) invalid");
            }
            Ok(())
        }
    }
}
