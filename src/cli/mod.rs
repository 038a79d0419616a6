//! Command-line interface for reelcast.
//!
//! Provides commands for running the full service, the background loop
//! alone, one-off local encodes, and inspecting state and configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapters::{
    ApiReleaseSource, DeliveryChannel, DeliveryError, FfmpegTranscoder, HttpFetcher,
    LocatorFetcher, MagnetFetcher, ReleaseSource, ScrapeReleaseSource, StatusReporter,
    TelegramClient,
};
use crate::config::{FeedKind, ResolvedConfig};
use crate::core::{InboundFile, OnDemandHandler, Orchestrator, Scheduler, StateStore};

pub mod serve;

/// reelcast - release feed to Telegram encoding pipeline
#[derive(Parser, Debug)]
#[command(name = "reelcast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: discover .reelcast/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Telegram bot token (or use TELEGRAM_TOKEN env)
    #[arg(long, env = "TELEGRAM_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Telegram chat ID for deliveries (or use CHAT_ID env)
    #[arg(long, env = "CHAT_ID", global = true)]
    pub chat_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the background loop and the chat bot together
    Serve,

    /// Run the background loop only
    Watch {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Encode a local file with the delivery profile
    Encode {
        /// File to encode
        file: PathBuf,

        /// Send the result to the configured chat instead of saving it
        #[arg(long)]
        deliver: bool,

        /// Where to save the result when not delivering
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Show processed-release state
    Status {
        /// List every processed locator
        #[arg(short, long)]
        list: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = ResolvedConfig::load(self.config.as_deref())?
            .with_credentials(self.token, self.chat_id);

        match self.command {
            Commands::Serve => serve::run(config).await,
            Commands::Watch { once } => watch(config, once).await,
            Commands::Encode {
                file,
                deliver,
                output_dir,
            } => encode_local(config, &file, deliver, output_dir).await,
            Commands::Status { list } => show_status(&config, list),
            Commands::Config => {
                println!("{}", config);
                Ok(())
            }
        }
    }
}

// ============================================================================
// Component wiring
// ============================================================================

fn build_source(config: &ResolvedConfig) -> Result<Arc<dyn ReleaseSource>> {
    let source: Arc<dyn ReleaseSource> = match config.feed_kind {
        FeedKind::Api => Arc::new(
            ApiReleaseSource::new(&config.feed_url, config.feed_timeout)
                .context("Failed to build feed client")?,
        ),
        FeedKind::Scrape => Arc::new(
            ScrapeReleaseSource::new(&config.feed_url, &config.scheme_prefix, config.feed_timeout)
                .context("Failed to build feed client")?,
        ),
    };
    Ok(source)
}

fn build_transcoder(config: &ResolvedConfig) -> Arc<FfmpegTranscoder> {
    Arc::new(FfmpegTranscoder::new(&config.tools.ffmpeg, &config.tools.ffprobe))
}

/// Scheduler delivering to `delivery`. Takes the state file lock.
pub(crate) fn build_scheduler(
    config: &ResolvedConfig,
    delivery: Arc<dyn DeliveryChannel>,
) -> Result<Scheduler> {
    let fetcher = LocatorFetcher::new(
        HttpFetcher::new(),
        MagnetFetcher::new(&config.tools.aria2c, config.tools.connections),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(fetcher),
        build_transcoder(config),
        delivery,
        config.workspace(),
        config.profile.clone(),
    );

    let store = StateStore::open(&config.state_file)
        .with_context(|| format!("Failed to open state file {}", config.state_file.display()))?;
    info!(path = %store.path().display(), processed = store.len(), "Loaded state");

    Ok(Scheduler::new(
        build_source(config)?,
        store,
        orchestrator,
        config.scheduler,
    ))
}

pub(crate) fn build_on_demand(config: &ResolvedConfig) -> OnDemandHandler {
    OnDemandHandler::new(
        config.workspace(),
        build_transcoder(config),
        config.profile.clone(),
    )
    .with_progress_interval(config.progress_interval)
}

/// First Ctrl+C stops between items; a second aborts the item in flight
pub(crate) fn spawn_signal_handler(stop: CancellationToken, abort: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Stopping after the current item (Ctrl+C again to abort it)...");
        stop.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Aborting current item...");
            abort.cancel();
        }
    });
}

// ============================================================================
// Commands
// ============================================================================

/// Run the background loop without the chat surface
async fn watch(config: ResolvedConfig, once: bool) -> Result<()> {
    let telegram = Arc::new(TelegramClient::new(config.telegram()?));
    config
        .workspace()
        .ensure_roots()
        .await
        .context("Failed to create working directories")?;

    let mut scheduler = build_scheduler(&config, telegram)?;

    if once {
        let report = scheduler.run_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone(), scheduler.abort_token());
    scheduler.run(stop).await;
    Ok(())
}

/// Prints status lines to stdout
struct ConsoleReporter;

#[async_trait]
impl StatusReporter for ConsoleReporter {
    async fn report(&self, text: &str) {
        println!("{}", text);
    }
}

/// Copies the finished file into a directory
struct SaveToDir(PathBuf);

#[async_trait]
impl DeliveryChannel for SaveToDir {
    async fn deliver(&self, path: &Path) -> Result<(), DeliveryError> {
        let name = path.file_name().unwrap_or_default();
        let dest = self.0.join(name);
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|source| DeliveryError::Io {
                path: dest.clone(),
                source,
            })?;
        println!("Saved {}", dest.display());
        Ok(())
    }
}

/// Encode one local file through the on-demand path
async fn encode_local(
    config: ResolvedConfig,
    file: &Path,
    deliver: bool,
    output_dir: PathBuf,
) -> Result<()> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file: {}", file.display()))?;

    let delivery: Box<dyn DeliveryChannel> = if deliver {
        Box::new(TelegramClient::new(config.telegram()?))
    } else {
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        Box::new(SaveToDir(output_dir))
    };

    config
        .workspace()
        .ensure_roots()
        .await
        .context("Failed to create working directories")?;
    let handler = build_on_demand(&config);

    let registered = handler
        .intake(&name, InboundFile::Local(file.to_path_buf()))
        .await?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone(), cancel.clone());

    handler
        .encode(&registered, delivery.as_ref(), Arc::new(ConsoleReporter), &cancel)
        .await?;
    Ok(())
}

/// Show processed-release state without taking the writer lock
fn show_status(config: &ResolvedConfig, list: bool) -> Result<()> {
    let processed = StateStore::load(&config.state_file)
        .with_context(|| format!("Failed to read state file {}", config.state_file.display()))?;

    println!("State file: {}", config.state_file.display());
    println!("Processed:  {}", processed.len());

    if list {
        for locator in &processed {
            println!("  {}", locator);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_encode_command() {
        let cli = Cli::try_parse_from(["reelcast", "encode", "clip.mkv", "--deliver"]).unwrap();
        match cli.command {
            Commands::Encode {
                file,
                deliver,
                output_dir,
            } => {
                assert_eq!(file, PathBuf::from("clip.mkv"));
                assert!(deliver);
                assert_eq!(output_dir, PathBuf::from("."));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "reelcast", "watch", "--once", "--token", "abc", "--chat-id", "42",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Watch { once: true }));
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert_eq!(cli.chat_id.as_deref(), Some("42"));
    }
}
