//! Adapter interfaces for external systems.
//!
//! Adapters wrap everything that leaves the process: the release feed,
//! HTTP and peer-to-peer downloads, the ffmpeg toolchain, and the Telegram
//! Bot API. The orchestrator and scheduler only see the traits below, so
//! tests can swap in fakes.

pub mod bot;
pub mod feed;
pub mod ffmpeg;
pub mod fetcher;
pub mod process;
pub mod telegram;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{EncodeProfile, ReleaseItem};

// Re-export the concrete adapters
pub use feed::{ApiReleaseSource, FeedError, ScrapeReleaseSource};
pub use ffmpeg::{EncodeError, FfmpegTranscoder};
pub use fetcher::{FetchError, HttpFetcher, LocatorFetcher, MagnetFetcher};
pub use telegram::{DeliveryError, TelegramClient, TelegramConfig};

/// Source of releases to process
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Current releases in feed order.
    ///
    /// Never fails: outages are logged and yield an empty list.
    async fn poll(&self) -> Vec<ReleaseItem>;
}

/// Retrieves raw media for a release
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `item` into `dest_dir` and return the produced file
    async fn fetch(
        &self,
        item: &ReleaseItem,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError>;
}

/// Re-encodes one file to the delivery profile
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encode `input` to `<output_stem>.<input extension>`
    async fn transcode(
        &self,
        input: &Path,
        output_stem: &Path,
        profile: &EncodeProfile,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EncodeError>;
}

/// Uploads a finished artifact
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, path: &Path) -> Result<(), DeliveryError>;
}

/// Short status messages back to whoever asked for the work
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, text: &str);
}

/// Receives encoder progress lines
pub trait ProgressSink: Send + Sync {
    fn progress(&self, line: &str);
}

/// Progress sink for the background path: lines only reach the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn progress(&self, line: &str) {
        tracing::trace!(%line, "encode progress");
    }
}

impl ProgressSink for mpsc::UnboundedSender<String> {
    fn progress(&self, line: &str) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_progress_sink_forwards_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tx.progress("frame=10");
        tx.progress("out_time=00:00:01.000000");

        assert_eq!(rx.try_recv().unwrap(), "frame=10");
        assert_eq!(rx.try_recv().unwrap(), "out_time=00:00:01.000000");
    }

    #[test]
    fn test_channel_progress_sink_tolerates_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(rx);
        tx.progress("frame=1");
    }
}
