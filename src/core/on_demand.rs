//! On-demand encodes of user-supplied files.
//!
//! A file is first taken in and registered under its name; a later
//! `encode` request by that name transcodes it, relays progress to the
//! requester, delivers the result and releases both working paths.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DeliveryChannel, DeliveryError, StatusReporter, TelegramClient, Transcoder};
use crate::domain::{short_hash, EncodeProfile, Stage, WorkItem};

use super::orchestrator::{deliver_stage, encode_stage, ItemError};
use super::workspace::{sanitize_filename, WorkContext, Workspace, WorkspaceError};

/// Default spacing between relayed progress messages
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OnDemandError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Could not store {path}: {source}")]
    Intake {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Telegram file downloads are not configured")]
    NoDownloader,

    #[error("Download failed: {0}")]
    Download(#[source] DeliveryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Item(#[from] ItemError),
}

/// Where an inbound file comes from
#[derive(Debug, Clone)]
pub enum InboundFile {
    /// A file on the local filesystem, copied in
    Local(PathBuf),
    /// A chat upload, fetched through the Bot API
    Telegram { file_id: String },
}

/// A stored upload waiting for an encode request
#[derive(Debug, Clone)]
pub struct PendingEncode {
    pub request_id: Uuid,
    pub work_id: String,
    pub path: PathBuf,
    pub registered_at: DateTime<Utc>,
}

/// Filename → pending upload, shared across command tasks
#[derive(Debug, Default)]
pub struct PendingEncodeRegistry {
    entries: Mutex<HashMap<String, PendingEncode>>,
}

impl PendingEncodeRegistry {
    /// Register an upload, returning the entry it replaced
    pub async fn register(&self, name: String, entry: PendingEncode) -> Option<PendingEncode> {
        self.entries.lock().await.insert(name, entry)
    }

    /// Remove and return an entry
    pub async fn take(&self, name: &str) -> Option<PendingEncode> {
        self.entries.lock().await.remove(name)
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Serves intake and encode requests
pub struct OnDemandHandler {
    registry: PendingEncodeRegistry,
    workspace: Workspace,
    transcoder: Arc<dyn Transcoder>,
    profile: EncodeProfile,
    telegram: Option<Arc<TelegramClient>>,
    progress_interval: Duration,
}

impl OnDemandHandler {
    pub fn new(workspace: Workspace, transcoder: Arc<dyn Transcoder>, profile: EncodeProfile) -> Self {
        Self {
            registry: PendingEncodeRegistry::default(),
            workspace,
            transcoder,
            profile,
            telegram: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Enable `InboundFile::Telegram` intake
    pub fn with_telegram(mut self, client: Arc<TelegramClient>) -> Self {
        self.telegram = Some(client);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Store an inbound file and register it for a later encode.
    ///
    /// Returns the registered name (the sanitized filename). Registering a
    /// name again replaces the earlier upload and deletes its file.
    #[instrument(skip(self, source))]
    pub async fn intake(&self, filename: &str, source: InboundFile) -> Result<String, OnDemandError> {
        let name = sanitize_filename(filename);
        let request_id = Uuid::new_v4();
        let work_id = short_hash(request_id.as_bytes());

        let dirs = self.workspace.prepare(WorkContext::Manual, &work_id).await?;
        let dest = dirs.download.join(&name);

        let stored = match source {
            InboundFile::Local(path) => tokio::fs::copy(&path, &dest)
                .await
                .map(|_| ())
                .map_err(|source| OnDemandError::Intake { path, source }),
            InboundFile::Telegram { file_id } => match &self.telegram {
                Some(client) => client
                    .download_file(&file_id, &dest)
                    .await
                    .map(|_| ())
                    .map_err(OnDemandError::Download),
                None => Err(OnDemandError::NoDownloader),
            },
        };

        if let Err(e) = stored {
            self.workspace.release(&dirs).await;
            return Err(e);
        }

        let entry = PendingEncode {
            request_id,
            work_id: work_id.clone(),
            path: dest,
            registered_at: Utc::now(),
        };
        if let Some(previous) = self.registry.register(name.clone(), entry).await {
            info!(%name, previous = %previous.work_id, "Replacing pending upload");
            self.workspace
                .release(&self.workspace.dirs(WorkContext::Manual, &previous.work_id))
                .await;
        }

        info!(%name, %work_id, "Upload ready for encoding");
        Ok(name)
    }

    /// Encode a registered file and deliver it to the requester.
    ///
    /// The entry is consumed whatever the outcome; a failed encode needs a
    /// fresh upload.
    #[instrument(skip(self, delivery, reporter, cancel))]
    pub async fn encode(
        &self,
        filename: &str,
        delivery: &dyn DeliveryChannel,
        reporter: Arc<dyn StatusReporter>,
        cancel: &CancellationToken,
    ) -> Result<(), OnDemandError> {
        let name = sanitize_filename(filename);
        let entry = self
            .registry
            .take(&name)
            .await
            .ok_or_else(|| OnDemandError::NotFound(filename.to_string()))?;

        let dirs = self.workspace.dirs(WorkContext::Manual, &entry.work_id);
        let mut work = WorkItem::new(entry.work_id.as_str(), name.as_str());
        work.source_path = Some(entry.path.clone());

        info!(
            %name,
            request_id = %entry.request_id,
            waited_secs = (Utc::now() - entry.registered_at).num_seconds(),
            "Encoding upload"
        );
        reporter.report(&format!("Encoding {}...", name)).await;

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let relay = tokio::spawn(relay_progress(rx, reporter.clone(), self.progress_interval));

        let encoded = match work.advance(Stage::Downloaded) {
            Ok(()) => {
                encode_stage(
                    self.transcoder.as_ref(),
                    &self.profile,
                    &mut work,
                    &entry.path,
                    &dirs.encoded,
                    &tx,
                    cancel,
                )
                .await
            }
            Err(e) => Err(e.into()),
        };

        // Flush the last progress line before anything else is sent
        drop(tx);
        if let Err(e) = relay.await {
            warn!(error = %e, "Progress relay task failed");
        }

        let result = match encoded {
            Ok(output) => deliver_stage(delivery, &mut work, &output).await,
            Err(e) => Err(e),
        };
        self.workspace.release(&dirs).await;

        match result {
            Ok(()) => {
                reporter.report(&format!("Done {}", name)).await;
                Ok(())
            }
            Err(e) => {
                let _ = work.fail();
                warn!(%name, error = %e, "On-demand encode failed");
                Err(e.into())
            }
        }
    }

    /// Names waiting for an encode request
    pub async fn pending(&self) -> Vec<String> {
        self.registry.names().await
    }
}

/// Forward progress lines to the requester, at most one per `interval`.
///
/// The newest line held back by the rate limit is sent once the channel
/// closes, so the requester always sees the final state.
async fn relay_progress(
    mut rx: mpsc::UnboundedReceiver<String>,
    reporter: Arc<dyn StatusReporter>,
    interval: Duration,
) {
    let mut last_sent: Option<Instant> = None;
    let mut held: Option<String> = None;

    while let Some(line) = rx.recv().await {
        if last_sent.map_or(true, |at| at.elapsed() >= interval) {
            reporter.report(&format!("Progress: {}", line)).await;
            last_sent = Some(Instant::now());
            held = None;
        } else {
            held = Some(line);
        }
    }

    if let Some(line) = held {
        reporter.report(&format!("Progress: {}", line)).await;
    }
}
