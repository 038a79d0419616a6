//! Per-item pipeline execution.
//!
//! Drives one release through fetch, encode and delivery, advancing its
//! stage machine on each success. Any failure moves the item to Failed and
//! skips the remaining stages. Working directories are always released on
//! the way out, whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    DeliveryChannel, DeliveryError, EncodeError, FetchError, Fetcher, LogProgress, ProgressSink,
    Transcoder,
};
use crate::domain::{EncodeProfile, ReleaseItem, Stage, StageError, WorkItem};

use super::workspace::{WorkContext, WorkDirs, Workspace, WorkspaceError};

/// Why an item did not reach Delivered
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// A successfully delivered item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub work_id: String,
    pub stage: Stage,
}

/// Runs release items end to end
pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
    delivery: Arc<dyn DeliveryChannel>,
    workspace: Workspace,
    profile: EncodeProfile,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        transcoder: Arc<dyn Transcoder>,
        delivery: Arc<dyn DeliveryChannel>,
        workspace: Workspace,
        profile: EncodeProfile,
    ) -> Self {
        Self {
            fetcher,
            transcoder,
            delivery,
            workspace,
            profile,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Process one release. The caller decides what success means for
    /// dedup state; nothing here touches it.
    #[instrument(skip_all, fields(work_id = %item.work_id(), title = %item.title))]
    pub async fn process(
        &self,
        item: &ReleaseItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome, ItemError> {
        let mut work = WorkItem::new(item.work_id(), item.title.as_str());
        let dirs = self.workspace.dirs(WorkContext::Auto, &work.id);
        info!(locator = %item.locator, "Processing release");

        let result = self.run_stages(item, &mut work, &dirs, cancel).await;
        self.workspace.release(&dirs).await;

        match result {
            Ok(()) => {
                info!("Delivered");
                let stage = work.stage();
                Ok(ItemOutcome {
                    work_id: work.id,
                    stage,
                })
            }
            Err(e) => {
                let stage = work.stage();
                let _ = work.fail();
                warn!(%stage, error = %e, "Item failed");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        item: &ReleaseItem,
        work: &mut WorkItem,
        dirs: &WorkDirs,
        cancel: &CancellationToken,
    ) -> Result<(), ItemError> {
        self.workspace.prepare(WorkContext::Auto, &work.id).await?;

        let source = self.fetcher.fetch(item, &dirs.download, cancel).await?;
        info!(path = %source.display(), "Downloaded");
        work.source_path = Some(source.clone());
        work.advance(Stage::Downloaded)?;

        let output = encode_stage(
            self.transcoder.as_ref(),
            &self.profile,
            work,
            &source,
            &dirs.encoded,
            &LogProgress,
            cancel,
        )
        .await?;

        deliver_stage(self.delivery.as_ref(), work, &output).await
    }
}

/// Downloaded → Encoding → Encoded. Returns the encoded artifact.
pub async fn encode_stage(
    transcoder: &dyn Transcoder,
    profile: &EncodeProfile,
    work: &mut WorkItem,
    input: &Path,
    encoded_dir: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<PathBuf, ItemError> {
    work.advance(Stage::Encoding)?;

    let stem = input
        .file_stem()
        .map(|s| encoded_dir.join(s))
        .unwrap_or_else(|| encoded_dir.join("output"));
    let output = transcoder
        .transcode(input, &stem, profile, progress, cancel)
        .await?;

    debug!(output = %output.display(), "Encoded");
    work.output_path = Some(output.clone());
    work.advance(Stage::Encoded)?;
    Ok(output)
}

/// Encoded → Delivered
pub async fn deliver_stage(
    delivery: &dyn DeliveryChannel,
    work: &mut WorkItem,
    output: &Path,
) -> Result<(), ItemError> {
    delivery.deliver(output).await?;
    work.advance(Stage::Delivered)?;
    Ok(())
}
