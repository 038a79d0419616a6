//! Work items and their stage machine.
//!
//! A WorkItem tracks one release (or one on-demand upload) through
//! fetch, encode and delivery. It is owned by exactly one pipeline run.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Found in the feed (or uploaded), nothing on disk yet
    Discovered,

    /// Raw media is in working storage
    Downloaded,

    /// Encoder process is running
    Encoding,

    /// Encoded artifact is in working storage
    Encoded,

    /// Artifact reached the messaging endpoint (terminal)
    Delivered,

    /// Some stage failed (terminal)
    Failed,
}

impl Stage {
    /// Whether no further transitions are allowed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// The stage that follows on success, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Discovered => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Encoding),
            Self::Encoding => Some(Self::Encoded),
            Self::Encoded => Some(Self::Delivered),
            Self::Delivered | Self::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Downloaded => "downloaded",
            Self::Encoding => "encoding",
            Self::Encoded => "encoded",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Rejected stage transition
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid stage transition: {from} → {to}")]
pub struct StageError {
    pub from: Stage,
    pub to: Stage,
}

/// One release's journey through the pipeline
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Namespacing id for working paths (12 hex chars)
    pub id: String,

    /// Display label (release title or uploaded filename)
    pub label: String,

    /// Raw media path, once downloaded
    pub source_path: Option<PathBuf>,

    /// Encoded artifact path, once encoding has started
    pub output_path: Option<PathBuf>,

    stage: Stage,
}

impl WorkItem {
    /// Create a work item in the Discovered stage
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source_path: None,
            output_path: None,
            stage: Stage::Discovered,
        }
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to the next stage; only the forward edge is allowed
    pub fn advance(&mut self, to: Stage) -> Result<(), StageError> {
        if self.stage.next() != Some(to) {
            return Err(StageError {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    /// Mark as failed from any non-terminal stage
    pub fn fail(&mut self) -> Result<(), StageError> {
        if self.stage.is_terminal() {
            return Err(StageError {
                from: self.stage,
                to: Stage::Failed,
            });
        }
        self.stage = Stage::Failed;
        Ok(())
    }
}
