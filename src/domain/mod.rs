//! Domain types for the reelcast pipeline.
//!
//! This module contains the core data structures:
//! - ReleaseItem: A discovered release and its locator
//! - WorkItem: One item's journey through the pipeline
//! - EncodeProfile / AudioStreamPlan: Encode decisions

pub mod profile;
pub mod release;
pub mod work_item;

// Re-export commonly used types
pub use profile::{plan_audio_streams, AudioStreamPlan, EncodeProfile, ProbedStream};
pub use release::{short_hash, LocatorKind, ReleaseItem};
pub use work_item::{Stage, StageError, WorkItem};
