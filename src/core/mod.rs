//! Core pipeline logic.
//!
//! This module contains:
//! - StateStore: durable set of processed locators
//! - Workspace: per-item working directories
//! - Orchestrator: one item through fetch, encode and delivery
//! - Scheduler: the background polling loop
//! - OnDemandHandler: user-requested encodes

pub mod on_demand;
pub mod orchestrator;
pub mod scheduler;
pub mod state_store;
pub mod workspace;

// Re-export commonly used types
pub use on_demand::{InboundFile, OnDemandError, OnDemandHandler, PendingEncodeRegistry};
pub use orchestrator::{ItemError, ItemOutcome, Orchestrator};
pub use scheduler::{CycleReport, Scheduler, SchedulerConfig};
pub use state_store::{StateStore, StateStoreError};
pub use workspace::{cleanup, sanitize_filename, WorkContext, WorkDirs, Workspace, WorkspaceError};
