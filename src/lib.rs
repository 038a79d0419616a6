//! reelcast - release feed to Telegram encoding pipeline
//!
//! Polls a release feed, fetches each new release over HTTP or a magnet
//! link, re-encodes it to a fixed delivery profile with ffmpeg and uploads
//! the result to a Telegram chat. Users can also send files to the bot and
//! ask for them to be encoded on demand.
//!
//! # Architecture
//!
//! - Delivered locators are recorded in a JSON state file, so each release
//!   is processed exactly once across restarts
//! - Each item moves through a stage machine; a failure at any stage skips
//!   the rest and cleans the item's working directories
//! - Background and on-demand work use separate, id-namespaced paths
//!
//! # Modules
//!
//! - `adapters`: External systems (feed, downloaders, ffmpeg, Telegram)
//! - `core`: State store, workspace, orchestrator, scheduler, on-demand
//! - `domain`: Data structures (ReleaseItem, WorkItem, EncodeProfile)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Background loop plus chat bot
//! TELEGRAM_TOKEN=... CHAT_ID=... reelcast serve
//!
//! # One polling cycle
//! reelcast watch --once
//!
//! # Encode a local file
//! reelcast encode episode.mkv -o out/
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{OnDemandHandler, Orchestrator, Scheduler, StateStore};
pub use domain::{EncodeProfile, ReleaseItem, Stage, WorkItem};

// Telegram integration
pub use adapters::{TelegramClient, TelegramConfig};
