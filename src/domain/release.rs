//! Release items produced by a release source.
//!
//! A release is identified by its locator (an HTTP URL or a magnet URI).
//! Only the locator is ever persisted, in the processed set.

use sha2::{Digest, Sha256};

/// A single release discovered in the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseItem {
    /// Human-readable title (may equal the locator for scraped feeds)
    pub title: String,

    /// Unique identity of the release; also the dedup key
    pub locator: String,
}

impl ReleaseItem {
    /// Create a new release item
    pub fn new(title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            locator: locator.into(),
        }
    }

    /// Classify the locator scheme
    pub fn kind(&self) -> Option<LocatorKind> {
        LocatorKind::of(&self.locator)
    }

    /// Stable work id for this release (first 12 hex chars of SHA-256 of the locator)
    pub fn work_id(&self) -> String {
        short_hash(self.locator.as_bytes())
    }
}

/// How a locator is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    /// Plain HTTP(S) download
    Http,

    /// Peer-to-peer magnet URI, handed to an external downloader
    Magnet,
}

impl LocatorKind {
    /// Detect the kind of a locator from its scheme
    pub fn of(locator: &str) -> Option<Self> {
        let lower = locator.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Some(Self::Http)
        } else if lower.starts_with("magnet:") {
            Some(Self::Magnet)
        } else {
            None
        }
    }
}

/// SHA-256 of `bytes`, hex encoded and truncated to 12 characters
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..12].to_string()
}
