//! Release feed adapters.
//!
//! Two transports, one contract: the structured source reads a JSON
//! endpoint, the scrape source pulls links with a known scheme out of an
//! HTML page. Both swallow their own failures so the scheduler keeps
//! running through feed outages.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::ReleaseSource;
use crate::domain::ReleaseItem;

/// Discovery failures; logged, never propagated past `poll`
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed returned status {0}")]
    Status(StatusCode),

    #[error("Failed to parse feed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Build the HTTP client used for discovery
fn discovery_client(timeout: Duration) -> Result<reqwest::Client, FeedError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?)
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FeedError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Status(status));
    }
    Ok(response.text().await?)
}

// ============================================================================
// Structured (JSON API) source
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    data: Vec<FeedRecord>,
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    release_title: Option<String>,
    link: Option<String>,
}

/// Release source backed by a JSON endpoint returning
/// `{"data": [{"release_title": ..., "link": ...}]}`
pub struct ApiReleaseSource {
    url: String,
    client: reqwest::Client,
}

impl ApiReleaseSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        Ok(Self {
            url: url.into(),
            client: discovery_client(timeout)?,
        })
    }

    /// Map a feed body to release items, in feed order
    pub fn parse(body: &str) -> Result<Vec<ReleaseItem>, FeedError> {
        let response: FeedResponse = serde_json::from_str(body)?;

        Ok(response
            .data
            .into_iter()
            .filter_map(|record| match (record.release_title, record.link) {
                (Some(title), Some(link)) if !link.trim().is_empty() => {
                    Some(ReleaseItem::new(title, link.trim()))
                }
                _ => {
                    debug!("Skipping feed record without title or link");
                    None
                }
            })
            .collect())
    }

    async fn fetch(&self) -> Result<Vec<ReleaseItem>, FeedError> {
        let body = get_text(&self.client, &self.url).await?;
        Self::parse(&body)
    }
}

#[async_trait]
impl ReleaseSource for ApiReleaseSource {
    fn name(&self) -> &str {
        "api"
    }

    async fn poll(&self) -> Vec<ReleaseItem> {
        match self.fetch().await {
            Ok(items) => items,
            Err(e) => {
                warn!(source = "api", url = %self.url, error = %e, "Release discovery failed");
                Vec::new()
            }
        }
    }
}

// ============================================================================
// Scrape (HTML) source
// ============================================================================

static HREF_RE: OnceLock<Regex> = OnceLock::new();

fn href_re() -> &'static Regex {
    HREF_RE.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap())
}

/// Release source that scrapes anchors with a given scheme from a page
pub struct ScrapeReleaseSource {
    url: String,
    scheme_prefix: String,
    client: reqwest::Client,
}

impl ScrapeReleaseSource {
    pub fn new(
        url: impl Into<String>,
        scheme_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            url: url.into(),
            scheme_prefix: scheme_prefix.into(),
            client: discovery_client(timeout)?,
        })
    }

    /// Extract every matching link, deduplicated, in page order
    pub fn extract(html: &str, scheme_prefix: &str) -> Vec<ReleaseItem> {
        let prefix = scheme_prefix.to_ascii_lowercase();
        let mut seen = HashSet::new();

        href_re()
            .captures_iter(html)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| unescape_html(m.as_str().trim()))
            .filter(|link| link.to_ascii_lowercase().starts_with(&prefix))
            .filter(|link| seen.insert(link.clone()))
            .map(|link| {
                let title = display_name(&link).unwrap_or_else(|| link.clone());
                ReleaseItem::new(title, link)
            })
            .collect()
    }

    async fn fetch(&self) -> Result<Vec<ReleaseItem>, FeedError> {
        let body = get_text(&self.client, &self.url).await?;
        Ok(Self::extract(&body, &self.scheme_prefix))
    }
}

#[async_trait]
impl ReleaseSource for ScrapeReleaseSource {
    fn name(&self) -> &str {
        "scrape"
    }

    async fn poll(&self) -> Vec<ReleaseItem> {
        match self.fetch().await {
            Ok(items) => items,
            Err(e) => {
                warn!(source = "scrape", url = %self.url, error = %e, "Release discovery failed");
                Vec::new()
            }
        }
    }
}

/// Undo the entity escaping HTML applies inside attribute values
fn unescape_html(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// The `dn=` display name of a magnet URI, if present
fn display_name(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}
