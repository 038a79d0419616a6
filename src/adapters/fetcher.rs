//! Raw media retrieval.
//!
//! HTTP locators are streamed straight to disk. Magnet locators are handed
//! to an external downloader (aria2c by default) that writes into the
//! per-item download directory; since that directory belongs to a single
//! work item, whatever file appears there is the one this download made.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::{abort_tail, join_tail, spawn_tail_reader, wait_or_kill};
use super::Fetcher;
use crate::core::workspace::{cleanup, sanitize_filename};
use crate::domain::{LocatorKind, ReleaseItem};

/// Default external peer-to-peer downloader
pub const ARIA2C: &str = "aria2c";

/// Errors that can occur while fetching raw media
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloader exited with {status}: {stderr}")]
    Downloader { status: ExitStatus, stderr: String },

    #[error("Download produced no file in {0}")]
    NoOutput(PathBuf),

    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Streams HTTP bodies to disk chunk by chunk
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn download(
        &self,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let response = tokio::select! {
            response = self.client.get(url).send() => response?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let mut file = File::create(path).await.map_err(|e| FetchError::io(path, e))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await.map_err(|e| FetchError::io(path, e))?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(FetchError::Http(e)),
                None => break,
            }
        }

        file.flush().await.map_err(|e| FetchError::io(path, e))?;
        file.sync_all().await.map_err(|e| FetchError::io(path, e))?;

        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        item: &ReleaseItem,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let path = dest_dir.join(http_filename(item));
        debug!(url = %item.locator, path = %path.display(), "HTTP download starting");

        match self.download(&item.locator, &path, cancel).await {
            Ok(bytes) => {
                info!(path = %path.display(), bytes, "HTTP download complete");
                Ok(path)
            }
            Err(e) => {
                // Never leave a partial file behind
                cleanup(&path).await;
                Err(e)
            }
        }
    }
}

/// File name for an HTTP download: the release title plus the URL's
/// extension, or the URL's last path segment when the title is empty
pub fn http_filename(item: &ReleaseItem) -> String {
    let segment = url::Url::parse(&item.locator)
        .ok()
        .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_string)))
        .filter(|s| !s.is_empty());

    let extension = segment
        .as_deref()
        .and_then(|s| Path::new(s).extension())
        .map(|e| e.to_string_lossy().to_string());

    let title = item.title.trim();
    let name = if !title.is_empty() && title != item.locator {
        match extension {
            Some(ext) if !has_extension(title, &ext) => format!("{}.{}", title, ext),
            _ => title.to_string(),
        }
    } else {
        segment.unwrap_or_else(|| "download".to_string())
    };

    sanitize_filename(&name)
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

// ============================================================================
// Magnet (external downloader)
// ============================================================================

/// Hands magnet URIs to an external downloader process
pub struct MagnetFetcher {
    /// Downloader binary (default: aria2c)
    binary_path: String,

    /// Connection-count bound passed to the downloader (aria2c caps it at 16)
    connections: u32,
}

impl Default for MagnetFetcher {
    fn default() -> Self {
        Self::new(ARIA2C, 16)
    }
}

impl MagnetFetcher {
    pub fn new(binary_path: impl Into<String>, connections: u32) -> Self {
        Self {
            binary_path: binary_path.into(),
            connections: connections.clamp(1, 16),
        }
    }

    /// Downloader arguments for one magnet into `dest_dir`
    pub fn args(&self, locator: &str, dest_dir: &Path) -> Vec<String> {
        vec![
            format!("--dir={}", dest_dir.display()),
            format!("--max-connection-per-server={}", self.connections),
            format!("--split={}", self.connections),
            "--seed-time=0".to_string(),
            "--summary-interval=0".to_string(),
            "--console-log-level=warn".to_string(),
            locator.to_string(),
        ]
    }
}

#[async_trait]
impl Fetcher for MagnetFetcher {
    async fn fetch(
        &self,
        item: &ReleaseItem,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        debug!(dir = %dest_dir.display(), "Magnet download starting");

        let mut child = Command::new(&self.binary_path)
            .args(self.args(&item.locator, dest_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::Spawn {
                program: self.binary_path.clone(),
                source,
            })?;

        let stderr = child.stderr.take().map(|s| spawn_tail_reader(s, "downloader"));

        let status = wait_or_kill(&mut child, cancel)
            .await
            .map_err(|source| FetchError::Spawn {
                program: self.binary_path.clone(),
                source,
            })?;
        let Some(status) = status else {
            abort_tail(stderr);
            return Err(FetchError::Cancelled);
        };
        let stderr = join_tail(stderr).await;

        if !status.success() {
            return Err(FetchError::Downloader { status, stderr });
        }

        let path = resolve_download(dest_dir).await?;
        info!(path = %path.display(), "Magnet download complete");
        Ok(path)
    }
}

/// Find the media file a download produced inside its own directory.
///
/// The single regular file if there is one, otherwise the largest
/// (multi-file torrents put extras like NFOs or samples next to the
/// episode). Downloader control files are ignored.
pub async fn resolve_download(dir: &Path) -> Result<PathBuf, FetchError> {
    let mut best: Option<(u64, PathBuf)> = None;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current)
            .await
            .map_err(|e| FetchError::io(&current, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::io(&current, e))?
        {
            let path = entry.path();
            let meta = entry.metadata().await.map_err(|e| FetchError::io(&path, e))?;

            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let is_control = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("aria2") || e.eq_ignore_ascii_case("torrent"))
                .unwrap_or(false);
            if !meta.is_file() || is_control {
                continue;
            }

            if best.as_ref().map_or(true, |(size, _)| meta.len() > *size) {
                best = Some((meta.len(), path));
            }
        }
    }

    best.map(|(_, path)| path)
        .ok_or_else(|| FetchError::NoOutput(dir.to_path_buf()))
}

// ============================================================================
// Dispatch by scheme
// ============================================================================

/// Routes each locator to the fetcher for its scheme
pub struct LocatorFetcher {
    http: HttpFetcher,
    magnet: MagnetFetcher,
}

impl LocatorFetcher {
    pub fn new(http: HttpFetcher, magnet: MagnetFetcher) -> Self {
        Self { http, magnet }
    }
}

#[async_trait]
impl Fetcher for LocatorFetcher {
    async fn fetch(
        &self,
        item: &ReleaseItem,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        match item.kind() {
            Some(LocatorKind::Http) => self.http.fetch(item, dest_dir, cancel).await,
            Some(LocatorKind::Magnet) => self.magnet.fetch(item, dest_dir, cancel).await,
            None => Err(FetchError::UnsupportedLocator(item.locator.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;
    use tokio_test::assert_err;

    #[test]
    fn test_http_filename_uses_title_and_url_extension() {
        let item = ReleaseItem::new("Show - 01 (720p)", "https://cdn.example/x/abc.mkv?sig=1");
        assert_eq!(http_filename(&item), "Show - 01 (720p).mkv");
    }

    #[test]
    fn test_http_filename_does_not_double_extension() {
        let item = ReleaseItem::new("Show - 01.mkv", "https://cdn.example/abc.mkv");
        assert_eq!(http_filename(&item), "Show - 01.mkv");
    }

    #[test]
    fn test_http_filename_falls_back_to_segment() {
        let item = ReleaseItem::new("", "https://cdn.example/files/episode.mp4");
        assert_eq!(http_filename(&item), "episode.mp4");
    }

    #[test]
    fn test_magnet_args_bound_connections() {
        let fetcher = MagnetFetcher::new("aria2c", 8);
        let args = fetcher.args("magnet:?xt=urn:btih:abc", Path::new("/work/auto/abc"));

        assert!(args.contains(&"--dir=/work/auto/abc".to_string()));
        assert!(args.contains(&"--max-connection-per-server=8".to_string()));
        assert!(args.contains(&"--seed-time=0".to_string()));
        assert_eq!(args.last().unwrap(), "magnet:?xt=urn:btih:abc");
    }

    #[tokio::test]
    async fn test_http_fetch_streams_body_to_disk() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/ep01.mkv");
            then.status(200).body(vec![7u8; 64 * 1024]);
        });

        let temp = TempDir::new().unwrap();
        let item = ReleaseItem::new("Show - 01", server.url("/ep01.mkv"));
        let path = HttpFetcher::new()
            .fetch(&item, temp.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(path, temp.path().join("Show - 01.mkv"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64 * 1024);
    }

    #[tokio::test]
    async fn test_http_fetch_rejects_non_success() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/missing.mkv");
            then.status(404);
        });

        let temp = TempDir::new().unwrap();
        let item = ReleaseItem::new("Missing", server.url("/missing.mkv"));
        let err = HttpFetcher::new()
            .fetch(&item, temp.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert!(!temp.path().join("Missing.mkv").exists());
    }

    #[tokio::test]
    async fn test_unsupported_locator() {
        let temp = TempDir::new().unwrap();
        let fetcher = LocatorFetcher::new(HttpFetcher::new(), MagnetFetcher::default());
        let item = ReleaseItem::new("x", "ftp://example.org/x.mkv");

        assert_err!(
            fetcher
                .fetch(&item, temp.path(), &CancellationToken::new())
                .await
        );
    }

    #[tokio::test]
    async fn test_resolve_download_prefers_largest_media_file() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("Show - 01");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Show - 01.mkv"), vec![0u8; 4096]).unwrap();
        std::fs::write(nested.join("info.nfo"), b"nfo").unwrap();
        std::fs::write(temp.path().join("Show - 01.mkv.aria2"), vec![0u8; 8192]).unwrap();

        let path = resolve_download(temp.path()).await.unwrap();
        assert_eq!(path, nested.join("Show - 01.mkv"));
    }

    #[tokio::test]
    async fn test_resolve_download_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            resolve_download(temp.path()).await,
            Err(FetchError::NoOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_downloader_binary() {
        let temp = TempDir::new().unwrap();
        let fetcher = MagnetFetcher::new("/nonexistent/aria2c", 4);
        let item = ReleaseItem::new("x", "magnet:?xt=urn:btih:abc");

        let err = fetcher
            .fetch(&item, temp.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod downloader_process {
        use super::*;
        use crate::adapters::process::write_script;
        use std::time::{Duration, Instant};

        fn magnet() -> ReleaseItem {
            ReleaseItem::new("Show - 01", "magnet:?xt=urn:btih:abc")
        }

        #[tokio::test]
        async fn test_downloader_output_is_resolved() {
            let tools = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();
            let aria2c = write_script(
                tools.path(),
                "aria2c",
                "for a; do case \"$a\" in --dir=*) d=\"${a#--dir=}\";; esac; done\n\
                 printf episode > \"$d/Show - 01.mkv\"",
            );

            let path = MagnetFetcher::new(aria2c.to_string_lossy(), 4)
                .fetch(&magnet(), dest.path(), &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(path, dest.path().join("Show - 01.mkv"));
        }

        #[tokio::test]
        async fn test_downloader_failure_keeps_stderr_tail() {
            let tools = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();
            let aria2c = write_script(tools.path(), "aria2c", "echo 'no peers' >&2\nexit 3");

            let err = MagnetFetcher::new(aria2c.to_string_lossy(), 4)
                .fetch(&magnet(), dest.path(), &CancellationToken::new())
                .await
                .unwrap_err();

            match err {
                FetchError::Downloader { status, stderr } => {
                    assert_eq!(status.code(), Some(3));
                    assert_eq!(stderr, "no peers");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_cancel_stops_wrapped_downloader_promptly() {
            let tools = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();
            let aria2c = write_script(tools.path(), "aria2c", "sleep 10 &\nwait");
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });

            let started = Instant::now();
            let err = MagnetFetcher::new(aria2c.to_string_lossy(), 4)
                .fetch(&magnet(), dest.path(), &cancel)
                .await
                .unwrap_err();

            assert!(matches!(err, FetchError::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
