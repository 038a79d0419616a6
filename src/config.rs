//! Configuration for reelcast.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags and environment variables (TELEGRAM_TOKEN, CHAT_ID)
//! 2. Config file (.reelcast/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - An explicit `--config` path wins
//! - Otherwise the current directory and its parents are searched for
//!   .reelcast/config.yaml
//! - Relative paths in the file resolve against the directory holding
//!   .reelcast/; without a file they resolve against the working directory

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::telegram::{TelegramConfig, DEFAULT_API_BASE};
use crate::core::{SchedulerConfig, Workspace};
use crate::domain::EncodeProfile;

pub const CONFIG_DIR: &str = ".reelcast";
pub const CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_FEED_URL: &str = "https://subsplease.org/api/?f=latest&tz=UTC";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub version: Option<String>,
    pub feed: FeedSection,
    pub schedule: ScheduleSection,
    pub paths: PathsSection,
    pub tools: ToolsSection,
    pub encode: EncodeProfile,
    pub telegram: TelegramSection,
}

/// Which release source implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Api,
    Scrape,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api => write!(f, "api"),
            Self::Scrape => write!(f, "scrape"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub kind: FeedKind,
    pub url: String,
    /// Link prefix the scrape source keeps
    pub scheme_prefix: String,
    pub timeout_seconds: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            kind: FeedKind::Api,
            url: DEFAULT_FEED_URL.to_string(),
            scheme_prefix: "magnet:".to_string(),
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub poll_interval_seconds: u64,
    pub retry_interval_seconds: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 3600,
            retry_interval_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub downloads: String,
    pub encoded: String,
    pub state_file: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            downloads: "downloads".to_string(),
            encoded: "encoded".to_string(),
            state_file: "downloaded.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub aria2c: String,
    /// Connections per server for peer-to-peer downloads
    pub connections: u32,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            aria2c: "aria2c".to_string(),
            connections: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    /// Minimum spacing of relayed progress messages
    pub progress_interval_seconds: u64,
    /// Long-poll timeout for getUpdates
    pub poll_timeout_seconds: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
            progress_interval_seconds: 5,
            poll_timeout_seconds: 30,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub feed_kind: FeedKind,
    pub feed_url: String,
    pub scheme_prefix: String,
    pub feed_timeout: Duration,
    pub scheduler: SchedulerConfig,
    pub download_dir: PathBuf,
    pub encoded_dir: PathBuf,
    pub state_file: PathBuf,
    pub tools: ToolsSection,
    pub profile: EncodeProfile,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    pub progress_interval: Duration,
    pub poll_timeout_secs: u64,
}

impl ResolvedConfig {
    /// Resolve from an explicit file, or discover one from the working
    /// directory upwards
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine working directory")?;

        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(&cwd),
        };

        match config_file {
            Some(path) => {
                let file = load_config_file(&path)?;
                // Base directory is the parent of .reelcast/ (i.e., grandparent of config.yaml)
                let base_dir = path
                    .parent()
                    .and_then(|p| p.parent())
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| cwd.clone());
                Ok(Self::resolve(file, &base_dir, Some(path)))
            }
            None => Ok(Self::resolve(ConfigFile::default(), &cwd, None)),
        }
    }

    /// Resolve a parsed file against a base directory
    pub fn resolve(file: ConfigFile, base_dir: &Path, config_file: Option<PathBuf>) -> Self {
        Self {
            config_file,
            feed_kind: file.feed.kind,
            feed_url: file.feed.url,
            scheme_prefix: file.feed.scheme_prefix,
            feed_timeout: Duration::from_secs(file.feed.timeout_seconds),
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_secs(file.schedule.poll_interval_seconds),
                retry_interval: Duration::from_secs(file.schedule.retry_interval_seconds),
            },
            download_dir: resolve_path(base_dir, &file.paths.downloads),
            encoded_dir: resolve_path(base_dir, &file.paths.encoded),
            state_file: resolve_path(base_dir, &file.paths.state_file),
            tools: file.tools,
            profile: file.encode,
            bot_token: file.telegram.bot_token.filter(|t| !t.is_empty()),
            chat_id: file.telegram.chat_id.filter(|c| !c.is_empty()),
            api_base: file.telegram.api_base,
            progress_interval: Duration::from_secs(file.telegram.progress_interval_seconds),
            poll_timeout_secs: file.telegram.poll_timeout_seconds,
        }
    }

    /// Apply credentials from flags or the environment over the file's
    pub fn with_credentials(mut self, bot_token: Option<String>, chat_id: Option<String>) -> Self {
        if let Some(token) = bot_token.filter(|t| !t.is_empty()) {
            self.bot_token = Some(token);
        }
        if let Some(chat) = chat_id.filter(|c| !c.is_empty()) {
            self.chat_id = Some(chat);
        }
        self
    }

    /// Telegram settings; both credentials are required
    pub fn telegram(&self) -> Result<TelegramConfig> {
        let bot_token = self
            .bot_token
            .clone()
            .context("Telegram bot token missing (set TELEGRAM_TOKEN or --token)")?;
        let chat_id = self
            .chat_id
            .clone()
            .context("Telegram chat id missing (set CHAT_ID or --chat-id)")?;

        Ok(TelegramConfig {
            bot_token,
            chat_id,
            api_base: self.api_base.clone(),
        })
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.download_dir, &self.encoded_dir)
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string());
        let token = match &self.bot_token {
            Some(_) => "<redacted>",
            None => "<unset>",
        };

        writeln!(f, "Config file:     {}", source)?;
        writeln!(f, "Feed:            {} {}", self.feed_kind, self.feed_url)?;
        writeln!(f, "Poll interval:   {}s", self.scheduler.poll_interval.as_secs())?;
        writeln!(f, "Retry interval:  {}s", self.scheduler.retry_interval.as_secs())?;
        writeln!(f, "Downloads:       {}", self.download_dir.display())?;
        writeln!(f, "Encoded:         {}", self.encoded_dir.display())?;
        writeln!(f, "State file:      {}", self.state_file.display())?;
        writeln!(
            f,
            "Encode profile:  {}p {} preset={} crf={} audio={}",
            self.profile.height,
            self.profile.video_codec,
            self.profile.preset,
            self.profile.crf,
            self.profile.audio_bitrate
        )?;
        writeln!(f, "Bot token:       {}", token)?;
        write!(
            f,
            "Chat id:         {}",
            self.chat_id.as_deref().unwrap_or("<unset>")
        )
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = ResolvedConfig::resolve(ConfigFile::default(), Path::new("/srv/reelcast"), None);

        assert_eq!(config.feed_kind, FeedKind::Api);
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.feed_timeout, Duration::from_secs(15));
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.download_dir, PathBuf::from("/srv/reelcast/downloads"));
        assert_eq!(config.encoded_dir, PathBuf::from("/srv/reelcast/encoded"));
        assert_eq!(config.state_file, PathBuf::from("/srv/reelcast/downloaded.json"));
        assert_eq!(config.tools.connections, 16);
        assert_eq!(config.profile, EncodeProfile::default());
        assert_eq!(config.progress_interval, Duration::from_secs(5));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join(CONFIG_FILE);
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
feed:
  kind: scrape
  url: https://tracker.example/latest
schedule:
  poll_interval_seconds: 900
paths:
  state_file: state/processed.json
  encoded: /var/media/encoded
encode:
  height: 480
telegram:
  chat_id: "-100123"
"#
        )
        .unwrap();

        let config = ResolvedConfig::load(Some(&config_path)).unwrap();

        assert_eq!(config.config_file.as_deref(), Some(config_path.as_path()));
        assert_eq!(config.feed_kind, FeedKind::Scrape);
        assert_eq!(config.feed_url, "https://tracker.example/latest");
        assert_eq!(config.scheme_prefix, "magnet:");
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(900));
        assert_eq!(config.scheduler.retry_interval, Duration::from_secs(600));
        assert_eq!(config.state_file, temp.path().join("state/processed.json"));
        assert_eq!(config.download_dir, temp.path().join("downloads"));
        assert_eq!(config.encoded_dir, PathBuf::from("/var/media/encoded"));
        assert_eq!(config.profile.height, 480);
        assert_eq!(config.profile.crf, 23);
        assert_eq!(config.chat_id.as_deref(), Some("-100123"));
        assert!(config.bot_token.is_none());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), "version: \"1.0\"\n").unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(dir.join(CONFIG_FILE)));
    }

    #[test]
    fn test_credentials_override_file() {
        let mut file = ConfigFile::default();
        file.telegram.bot_token = Some("from-file".to_string());
        file.telegram.chat_id = Some("1".to_string());

        let config = ResolvedConfig::resolve(file, Path::new("/tmp"), None)
            .with_credentials(Some("from-env".to_string()), None);

        let telegram = config.telegram().unwrap();
        assert_eq!(telegram.bot_token, "from-env");
        assert_eq!(telegram.chat_id, "1");
        assert_eq!(telegram.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        let config = ResolvedConfig::resolve(ConfigFile::default(), Path::new("/tmp"), None)
            .with_credentials(Some(String::new()), None);
        assert!(config.telegram().is_err());
    }

    #[test]
    fn test_display_redacts_token() {
        let config = ResolvedConfig::resolve(ConfigFile::default(), Path::new("/tmp"), None)
            .with_credentials(Some("123:SECRET".to_string()), Some("42".to_string()));

        let shown = config.to_string();
        assert!(!shown.contains("SECRET"));
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains("42"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
