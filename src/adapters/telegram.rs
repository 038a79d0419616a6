//! Telegram Bot API adapter.
//!
//! Delivers encoded files to the configured chat with a streamed multipart
//! `sendDocument`, and carries the small slice of the Bot API the command
//! surface needs: text replies, long-polled updates, and file downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{DeliveryChannel, StatusReporter};
use crate::core::workspace::cleanup;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Retries for rate-limited JSON calls
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// `sendMessage` text limit in characters
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Errors talking to the Bot API
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram {method} returned {status}: {body}")]
    Status {
        method: String,
        status: StatusCode,
        body: String,
    },

    #[error("Telegram {method} rejected: {description}")]
    Api { method: String, description: String },

    #[error("Telegram {method} rate limited, retry after {retry_after:?}")]
    RateLimited { method: String, retry_after: Duration },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration for the Telegram client
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Delivery chat for background releases
    pub chat_id: String,
    /// Bot API base, overridable for a self-hosted server
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Bot API envelope
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

/// One entry from `getUpdates`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub document: Option<FileRef>,
    pub video: Option<FileRef>,
}

impl Message {
    /// Uploaded media, preferring a document over a video
    pub fn attachment(&self) -> Option<&FileRef> {
        self.document.as_ref().or(self.video.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Reference to a file stored on Telegram's side
#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// Telegram Bot API client
pub struct TelegramClient {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Chat that receives background deliveries
    pub fn chat_id(&self) -> &str {
        &self.config.chat_id
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            file_path
        )
    }

    /// Decode the envelope, mapping every failure shape to an error
    async fn read_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, DeliveryError> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: TelegramResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => {
                return Err(DeliveryError::Status {
                    method: method.to_string(),
                    status,
                    body,
                })
            }
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = envelope
                .parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(1));
            return Err(DeliveryError::RateLimited {
                method: method.to_string(),
                retry_after,
            });
        }

        match envelope {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } if status.is_success() => Ok(result),
            envelope => Err(DeliveryError::Api {
                method: method.to_string(),
                description: envelope
                    .description
                    .unwrap_or_else(|| format!("status {}", status)),
            }),
        }
    }

    /// JSON call with rate-limit handling
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T, DeliveryError> {
        let url = self.api_url(method);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let response = self.client.post(&url).json(payload).send().await?;

            match Self::read_response(method, response).await {
                Err(DeliveryError::RateLimited { retry_after, .. })
                    if attempts < MAX_RATE_LIMIT_RETRIES =>
                {
                    debug!(
                        method,
                        ?retry_after,
                        attempt = attempts,
                        "Telegram rate limited, waiting"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                other => return other,
            }
        }
    }

    /// Send a text message, returning its id
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, DeliveryError> {
        let payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        let result: MessageResult = self.call("sendMessage", &payload).await?;
        Ok(result.message_id)
    }

    /// Upload a file as a document, streaming it from disk
    pub async fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, DeliveryError> {
        let io_err = |source| DeliveryError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let length = file.metadata().await.map_err(io_err)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        debug!(file = %file_name, bytes = length, chat_id, "Uploading document");
        let response = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        let result: MessageResult = Self::read_response("sendDocument", response).await?;
        Ok(result.message_id)
    }

    /// Long-poll for new updates after `offset`
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &payload).await
    }

    /// Resolve a file id to its download path on the API server
    pub async fn get_file(&self, file_id: &str) -> Result<String, DeliveryError> {
        let info: FileInfo = self.call("getFile", &json!({ "file_id": file_id })).await?;
        info.file_path.ok_or_else(|| DeliveryError::Api {
            method: "getFile".to_string(),
            description: "file is not downloadable".to_string(),
        })
    }

    /// Download a file by id to `dest`, returning the byte count
    pub async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, DeliveryError> {
        let file_path = self.get_file(file_id).await?;
        let response = self.client.get(self.file_url(&file_path)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                method: "file".to_string(),
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        match write_stream(response, dest).await {
            Ok(written) => Ok(written),
            Err(e) => {
                cleanup(dest).await;
                Err(e)
            }
        }
    }
}

async fn write_stream(response: reqwest::Response, dest: &Path) -> Result<u64, DeliveryError> {
    let io_err = |source| DeliveryError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;

    Ok(written)
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn deliver(&self, path: &Path) -> Result<(), DeliveryError> {
        self.send_document(&self.config.chat_id, path, None).await?;
        Ok(())
    }
}

/// Replies to the chat a request came from
#[derive(Clone)]
pub struct ChatReply {
    client: Arc<TelegramClient>,
    chat_id: String,
}

impl ChatReply {
    pub fn new(client: Arc<TelegramClient>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for ChatReply {
    async fn deliver(&self, path: &Path) -> Result<(), DeliveryError> {
        self.client.send_document(&self.chat_id, path, None).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for ChatReply {
    async fn report(&self, text: &str) {
        if let Err(e) = self.client.send_message(&self.chat_id, text).await {
            warn!(chat_id = %self.chat_id, error = %e, "Failed to send status reply");
        }
    }
}

/// Truncate a message to fit within the Telegram character limit
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
