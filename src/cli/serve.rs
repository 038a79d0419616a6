//! `reelcast serve`: background loop plus the chat bot.
//!
//! The scheduler runs on its own task. The foreground long-polls
//! `getUpdates` and hands each message to a fresh task, so a long encode
//! never blocks other commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::bot::{BotCommand, ENCODE_USAGE, GREETING};
use crate::adapters::telegram::{ChatReply, Message};
use crate::adapters::{StatusReporter, TelegramClient};
use crate::config::ResolvedConfig;
use crate::core::{InboundFile, OnDemandError, OnDemandHandler};

use super::{build_on_demand, build_scheduler, spawn_signal_handler};

/// Pause after a failed getUpdates call
const UPDATE_RETRY_DELAY: Duration = Duration::from_secs(5);

pub async fn run(config: ResolvedConfig) -> Result<()> {
    let telegram = Arc::new(TelegramClient::new(config.telegram()?));
    config
        .workspace()
        .ensure_roots()
        .await
        .context("Failed to create working directories")?;

    let mut scheduler = build_scheduler(&config, telegram.clone())?;
    let handler = Arc::new(build_on_demand(&config).with_telegram(telegram.clone()));

    let stop = CancellationToken::new();
    spawn_signal_handler(stop.clone(), scheduler.abort_token());

    let background = {
        let stop = stop.clone();
        tokio::spawn(async move { scheduler.run(stop).await })
    };

    info!("Bot is listening for commands");
    poll_updates(telegram, handler, config.poll_timeout_secs, stop).await;

    background.await.context("Scheduler task failed")?;
    Ok(())
}

/// Long-poll loop; returns once `stop` is cancelled
async fn poll_updates(
    client: Arc<TelegramClient>,
    handler: Arc<OnDemandHandler>,
    timeout_secs: u64,
    stop: CancellationToken,
) {
    let mut offset: Option<i64> = None;

    loop {
        let updates = tokio::select! {
            _ = stop.cancelled() => break,
            updates = client.get_updates(offset, timeout_secs) => updates,
        };

        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some(message) = update.message {
                        tokio::spawn(handle_message(client.clone(), handler.clone(), message));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch updates");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(UPDATE_RETRY_DELAY) => {}
                }
            }
        }
    }

    info!("Bot stopped");
}

/// Route one inbound message
async fn handle_message(client: Arc<TelegramClient>, handler: Arc<OnDemandHandler>, message: Message) {
    let reply = Arc::new(ChatReply::new(client, message.chat.id.to_string()));

    if let Some(file) = message.attachment() {
        let name = file
            .file_name
            .clone()
            .unwrap_or_else(|| format!("video_{}.mp4", message.message_id));

        reply.report(&format!("Downloading {}...", name)).await;
        let inbound = InboundFile::Telegram {
            file_id: file.file_id.clone(),
        };
        match handler.intake(&name, inbound).await {
            Ok(registered) => {
                reply
                    .report(&format!("{} ready.\nUse /encode {}", registered, registered))
                    .await
            }
            Err(e) => reply.report(&format!("Could not store {}: {}", name, e)).await,
        }
        return;
    }

    let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
        return;
    };
    debug!(chat_id = message.chat.id, ?command, "Command received");

    match command {
        BotCommand::Start | BotCommand::Help => reply.report(GREETING).await,
        BotCommand::EncodeUsage => reply.report(ENCODE_USAGE).await,
        BotCommand::Pending => {
            let names = handler.pending().await;
            if names.is_empty() {
                reply.report("No files waiting.").await;
            } else {
                reply.report(&format!("Waiting:\n{}", names.join("\n"))).await;
            }
        }
        BotCommand::Encode(name) => {
            let result = handler
                .encode(&name, reply.as_ref(), reply.clone(), &CancellationToken::new())
                .await;
            if let Err(e) = result {
                reply.report(&encode_failure_reply(&name, &e)).await;
            }
        }
        BotCommand::Unknown(cmd) => reply.report(&format!("Unknown command /{}", cmd)).await,
    }
}

/// Short message telling the requester why an encode did not complete
fn encode_failure_reply(name: &str, error: &OnDemandError) -> String {
    match error {
        OnDemandError::NotFound(_) => "File not found.".to_string(),
        e => format!("Encoding {} failed: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EncodeError;
    use crate::core::ItemError;

    #[test]
    fn test_encode_failure_reply() {
        assert_eq!(
            encode_failure_reply("a.mkv", &OnDemandError::NotFound("a.mkv".into())),
            "File not found."
        );

        let err = OnDemandError::Item(ItemError::Encode(EncodeError::Cancelled));
        assert_eq!(
            encode_failure_reply("a.mkv", &err),
            "Encoding a.mkv failed: Encode failed: Encode cancelled"
        );
    }
}
