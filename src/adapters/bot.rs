//! Chat command parsing.

/// Reply to `/start` and `/help`
pub const GREETING: &str = "I fetch new releases automatically and also encode the videos you send.\n\
Send a video, then use /encode <filename>.";

pub const ENCODE_USAGE: &str = "Usage: /encode <filename>";

/// A command recognised in a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    /// Encode a previously uploaded file
    Encode(String),
    /// `/encode` without a filename
    EncodeUsage,
    /// List uploaded files waiting for `/encode`
    Pending,
    Unknown(String),
}

impl BotCommand {
    /// Parse a message. Returns `None` for text that is not a command.
    ///
    /// Accepts the `/cmd@botname` form used in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (head, arg) = match rest.split_once(char::is_whitespace) {
            Some((head, arg)) => (head, arg.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "pending" => Self::Pending,
            "encode" if arg.is_empty() => Self::EncodeUsage,
            "encode" => Self::Encode(arg.to_string()),
            _ => Self::Unknown(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/help"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/pending"), Some(BotCommand::Pending));
        assert_eq!(BotCommand::parse("hello there"), None);
    }

    #[test]
    fn test_encode_keeps_filename_with_spaces() {
        assert_eq!(
            BotCommand::parse("/encode  Show A - 01.mkv "),
            Some(BotCommand::Encode("Show A - 01.mkv".to_string()))
        );
    }

    #[test]
    fn test_encode_without_argument_is_usage() {
        assert_eq!(BotCommand::parse("/encode"), Some(BotCommand::EncodeUsage));
        assert_eq!(BotCommand::parse("/encode   "), Some(BotCommand::EncodeUsage));
    }

    #[test]
    fn test_group_chat_mention() {
        assert_eq!(
            BotCommand::parse("/Encode@reelcast_bot clip.mp4"),
            Some(BotCommand::Encode("clip.mp4".to_string()))
        );
        assert_eq!(
            BotCommand::parse("/frobnicate"),
            Some(BotCommand::Unknown("frobnicate".to_string()))
        );
    }
}
