//! The chat delivery interface.

use crate::error::Result;
use async_trait::async_trait;

/// Formatting applied to a message or caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Telegram's legacy `Markdown` mode.
    #[default]
    Markdown,
    /// No formatting; text is shown verbatim.
    Plain,
}

impl ParseMode {
    /// Returns the `parse_mode` value the Bot API expects, if any.
    #[must_use]
    pub const fn as_api_str(self) -> Option<&'static str> {
        match self {
            Self::Markdown => Some("Markdown"),
            Self::Plain => None,
        }
    }
}

/// Operations needed to deliver a forwarded message to a chat.
///
/// Implementations report rejections through [`crate::Error`] so callers can
/// distinguish formatting problems and image rejections from other failures.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Sends a text message.
    async fn send_text(&self, chat_id: &str, text: &str, mode: ParseMode) -> Result<()>;

    /// Uploads a file as a document. `mode` applies to the caption.
    async fn send_document(
        &self,
        chat_id: &str,
        data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<()>;

    /// Uploads an image as a photo. `mode` applies to the caption.
    async fn send_photo(
        &self,
        chat_id: &str,
        data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_api_str() {
        assert_eq!(ParseMode::Markdown.as_api_str(), Some("Markdown"));
        assert_eq!(ParseMode::Plain.as_api_str(), None);
        assert_eq!(ParseMode::default(), ParseMode::Markdown);
    }
}
