//! Turning raw mail into chat-ready content.
//!
//! Everything here is pure: raw bytes in, structured fields out.

mod body;
mod quotes;
mod split;

use chrono::{DateTime, FixedOffset};
use mailgram_mime::{Headers, Message};
use regex::Regex;

use crate::config::QuoteMode;

pub use body::{Converter, EMPTY_BODY, HTML_CONVERTERS, first_of, select_body};
pub use quotes::{QUOTED_CONTENT_REMOVED, handle_quotes};
pub use split::{DEFAULT_MAX_CHUNK, TELEGRAM_TEXT_LIMIT, part_marker, split_for_delivery};

/// Subject used when the header is missing or blank.
pub const NO_SUBJECT: &str = "(no subject)";

/// Sender used when the header is missing or blank.
pub const UNKNOWN_SENDER: &str = "(unknown sender)";

/// Message priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// High importance.
    High,
    /// No particular importance.
    #[default]
    Normal,
    /// Low importance.
    Low,
}

impl Priority {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// A file carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Decoded filename.
    pub filename: String,
    /// Decoded payload.
    pub data: Vec<u8>,
    /// Declared MIME type, e.g. `image/png`.
    pub mime_type: String,
}

/// Structured view of a message, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Decoded subject.
    pub subject: String,
    /// Decoded `From` header.
    pub sender: String,
    /// Decoded `To` addresses.
    pub recipients: Vec<String>,
    /// Decoded `Cc` addresses.
    pub cc: Vec<String>,
    /// Date for display: the parsed date when possible, else the raw header.
    pub date: Option<String>,
    /// Parsed `Date` header.
    pub sent_at: Option<DateTime<FixedOffset>>,
    /// Derived priority.
    pub priority: Priority,
    /// Body text with the quote policy applied.
    pub body_text: String,
    /// Raw HTML alternative, if the message has one.
    pub html_body: Option<String>,
    /// Forwardable attachments, in document order.
    pub attachments: Vec<Attachment>,
    /// `Message-ID` header.
    pub message_id: Option<String>,
}

/// Parses raw message bytes. Never fails; missing pieces get placeholders.
#[must_use]
pub fn parse_message(raw: &[u8], quote_mode: QuoteMode) -> ParsedMessage {
    let message = Message::parse(raw);

    let sent_at = message.sent_at();
    let date = sent_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S %z").to_string())
        .or_else(|| message.date().map(|raw| raw.trim().to_string()))
        .filter(|date| !date.is_empty());

    let (body_text, html_body) = select_body(&message, quote_mode);

    ParsedMessage {
        subject: non_blank(message.subject()).unwrap_or_else(|| NO_SUBJECT.to_string()),
        sender: non_blank(message.from()).unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        recipients: message.to(),
        cc: message.cc(),
        date,
        sent_at,
        priority: derive_priority(&message.headers),
        body_text,
        html_body,
        attachments: extract_attachments(&message),
        message_id: message
            .message_id()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Derives priority from `Importance` and `X-Priority`. High wins.
#[must_use]
pub fn derive_priority(headers: &Headers) -> Priority {
    let importance = headers
        .get("importance")
        .unwrap_or_default()
        .to_ascii_lowercase();
    let numeral = headers.get("x-priority").and_then(|value| {
        let digits: String = value
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse::<u8>().ok()
    });

    if importance.contains("high") || matches!(numeral, Some(1 | 2)) {
        Priority::High
    } else if importance.contains("low") || matches!(numeral, Some(4 | 5)) {
        Priority::Low
    } else {
        Priority::Normal
    }
}

/// Collects forwardable attachments.
///
/// Inline images are treated as decoration and left out. Parts that cannot
/// be decoded or are empty are skipped.
#[must_use]
pub fn extract_attachments(message: &Message) -> Vec<Attachment> {
    let mut attachments = Vec::new();

    for part in &message.parts {
        let filename = part.filename();
        if !part.is_attachment_disposition() && filename.is_none() {
            continue;
        }
        let content_type = part.content_type();
        if part.is_inline_disposition() && content_type.is_image() {
            continue;
        }

        let filename =
            filename.unwrap_or_else(|| format!("attachment_{}", attachments.len() + 1));
        match part.decode_body() {
            Ok(data) if !data.is_empty() => attachments.push(Attachment {
                filename,
                data,
                mime_type: content_type.essence(),
            }),
            Ok(_) => tracing::warn!(filename, "Skipping empty attachment"),
            Err(e) => tracing::warn!(filename, error = %e, "Skipping undecodable attachment"),
        }
    }

    attachments
}

#[allow(clippy::expect_used)]
pub(crate) fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in pattern compiles")
}
