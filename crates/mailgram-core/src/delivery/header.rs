//! Notification header and attachment captions.

use mailgram_telegram::markdown::escape;

use crate::config::HeaderField;
use crate::transform::{Attachment, ParsedMessage, Priority};

/// Title line of every notification.
pub const TITLE: &str = "📧 *New email*";

/// Header rendered in both layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Layout for a standalone text message.
    pub message: String,
    /// Compact layout for an image caption.
    pub caption: String,
}

/// Builds the header from the selected fields.
///
/// Empty fields and normal priority are left out. If nothing remains, the
/// subject is shown.
#[must_use]
pub fn build_header(message: &ParsedMessage, fields: &[HeaderField]) -> Header {
    let mut lines: Vec<String> = fields
        .iter()
        .filter_map(|field| field_line(message, *field))
        .collect();
    if lines.is_empty() {
        lines.push(labelled(HeaderField::Subject, &message.subject, true));
    }
    let body = lines.join("\n");
    Header {
        message: format!("{TITLE}\n\n{body}"),
        caption: format!("{TITLE}\n{body}"),
    }
}

fn field_line(message: &ParsedMessage, field: HeaderField) -> Option<String> {
    let (value, code) = match field {
        HeaderField::Subject => (message.subject.clone(), true),
        HeaderField::From => (message.sender.clone(), false),
        HeaderField::To => (message.recipients.join(", "), false),
        HeaderField::Cc => (message.cc.join(", "), false),
        HeaderField::Date => (message.date.clone().unwrap_or_default(), true),
        HeaderField::MessageId => (message.message_id.clone().unwrap_or_default(), true),
        HeaderField::Importance => {
            return match message.priority {
                Priority::High => Some("❗ *High priority*".to_string()),
                Priority::Low => Some("📉 *Low priority*".to_string()),
                Priority::Normal => None,
            };
        }
    };
    if value.trim().is_empty() {
        return None;
    }
    Some(labelled(field, value.trim(), code))
}

fn labelled(field: HeaderField, value: &str, code: bool) -> String {
    let value = escape(value);
    if code {
        format!("*{}:* `{value}`", field.label())
    } else {
        format!("*{}:* {value}", field.label())
    }
}

/// Title of the attachment list.
#[must_use]
pub fn attachments_title(count: usize) -> String {
    format!("📎 *Attachments ({count}):*")
}

/// Plain-text caption describing an attachment.
#[must_use]
pub fn attachment_caption(attachment: &Attachment) -> String {
    format!(
        "File: {}\nType: {}\nSize: {}",
        attachment.filename,
        attachment.mime_type,
        format_size(attachment.data.len())
    )
}

/// Human-readable size: KB below one megabyte, MB above.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: usize) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb < 1024.0 {
        format!("{kb:.2} KB")
    } else {
        format!("{:.2} MB", kb / 1024.0)
    }
}
