//! Handling of quoted replies and forwarded blocks.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::QuoteMode;
use crate::transform::pattern;

/// Body used when everything in a non-blank body was quoted.
pub const QUOTED_CONTENT_REMOVED: &str = "(quoted content removed)";

/// Lines that introduce a quoted reply.
static INTRO: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?is)^(on\s.*?wrote:|am\s.*?schrieb.*?:|le\s.*?a écrit\s?:|在\s.*?写道[：:]|from:.*?subject:.*?date:)",
    )
});

/// Separators that open a forwarded or original message.
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?i)^-+\s*(.*?forwarded message.*?|original message|ursprüngliche nachricht|message d'origine|原始邮件|转发的邮件)\s*-+$",
    )
});

/// One or more leading `>` markers.
static MARKERS: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(>\s*)+"));

fn is_quote_header(line: &str) -> bool {
    let trimmed = line.trim();
    INTRO.is_match(trimmed) || SEPARATOR.is_match(trimmed)
}

/// Applies the quote policy to a decoded body. The result is trimmed.
#[must_use]
pub fn handle_quotes(body: &str, mode: QuoteMode) -> String {
    match mode {
        QuoteMode::Remove => remove(body),
        QuoteMode::Markdown => body
            .lines()
            .map(|line| {
                if is_quote_header(line) {
                    format!("> {}", line.trim())
                } else if MARKERS.is_match(line) {
                    format!("> {}", MARKERS.replace(line, "").trim_start())
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        QuoteMode::PreserveText => body
            .lines()
            .filter(|line| !is_quote_header(line))
            .map(|line| MARKERS.replace(line, ""))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    }
}

/// Keeps only what precedes the first quote header or quoted line.
fn remove(body: &str) -> String {
    let kept: Vec<&str> = body
        .lines()
        .take_while(|line| !is_quote_header(line) && !MARKERS.is_match(line))
        .collect();
    let result = kept.join("\n").trim().to_string();
    if result.is_empty() && !body.trim().is_empty() {
        QUOTED_CONTENT_REMOVED.to_string()
    } else {
        result
    }
}
