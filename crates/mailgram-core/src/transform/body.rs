//! Body selection and HTML conversion.

use std::sync::LazyLock;

use mailgram_mime::{Message, Part};
use regex::Regex;

use crate::config::QuoteMode;
use crate::transform::pattern;
use crate::transform::quotes::handle_quotes;

/// Body used when a message has no usable text.
pub const EMPTY_BODY: &str = "(empty message body)";

/// Error returned by an HTML converter.
pub type ConvertError = Box<dyn std::error::Error + Send + Sync>;

/// Converts an HTML document to readable text.
pub type Converter = fn(&str) -> Result<String, ConvertError>;

/// Converters tried in order; the first to succeed wins.
pub const HTML_CONVERTERS: [(&str, Converter); 3] = [
    ("markdown", html_to_markdown),
    ("text", html_to_text),
    ("strip", strip_tags),
];

/// Returns the output of the first converter that succeeds.
///
/// Output quality is not judged: an empty string from a converter that
/// succeeded is still the result.
#[must_use]
pub fn first_of(converters: &[(&str, Converter)], html: &str) -> Option<String> {
    for (name, convert) in converters {
        match convert(html) {
            Ok(text) => return Some(text),
            Err(e) => tracing::warn!(converter = *name, error = %e, "HTML conversion failed"),
        }
    }
    None
}

/// Chooses the body text of a message and applies the quote policy.
///
/// Returns the text together with the raw HTML alternative, if any.
#[must_use]
pub fn select_body(message: &Message, mode: QuoteMode) -> (String, Option<String>) {
    let html = message.text_part("html").and_then(decode_part);
    let plain = message
        .text_part("plain")
        .and_then(decode_part)
        .map(|text| text.trim().to_string())
        .unwrap_or_default();

    let converted = html
        .as_deref()
        .filter(|html| !html.trim().is_empty())
        .and_then(|html| first_of(&HTML_CONVERTERS, html))
        .map(|text| text.trim().to_string());

    let chosen = match converted {
        Some(text) if !text.is_empty() => text,
        _ => plain,
    };

    let body = handle_quotes(&chosen, mode);
    let body = if body.trim().is_empty() {
        EMPTY_BODY.to_string()
    } else {
        body
    };
    (body, html)
}

fn decode_part(part: &Part) -> Option<String> {
    part.decode_text()
        .map_err(|e| tracing::warn!(error = %e, "Failed to decode body part"))
        .ok()
}

/// Structured conversion to Markdown.
fn html_to_markdown(html: &str) -> Result<String, ConvertError> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "head"])
        .build();
    Ok(converter.convert(html)?)
}

/// Tags after which a line break is emitted.
const BLOCK_TAGS: [&str; 14] = [
    "br", "p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "table", "hr",
];

/// Block-aware plain-text extraction.
///
/// Drops tags, breaks lines at block elements, skips `script` and `style`
/// content, decodes common entities and collapses whitespace.
fn html_to_text(html: &str) -> Result<String, ConvertError> {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut skip_until: Option<&'static str> = None;

    while let Some(open) = rest.find('<') {
        if skip_until.is_none() {
            push_text(&mut out, &rest[..open]);
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = after[..close].trim();
        rest = &after[close + 1..];

        let closing = tag.starts_with('/');
        let name: String = tag
            .trim_start_matches('/')
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();

        if let Some(end) = skip_until {
            if closing && name == end {
                skip_until = None;
            }
            continue;
        }
        match name.as_str() {
            "script" if !closing => skip_until = Some("script"),
            "style" if !closing => skip_until = Some("style"),
            "head" if !closing => skip_until = Some("head"),
            name if BLOCK_TAGS.contains(&name) => line_break(&mut out),
            _ => {}
        }
    }
    if skip_until.is_none() {
        push_text(&mut out, rest);
    }

    let text = out
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(collapse_blank_lines(&text))
}

fn push_text(out: &mut String, text: &str) {
    let decoded = decode_entities(text);
    for ch in decoded.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !out.ends_with(' ') && !out.ends_with('\n') {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
}

fn line_break(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Decodes named and numeric character references.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let entity = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| Some((end, entity_char(&tail[..end])?)));
        match entity {
            Some((end, ch)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity_char(entity: &str) -> Option<char> {
    let named = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        "euro" => '\u{20AC}',
        _ => {
            let code = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#')?.parse().ok())?;
            return char::from_u32(code);
        }
    };
    Some(named)
}

static TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)<[^>]*>"));

/// Last resort: remove anything that looks like a tag.
fn strip_tags(html: &str) -> Result<String, ConvertError> {
    let text = TAG.replace_all(html, "\n");
    Ok(collapse_blank_lines(
        &text.lines().map(str::trim).collect::<Vec<_>>().join("\n"),
    ))
}
