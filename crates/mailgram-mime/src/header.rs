//! Header blocks with unfolding and case-insensitive lookup.

use crate::encoding::decode_header_value;
use std::collections::HashMap;

/// Headers of a message or a part.
///
/// Names are case-insensitive; repeated headers keep every value in arrival
/// order.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        self.headers.entry(name).or_default().push(value);
    }

    /// Gets the first raw value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all raw values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Gets the first value for a header with RFC 2047 words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_header_value)
    }

    /// Returns `true` if the collection holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Parses a header block.
    ///
    /// Continuation lines (leading space or tab) are unfolded into the
    /// previous header. Parsing stops at the first empty line. Lines that are
    /// neither a header nor a continuation are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        headers
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.add("X-Priority", "1 (Highest)");
        assert_eq!(headers.get("x-priority"), Some("1 (Highest)"));
        assert_eq!(headers.get("X-PRIORITY"), Some("1 (Highest)"));
    }

    #[test]
    fn test_headers_repeated() {
        let mut headers = Headers::new();
        headers.add("Received", "first");
        headers.add("received", "second");
        assert_eq!(headers.get_all("RECEIVED"), vec!["first", "second"]);
        assert_eq!(headers.get("Received"), Some("first"));
    }

    #[test]
    fn test_parse_unfolds_and_stops_at_body() {
        let text = concat!(
            "Importance: high\r\n",
            "Message-ID: <x1@mail.example>\r\n",
            "Subject: quarterly\r\n",
            "\tnumbers\r\n",
            "\r\n",
            "Cc: not-a-header@example.com\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("importance"), Some("high"));
        assert_eq!(headers.get("Message-Id"), Some("<x1@mail.example>"));
        assert_eq!(headers.get("Subject"), Some("quarterly numbers"));
        assert!(headers.get("Cc").is_none());
    }

    #[test]
    fn test_headers_parse_skips_mbox_line() {
        let headers = Headers::parse("From alice Mon Jan 1\nSubject: hi\n");
        assert_eq!(headers.get("Subject"), Some("hi"));
        assert!(headers.get("From alice Mon Jan 1").is_none());
    }

    #[test]
    fn test_headers_get_decoded() {
        let headers = Headers::parse("Subject: =?utf-8?B?SMOpbGxv?= world\n");
        assert_eq!(headers.get_decoded("subject").as_deref(), Some("Héllo world"));
    }
}
