//! `Content-Type` and `Content-Disposition` values.

use crate::encoding::decode_rfc2231;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// A parsed `Content-Type` value.
///
/// Parameter names are lowercased; RFC 2231 continuations are already joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Top-level type, lowercased.
    pub main_type: String,
    /// Subtype, lowercased.
    pub sub_type: String,
    /// Decoded parameters keyed by lowercase name.
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Builds a value without parameters.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// The RFC 2045 default for parts without a `Content-Type` header.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// Declared charset label, if any.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Multipart delimiter, if any.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the `name` parameter, used by older mailers for filenames.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// `true` for any `multipart/*` type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is an image content type.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("image")
    }

    /// Checks the `type/subtype` pair, ignoring parameters.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main_type) && self.sub_type.eq_ignore_ascii_case(sub_type)
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn essence(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Parses a header value.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` pair is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = s.split_once(';').unwrap_or((s, ""));

        let (main_type, sub_type) = type_str
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("Missing subtype in {s:?}")))?;

        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(format!("Empty type in {s:?}")));
        }

        let mut content_type = Self::new(main_type, sub_type);
        content_type.parameters = parse_parameters(params);
        Ok(content_type)
    }
}

/// Disposition kind from a `Content-Disposition` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    /// Displayed as part of the message.
    Inline,
    /// Meant to be saved separately.
    Attachment,
    /// Any other token.
    Other,
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition kind.
    pub kind: DispositionKind,
    /// Parameters, with RFC 2231 values already decoded.
    pub parameters: HashMap<String, String>,
}

impl Disposition {
    /// Parses a disposition header value. Never fails.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, params) = s.split_once(';').unwrap_or((s, ""));
        let kind = match kind.trim().to_lowercase().as_str() {
            "inline" => DispositionKind::Inline,
            "attachment" => DispositionKind::Attachment,
            _ => DispositionKind::Other,
        };
        Self {
            kind,
            parameters: parse_parameters(params),
        }
    }

    /// Returns the filename parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

/// Parses `; key=value; key2="quoted; value"` into a map.
///
/// Keys are lowercased. RFC 2231 extended (`key*`) and continued
/// (`key*0`, `key*1*`) parameters are reassembled and decoded, and take
/// precedence over a plain parameter with the same name.
fn parse_parameters(input: &str) -> HashMap<String, String> {
    let mut plain = HashMap::new();
    // name -> (section index -> (is_extended, raw value))
    let mut extended: HashMap<String, BTreeMap<u32, (bool, String)>> = HashMap::new();

    for param in split_unquoted(input, ';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = unquote(value.trim());
        if key.is_empty() {
            continue;
        }

        let Some((name, section)) = key.split_once('*') else {
            plain.insert(key, value);
            continue;
        };

        // `name*` / `name*N` / `name*N*`
        let (index, is_extended) = match section.strip_suffix('*') {
            Some(index) => (index, true),
            None if section.is_empty() => ("", true),
            None => (section, false),
        };
        let index = if index.is_empty() {
            0
        } else {
            match index.parse::<u32>() {
                Ok(index) => index,
                Err(_) => continue,
            }
        };
        extended
            .entry(name.to_string())
            .or_default()
            .insert(index, (is_extended, value));
    }

    for (name, sections) in extended {
        // Only an extended first section carries the `charset'lang'` prefix.
        let mut encoded = match sections.get(&0) {
            Some((true, _)) => String::new(),
            _ => String::from("''"),
        };
        for (is_extended, value) in sections.into_values() {
            if is_extended {
                encoded.push_str(&value);
            } else {
                // Plain sections stay literal inside an encoded value.
                encoded.push_str(&value.replace('%', "%25"));
            }
        }
        plain.insert(name, decode_rfc2231(&encoded));
    }

    plain
}

/// Splits on `sep` outside of double-quoted strings.
fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.trim_matches('"').to_string(),
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
    fn test_content_type_legacy_charset() {
        let ct = ContentType::parse("text/plain;charset=koi8-r;format=flowed").unwrap();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("koi8-r"));
        assert_eq!(ct.parameters.get("format").map(String::as_str), Some("flowed"));
    }

    #[test]
    fn test_content_type_parse_case() {
        let ct = ContentType::parse("Text/HTML; Charset=\"ISO-8859-1\"").unwrap();
        assert!(ct.is("text", "html"));
        assert_eq!(ct.charset(), Some("ISO-8859-1"));
        assert_eq!(ct.essence(), "text/html");
    }

    #[test]
    fn test_content_type_boundary_with_specials() {
        let ct = ContentType::parse("Multipart/Alternative;\r\n boundary=\"=_a1b2/c3=\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("=_a1b2/c3="));
    }

    #[test]
    fn test_content_type_quoted_semicolon() {
        let ct = ContentType::parse("application/pdf; name=\"a;b.pdf\"").unwrap();
        assert_eq!(ct.name(), Some("a;b.pdf"));
    }

    #[test]
    fn test_content_type_missing_subtype() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("/plain").is_err());
    }

    #[test]
    fn test_disposition_parse() {
        let d = Disposition::parse("attachment; filename=\"report.pdf\"");
        assert_eq!(d.kind, DispositionKind::Attachment);
        assert_eq!(d.filename(), Some("report.pdf"));

        let d = Disposition::parse("INLINE");
        assert_eq!(d.kind, DispositionKind::Inline);
        assert_eq!(d.filename(), None);
    }

    #[test]
    fn test_disposition_rfc2231_filename() {
        let d = Disposition::parse("attachment; filename*=UTF-8''%E6%8A%A5%E5%91%8A.pdf");
        assert_eq!(d.filename(), Some("报告.pdf"));
    }

    #[test]
    fn test_disposition_rfc2231_continuation() {
        let d = Disposition::parse(
            "attachment; filename*0*=utf-8''long%20; filename*1=name.txt; filename=\"fallback\"",
        );
        assert_eq!(d.filename(), Some("long name.txt"));
    }
}
