//! Lenient message parsing into leaf parts.

use crate::charset;
use crate::content_type::{ContentType, Disposition, DispositionKind};
use crate::encoding::{decode_base64, decode_header_value, decode_quoted_printable};
use crate::error::Result;
use crate::header::Headers;
use chrono::{DateTime, FixedOffset};

/// Nesting limit for multipart bodies.
const MAX_DEPTH: usize = 32;

/// `Content-Transfer-Encoding` of a part.
///
/// Unknown tokens read as 7bit, so the body passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, also the fallback.
    SevenBit,
    /// `8bit`.
    EightBit,
    /// `base64`.
    Base64,
    /// `quoted-printable`.
    QuotedPrintable,
    /// `binary`.
    Binary,
}

impl TransferEncoding {
    /// Reads a header value, ignoring case and surrounding space.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

/// MIME message part.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw bytes, still transfer-encoded).
    pub body: Vec<u8>,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Splits raw bytes into a header block and a body.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_head(raw);
        let head = charset::decode(head, None);
        Self::new(Headers::parse(&head), body.to_vec())
    }

    /// Gets the content type, defaulting to `text/plain` when the header is
    /// missing or malformed.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Gets the parsed `Content-Disposition` header, if any.
    #[must_use]
    pub fn disposition(&self) -> Option<Disposition> {
        self.headers.get("content-disposition").map(Disposition::parse)
    }

    /// Returns `true` if the disposition says `attachment`.
    #[must_use]
    pub fn is_attachment_disposition(&self) -> bool {
        self.disposition()
            .is_some_and(|d| d.kind == DispositionKind::Attachment)
    }

    /// Returns `true` if the disposition says `inline`.
    #[must_use]
    pub fn is_inline_disposition(&self) -> bool {
        self.disposition()
            .is_some_and(|d| d.kind == DispositionKind::Inline)
    }

    /// Gets the decoded filename.
    ///
    /// Looks at the disposition `filename` first, then the content type
    /// `name` parameter. Encoded words are decoded.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self
            .disposition()
            .and_then(|d| d.filename().map(str::to_string));
        from_disposition
            .or_else(|| self.content_type().name().map(str::to_string))
            .map(|name| decode_header_value(&name))
            .filter(|name| !name.trim().is_empty())
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a Base64 body cannot be decoded.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(&self.body)),
            _ => Ok(self.body.clone()),
        }
    }

    /// Gets the decoded body as text.
    ///
    /// Uses the declared charset, or a detected one when none is declared.
    /// Bytes that do not fit the charset become replacement characters.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer encoding cannot be undone.
    pub fn decode_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        let content_type = self.content_type();
        Ok(charset::decode(&decoded, content_type.charset()))
    }
}

/// MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Top-level message headers.
    pub headers: Headers,
    /// Leaf parts in document order.
    ///
    /// A single-part message has exactly one leaf: the message itself.
    pub parts: Vec<Part>,
}

impl Message {
    /// Parses a raw RFC 5322 message.
    ///
    /// Never fails: malformed structure degrades to fewer or coarser parts.
    /// Nested multiparts are flattened into their leaves.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let root = Part::parse(raw);
        let headers = root.headers.clone();
        let mut parts = Vec::new();
        collect_leaves(root, 0, &mut parts);
        Self { headers, parts }
    }

    /// Gets the decoded Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.headers.get_decoded("subject")
    }

    /// Gets the decoded From header.
    #[must_use]
    pub fn from(&self) -> Option<String> {
        self.headers.get_decoded("from")
    }

    /// Gets the decoded addresses of the To header.
    #[must_use]
    pub fn to(&self) -> Vec<String> {
        self.addresses("to")
    }

    /// Gets the decoded addresses of the Cc header.
    #[must_use]
    pub fn cc(&self) -> Vec<String> {
        self.addresses("cc")
    }

    /// Gets the raw Date header.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.headers.get("date")
    }

    /// Parses the Date header.
    #[must_use]
    pub fn sent_at(&self) -> Option<DateTime<FixedOffset>> {
        self.date().and_then(parse_date)
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id")
    }

    /// Finds the first non-attachment part with the given text subtype.
    #[must_use]
    pub fn text_part(&self, sub_type: &str) -> Option<&Part> {
        self.parts
            .iter()
            .find(|part| part.content_type().is("text", sub_type) && !part.is_attachment_disposition())
    }

    /// Splits an address header on top-level commas, then decodes each entry.
    ///
    /// Every occurrence of the header contributes.
    fn addresses(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .into_iter()
            .flat_map(split_address_list)
            .map(|addr| decode_header_value(addr).trim().to_string())
            .filter(|addr| !addr.is_empty())
            .collect()
    }
}

/// Parses an RFC 2822 date, retrying without a trailing comment such as
/// `(UTC)`.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value).ok().or_else(|| {
        let stripped = value.rsplit_once('(').map(|(head, _)| head.trim())?;
        DateTime::parse_from_rfc2822(stripped).ok()
    })
}

fn collect_leaves(part: Part, depth: usize, out: &mut Vec<Part>) {
    let content_type = part.content_type();
    let boundary = content_type
        .boundary()
        .filter(|_| content_type.is_multipart() && depth < MAX_DEPTH)
        .map(str::to_string);

    let Some(boundary) = boundary else {
        out.push(part);
        return;
    };

    let children = split_multipart(&part.body, &boundary);
    if children.is_empty() {
        out.push(part);
        return;
    }
    for child in children {
        collect_leaves(Part::parse(child), depth + 1, out);
    }
}

/// Returns `(line, next_line_start)` for the line starting at `pos`.
fn line_at(raw: &[u8], pos: usize) -> (&[u8], usize) {
    let end = raw[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(raw.len(), |i| pos + i + 1);
    (&raw[pos..end], end)
}

/// Splits at the first empty line.
fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut pos = 0;
    while pos < raw.len() {
        let (line, next) = line_at(raw, pos);
        if line.trim_ascii_end().is_empty() {
            return (&raw[..pos], &raw[next..]);
        }
        pos = next;
    }
    (raw, &[])
}

/// Splits a multipart body on `--boundary` lines, dropping the preamble and
/// epilogue. A missing close delimiter ends the last part at end of input.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let (line, next) = line_at(body, pos);
        if let Some(rest) = line.trim_ascii_end().strip_prefix(delimiter) {
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                if let Some(start) = current {
                    parts.push(strip_line_break(&body[start..pos]));
                }
                if closing {
                    return parts;
                }
                current = Some(next);
            }
        }
        pos = next;
    }

    if let Some(start) = current {
        parts.push(&body[start..]);
    }
    parts
}

/// The line break before a delimiter belongs to the delimiter.
fn strip_line_break(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}

/// Splits `a@x, "Doe, Jane" <b@y>` on commas outside quotes and brackets.
fn split_address_list(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut angle = 0usize;
    let mut start = 0;

    for (i, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle += 1,
            '>' if !in_quotes => angle = angle.saturating_sub(1),
            ',' if !in_quotes && angle == 0 => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out.retain(|addr| !addr.is_empty());
    out
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

    const ALTERNATIVE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, \"Doe, Jane\" <jane@example.com>\r\n\
Subject: =?utf-8?Q?Caf=C3=A9?=\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0200 (CEST)\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
caf=E9\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>caf&eacute;</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer--\r\n\
epilogue\r\n";

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_message_nested_multipart() {
        let message = Message::parse(ALTERNATIVE);
        assert_eq!(message.parts.len(), 3);

        let plain = message.text_part("plain").unwrap();
        assert_eq!(plain.decode_text().unwrap(), "café");

        let html = message.text_part("html").unwrap();
        assert_eq!(html.decode_text().unwrap(), "<p>caf&eacute;</p>");

        let pdf = &message.parts[2];
        assert!(pdf.is_attachment_disposition());
        assert_eq!(pdf.filename().as_deref(), Some("report.pdf"));
        assert_eq!(pdf.decode_body().unwrap(), b"%PDF-");
    }

    #[test]
    fn test_message_headers() {
        let message = Message::parse(ALTERNATIVE);
        assert_eq!(message.subject().as_deref(), Some("Café"));
        assert_eq!(message.from().as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(
            message.to(),
            vec!["bob@example.com", "\"Doe, Jane\" <jane@example.com>"]
        );
        assert!(message.cc().is_empty());
        assert!(message.sent_at().is_some());
    }

    #[test]
    fn test_message_single_part() {
        let raw = b"Subject: Test\nContent-Transfer-Encoding: base64\n\nSGVsbG8sIFdvcmxkIQ==\n";
        let message = Message::parse(raw);
        assert_eq!(message.parts.len(), 1);
        assert_eq!(
            message.text_part("plain").unwrap().decode_text().unwrap(),
            "Hello, World!"
        );
    }

    #[test]
    fn test_message_without_close_delimiter() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\n\n--b\n\nfirst\n--b\n\nsecond\n";
        let message = Message::parse(raw);
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.parts[0].body, b"first");
        assert_eq!(message.parts[1].body, b"second\n");
    }

    #[test]
    fn test_boundary_prefix_is_not_a_delimiter() {
        let raw = b"Content-Type: multipart/mixed; boundary=ab\n\n--ab\n\n--abc is text\n--ab--\n";
        let message = Message::parse(raw);
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.parts[0].body, b"--abc is text");
    }

    #[test]
    fn test_malformed_content_type_defaults_to_text() {
        let part = Part::parse(b"Content-Type: garbage\n\nbody");
        assert!(part.content_type().is("text", "plain"));
    }

    #[test]
    fn test_filename_from_encoded_name() {
        let part = Part::parse(
            b"Content-Type: text/plain; name=\"=?utf-8?B?5oql5ZGKLnR4dA==?=\"\n\nx",
        );
        assert_eq!(part.filename().as_deref(), Some("报告.txt"));
    }

    #[test]
    fn test_parse_date_with_comment() {
        assert!(parse_date("Tue, 1 Jul 2025 10:00:00 +0000").is_some());
        assert!(parse_date("Tue, 1 Jul 2025 10:00:00 +0000 (UTC)").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
