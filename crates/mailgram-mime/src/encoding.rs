//! MIME transfer and header decoding.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 encoded words. Decoders
//! here are lenient: mail in the wild routinely breaks the letter of the RFCs
//! and a forwarder has no sender to complain to.

use crate::charset;
use crate::error::Result;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Base64 engine that ignores missing or superfluous padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes Base64 data.
///
/// Whitespace and characters outside the Base64 alphabet are skipped, and
/// padding is optional.
///
/// # Errors
///
/// Returns an error if what remains is not decodable (for example a dangling
/// single character).
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
        .collect();
    LENIENT.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Malformed escape sequences are passed through literally.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, tolerating trailing whitespace before the newline.
        let mut j = i + 1;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if data.get(j) == Some(&b'\r') && data.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if data.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }

        match (
            data.get(i + 1).and_then(|b| hex_value(*b)),
            data.get(i + 2).and_then(|b| hex_value(*b)),
        ) {
            (Some(high), Some(low)) => {
                result.push((high << 4) | low);
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Decodes the `Q` encoding used inside RFC 2047 words.
fn decode_q(text: &str) -> Vec<u8> {
    let spaced: Vec<u8> = text
        .bytes()
        .map(|b| if b == b'_' { b' ' } else { b })
        .collect();
    decode_quoted_printable(&spaced)
}

/// One `=?charset?enc?text?=` occurrence located inside a header value.
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: char,
    text: &'a str,
    /// Byte length of the whole word including delimiters.
    len: usize,
}

impl<'a> EncodedWord<'a> {
    /// Parses an encoded word at the start of `input`.
    fn parse(input: &'a str) -> Option<Self> {
        let rest = input.strip_prefix("=?")?;
        let (charset, rest) = rest.split_once('?')?;
        let mut chars = rest.chars();
        let encoding = chars.next()?.to_ascii_uppercase();
        if !matches!(encoding, 'B' | 'Q') || chars.next() != Some('?') {
            return None;
        }
        let rest = &rest[2..];
        let end = rest.find("?=")?;
        let text = &rest[..end];
        if text.contains(char::is_whitespace) {
            return None;
        }
        Some(Self {
            charset,
            encoding,
            text,
            len: 2 + charset.len() + 3 + end + 2,
        })
    }

    fn decode(&self) -> String {
        let bytes = match self.encoding {
            'B' => match decode_base64(self.text.as_bytes()) {
                Ok(bytes) => bytes,
                Err(_) => return self.decode_truncated(),
            },
            _ => decode_q(self.text),
        };
        charset::decode(&bytes, Some(self.charset))
    }

    /// Decodes the complete base64 quanta of a broken B word and marks the
    /// lost tail with U+FFFD.
    fn decode_truncated(&self) -> String {
        let cleaned: String = self
            .text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
            .collect();
        let whole = cleaned.len() - cleaned.len() % 4;
        let mut text = decode_base64(&cleaned.as_bytes()[..whole])
            .map(|bytes| charset::decode(&bytes, Some(self.charset)))
            .unwrap_or_default();
        text.push(char::REPLACEMENT_CHARACTER);
        text
    }
}

/// Decodes a header value that may contain RFC 2047 encoded words.
///
/// Each word is decoded with its own charset, so a value mixing several
/// charsets decodes correctly. Whitespace between two adjacent encoded words
/// is dropped. Unknown charsets fall back to UTF-8 with replacement
/// characters, and a B word with a broken tail keeps what decodes followed
/// by U+FFFD. This never fails.
#[must_use]
pub fn decode_header_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut pending_space = String::new();
    let mut last_was_word = false;
    let mut rest = value;

    while !rest.is_empty() {
        if rest.starts_with("=?")
            && let Some(word) = EncodedWord::parse(rest)
        {
            if !last_was_word {
                result.push_str(&pending_space);
            }
            pending_space.clear();
            result.push_str(&word.decode());
            rest = &rest[word.len..];
            last_was_word = true;
            continue;
        }

        let mut chars = rest.chars();
        let Some(ch) = chars.next() else { break };
        if ch.is_whitespace() {
            pending_space.push(ch);
        } else {
            result.push_str(&pending_space);
            pending_space.clear();
            result.push(ch);
            last_was_word = false;
        }
        rest = chars.as_str();
    }

    result.push_str(&pending_space);
    result
}

/// Decodes an RFC 2231 extended parameter value: `charset'lang'%XX...`.
#[must_use]
pub fn decode_rfc2231(value: &str) -> String {
    let mut parts = value.splitn(3, '\'');
    let (charset, encoded) = match (parts.next(), parts.next(), parts.next()) {
        (Some(charset), Some(_lang), Some(encoded)) => (Some(charset), encoded),
        _ => (None, value),
    };
    let bytes = percent_decode(encoded);
    charset::decode(&bytes, charset.filter(|c| !c.is_empty()))
}

fn percent_decode(text: &str) -> Vec<u8> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%'
            && let (Some(high), Some(low)) = (
                raw.get(i + 1).and_then(|b| hex_value(*b)),
                raw.get(i + 2).and_then(|b| hex_value(*b)),
            )
        {
            out.push((high << 4) | low);
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base64_decode() {
        let decoded = decode_base64(b"SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_lenient() {
        // Folded lines and missing padding.
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_dangling_char() {
        assert!(decode_base64(b"SGVsb").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello= \nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_malformed_escape() {
        assert_eq!(decode_quoted_printable(b"100%=zz"), b"100%=zz");
        assert_eq!(decode_quoted_printable(b"end="), b"end=");
    }

    #[test]
    fn test_header_plain_value() {
        assert_eq!(decode_header_value("Hello"), "Hello");
    }

    #[test]
    fn test_header_b_word() {
        assert_eq!(decode_header_value("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_header_q_word() {
        assert_eq!(decode_header_value("=?utf-8?Q?H=C3=A9llo_there?="), "Héllo there");
    }

    #[test]
    fn test_header_mixed_charsets() {
        let value = "=?iso-8859-1?Q?caf=E9?= =?utf-8?B?5Lit5paH?= tail";
        assert_eq!(decode_header_value(value), "café中文 tail");
    }

    #[test]
    fn test_header_text_around_words() {
        let value = "Re: =?utf-8?Q?na=C3=AFve?= plan";
        assert_eq!(decode_header_value(value), "Re: naïve plan");
    }

    #[test]
    fn test_header_unknown_charset() {
        assert_eq!(decode_header_value("=?x-unknown?Q?ok?="), "ok");
    }

    #[test]
    fn test_header_broken_b_word() {
        assert_eq!(decode_header_value("=?utf-8?B?SMOpbGxvx?="), "Héllo\u{FFFD}");
        assert_eq!(decode_header_value("Re: =?utf-8?B?x?="), "Re: \u{FFFD}");
    }

    #[test]
    fn test_header_not_a_word() {
        assert_eq!(decode_header_value("=?broken"), "=?broken");
    }

    #[test]
    fn test_rfc2231_value() {
        assert_eq!(decode_rfc2231("utf-8''%E4%B8%AD.pdf"), "中.pdf");
        assert_eq!(decode_rfc2231("iso-8859-1'en'caf%E9.txt"), "café.txt");
        assert_eq!(decode_rfc2231("plain.txt"), "plain.txt");
    }

    proptest! {
        #[test]
        fn prop_header_decoding_never_panics(value in "\\PC*") {
            let _ = decode_header_value(&value);
        }

        #[test]
        fn prop_plain_ascii_is_untouched(value in "[a-zA-Z0-9 ,.:]*") {
            prop_assert_eq!(decode_header_value(&value), value);
        }
    }
}
