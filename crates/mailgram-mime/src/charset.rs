//! Character set resolution for body parts and encoded words.
//!
//! Declared labels are resolved through the WHATWG encoding registry. When a
//! part declares nothing, the charset is guessed from byte statistics. Every
//! path ends in a `String`; unknown labels degrade to UTF-8 with replacement
//! characters.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};

/// Resolves a charset label such as `iso-8859-1` or `"GB2312"`.
///
/// Returns `None` for labels the registry does not know.
#[must_use]
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let label = label.trim().trim_matches('"');
    // RFC 2231 allows a language suffix: `utf-8*en`.
    let label = label.split_once('*').map_or(label, |(name, _)| name);
    Encoding::for_label(label.as_bytes())
}

/// Guesses the encoding of undeclared bytes.
///
/// Valid UTF-8 is taken as is; anything else goes through statistical
/// detection.
#[must_use]
pub fn detect(bytes: &[u8]) -> &'static Encoding {
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Decodes `bytes` using the declared charset, or a detected one when absent.
#[must_use]
pub fn decode(bytes: &[u8], declared: Option<&str>) -> String {
    let encoding = match declared {
        Some(label) if !label.trim().is_empty() => lookup(label).unwrap_or(UTF_8),
        _ => detect(bytes),
    };
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
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
    fn test_lookup_known_labels() {
        assert_eq!(lookup("utf-8").unwrap().name(), "UTF-8");
        assert_eq!(lookup("\"ISO-8859-1\"").unwrap().name(), "windows-1252");
        assert_eq!(lookup("gb2312").unwrap().name(), "GBK");
        assert_eq!(lookup("utf-8*en").unwrap().name(), "UTF-8");
    }

    #[test]
    fn test_lookup_unknown_label() {
        assert!(lookup("x-klingon").is_none());
    }

    #[test]
    fn test_decode_declared_latin1() {
        assert_eq!(decode(b"caf\xe9", Some("iso-8859-1")), "café");
    }

    #[test]
    fn test_decode_unknown_label_falls_back_to_utf8() {
        assert_eq!(decode(b"ok \xff", Some("x-klingon")), "ok \u{fffd}");
    }

    #[test]
    fn test_decode_undeclared_utf8() {
        assert_eq!(decode("héllo".as_bytes(), None), "héllo");
    }

    #[test]
    fn test_decode_undeclared_legacy_bytes() {
        // Not valid UTF-8, so detection must pick a single-byte encoding.
        let text = decode(b"Gr\xfc\xdfe aus K\xf6ln, sch\xf6ne Gr\xfc\xdfe", None);
        assert!(!text.contains('\u{fffd}'));
    }
}
