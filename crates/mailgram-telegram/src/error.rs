//! Error types for Bot API calls.

/// Result type alias for Bot API calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Bot API error types.
///
/// Rejections reported by the API are classified so callers can pick a
/// fallback: retry as plain text, re-send an image as strips or as a
/// document, or post a notice instead of an oversized file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The text could not be parsed under the requested formatting mode.
    #[error("Cannot parse formatted text: {0}")]
    CantParseEntities(String),

    /// The image was rejected for its dimensions or format.
    #[error("Image rejected: {0}")]
    ImageRejected(String),

    /// The file exceeds the upload limit.
    #[error("File too big: {0}")]
    FileTooBig(String),

    /// Any other rejection from the API.
    #[error("Bot API error {code:?}: {description}")]
    Api {
        /// Numeric error code, when the API sent one.
        code: Option<i64>,
        /// Human-readable description.
        description: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Lowercase fragments marking an image dimension or format rejection.
const IMAGE_REJECTIONS: [&str; 5] = [
    "photo_invalid_dimensions",
    "wrong file identifier",
    "photo_save_file_invalid",
    "webpage_curl_failed",
    "image_process_failed",
];

impl Error {
    /// Classifies an API rejection by its description.
    #[must_use]
    pub fn from_api(code: Option<i64>, description: impl Into<String>) -> Self {
        let description = description.into();
        let lower = description.to_lowercase();

        if lower.contains("can't parse entities") || lower.contains("parse error") {
            Self::CantParseEntities(description)
        } else if IMAGE_REJECTIONS.iter().any(|needle| lower.contains(needle)) {
            Self::ImageRejected(description)
        } else if lower.contains("file is too big")
            || lower.contains("request entity too large")
            || code == Some(413)
        {
            Self::FileTooBig(description)
        } else {
            Self::Api { code, description }
        }
    }

    /// Returns `true` if retrying without formatting may succeed.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::CantParseEntities(_))
    }

    /// Returns `true` if the image itself was refused.
    #[must_use]
    pub const fn is_image_rejection(&self) -> bool {
        matches!(self, Self::ImageRejected(_))
    }

    /// Returns `true` if the upload was too large.
    #[must_use]
    pub const fn is_file_too_big(&self) -> bool {
        matches!(self, Self::FileTooBig(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_parse_error() {
        let err = Error::from_api(
            Some(400),
            "Bad Request: can't parse entities: Can't find end of the entity starting at byte offset 12",
        );
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_classify_image_rejections() {
        for description in [
            "Bad Request: PHOTO_INVALID_DIMENSIONS",
            "Bad Request: wrong file identifier/HTTP URL specified",
            "Bad Request: PHOTO_SAVE_FILE_INVALID",
            "Bad Request: IMAGE_PROCESS_FAILED",
        ] {
            assert!(Error::from_api(Some(400), description).is_image_rejection());
        }
    }

    #[test]
    fn test_classify_file_too_big() {
        assert!(Error::from_api(Some(400), "Bad Request: file is too big").is_file_too_big());
        assert!(Error::from_api(Some(413), "Request Entity Too Large").is_file_too_big());
    }

    #[test]
    fn test_classify_other() {
        let err = Error::from_api(Some(403), "Forbidden: bot was blocked by the user");
        assert!(matches!(err, Error::Api { code: Some(403), .. }));
        assert!(!err.is_parse_error());
    }
}
