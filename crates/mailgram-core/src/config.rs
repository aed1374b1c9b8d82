//! Runtime configuration.
//!
//! Every setting comes from a key lookup. [`Config::from_env`] reads the
//! process environment (after loading a `.env` file if one exists), while
//! [`Config::from_lookup`] accepts any function, which keeps tests away from
//! global state.

use std::fmt;
use std::time::Duration;

use crate::filter::FilterRule;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required variables are unset or empty.
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A variable holds a value that cannot be used.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Why the value was refused.
        reason: String,
    },
}

/// How quoted replies and forwarded blocks are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteMode {
    /// Drop quoted content entirely.
    Remove,
    /// Render quoted content as Markdown block quotes.
    #[default]
    Markdown,
    /// Keep quoted text inline without markers.
    PreserveText,
}

impl QuoteMode {
    /// Parses a mode name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remove" => Some(Self::Remove),
            "markdown" => Some(Self::Markdown),
            "preserve_text" => Some(Self::PreserveText),
            _ => None,
        }
    }

    /// Returns the configuration name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Markdown => "markdown",
            Self::PreserveText => "preserve_text",
        }
    }
}

/// A header line that can appear in the chat notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    /// `Subject`.
    Subject,
    /// `From`.
    From,
    /// `To`.
    To,
    /// `Cc`.
    Cc,
    /// `Date`.
    Date,
    /// Message priority. Omitted for normal priority.
    Importance,
    /// `Message-ID`.
    MessageId,
}

impl HeaderField {
    /// Fields shown when nothing is configured.
    pub const DEFAULT: [Self; 3] = [Self::Subject, Self::From, Self::Date];

    /// Parses a field name (case-insensitive). `priority` is accepted as an
    /// alias for `importance`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "date" => Some(Self::Date),
            "importance" | "priority" => Some(Self::Importance),
            "message_id" => Some(Self::MessageId),
            _ => None,
        }
    }

    /// Label shown in front of the value.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Subject => "Subject",
            Self::From => "From",
            Self::To => "To",
            Self::Cc => "Cc",
            Self::Date => "Date",
            Self::Importance => "Priority",
            Self::MessageId => "Message-ID",
        }
    }

    /// Parses a comma-separated list, dropping unknown names with a warning.
    #[must_use]
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut fields = Vec::new();
        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            match Self::parse(name) {
                Some(field) if !fields.contains(&field) => fields.push(field),
                Some(_) => {}
                None => tracing::warn!(field = name, "Ignoring unknown header field"),
            }
        }
        fields
    }
}

/// IMAP account and folder settings.
#[derive(Clone)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Implicit-TLS port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Folder watched for new mail.
    pub mailbox: String,
    /// Folder forwarded messages are moved to, if any.
    pub processed_folder: Option<String>,
    /// Upper bound of a single IDLE wait.
    pub idle_timeout: Duration,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mailbox", &self.mailbox)
            .field("processed_folder", &self.processed_folder)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Chat destination.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token.
    pub bot_token: String,
    /// Target chat.
    pub chat_id: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// What gets forwarded and how it looks.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardingConfig {
    /// Quoted-content policy.
    pub quote_mode: QuoteMode,
    /// Header lines of the notification, in order.
    pub header_fields: Vec<HeaderField>,
    /// Send image attachments as photos.
    pub image_preview: bool,
    /// Images at or above this size are sent as documents.
    pub image_preview_max_bytes: u64,
    /// Render HTML bodies to an image.
    pub render_html: bool,
    /// Forward attachments.
    pub forward_attachments: bool,
    /// Forward the body.
    pub forward_body: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            quote_mode: QuoteMode::default(),
            header_fields: HeaderField::DEFAULT.to_vec(),
            image_preview: false,
            image_preview_max_bytes: 5 * 1024 * 1024,
            render_html: false,
            forward_attachments: true,
            forward_body: true,
        }
    }
}

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Cap of the doubling delay.
    pub max_delay: Duration,
    /// Consecutive failures before the long pause.
    pub max_attempts: u32,
    /// Pause taken after `max_attempts` failures.
    pub long_pause: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
            long_pause: Duration::from_secs(900),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mail account.
    pub imap: ImapConfig,
    /// Chat destination.
    pub telegram: TelegramConfig,
    /// Forwarding behaviour.
    pub forwarding: ForwardingConfig,
    /// Sender and subject filters.
    pub filter: FilterRule,
    /// Reconnect timing.
    pub reconnect: ReconnectPolicy,
    /// Default log level, used when `RUST_LOG` is unset.
    pub log_level: String,
}

const REQUIRED: [&str; 5] = [
    "IMAP_HOST",
    "IMAP_USER",
    "IMAP_PASSWORD",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
];

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 25 * 60;

impl Config {
    /// Loads configuration from the environment.
    ///
    /// A `.env` file in the working directory (or a parent) is read first;
    /// variables already set in the environment take precedence.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if required variables are missing.
    pub fn from_env() -> crate::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read .env file"),
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Builds configuration from a key lookup function.
    ///
    /// Empty values count as unset. Malformed optional values fall back to
    /// their defaults with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] listing every required variable that
    /// is unset, or [`ConfigError::Invalid`] if the port is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let missing: Vec<String> = REQUIRED
            .iter()
            .filter(|key| env.get(key).is_none())
            .map(|key| (*key).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let required = |key: &str| env.get(key).unwrap_or_default();

        let port = match env.get("IMAP_PORT") {
            None => 993,
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "IMAP_PORT".to_string(),
                        reason: format!("'{raw}' is not a port number"),
                    });
                }
            },
        };

        let imap = ImapConfig {
            host: required("IMAP_HOST"),
            port,
            username: required("IMAP_USER"),
            password: env.raw("IMAP_PASSWORD").unwrap_or_default(),
            mailbox: env.get("IMAP_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
            processed_folder: env.get("PROCESSED_FOLDER_NAME"),
            idle_timeout: Duration::from_secs(
                env.number("IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)
                    .max(1),
            ),
        };

        let telegram = TelegramConfig {
            bot_token: required("TELEGRAM_BOT_TOKEN"),
            chat_id: required("TELEGRAM_CHAT_ID"),
        };

        let forwarding = ForwardingConfig {
            quote_mode: env.quote_mode(),
            header_fields: env.header_fields(),
            image_preview: env.flag("TELEGRAM_IMAGE_PREVIEW", false),
            image_preview_max_bytes: env.megabytes("TELEGRAM_IMAGE_PREVIEW_MAX_SIZE_MB", 5.0),
            render_html: env.flag("TELEGRAM_RENDER_HTML", false),
            forward_attachments: env.flag("FORWARD_ATTACHMENTS", true),
            forward_body: env.flag("FORWARD_BODY", true),
        };

        let filter = FilterRule::new(
            env.get("FILTER_SENDER_WHITELIST_REGEX").as_deref(),
            env.get("FILTER_SENDER_BLACKLIST_REGEX").as_deref(),
            env.get("FILTER_SUBJECT_BLACKLIST_REGEX").as_deref(),
        );

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            initial_delay: Duration::from_secs(
                env.number(
                    "RECONNECT_INITIAL_DELAY_SECS",
                    defaults.initial_delay.as_secs(),
                )
                .max(1),
            ),
            max_delay: Duration::from_secs(
                env.number("RECONNECT_MAX_DELAY_SECS", defaults.max_delay.as_secs())
                    .max(1),
            ),
            max_attempts: env
                .number("RECONNECT_MAX_ATTEMPTS", u64::from(defaults.max_attempts))
                .clamp(1, u64::from(u32::MAX))
                .try_into()
                .unwrap_or(defaults.max_attempts),
            long_pause: Duration::from_secs(
                env.number("RECONNECT_LONG_PAUSE_SECS", defaults.long_pause.as_secs()),
            ),
        };

        let log_level = default_log_level(&env.0);

        Ok(Self {
            imap,
            telegram,
            forwarding,
            filter,
            reconnect,
            log_level,
        })
    }
}

/// Log level from `LOG_LEVEL`, lowercased; `info` when unset.
///
/// Separate from [`Config::from_lookup`] so logging can be set up before the
/// rest of the configuration is read.
pub fn default_log_level<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    Lookup(lookup)
        .get("LOG_LEVEL")
        .map_or_else(|| "info".to_string(), |level| level.to_ascii_lowercase())
}

/// Typed accessors over a raw lookup function.
struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Untrimmed value, `None` when unset or empty.
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    /// Trimmed value, `None` when unset or blank.
    fn get(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        let Some(value) = self.get(key) else {
            return default;
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                tracing::warn!(key, value = %value, default, "Unrecognised boolean, using default");
                default
            }
        }
    }

    fn number(&self, key: &str, default: u64) -> u64 {
        let Some(value) = self.get(key) else {
            return default;
        };
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, default, "Unrecognised number, using default");
            default
        })
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn megabytes(&self, key: &str, default: f64) -> u64 {
        let mb = match self.get(key) {
            None => default,
            Some(value) => match value.parse::<f64>() {
                Ok(mb) if mb.is_finite() && mb >= 0.0 => mb,
                _ => {
                    tracing::warn!(key, value = %value, default, "Unrecognised size, using default");
                    default
                }
            },
        };
        (mb * 1024.0 * 1024.0) as u64
    }

    fn quote_mode(&self) -> QuoteMode {
        let Some(value) = self.get("EMAIL_QUOTE_HANDLING") else {
            return QuoteMode::default();
        };
        QuoteMode::parse(&value).unwrap_or_else(|| {
            tracing::warn!(
                value = %value,
                "Unknown EMAIL_QUOTE_HANDLING, using {}",
                QuoteMode::default().as_str()
            );
            QuoteMode::default()
        })
    }

    fn header_fields(&self) -> Vec<HeaderField> {
        let Some(value) = self.get("TELEGRAM_HEADER_FIELDS") else {
            return HeaderField::DEFAULT.to_vec();
        };
        let fields = HeaderField::parse_list(&value);
        if fields.is_empty() {
            tracing::warn!(value = %value, "No usable header fields, showing subject only");
            vec![HeaderField::Subject]
        } else {
            fields
        }
    }
}
