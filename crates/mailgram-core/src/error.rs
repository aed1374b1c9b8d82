//! Error types for the core library.

use thiserror::Error;

/// Errors that can stop the forwarder.
///
/// Delivery and rendering failures never get here: they are recorded in a
/// [`crate::DeliveryReport`] and the message is retried on the next pass.
#[derive(Debug, Error)]
pub enum Error {
    /// Mailbox operation failed.
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] crate::mailbox::MailboxError),

    /// Configuration is incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Returns `true` if restarting with the same configuration cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Mailbox(e) => e.is_fatal(),
            Self::Config(_) => true,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
