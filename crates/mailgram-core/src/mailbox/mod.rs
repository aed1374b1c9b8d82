//! The watched mailbox.
//!
//! [`MailboxSession`] owns one connection and its state. The wire protocol
//! sits behind [`MailboxConnector`] and [`MailboxClient`] so the session can be
//! driven against an in-memory mailbox in tests.

mod backoff;
mod imap;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use backoff::{Backoff, BackoffStep};
pub use imap::{CONNECT_TIMEOUT, ImapClient, ImapConnector};
pub use session::{COMMAND_TIMEOUT, MailboxSession, SessionState};

/// Result type alias for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;

/// A message fetched from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailItem {
    /// Server-assigned UID.
    pub uid: u32,
    /// Raw RFC 5322 bytes.
    pub raw: Vec<u8>,
}

/// How an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server pushed a change.
    NewData,
    /// Nothing happened before the timeout.
    Timeout,
    /// The stop token fired; the connection is still usable.
    Stopped,
}

/// Mailbox error types.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The source folder does not exist.
    #[error("Mailbox folder not found: {0}")]
    MissingFolder(String),

    /// Transport or TLS failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered a command with an error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation did not finish in time.
    #[error("Operation timed out")]
    Timeout,

    /// An operation needs a selected folder.
    #[error("No folder selected")]
    NotSelected,
}

impl MailboxError {
    /// Returns `true` if reconnecting cannot help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::MissingFolder(_))
    }
}

/// Opens authenticated connections.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Client type produced by a successful connect.
    type Client: MailboxClient;

    /// Connects and logs in.
    async fn connect(&self) -> Result<Self::Client>;
}

/// Commands on one authenticated connection.
#[async_trait]
pub trait MailboxClient: Send {
    /// Returns `true` if the folder exists.
    async fn folder_exists(&mut self, name: &str) -> Result<bool>;

    /// Creates a folder.
    async fn create_folder(&mut self, name: &str) -> Result<()>;

    /// Selects a folder for the commands below.
    async fn select(&mut self, name: &str) -> Result<()>;

    /// Returns the UIDs of unseen messages.
    async fn search_unseen(&mut self) -> Result<Vec<u32>>;

    /// Fetches full messages without changing their flags.
    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<MailItem>>;

    /// Moves a message to another folder.
    async fn move_to(&mut self, uid: u32, folder: &str) -> Result<()>;

    /// Adds the `\Seen` flag.
    async fn add_seen(&mut self, uid: u32) -> Result<()>;

    /// Waits for a server push, at most `timeout`, or until `stop` fires.
    ///
    /// Ends the idle state before returning in every non-error case.
    async fn idle_wait(
        &mut self,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Result<IdleOutcome>;

    /// Sends a keep-alive.
    async fn noop(&mut self) -> Result<()>;

    /// Logs out.
    async fn logout(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(MailboxError::Auth("bad".to_string()).is_fatal());
        assert!(MailboxError::MissingFolder("INBOX".to_string()).is_fatal());
        assert!(!MailboxError::Connection("reset".to_string()).is_fatal());
        assert!(!MailboxError::Timeout.is_fatal());
    }
}
