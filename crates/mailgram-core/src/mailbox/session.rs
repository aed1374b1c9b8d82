//! Connection lifecycle and bookkeeping.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{
    Backoff, BackoffStep, IdleOutcome, MailItem, MailboxClient, MailboxConnector, MailboxError,
    Result,
};
use crate::config::{ImapConfig, ReconnectPolicy};

/// Bound on every command after login. A half-open connection surfaces as
/// [`MailboxError::Timeout`].
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs one command, failing with [`MailboxError::Timeout`] past `limit`.
async fn bounded<T>(limit: Duration, command: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, command)
        .await
        .map_err(|_| MailboxError::Timeout)?
}

/// Snapshot of the session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// A connection is open.
    pub connected: bool,
    /// The source folder is selected.
    pub folder_selected: bool,
    /// Connection failures since the last successful connect.
    pub consecutive_failures: u32,
    /// Wait before the next reconnect.
    pub backoff_delay: Duration,
}

/// One live connection to the watched folder.
///
/// Every command that fails drops the connection; the caller reconnects
/// with [`MailboxSession::connect`].
pub struct MailboxSession<C: MailboxConnector> {
    connector: C,
    client: Option<C::Client>,
    mailbox: String,
    processed_folder: Option<String>,
    processed_ready: bool,
    folder_selected: bool,
    backoff: Backoff,
}

impl<C: MailboxConnector> MailboxSession<C> {
    /// Creates a disconnected session.
    pub fn new(connector: C, config: &ImapConfig, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            client: None,
            mailbox: config.mailbox.clone(),
            processed_folder: config.processed_folder.clone(),
            processed_ready: false,
            folder_selected: false,
            backoff: Backoff::new(policy),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState {
            connected: self.client.is_some(),
            folder_selected: self.folder_selected,
            consecutive_failures: self.backoff.failures(),
            backoff_delay: self.backoff.delay(),
        }
    }

    /// Returns the watched folder.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Returns the folder finalized messages are moved to, while usable.
    #[must_use]
    pub fn processed_folder(&self) -> Option<&str> {
        self.processed_folder
            .as_deref()
            .filter(|_| self.processed_ready)
    }

    /// Connects, selects the watched folder and prepares the processed folder.
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError::Auth`] or [`MailboxError::MissingFolder`] when
    /// retrying cannot help, any other error otherwise. The session is
    /// disconnected after an error.
    pub async fn connect(&mut self) -> Result<()> {
        self.close().await;

        tracing::info!(folder = %self.mailbox, "Connecting to mailbox");
        let client = self.connector.connect().await?;
        self.client = Some(client);

        let result = self.prepare().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Mailbox setup failed");
            self.disconnect();
            return result;
        }

        self.backoff.reset();
        tracing::info!(
            folder = %self.mailbox,
            processed = ?self.processed_folder(),
            "Mailbox ready"
        );
        Ok(())
    }

    async fn prepare(&mut self) -> Result<()> {
        let mailbox = self.mailbox.clone();
        let client = self.client()?;
        if !bounded(COMMAND_TIMEOUT, client.folder_exists(&mailbox)).await? {
            return Err(MailboxError::MissingFolder(mailbox));
        }
        bounded(COMMAND_TIMEOUT, client.select(&mailbox)).await?;
        self.folder_selected = true;

        self.processed_ready = false;
        if let Some(folder) = self.processed_folder.clone() {
            self.processed_ready = self.ensure_folder(&folder).await;
        }
        Ok(())
    }

    /// Creates `folder` if needed. Returns whether it can be used.
    async fn ensure_folder(&mut self, folder: &str) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };
        match bounded(COMMAND_TIMEOUT, client.folder_exists(folder)).await {
            Ok(true) => true,
            Ok(false) => match bounded(COMMAND_TIMEOUT, client.create_folder(folder)).await {
                Ok(()) => {
                    tracing::info!(folder, "Created processed folder");
                    true
                }
                Err(e) => {
                    tracing::warn!(folder, error = %e, "Cannot create processed folder, marking seen instead");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(folder, error = %e, "Cannot check processed folder, marking seen instead");
                false
            }
        }
    }

    fn client(&mut self) -> Result<&mut C::Client> {
        self.client
            .as_mut()
            .ok_or_else(|| MailboxError::Connection("not connected".to_string()))
    }

    fn selected(&mut self) -> Result<&mut C::Client> {
        if !self.folder_selected {
            return Err(MailboxError::NotSelected);
        }
        self.client()
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.folder_selected = false;
    }

    /// Drops the connection if `result` failed.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Mailbox command failed, dropping connection");
            self.disconnect();
        }
        result
    }

    /// Returns the UIDs of unseen messages in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder is selected or the command fails.
    pub async fn list_unseen(&mut self) -> Result<Vec<u32>> {
        let result = bounded(COMMAND_TIMEOUT, self.selected()?.search_unseen()).await;
        let mut uids = self.check(result)?;
        uids.sort_unstable();
        Ok(uids)
    }

    /// Fetches messages without marking them seen.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder is selected or the command fails.
    pub async fn fetch_raw(&mut self, uids: &[u32]) -> Result<Vec<MailItem>> {
        let result = bounded(COMMAND_TIMEOUT, self.selected()?.fetch(uids)).await;
        self.check(result)
    }

    /// Moves a delivered message to the processed folder, or marks it seen
    /// when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder is selected or the command fails.
    pub async fn finalize(&mut self, uid: u32) -> Result<()> {
        let Some(folder) = self.processed_folder().map(str::to_string) else {
            return self.mark_seen(uid).await;
        };
        let result = bounded(COMMAND_TIMEOUT, self.selected()?.move_to(uid, &folder)).await;
        self.check(result)?;
        tracing::debug!(uid, folder, "Moved message");
        Ok(())
    }

    /// Marks a message seen.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder is selected or the command fails.
    pub async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let result = bounded(COMMAND_TIMEOUT, self.selected()?.add_seen(uid)).await;
        self.check(result)?;
        tracing::debug!(uid, "Marked message seen");
        Ok(())
    }

    /// Waits for a server push, at most `timeout`, or until `stop` fires.
    ///
    /// The connection stays open after [`IdleOutcome::Stopped`], so
    /// [`MailboxSession::close`] can still log out.
    ///
    /// # Errors
    ///
    /// Returns an error if no folder is selected or the wait fails.
    pub async fn idle_wait(
        &mut self,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Result<IdleOutcome> {
        let limit = timeout + COMMAND_TIMEOUT;
        let result = bounded(limit, self.selected()?.idle_wait(timeout, stop)).await;
        self.check(result)
    }

    /// Sends a keep-alive.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected or the command fails.
    pub async fn noop(&mut self) -> Result<()> {
        let result = bounded(COMMAND_TIMEOUT, self.client()?.noop()).await;
        self.check(result)
    }

    /// Logs out, ignoring errors.
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = bounded(COMMAND_TIMEOUT, client.logout()).await {
                tracing::debug!(error = %e, "Logout failed");
            }
        }
        self.folder_selected = false;
    }

    /// Records a connection failure and returns the wait before retrying.
    pub fn record_failure(&mut self) -> BackoffStep {
        self.backoff.record_failure()
    }
}
