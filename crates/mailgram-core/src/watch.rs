//! The watch loop: connect, drain unseen mail, idle, repeat.

use std::time::Duration;

use mailgram_telegram::ChatApi;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, QuoteMode};
use crate::delivery::Deliverer;
use crate::error::Result;
use crate::filter::{FilterDecision, FilterRule};
use crate::mailbox::{BackoffStep, IdleOutcome, MailItem, MailboxConnector, MailboxSession};
use crate::render::HtmlRenderer;
use crate::transform::parse_message;

/// Unseen messages fetched per round trip.
pub const BATCH_SIZE: usize = 5;

/// Pause between batches.
pub const BATCH_PAUSE: Duration = Duration::from_millis(500);

/// Counts from one pass over the unseen messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Delivered and finalized.
    pub delivered: usize,
    /// Skipped by the filters and marked seen.
    pub filtered: usize,
    /// Not delivered; left unseen for the next pass.
    pub failed: usize,
}

enum ItemOutcome {
    Delivered,
    Filtered,
    Failed,
}

/// Forwards new mail until cancelled.
pub struct WatchLoop<C: MailboxConnector, A, R> {
    session: MailboxSession<C>,
    deliverer: Deliverer<A, R>,
    filter: FilterRule,
    quote_mode: QuoteMode,
    idle_timeout: Duration,
    batch_pause: Duration,
    cancel: CancellationToken,
}

impl<C, A, R> WatchLoop<C, A, R>
where
    C: MailboxConnector,
    A: ChatApi,
    R: HtmlRenderer,
{
    /// Creates a loop over `session` delivering through `deliverer`.
    pub fn new(
        session: MailboxSession<C>,
        deliverer: Deliverer<A, R>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            deliverer,
            filter: config.filter.clone(),
            quote_mode: config.forwarding.quote_mode,
            idle_timeout: config.imap.idle_timeout,
            batch_pause: BATCH_PAUSE,
            cancel,
        }
    }

    /// Sets the pause between batches.
    #[must_use]
    pub const fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Returns the mailbox session.
    pub const fn session(&self) -> &MailboxSession<C> {
        &self.session
    }

    /// Returns the deliverer.
    pub const fn deliverer(&self) -> &Deliverer<A, R> {
        &self.deliverer
    }

    /// Runs until the token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that reconnecting cannot fix:
    /// rejected credentials or a missing source folder.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            folder = %self.session.mailbox(),
            idle_timeout_secs = self.idle_timeout.as_secs(),
            filters = self.filter.is_active(),
            "Watching mailbox"
        );

        while !self.cancel.is_cancelled() {
            if !self.session.state().connected {
                match self.session.connect().await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "Cannot watch mailbox");
                        self.session.close().await;
                        return Err(e.into());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Connection failed");
                        self.back_off().await;
                        continue;
                    }
                }
            }

            match self.drain().await {
                Ok(stats) if stats != DrainStats::default() => {
                    tracing::info!(
                        delivered = stats.delivered,
                        filtered = stats.filtered,
                        failed = stats.failed,
                        "Processed unseen messages"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Processing unseen messages failed");
                    self.back_off().await;
                    continue;
                }
            }

            if let Err(e) = self.wait_for_mail().await {
                tracing::warn!(error = %e, "Idle wait failed");
                self.back_off().await;
            }
        }

        tracing::info!("Stopping mailbox watch");
        self.session.close().await;
        Ok(())
    }

    /// Waits through the backoff delay unless cancelled.
    async fn back_off(&mut self) {
        let step = self.session.record_failure();
        match step {
            BackoffStep::Retry(delay) => {
                tracing::info!(delay_secs = delay.as_secs(), "Reconnecting after delay");
            }
            BackoffStep::Cooldown(delay) => {
                tracing::warn!(
                    delay_secs = delay.as_secs(),
                    "Too many consecutive failures, pausing"
                );
            }
        }
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(step.delay()) => {}
        }
    }

    /// Idles until new mail, the idle timeout or cancellation.
    ///
    /// Cancellation ends IDLE cleanly so the connection can still log out.
    /// A keep-alive that hangs is abandoned on cancellation and otherwise
    /// fails after [`crate::mailbox::COMMAND_TIMEOUT`].
    async fn wait_for_mail(&mut self) -> crate::mailbox::Result<()> {
        let outcome = self
            .session
            .idle_wait(self.idle_timeout, &self.cancel)
            .await?;
        match outcome {
            IdleOutcome::NewData => tracing::debug!("Mailbox changed"),
            IdleOutcome::Stopped => tracing::debug!("Idle stopped"),
            IdleOutcome::Timeout => {
                tracing::debug!("Idle timeout, sending keep-alive");
                let cancel = self.cancel.clone();
                tokio::select! {
                    () = cancel.cancelled() => {}
                    result = self.session.noop() => result?,
                }
            }
        }
        Ok(())
    }

    /// Processes every unseen message in batches.
    ///
    /// Stops early when cancelled, after the in-flight message.
    async fn drain(&mut self) -> crate::mailbox::Result<DrainStats> {
        let mut stats = DrainStats::default();
        let uids = self.session.list_unseen().await?;
        if uids.is_empty() {
            return Ok(stats);
        }
        tracing::info!(count = uids.len(), "Found unseen messages");

        for (i, batch) in uids.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep(self.batch_pause) => {}
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let items = self.session.fetch_raw(batch).await?;
            for item in items {
                match self.process(item).await? {
                    ItemOutcome::Delivered => stats.delivered += 1,
                    ItemOutcome::Filtered => stats.filtered += 1,
                    ItemOutcome::Failed => stats.failed += 1,
                }
                if self.cancel.is_cancelled() {
                    return Ok(stats);
                }
            }
        }
        Ok(stats)
    }

    /// Delivers one message and finalizes it. Only mailbox errors propagate.
    async fn process(&mut self, item: MailItem) -> crate::mailbox::Result<ItemOutcome> {
        let uid = item.uid;
        let message = parse_message(&item.raw, self.quote_mode);
        tracing::debug!(uid, subject = %message.subject, "Parsed message");

        if let FilterDecision::Skip(reason) = self.filter.decide(&message.sender, &message.subject)
        {
            tracing::info!(uid, reason = reason.as_str(), "Skipping filtered message");
            self.session.mark_seen(uid).await?;
            return Ok(ItemOutcome::Filtered);
        }

        let report = self.deliverer.deliver(&message).await;
        if !report.is_delivered() {
            tracing::warn!(uid, "Delivery failed, leaving message unseen");
            return Ok(ItemOutcome::Failed);
        }
        if report.chunks_failed > 0 || report.attachments_failed > 0 {
            tracing::warn!(
                uid,
                chunks_failed = report.chunks_failed,
                attachments_failed = report.attachments_failed,
                "Message partly delivered"
            );
        }

        self.session.finalize(uid).await?;
        tracing::info!(uid, subject = %message.subject, "Forwarded message");
        Ok(ItemOutcome::Delivered)
    }
}
