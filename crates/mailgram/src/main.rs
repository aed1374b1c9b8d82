//! `mailgram` - forwards new mail from an IMAP folder to a Telegram chat.
//!
//! Configuration comes from the environment, optionally through a `.env`
//! file. The process runs until interrupted; credential and folder errors end
//! it with a non-zero exit code.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use anyhow::Context;
use mailgram_core::config::default_log_level;
use mailgram_core::{
    Config, Deliverer, ImapConnector, MailboxSession, WatchLoop, Wkhtmltoimage,
};
use mailgram_telegram::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // LOG_LEVEL may come from .env, so load it before the subscriber.
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Ok(path) = &dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        host = %config.imap.host,
        port = config.imap.port,
        folder = %config.imap.mailbox,
        processed = ?config.imap.processed_folder,
        quote_mode = config.forwarding.quote_mode.as_str(),
        render_html = config.forwarding.render_html,
        "Starting mailgram"
    );

    let bot = Bot::new(config.telegram.bot_token.clone()).context("Invalid bot token")?;
    let deliverer = Deliverer::new(
        bot,
        Wkhtmltoimage::new(),
        config.telegram.chat_id.clone(),
        config.forwarding.clone(),
    );
    let session = MailboxSession::new(
        ImapConnector::new(&config.imap),
        &config.imap,
        config.reconnect,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    WatchLoop::new(session, deliverer, &config, cancel)
        .run()
        .await
        .context("Mailbox watch stopped")?;

    info!("Shut down");
    Ok(())
}

/// Installs the subscriber. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = default_log_level(|key| std::env::var(key).ok());
        tracing_subscriber::EnvFilter::try_new(&level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    shutdown_signal().await;
    info!("Shutdown requested, finishing current message");
    cancel.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                () = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
