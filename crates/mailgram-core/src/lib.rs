//! # mailgram-core
//!
//! Forwards new mail from an IMAP folder to a Telegram chat.
//!
//! This crate provides:
//! - **Configuration** from the environment or any key lookup
//! - **Transformation** of raw messages into chat-ready fields, with quote
//!   handling and size-bounded splitting
//! - **Filters** on sender and subject
//! - **Delivery** of header, body and attachments with fallbacks for
//!   rejected formatting, images and oversized files
//! - **Rendering** of HTML bodies to images through `wkhtmltoimage`
//! - **Mailbox sessions** over IMAP with IDLE and reconnect backoff
//! - **The watch loop** tying it together until cancelled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod delivery;
mod error;
pub mod filter;
pub mod mailbox;
pub mod render;
pub mod transform;
pub mod watch;

pub use config::{
    Config, ConfigError, ForwardingConfig, HeaderField, ImapConfig, QuoteMode, ReconnectPolicy,
    TelegramConfig,
};
pub use delivery::{Deliverer, DeliveryReport};
pub use error::{Error, Result};
pub use filter::{FilterDecision, FilterRule, SkipReason};
pub use mailbox::{
    Backoff, BackoffStep, IdleOutcome, ImapClient, ImapConnector, MailItem, MailboxClient,
    MailboxConnector, MailboxError, MailboxSession, SessionState,
};
pub use render::{HtmlRenderer, RenderError, Wkhtmltoimage};
pub use transform::{Attachment, ParsedMessage, Priority, parse_message};
pub use watch::{DrainStats, WatchLoop};
