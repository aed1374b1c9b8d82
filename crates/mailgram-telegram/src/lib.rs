//! # mailgram-telegram
//!
//! Minimal Telegram Bot API client for delivering forwarded mail.
//!
//! ## Features
//!
//! - **Text**: `sendMessage` with legacy Markdown or plain text
//! - **Uploads**: `sendDocument` and `sendPhoto` via multipart forms
//! - **Error classification**: formatting, image and size rejections are
//!   distinguishable so callers can fall back
//!
//! The [`ChatApi`] trait is the seam the forwarder delivers through; [`Bot`]
//! is its HTTPS implementation.
//!
//! ## Example
//!
//! ```no_run
//! use mailgram_telegram::{Bot, ChatApi, ParseMode};
//!
//! # async fn example() -> mailgram_telegram::Result<()> {
//! let bot = Bot::new("123456:ABC-DEF")?;
//! bot.send_text("-1001234567890", "*New mail*", ParseMode::Markdown).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod api;
mod bot;
mod error;

pub mod markdown;

pub use api::{ChatApi, ParseMode};
pub use bot::{Bot, DEFAULT_API_BASE};
pub use error::{Error, Result};
