//! # mailgram-mime
//!
//! Lenient MIME message parsing for forwarding mail into chat.
//!
//! ## Features
//!
//! - **Message parsing**: Nested multipart bodies flattened into leaf parts
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 headers, RFC 2231 parameters
//! - **Charsets**: Declared charsets via the WHATWG registry, statistical
//!   detection when none is declared
//! - **Content types**: Content type and disposition parameters
//!
//! Parsing never fails. Mail that violates the RFCs still yields headers,
//! parts and text, with replacement characters where bytes cannot be
//! decoded.
//!
//! ## Quick Start
//!
//! ```
//! use mailgram_mime::Message;
//!
//! let raw = b"From: sender@example.com\r\n\
//!             Subject: =?utf-8?B?SMOpbGxv?=\r\n\
//!             Content-Type: text/plain; charset=utf-8\r\n\
//!             \r\n\
//!             Hello, World!";
//!
//! let message = Message::parse(raw);
//! assert_eq!(message.subject().as_deref(), Some("Héllo"));
//!
//! let body = message.text_part("plain").and_then(|part| part.decode_text().ok());
//! assert_eq!(body.as_deref(), Some("Hello, World!"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod charset;
pub mod encoding;

pub use content_type::{ContentType, Disposition, DispositionKind};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, Part, TransferEncoding, parse_date};
