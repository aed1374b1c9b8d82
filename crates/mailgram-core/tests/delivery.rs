//! Attachment delivery fallbacks.

#![allow(clippy::unwrap_used)]

mod common;

use common::{NoRenderer, RecordingChat, Sent, config};
use mailgram_core::delivery::attachment_caption;
use mailgram_core::{Deliverer, QuoteMode, parse_message};
use mailgram_telegram::ParseMode;

const WITH_IMAGE: &str = concat!(
    "From: a@example.com\r\n",
    "Subject: photos\r\n",
    "Content-Type: multipart/mixed; boundary=b\r\n\r\n",
    "--b\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n",
    "--b\r\nContent-Type: image/png\r\n",
    "Content-Disposition: attachment; filename=\"big_pic.png\"\r\n",
    "Content-Transfer-Encoding: base64\r\n\r\n",
    "iVBORw0KGgo=\r\n",
    "--b--\r\n",
);

#[tokio::test]
async fn test_rejected_photo_is_resent_as_document() {
    let config = config(&[("TELEGRAM_IMAGE_PREVIEW", "true")]);
    let chat = RecordingChat {
        reject_photos: true,
        ..RecordingChat::default()
    };
    let deliverer = Deliverer::new(chat, NoRenderer, "1001", config.forwarding.clone());
    let message = parse_message(WITH_IMAGE.as_bytes(), QuoteMode::Markdown);
    let caption = attachment_caption(&message.attachments[0]);

    let report = deliverer.deliver(&message).await;

    assert!(report.is_delivered());
    assert_eq!(report.attachments_sent, 1);
    assert_eq!(report.attachments_failed, 0);

    let sent = deliverer.chat().sent();
    let uploads: Vec<_> = sent
        .iter()
        .filter(|s| !matches!(s, Sent::Text(..)))
        .cloned()
        .collect();
    assert_eq!(
        uploads,
        vec![
            Sent::Photo("big_pic.png".to_string(), Some(caption.clone()), ParseMode::Plain),
            Sent::Document("big_pic.png".to_string(), Some(caption), ParseMode::Plain),
        ]
    );
}

#[tokio::test]
async fn test_preview_disabled_sends_document_only() {
    let config = config(&[]);
    let deliverer = Deliverer::new(
        RecordingChat::default(),
        NoRenderer,
        "1001",
        config.forwarding.clone(),
    );
    let message = parse_message(WITH_IMAGE.as_bytes(), QuoteMode::Markdown);

    deliverer.deliver(&message).await;

    let sent = deliverer.chat().sent();
    assert!(matches!(sent.last(), Some(Sent::Document(name, ..)) if name == "big_pic.png"));
    assert!(!sent.iter().any(|s| matches!(s, Sent::Photo(..))));
    assert!(sent.contains(&Sent::Text(
        "📎 *Attachments (1):*".to_string(),
        ParseMode::Markdown
    )));
}
