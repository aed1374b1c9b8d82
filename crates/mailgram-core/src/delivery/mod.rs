//! Sending a parsed message to the chat.
//!
//! Delivery never fails as a whole. Each step records its outcome in a
//! [`DeliveryReport`] and falls back where it can: formatted text is retried
//! as plain text, a rejected image is re-sent as strips or replaced by text,
//! a rejected photo attachment is re-sent as a document.

mod header;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mailgram_telegram::markdown::escape;
use mailgram_telegram::{ChatApi, ParseMode};

use crate::config::ForwardingConfig;
use crate::render::{HtmlRenderer, MAX_STRIP_HEIGHT, image_dimensions, slice_image};
use crate::transform::{
    Attachment, DEFAULT_MAX_CHUNK, EMPTY_BODY, ParsedMessage, QUOTED_CONTENT_REMOVED,
    split_for_delivery,
};

pub use header::{
    Header, TITLE, attachment_caption, attachments_title, build_header, format_size,
};

/// Image types sent as photo previews.
pub const PREVIEW_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/webp",
];

/// Filename of a rendered body.
const BODY_IMAGE_NAME: &str = "email_body.jpg";

/// Line put in front of a forwarded text body.
pub const BODY_SEPARATOR: &str = "‐‐‐‐‐‐‐‐‐‐ Body ‐‐‐‐‐‐‐‐‐‐\n\n";

/// Notice sent once when the renderer is missing.
const RENDERER_MISSING_NOTICE: &str =
    "HTML rendering is unavailable: wkhtmltoimage is not installed. Bodies are sent as text.";

/// What a delivery attempt achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The header reached the chat, as text or as an image caption.
    pub header_sent: bool,
    /// The body was delivered as a rendered image.
    pub body_as_image: bool,
    /// Body text chunks delivered.
    pub chunks_sent: usize,
    /// Body text chunks that could not be delivered.
    pub chunks_failed: usize,
    /// Attachments delivered as photo or document.
    pub attachments_sent: usize,
    /// Attachments that could not be delivered.
    pub attachments_failed: usize,
}

impl DeliveryReport {
    /// Returns `true` if the message reached the chat and may be finalized.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.header_sent
    }
}

/// Sends parsed messages to one chat.
pub struct Deliverer<C, R> {
    chat: C,
    renderer: R,
    chat_id: String,
    config: ForwardingConfig,
    render_available: AtomicBool,
    strip_pause: Duration,
}

impl<C, R> Deliverer<C, R>
where
    C: ChatApi,
    R: HtmlRenderer,
{
    /// Creates a deliverer.
    pub fn new(chat: C, renderer: R, chat_id: impl Into<String>, config: ForwardingConfig) -> Self {
        Self {
            chat,
            renderer,
            chat_id: chat_id.into(),
            config,
            render_available: AtomicBool::new(true),
            strip_pause: Duration::from_millis(500),
        }
    }

    /// Sets the pause between image strips.
    #[must_use]
    pub const fn with_strip_pause(mut self, pause: Duration) -> Self {
        self.strip_pause = pause;
        self
    }

    /// Returns the chat client.
    pub const fn chat(&self) -> &C {
        &self.chat
    }

    /// Returns `true` until the renderer has been found missing.
    pub fn render_available(&self) -> bool {
        self.render_available.load(Ordering::Relaxed)
    }

    /// Delivers one message: header, body, then attachments.
    pub async fn deliver(&self, message: &ParsedMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let header = build_header(message, &self.config.header_fields);

        if self.config.forward_body
            && self.config.render_html
            && self.render_available()
            && let Some(html) = message.html_body.as_deref()
            && self.send_rendered(html, &header.caption).await
        {
            report.header_sent = true;
            report.body_as_image = true;
        }

        if !report.body_as_image {
            report.header_sent = self.send_text(&header.message).await;
            if !report.header_sent {
                return report;
            }
            if self.config.forward_body {
                self.send_body(&message.body_text, &mut report).await;
            }
        }

        if self.config.forward_attachments && !message.attachments.is_empty() {
            self.send_attachments(&message.attachments, &mut report).await;
        }

        report
    }

    /// Sends Markdown text, retrying once as plain text if the markup is
    /// rejected.
    async fn send_text(&self, text: &str) -> bool {
        match self.chat.send_text(&self.chat_id, text, ParseMode::Markdown).await {
            Ok(()) => true,
            Err(e) if e.is_parse_error() => {
                tracing::warn!(error = %e, "Markdown rejected, retrying as plain text");
                self.chat
                    .send_text(&self.chat_id, text, ParseMode::Plain)
                    .await
                    .map_err(|e| tracing::error!(error = %e, "Failed to send plain text"))
                    .is_ok()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send text");
                false
            }
        }
    }

    /// Sends the body in chunks. The first chunk opens with
    /// [`BODY_SEPARATOR`] unless the body is a placeholder.
    async fn send_body(&self, body: &str, report: &mut DeliveryReport) {
        let separator = if body == EMPTY_BODY || body == QUOTED_CONTENT_REMOVED {
            ""
        } else {
            BODY_SEPARATOR
        };
        let max = DEFAULT_MAX_CHUNK - separator.chars().count();
        let chunks = split_for_delivery(&escape(body), max);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            if total > 1 && chunk.trim().is_empty() {
                continue;
            }
            let text = if i == 0 {
                format!("{separator}{chunk}")
            } else {
                chunk.clone()
            };
            if self.send_text(&text).await {
                report.chunks_sent += 1;
            } else {
                report.chunks_failed += 1;
            }
        }
    }

    /// Renders the HTML body and sends it as a photo with the header as
    /// caption. Returns `false` if the text path should be used instead.
    async fn send_rendered(&self, html: &str, caption: &str) -> bool {
        let image = match self.renderer.render(html).await {
            Ok(image) => image,
            Err(e) if e.is_not_installed() => {
                tracing::error!(error = %e, "HTML renderer missing, disabling rendering");
                self.render_available.store(false, Ordering::Relaxed);
                if let Err(e) = self
                    .chat
                    .send_text(&self.chat_id, RENDERER_MISSING_NOTICE, ParseMode::Plain)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to send renderer notice");
                }
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to render HTML body");
                return false;
            }
        };

        match image_dimensions(&image) {
            Ok((width, height)) if height > MAX_STRIP_HEIGHT => {
                tracing::debug!(width, height, "Rendered image too tall, sending strips");
                return self.send_strips(&image, caption).await;
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Cannot read rendered image size"),
        }

        match self
            .chat
            .send_photo(
                &self.chat_id,
                image.clone(),
                BODY_IMAGE_NAME,
                Some(caption),
                ParseMode::Markdown,
            )
            .await
        {
            Ok(()) => {
                tracing::info!(bytes = image.len(), "Sent HTML body as image");
                true
            }
            Err(e) if e.is_image_rejection() => {
                tracing::warn!(error = %e, "Rendered image rejected, sending strips");
                self.send_strips(&image, caption).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send rendered image");
                false
            }
        }
    }

    async fn send_strips(&self, image: &[u8], caption: &str) -> bool {
        let strips = match slice_image(image, MAX_STRIP_HEIGHT) {
            Ok(strips) => strips,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to slice rendered image");
                return false;
            }
        };
        let total = strips.len();
        if total <= 1 {
            tracing::warn!("Rendered image fits one strip but was rejected");
            return false;
        }

        for (i, strip) in strips.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.strip_pause).await;
            }
            let part_caption = if i == 0 {
                caption.to_string()
            } else {
                format!("(image {}/{total})", i + 1)
            };
            let filename = format!("email_body_part_{}.jpg", i + 1);
            if let Err(e) = self
                .chat
                .send_photo(
                    &self.chat_id,
                    strip,
                    &filename,
                    Some(&part_caption),
                    ParseMode::Markdown,
                )
                .await
            {
                tracing::warn!(error = %e, strip = i + 1, total, "Failed to send image strip");
                return false;
            }
        }
        tracing::info!(strips = total, "Sent HTML body as image strips");
        true
    }

    async fn send_attachments(&self, attachments: &[Attachment], report: &mut DeliveryReport) {
        if !self.send_text(&attachments_title(attachments.len())).await {
            tracing::warn!("Failed to send attachment list title");
        }

        for attachment in attachments {
            if attachment.data.is_empty() {
                tracing::warn!(filename = %attachment.filename, "Skipping empty attachment");
                continue;
            }
            if self.send_attachment(attachment).await {
                report.attachments_sent += 1;
            } else {
                report.attachments_failed += 1;
            }
        }
    }

    /// Sends one attachment. Photo and document share the same plain caption.
    async fn send_attachment(&self, attachment: &Attachment) -> bool {
        let caption = attachment_caption(attachment);
        let size = attachment.data.len() as u64;

        let previewable = self.config.image_preview
            && PREVIEW_MIME_TYPES.contains(&attachment.mime_type.to_ascii_lowercase().as_str())
            && size > 0
            && size < self.config.image_preview_max_bytes;
        if previewable {
            match self
                .chat
                .send_photo(
                    &self.chat_id,
                    attachment.data.clone(),
                    &attachment.filename,
                    Some(&caption),
                    ParseMode::Plain,
                )
                .await
            {
                Ok(()) => return true,
                Err(e) => tracing::warn!(
                    filename = %attachment.filename,
                    error = %e,
                    "Photo preview failed, sending as document"
                ),
            }
        }

        match self
            .chat
            .send_document(
                &self.chat_id,
                attachment.data.clone(),
                &attachment.filename,
                Some(&caption),
                ParseMode::Plain,
            )
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_file_too_big() => {
                tracing::warn!(filename = %attachment.filename, error = %e, "Attachment too big");
                let notice = format!(
                    "📎 Attachment '{}' is too big to send ({}).",
                    escape(&attachment.filename),
                    format_size(attachment.data.len())
                );
                self.send_text(&notice).await;
                false
            }
            Err(e) => {
                tracing::error!(filename = %attachment.filename, error = %e, "Failed to send attachment");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::RenderError;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use mailgram_telegram::{Error as ChatError, Result as ChatResult};
    use std::io::Cursor;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Text(String, ParseMode),
        Photo(String, Option<String>, ParseMode),
        Document(String, Option<String>, ParseMode),
    }

    #[derive(Default)]
    struct FakeChat {
        calls: Mutex<Vec<Call>>,
        photo_times: Mutex<Vec<Instant>>,
        reject_markdown: bool,
        reject_photos: bool,
        /// 1-based photo upload that fails with a server error.
        fail_photo: Option<usize>,
        too_big: bool,
    }

    impl FakeChat {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn photos(&self) -> Vec<(String, Option<String>)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Photo(name, caption, _) => Some((name, caption)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatApi for FakeChat {
        async fn send_text(&self, _: &str, text: &str, mode: ParseMode) -> ChatResult<()> {
            self.calls.lock().unwrap().push(Call::Text(text.to_string(), mode));
            if self.reject_markdown && mode == ParseMode::Markdown {
                return Err(ChatError::from_api(Some(400), "Bad Request: can't parse entities"));
            }
            Ok(())
        }

        async fn send_document(
            &self,
            _: &str,
            _: Vec<u8>,
            filename: &str,
            caption: Option<&str>,
            mode: ParseMode,
        ) -> ChatResult<()> {
            self.calls.lock().unwrap().push(Call::Document(
                filename.to_string(),
                caption.map(str::to_string),
                mode,
            ));
            if self.too_big {
                return Err(ChatError::from_api(Some(400), "Bad Request: file is too big"));
            }
            Ok(())
        }

        async fn send_photo(
            &self,
            _: &str,
            _: Vec<u8>,
            filename: &str,
            caption: Option<&str>,
            mode: ParseMode,
        ) -> ChatResult<()> {
            let count = {
                let mut times = self.photo_times.lock().unwrap();
                times.push(Instant::now());
                times.len()
            };
            self.calls.lock().unwrap().push(Call::Photo(
                filename.to_string(),
                caption.map(str::to_string),
                mode,
            ));
            if self.fail_photo == Some(count) {
                return Err(ChatError::from_api(Some(502), "Bad Gateway"));
            }
            if self.reject_photos {
                return Err(ChatError::from_api(Some(400), "Bad Request: PHOTO_INVALID_DIMENSIONS"));
            }
            Ok(())
        }
    }

    struct MissingRenderer;

    #[async_trait]
    impl HtmlRenderer for MissingRenderer {
        async fn render(&self, _: &str) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::NotInstalled("wkhtmltoimage".to_string()))
        }
    }

    struct StaticRenderer(Vec<u8>);

    #[async_trait]
    impl HtmlRenderer for StaticRenderer {
        async fn render(&self, _: &str) -> Result<Vec<u8>, RenderError> {
            Ok(self.0.clone())
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([240, 240, 240]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn render_config() -> ForwardingConfig {
        ForwardingConfig {
            render_html: true,
            ..ForwardingConfig::default()
        }
    }

    fn message() -> ParsedMessage {
        crate::transform::parse_message(
            b"From: a@example.com\r\nSubject: hello_world\r\n\r\nbody text\r\n",
            crate::config::QuoteMode::Markdown,
        )
    }

    #[tokio::test]
    async fn test_header_then_body() {
        let deliverer = Deliverer::new(
            FakeChat::default(),
            MissingRenderer,
            "1",
            ForwardingConfig::default(),
        );
        let report = deliverer.deliver(&message()).await;
        assert!(report.is_delivered());
        assert_eq!(report.chunks_sent, 1);

        let calls = deliverer.chat().calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], Call::Text(text, ParseMode::Markdown) if text.contains("hello\\_world")));
        assert_eq!(
            calls[1],
            Call::Text(format!("{BODY_SEPARATOR}body text"), ParseMode::Markdown)
        );
    }

    #[tokio::test]
    async fn test_placeholder_body_has_no_separator() {
        let deliverer = Deliverer::new(
            FakeChat::default(),
            MissingRenderer,
            "1",
            ForwardingConfig::default(),
        );
        let mut msg = message();
        msg.body_text = EMPTY_BODY.to_string();
        deliverer.deliver(&msg).await;

        let calls = deliverer.chat().calls();
        assert_eq!(calls[1], Call::Text(escape(EMPTY_BODY), ParseMode::Markdown));
    }

    #[tokio::test]
    async fn test_parse_error_retries_plain() {
        let chat = FakeChat {
            reject_markdown: true,
            ..FakeChat::default()
        };
        let deliverer = Deliverer::new(chat, MissingRenderer, "1", ForwardingConfig::default());
        let report = deliverer.deliver(&message()).await;
        assert!(report.header_sent);

        let modes: Vec<_> = deliverer
            .chat()
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::Text(_, mode) => mode,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            modes,
            vec![
                ParseMode::Markdown,
                ParseMode::Plain,
                ParseMode::Markdown,
                ParseMode::Plain
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_renderer_notice_sent_once() {
        let config = ForwardingConfig {
            render_html: true,
            ..ForwardingConfig::default()
        };
        let deliverer = Deliverer::new(FakeChat::default(), MissingRenderer, "1", config);
        let mut msg = message();
        msg.html_body = Some("<p>hi</p>".to_string());

        deliverer.deliver(&msg).await;
        assert!(!deliverer.render_available());
        deliverer.deliver(&msg).await;

        let notices = deliverer
            .chat()
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Text(text, _) if text == RENDERER_MISSING_NOTICE))
            .count();
        assert_eq!(notices, 1);
    }

    #[tokio::test]
    async fn test_rendered_image_carries_header() {
        let deliverer = Deliverer::new(
            FakeChat::default(),
            StaticRenderer(vec![1, 2, 3]),
            "1",
            render_config(),
        );
        let mut msg = message();
        msg.html_body = Some("<p>hi</p>".to_string());

        let report = deliverer.deliver(&msg).await;
        assert!(report.body_as_image && report.header_sent);
        let calls = deliverer.chat().calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::Photo(name, Some(caption), ParseMode::Markdown) if name == BODY_IMAGE_NAME && caption.starts_with(TITLE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tall_image_sent_as_paced_strips() {
        let deliverer = Deliverer::new(
            FakeChat::default(),
            StaticRenderer(png(100, 6000)),
            "1",
            render_config(),
        );
        let mut msg = message();
        msg.html_body = Some("<p>long</p>".to_string());

        let report = deliverer.deliver(&msg).await;
        assert!(report.body_as_image && report.header_sent);

        let photos = deliverer.chat().photos();
        let names: Vec<_> = photos.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["email_body_part_1.jpg", "email_body_part_2.jpg", "email_body_part_3.jpg"]
        );
        assert!(photos[0].1.as_deref().unwrap().starts_with(TITLE));
        assert_eq!(photos[1].1.as_deref(), Some("(image 2/3)"));
        assert_eq!(photos[2].1.as_deref(), Some("(image 3/3)"));

        let times = deliverer.chat().photo_times.lock().unwrap().clone();
        let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![Duration::from_millis(500); 2]);
        assert!(
            !deliverer
                .chat()
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Text(..)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_strip_falls_back_to_text() {
        let chat = FakeChat {
            fail_photo: Some(2),
            ..FakeChat::default()
        };
        let deliverer = Deliverer::new(chat, StaticRenderer(png(100, 6000)), "1", render_config());
        let mut msg = message();
        msg.html_body = Some("<p>long</p>".to_string());

        let report = deliverer.deliver(&msg).await;
        assert!(report.header_sent && !report.body_as_image);
        assert_eq!(report.chunks_sent, 1);

        let calls = deliverer.chat().calls();
        assert_eq!(deliverer.chat().photos().len(), 2);
        assert!(matches!(&calls[2], Call::Text(text, _) if text.starts_with(TITLE)));
        assert!(matches!(&calls[3], Call::Text(text, _) if text.ends_with("body text")));
    }

    #[tokio::test]
    async fn test_short_image_is_sent_whole() {
        let deliverer = Deliverer::new(
            FakeChat::default(),
            StaticRenderer(png(100, 2560)),
            "1",
            render_config(),
        );
        let mut msg = message();
        msg.html_body = Some("<p>short</p>".to_string());

        deliverer.deliver(&msg).await;
        let photos = deliverer.chat().photos();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].0, BODY_IMAGE_NAME);
    }

    #[tokio::test]
    async fn test_unsliceable_rejection_falls_back_to_text() {
        let chat = FakeChat {
            reject_photos: true,
            ..FakeChat::default()
        };
        let deliverer =
            Deliverer::new(chat, StaticRenderer(b"garbage".to_vec()), "1", render_config());
        let mut msg = message();
        msg.html_body = Some("<p>hi</p>".to_string());

        let report = deliverer.deliver(&msg).await;
        assert!(report.header_sent && !report.body_as_image);
        assert_eq!(report.chunks_sent, 1);
    }

    #[tokio::test]
    async fn test_document_too_big_sends_notice() {
        let chat = FakeChat {
            too_big: true,
            ..FakeChat::default()
        };
        let deliverer = Deliverer::new(chat, MissingRenderer, "1", ForwardingConfig::default());
        let mut msg = message();
        msg.attachments.push(Attachment {
            filename: "huge.bin".to_string(),
            data: vec![1; 10],
            mime_type: "application/octet-stream".to_string(),
        });

        let report = deliverer.deliver(&msg).await;
        assert_eq!(report.attachments_failed, 1);
        let calls = deliverer.chat().calls();
        assert!(matches!(calls.last(), Some(Call::Text(text, _)) if text.contains("too big")));
    }

    #[tokio::test]
    async fn test_body_and_attachments_can_be_disabled() {
        let config = ForwardingConfig {
            forward_body: false,
            forward_attachments: false,
            ..ForwardingConfig::default()
        };
        let deliverer = Deliverer::new(FakeChat::default(), MissingRenderer, "1", config);
        let mut msg = message();
        msg.attachments.push(Attachment {
            filename: "a.txt".to_string(),
            data: vec![1],
            mime_type: "text/plain".to_string(),
        });
        deliverer.deliver(&msg).await;
        assert_eq!(deliverer.chat().calls().len(), 1);
    }
}
