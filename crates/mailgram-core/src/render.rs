//! Rendering HTML bodies to images.

use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Width of rendered images, in pixels.
pub const RENDER_WIDTH: u32 = 800;

/// Tallest strip Telegram accepts without complaint.
pub const MAX_STRIP_HEIGHT: u32 = 2560;

/// JPEG quality of sliced strips.
const STRIP_QUALITY: u8 = 85;

const RENDER_TIMEOUT: Duration = Duration::from_secs(60);

const STYLESHEET: &str = "body { font-family: sans-serif; margin: 16px; word-wrap: break-word; } \
img { max-width: 100%; height: auto; } \
table { border-collapse: collapse; } \
td, th { border: 1px solid #ddd; padding: 4px; } \
pre, code { white-space: pre-wrap; }";

/// Rendering error.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The renderer executable is not installed.
    #[error("Renderer not installed: {0}")]
    NotInstalled(String),

    /// The renderer ran but produced no image.
    #[error("Rendering failed: {0}")]
    Failed(String),

    /// The renderer did not finish in time.
    #[error("Rendering timed out")]
    Timeout,

    /// I/O error talking to the renderer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image could not be decoded or encoded.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl RenderError {
    /// Returns `true` if rendering can never succeed in this process.
    #[must_use]
    pub const fn is_not_installed(&self) -> bool {
        matches!(self, Self::NotInstalled(_))
    }
}

/// Turns an HTML document into an encoded image.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    /// Renders `html` and returns the encoded image bytes.
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

/// Renderer backed by the `wkhtmltoimage` executable.
#[derive(Debug, Clone)]
pub struct Wkhtmltoimage {
    program: String,
}

impl Default for Wkhtmltoimage {
    fn default() -> Self {
        Self {
            program: "wkhtmltoimage".to_string(),
        }
    }
}

impl Wkhtmltoimage {
    /// Creates a renderer that looks up `wkhtmltoimage` on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses another executable.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, document: String) -> Result<Vec<u8>, RenderError> {
        let width = RENDER_WIDTH.to_string();
        let mut child = Command::new(&self.program)
            .args(["--format", "jpg", "--width", &width, "--quiet"])
            .args(["--encoding", "UTF-8", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::NotInstalled(self.program.clone())
                } else {
                    RenderError::Io(e)
                }
            })?;

        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(document.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Renderer closed stdin early"),
            Err(e) => tracing::debug!(error = %e, "Renderer input task failed"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Failed(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(RenderError::Failed("empty output".to_string()));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl HtmlRenderer for Wkhtmltoimage {
    async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let document = wrap_document(html);
        let image = tokio::time::timeout(RENDER_TIMEOUT, self.run(document))
            .await
            .map_err(|_| RenderError::Timeout)??;
        tracing::debug!(bytes = image.len(), "Rendered HTML body");
        Ok(image)
    }
}

/// Wraps a body fragment or document in a page with a fixed stylesheet.
#[must_use]
pub fn wrap_document(html: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"><style>{STYLESHEET}</style></head>\n<body>{html}</body></html>"
    )
}

/// Reads the width and height of an encoded image without decoding it.
///
/// # Errors
///
/// Returns an error if the format is unknown or the header is malformed.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32), RenderError> {
    let reader = image::ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Cuts an encoded image into horizontal JPEG strips of at most
/// `max_height` pixels, all of the original width.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded or a strip cannot be
/// encoded.
pub fn slice_image(data: &[u8], max_height: u32) -> Result<Vec<Vec<u8>>, RenderError> {
    let image = image::load_from_memory(data)?;
    let (width, height) = image.dimensions();
    let max_height = max_height.max(1);

    let mut strips = Vec::new();
    let mut top = 0;
    while top < height {
        let strip_height = max_height.min(height - top);
        let strip = DynamicImage::ImageRgb8(image.crop_imm(0, top, width, strip_height).to_rgb8());
        let mut buf = Vec::new();
        strip.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, STRIP_QUALITY))?;
        strips.push(buf);
        top += strip_height;
    }
    Ok(strips)
}
