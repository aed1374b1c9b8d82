//! Bot API client over HTTPS.

use crate::api::{ChatApi, ParseMode};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Per-request timeout. Uploads of large attachments need the headroom.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Body of `sendMessage`.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

/// Telegram bot client.
#[derive(Clone)]
pub struct Bot {
    token: String,
    api_base: String,
    http_client: Client,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("token", &"<redacted>")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Creates a client for the given bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty or the HTTP client cannot be
    /// built.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::InvalidConfig("bot token is empty".to_string()));
        }
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            http_client,
        })
    }

    /// Points the client at another Bot API server.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Sends a request and maps the response envelope to a result.
    ///
    /// Transport errors have their URL stripped, since it embeds the token.
    async fn call(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(envelope) if envelope.ok => Ok(()),
            Ok(envelope) => Err(Error::from_api(
                envelope.error_code.or(Some(i64::from(status.as_u16()))),
                envelope.description.unwrap_or_else(|| status.to_string()),
            )),
            Err(_) => Err(Error::from_api(
                Some(i64::from(status.as_u16())),
                status
                    .canonical_reason()
                    .map_or_else(|| status.to_string(), str::to_string),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload(
        &self,
        method: &str,
        field: &'static str,
        chat_id: &str,
        data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<()> {
        let file = Part::bytes(data).file_name(filename.to_string());
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, file);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
            if let Some(parse_mode) = mode.as_api_str() {
                form = form.text("parse_mode", parse_mode);
            }
        }

        let request = self.http_client.post(self.method_url(method)).multipart(form);
        self.call(request).await
    }
}

#[async_trait]
impl ChatApi for Bot {
    async fn send_text(&self, chat_id: &str, text: &str, mode: ParseMode) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: mode.as_api_str(),
            disable_web_page_preview: true,
        };
        let request = self
            .http_client
            .post(self.method_url("sendMessage"))
            .json(&body);
        self.call(request).await?;
        tracing::debug!(chat_id, chars = text.chars().count(), "Sent text message");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: &str,
        data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<()> {
        let size = data.len();
        self.upload(
            "sendDocument",
            "document",
            chat_id,
            data,
            filename,
            caption,
            mode,
        )
        .await?;
        tracing::debug!(chat_id, filename, size, "Sent document");
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> Result<()> {
        let size = data.len();
        self.upload(
            "sendPhoto",
            "photo",
            chat_id,
            data,
            filename,
            caption,
            mode,
        )
        .await?;
        tracing::debug!(chat_id, filename, size, "Sent photo");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_rejects_empty_token() {
        assert!(matches!(Bot::new("  "), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_method_url() {
        let bot = Bot::new("123:abc")
            .unwrap()
            .with_api_base("http://localhost:8081/");
        assert_eq!(
            bot.method_url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_send_message_body() {
        let body = SendMessage {
            chat_id: "42",
            text: "*hi*",
            parse_mode: ParseMode::Markdown.as_api_str(),
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["parse_mode"], "Markdown");

        let plain = SendMessage {
            parse_mode: ParseMode::Plain.as_api_str(),
            ..body
        };
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("parse_mode").is_none());
    }

    #[test]
    fn test_api_response_envelope() {
        let envelope: ApiResponse = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: file is too big"}"#,
        )
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.error_code, Some(400));

        let envelope: ApiResponse =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":1}}"#).unwrap();
        assert!(envelope.ok);
    }
}
