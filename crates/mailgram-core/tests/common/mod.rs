//! In-memory mailbox, chat and renderer used by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mailgram_core::mailbox::Result as MailboxResult;
use mailgram_core::{
    Config, HtmlRenderer, IdleOutcome, MailItem, MailboxClient, MailboxConnector, MailboxError,
    RenderError,
};
use mailgram_telegram::{ChatApi, Error as ChatError, ParseMode, Result as ChatResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the fake server does when the client idles.
#[derive(Debug, Clone)]
pub enum IdleStep {
    /// A message arrives and the server pushes.
    Arrive(u32, Vec<u8>),
    /// Nothing happens before the timeout.
    Timeout,
    /// The connection drops.
    Drop,
    /// Nothing happens until the client stops idling.
    Quiet,
}

/// Server-side state shared by the connector and its clients.
#[derive(Debug, Default)]
pub struct ServerState {
    pub folders: HashSet<String>,
    /// Messages in the watched folder: uid → (raw, seen).
    pub messages: BTreeMap<u32, (Vec<u8>, bool)>,
    pub moved: Vec<(u32, String)>,
    pub commands: Vec<String>,
    pub connects: Vec<Instant>,
    pub fail_connects: usize,
    pub reject_login: bool,
    pub fail_create: bool,
    /// Keep-alives that never get an answer, as on a half-open link.
    pub hang_noops: usize,
    pub idle_script: VecDeque<IdleStep>,
}

/// A mailbox server living in memory.
///
/// When the idle script runs out, the server cancels `cancel` so the watch
/// loop under test stops.
#[derive(Clone)]
pub struct FakeServer {
    pub state: Arc<Mutex<ServerState>>,
    pub cancel: CancellationToken,
}

impl FakeServer {
    pub fn new() -> Self {
        let mut state = ServerState::default();
        state.folders.insert("INBOX".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn deliver(&self, uid: u32, raw: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(uid, (raw.into(), false));
    }

    pub fn unseen(&self) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|(_, (_, seen))| !seen)
            .map(|(uid, _)| *uid)
            .collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn commands_starting(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.starts_with(prefix))
            .collect()
    }

    pub fn connects(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            server: self.clone(),
        }
    }
}

pub struct FakeConnector {
    server: FakeServer,
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self) -> MailboxResult<FakeClient> {
        let mut state = self.server.state.lock().unwrap();
        state.connects.push(Instant::now());
        if state.reject_login {
            return Err(MailboxError::Auth("invalid credentials".to_string()));
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(MailboxError::Connection("connection refused".to_string()));
        }
        Ok(FakeClient {
            server: self.server.clone(),
        })
    }
}

pub struct FakeClient {
    server: FakeServer,
}

impl FakeClient {
    fn log(&self, command: String) {
        self.server.state.lock().unwrap().commands.push(command);
    }
}

#[async_trait]
impl MailboxClient for FakeClient {
    async fn folder_exists(&mut self, name: &str) -> MailboxResult<bool> {
        self.log(format!("exists {name}"));
        Ok(self.server.state.lock().unwrap().folders.contains(name))
    }

    async fn create_folder(&mut self, name: &str) -> MailboxResult<()> {
        self.log(format!("create {name}"));
        let mut state = self.server.state.lock().unwrap();
        if state.fail_create {
            return Err(MailboxError::Protocol("NO permission denied".to_string()));
        }
        state.folders.insert(name.to_string());
        Ok(())
    }

    async fn select(&mut self, name: &str) -> MailboxResult<()> {
        self.log(format!("select {name}"));
        Ok(())
    }

    async fn search_unseen(&mut self) -> MailboxResult<Vec<u32>> {
        self.log("search".to_string());
        Ok(self.server.unseen())
    }

    async fn fetch(&mut self, uids: &[u32]) -> MailboxResult<Vec<MailItem>> {
        self.log(format!("fetch {uids:?}"));
        let state = self.server.state.lock().unwrap();
        Ok(uids
            .iter()
            .filter_map(|uid| {
                state.messages.get(uid).map(|(raw, _)| MailItem {
                    uid: *uid,
                    raw: raw.clone(),
                })
            })
            .collect())
    }

    async fn move_to(&mut self, uid: u32, folder: &str) -> MailboxResult<()> {
        self.log(format!("move {uid} {folder}"));
        let mut state = self.server.state.lock().unwrap();
        state.messages.remove(&uid);
        state.moved.push((uid, folder.to_string()));
        Ok(())
    }

    async fn add_seen(&mut self, uid: u32) -> MailboxResult<()> {
        self.log(format!("seen {uid}"));
        if let Some((_, seen)) = self.server.state.lock().unwrap().messages.get_mut(&uid) {
            *seen = true;
        }
        Ok(())
    }

    async fn idle_wait(
        &mut self,
        _timeout: Duration,
        stop: &CancellationToken,
    ) -> MailboxResult<IdleOutcome> {
        self.log("idle".to_string());
        let step = self.server.state.lock().unwrap().idle_script.pop_front();
        match step {
            Some(IdleStep::Arrive(uid, raw)) => {
                self.server.deliver(uid, raw);
                Ok(IdleOutcome::NewData)
            }
            Some(IdleStep::Timeout) => Ok(IdleOutcome::Timeout),
            Some(IdleStep::Drop) => Err(MailboxError::Connection("connection reset".to_string())),
            Some(IdleStep::Quiet) => {
                stop.cancelled().await;
                self.log("done".to_string());
                Ok(IdleOutcome::Stopped)
            }
            None => {
                self.server.cancel.cancel();
                Ok(IdleOutcome::Stopped)
            }
        }
    }

    async fn noop(&mut self) -> MailboxResult<()> {
        self.log("noop".to_string());
        let hang = {
            let mut state = self.server.state.lock().unwrap();
            let hang = state.hang_noops > 0;
            state.hang_noops = state.hang_noops.saturating_sub(1);
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn logout(&mut self) -> MailboxResult<()> {
        self.log("logout".to_string());
        Ok(())
    }
}

/// One call made to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String, ParseMode),
    Photo(String, Option<String>, ParseMode),
    Document(String, Option<String>, ParseMode),
}

/// Chat that records calls and rejects what it is told to.
#[derive(Default)]
pub struct RecordingChat {
    pub sent: Mutex<Vec<Sent>>,
    pub reject_photos: bool,
    pub fail_all: bool,
}

impl RecordingChat {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn outcome(&self) -> ChatResult<()> {
        if self.fail_all {
            return Err(ChatError::from_api(Some(500), "Internal Server Error"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_text(&self, _chat_id: &str, text: &str, mode: ParseMode) -> ChatResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(text.to_string(), mode));
        self.outcome()
    }

    async fn send_document(
        &self,
        _chat_id: &str,
        _data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> ChatResult<()> {
        self.sent.lock().unwrap().push(Sent::Document(
            filename.to_string(),
            caption.map(str::to_string),
            mode,
        ));
        self.outcome()
    }

    async fn send_photo(
        &self,
        _chat_id: &str,
        _data: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
        mode: ParseMode,
    ) -> ChatResult<()> {
        self.sent.lock().unwrap().push(Sent::Photo(
            filename.to_string(),
            caption.map(str::to_string),
            mode,
        ));
        if self.reject_photos {
            return Err(ChatError::from_api(
                Some(400),
                "Bad Request: PHOTO_INVALID_DIMENSIONS",
            ));
        }
        self.outcome()
    }
}

/// Renderer for tests that never render.
pub struct NoRenderer;

#[async_trait]
impl HtmlRenderer for NoRenderer {
    async fn render(&self, _html: &str) -> Result<Vec<u8>, RenderError> {
        Err(RenderError::NotInstalled("wkhtmltoimage".to_string()))
    }
}

/// Builds a configuration from the required variables plus `extra`.
pub fn config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("IMAP_HOST", "imap.example.com"),
        ("IMAP_USER", "me@example.com"),
        ("IMAP_PASSWORD", "secret"),
        ("TELEGRAM_BOT_TOKEN", "42:token"),
        ("TELEGRAM_CHAT_ID", "1001"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect();
    for (key, value) in extra {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// A plain-text message.
pub fn plain_message(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!("From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\nDate: Tue, 2 Jan 2024 10:00:00 +0000\r\n\r\n{body}\r\n")
        .into_bytes()
}
