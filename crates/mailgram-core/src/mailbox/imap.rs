//! IMAP over implicit TLS.

use std::sync::Arc;
use std::time::Duration;

use async_imap::Session;
use async_imap::extensions::idle::IdleResponse;
use async_imap::types::{Fetch, Name};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;

use super::{IdleOutcome, MailItem, MailboxClient, MailboxConnector, MailboxError, Result};
use crate::config::ImapConfig;

/// Bound on connecting and logging in.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type ImapSession = Session<TlsStream<TcpStream>>;

/// Connects to the configured server.
#[derive(Clone)]
pub struct ImapConnector {
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl std::fmt::Debug for ImapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ImapConnector {
    /// Creates a connector for the configured account.
    #[must_use]
    pub fn new(config: &ImapConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn open(&self) -> Result<ImapClient> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| MailboxError::Connection(e.to_string()))?;

        let connector = create_tls_connector()?;
        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| MailboxError::Connection(format!("invalid host name: {e}")))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| MailboxError::Connection(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls);
        let session = client
            .login(&self.username, &self.password)
            .await
            .map_err(|(e, _)| match e {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    MailboxError::Auth(msg)
                }
                other => MailboxError::Connection(other.to_string()),
            })?;

        tracing::debug!(host = %self.host, port = self.port, "IMAP login successful");
        Ok(ImapClient {
            session: Some(session),
        })
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    type Client = ImapClient;

    async fn connect(&self) -> Result<ImapClient> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.open())
            .await
            .map_err(|_| MailboxError::Timeout)?
    }
}

/// Creates a TLS connector trusting the bundled web PKI roots.
fn create_tls_connector() -> Result<TlsConnector> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MailboxError::Connection(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn imap_error(e: async_imap::error::Error) -> MailboxError {
    match e {
        async_imap::error::Error::Io(e) => MailboxError::Connection(e.to_string()),
        other => MailboxError::Protocol(other.to_string()),
    }
}

/// An authenticated IMAP session.
pub struct ImapClient {
    // Taken while idling; `None` afterwards means the session was lost.
    session: Option<ImapSession>,
}

impl ImapClient {
    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| MailboxError::Connection("session lost".to_string()))
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl MailboxClient for ImapClient {
    async fn folder_exists(&mut self, name: &str) -> Result<bool> {
        let names: Vec<Name> = self
            .session()?
            .list(Some(""), Some(name))
            .await
            .map_err(imap_error)?
            .try_collect()
            .await
            .map_err(imap_error)?;
        Ok(!names.is_empty())
    }

    async fn create_folder(&mut self, name: &str) -> Result<()> {
        self.session()?.create(name).await.map_err(imap_error)
    }

    async fn select(&mut self, name: &str) -> Result<()> {
        let mailbox = self.session()?.select(name).await.map_err(imap_error)?;
        tracing::debug!(folder = name, exists = mailbox.exists, "Selected folder");
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>> {
        let uids = self
            .session()?
            .uid_search("UNSEEN")
            .await
            .map_err(imap_error)?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<MailItem>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let fetches: Vec<Fetch> = self
            .session()?
            .uid_fetch(uid_set(uids), "BODY.PEEK[]")
            .await
            .map_err(imap_error)?
            .try_collect()
            .await
            .map_err(imap_error)?;

        let mut items: Vec<MailItem> = fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                let Some(body) = fetch.body() else {
                    tracing::warn!(uid, "Fetch response without a body");
                    return None;
                };
                Some(MailItem {
                    uid,
                    raw: body.to_vec(),
                })
            })
            .collect();
        items.sort_by_key(|item| item.uid);
        Ok(items)
    }

    async fn move_to(&mut self, uid: u32, folder: &str) -> Result<()> {
        self.session()?
            .uid_mv(uid.to_string(), folder)
            .await
            .map_err(imap_error)
    }

    async fn add_seen(&mut self, uid: u32) -> Result<()> {
        let _: Vec<Fetch> = self
            .session()?
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await
            .map_err(imap_error)?
            .try_collect()
            .await
            .map_err(imap_error)?;
        Ok(())
    }

    async fn idle_wait(
        &mut self,
        timeout: Duration,
        stop: &CancellationToken,
    ) -> Result<IdleOutcome> {
        let session = self
            .session
            .take()
            .ok_or_else(|| MailboxError::Connection("session lost".to_string()))?;

        let mut handle = session.idle();
        handle.init().await.map_err(imap_error)?;
        let outcome = {
            let (wait, _interrupt) = handle.wait();
            tokio::select! {
                () = stop.cancelled() => IdleOutcome::Stopped,
                response = tokio::time::timeout(timeout, wait) => match response {
                    Ok(Ok(IdleResponse::NewData(_))) => IdleOutcome::NewData,
                    Ok(Ok(IdleResponse::Timeout | IdleResponse::ManualInterrupt)) | Err(_) => {
                        IdleOutcome::Timeout
                    }
                    Ok(Err(e)) => return Err(imap_error(e)),
                },
            }
        };
        // DONE, so the session can log out or keep going.
        self.session = Some(handle.done().await.map_err(imap_error)?);
        Ok(outcome)
    }

    async fn noop(&mut self) -> Result<()> {
        self.session()?.noop().await.map_err(imap_error)
    }

    async fn logout(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.logout().await.map_err(imap_error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_set() {
        assert_eq!(uid_set(&[3, 7, 9]), "3,7,9");
        assert_eq!(uid_set(&[42]), "42");
    }

    #[test]
    fn test_tls_connector_builds() {
        assert!(create_tls_connector().is_ok());
    }

    #[test]
    fn test_connector_debug_hides_password() {
        let connector = ImapConnector {
            host: "imap.example.com".to_string(),
            port: 993,
            username: "me".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{connector:?}").contains("hunter2"));
    }
}
