//! WebSocket transport to the realtime agent endpoint.
//!
//! [`WsConnector::connect`] performs the handshake, sends the setup
//! message and splits the socket into two tasks:
//!
//! * a writer that drains a bounded command queue (so [`AgentLink::send`]
//!   never blocks the session loop), and
//! * a reader that decodes frames into [`AgentEvent`]s and always finishes
//!   with exactly one [`AgentEvent::Closed`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use url::Url;

use super::event::{AgentEvent, Outbound};
use super::transport::{AgentConnector, AgentLink, Connection};
use super::wire::{decode_server_message, encode_outbound, encode_setup};
use crate::config::AgentConfig;
use crate::error::SessionError;

const SEND_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;
/// Close code reported when the socket dies without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

enum WriterCommand {
    Send(String),
    Close,
}

// ---------------------------------------------------------------------------
// WsLink
// ---------------------------------------------------------------------------

struct WsLink {
    commands: mpsc::Sender<WriterCommand>,
}

impl AgentLink for WsLink {
    fn send(&self, message: Outbound) -> Result<(), SessionError> {
        let json = encode_outbound(&message).map_err(|e| SessionError::Transport(e.to_string()))?;
        self.commands.try_send(WriterCommand::Send(json)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::Transport("send queue full".into()),
            mpsc::error::TrySendError::Closed(_) => SessionError::Transport("link closed".into()),
        })
    }

    fn close(&self) {
        let _ = self.commands.try_send(WriterCommand::Close);
    }
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct WsConnector {
    api_key: Option<String>,
}

impl WsConnector {
    /// Uses the configured key, or the environment when none is configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `key` regardless of configuration and environment.
    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
        }
    }

    fn api_key(&self, config: &AgentConfig) -> Result<String, SessionError> {
        match &self.api_key {
            Some(key) => Some(key.clone()),
            None => config.resolved_api_key(),
        }
        .filter(|key| !key.is_empty())
        .ok_or_else(|| SessionError::Auth("no API key configured".into()))
    }
}

/// Endpoint with the key appended as a form-encoded query parameter.
fn request_url(endpoint: &str, key: &str) -> Result<Url, SessionError> {
    Url::parse_with_params(endpoint, &[("key", key)])
        .map_err(|e| SessionError::Transport(format!("invalid endpoint {endpoint:?}: {e}")))
}

fn map_connect_error(err: tungstenite::Error) -> SessionError {
    match err {
        tungstenite::Error::Http(resp) => {
            let code = resp.status().as_u16();
            if code == 401 || code == 403 {
                SessionError::Auth(format!("HTTP {code}"))
            } else {
                SessionError::Transport(format!("HTTP {code} during handshake"))
            }
        }
        other => SessionError::Transport(other.to_string()),
    }
}

#[async_trait]
impl AgentConnector for WsConnector {
    async fn connect(&self, config: &AgentConfig) -> Result<Connection, SessionError> {
        let key = self.api_key(config)?;
        let url = request_url(&config.endpoint, &key)?;

        log::info!("session: connecting to {}", config.endpoint);
        let (stream, _resp) = connect_async(url.as_str()).await.map_err(map_connect_error)?;
        let (mut sink, mut source) = stream.split();

        let setup = encode_setup(config).map_err(|e| SessionError::Transport(e.to_string()))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WriterCommand>(SEND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(EVENT_QUEUE);

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WriterCommand::Send(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            log::warn!("session: websocket write failed: {e}");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            log::debug!("session: websocket writer finished");
        });

        tokio::spawn(async move {
            let (code, reason) = loop {
                let msg = match source.next().await {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => break (ABNORMAL_CLOSE, e.to_string()),
                    None => break (ABNORMAL_CLOSE, String::from("stream ended")),
                };
                let payload: Vec<u8> = match msg {
                    Message::Text(t) => t.as_bytes().to_vec(),
                    Message::Binary(b) => b.to_vec(),
                    Message::Close(frame) => {
                        break match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (1005, String::new()),
                        };
                    }
                    _ => continue,
                };
                match decode_server_message(&payload) {
                    Ok(events) => {
                        for event in events {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => log::warn!("session: skipping malformed frame: {e}"),
                }
            };
            log::info!("session: websocket closed (code {code}) {reason}");
            let _ = event_tx.send(AgentEvent::Closed { code, reason }).await;
        });

        Ok(Connection {
            link: Box::new(WsLink { commands: cmd_tx }),
            events: event_rx,
        })
    }
}
