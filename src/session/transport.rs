//! The seam between the session and whatever carries bytes to the agent.
//!
//! [`AgentConnector::connect`] opens a link and returns a [`Connection`]:
//! a send half ([`AgentLink`]) and a stream of decoded [`AgentEvent`]s.
//! Production uses [`WsConnector`](super::ws::WsConnector); tests use a
//! scripted connector.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::{AgentEvent, Outbound};
use crate::config::AgentConfig;
use crate::error::SessionError;

/// Send half of an open link.
///
/// `send` never blocks: implementations queue the message for a writer
/// task.  `close` requests an orderly close; the event stream still ends
/// with exactly one [`AgentEvent::Closed`].
pub trait AgentLink: Send + Sync {
    fn send(&self, message: Outbound) -> Result<(), SessionError>;
    fn close(&self);
}

pub struct Connection {
    pub link: Box<dyn AgentLink>,
    pub events: mpsc::Receiver<AgentEvent>,
}

/// Opens links to the remote agent.
///
/// Implementors must be `Send + Sync` so they can be shared behind an `Arc`.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Open the transport and send the session setup.
    ///
    /// Returning `Ok` means the transport is up; the link counts as Open
    /// only once [`AgentEvent::Opened`] arrives.
    async fn connect(&self, config: &AgentConfig) -> Result<Connection, SessionError>;
}
