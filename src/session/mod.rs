//! One live coaching session: link ownership, event routing, transcript and
//! UI state.
//!
//! # Module layout
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`context`] | session identity, active flag, conversation/input modes |
//! | [`event`] | inbound [`AgentEvent`] and outbound [`Outbound`] messages |
//! | [`transport`] | [`AgentConnector`] / [`AgentLink`] seam |
//! | [`wire`] | JSON framing of the realtime agent protocol |
//! | [`ws`] | WebSocket implementation of the transport |
//! | [`manager`] | [`SessionConnectionManager`]: one link + audio pipeline |
//! | [`transcript`] | partial-text dedup and speaker utterances |
//! | [`state`] | [`UiState`] shared with the front end |
//! | [`runner`] | [`SessionRunner`]: the event loop tying it all together |

pub mod context;
pub mod event;
pub mod manager;
pub mod runner;
pub mod state;
pub mod transcript;
pub mod transport;
pub mod wire;
pub mod ws;

#[cfg(test)]
pub mod testing;

pub use context::{ConversationMode, InputMode, Modes, SessionContext};
pub use event::{AgentEvent, Outbound};
pub use manager::{Dispatch, SessionConnectionManager};
pub use runner::{SessionCommand, SessionRunner};
pub use state::{new_shared_state, ActivityState, ConnectionState, SharedState, UiState};
pub use transcript::{AgentTextMerger, Speaker, TranscriptAssembler, TranscriptEntry, TranscriptEvent, UtteranceTracker};
pub use transport::{AgentConnector, AgentLink, Connection};
pub use wire::WireError;
pub use ws::WsConnector;
