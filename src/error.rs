//! Session error taxonomy.
//!
//! | Variant | Policy |
//! |---------|--------|
//! | `DeviceUnavailable` | terminal, surfaced directly |
//! | `Auth` | terminal, surfaced directly |
//! | `Transport` | fed to the reconnection controller |
//! | `UnexpectedClose` | fed to the reconnection controller |
//! | `ProtocolTimeout` | recovered locally by the score protocol |

use thiserror::Error;

use crate::audio::AudioError;

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors that can surface while running a voice session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Microphone / speaker permission or hardware problem.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Network or protocol failure on the agent link.
    #[error("transport error: {0}")]
    Transport(String),

    /// The agent endpoint rejected our credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The score request did not complete within its window.
    #[error("score request timed out after {0}s")]
    ProtocolTimeout(u64),

    /// The link dropped while the session was still active.
    #[error("connection closed unexpectedly (code {code}): {reason}")]
    UnexpectedClose { code: u16, reason: String },
}

impl SessionError {
    /// Terminal errors are shown to the user and never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceUnavailable(_) | SessionError::Auth(_)
        )
    }

    /// Errors the reconnection controller is allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_) | SessionError::UnexpectedClose { .. }
        )
    }

    /// Text for the single user-visible error slot.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::DeviceUnavailable(_) => {
                "Microphone access denied or no audio device available".into()
            }
            SessionError::Auth(_) => {
                "The coaching service rejected our credentials. Check your API key.".into()
            }
            SessionError::Transport(_) | SessionError::UnexpectedClose { .. } => {
                "Connection to Agnes was lost".into()
            }
            SessionError::ProtocolTimeout(_) => {
                "Score request timed out. Try ending the session again.".into()
            }
        }
    }
}

impl From<AudioError> for SessionError {
    fn from(e: AudioError) -> Self {
        SessionError::DeviceUnavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
