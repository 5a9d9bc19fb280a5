//! Per-session context and the mode set that replaces scattered flags.
//!
//! [`SessionContext`] carries the one flag every callback must re-check
//! before acting: `is_active`.  It is shared (`Arc`) with the capture
//! callback thread, so it is an atomic rather than a field behind the
//! runner's `&mut self`.
//!
//! [`Modes`] holds the rest of the per-session switches: score request
//! running, score review open, push-to-talk and mute.  The conversation
//! mode and the input mode are each a single enum, so states such as
//! "scoring and reviewing at once" cannot be represented.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// Identity and liveness of one logical conversation.
#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    started_at: DateTime<Utc>,
    active: AtomicBool,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Set first when a session starts.
    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Set first when a session ends; every later callback becomes a no-op.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// What the conversation as a whole is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationMode {
    /// Normal back-and-forth.
    #[default]
    Live,
    /// A score request owns the link.
    Scoring,
    /// The score result is on screen.
    Reviewing,
}

/// How the microphone is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Continuous,
    PushToTalk { held: bool },
}

impl Default for InputMode {
    fn default() -> Self {
        InputMode::Continuous
    }
}

/// The complete, mutually consistent mode set of a session.
///
/// ```rust
/// use agnes_voice::session::{ConversationMode, Modes};
///
/// let mut modes = Modes::push_to_talk();
/// assert!(!modes.mic_transmits());
/// modes.press_to_talk();
/// assert!(modes.mic_transmits());
/// modes.begin_scoring();
/// assert!(!modes.mic_transmits());
/// assert_eq!(modes.conversation, ConversationMode::Scoring);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modes {
    pub conversation: ConversationMode,
    pub input: InputMode,
    pub muted: bool,
}

impl Modes {
    pub fn continuous() -> Self {
        Self::default()
    }

    pub fn push_to_talk() -> Self {
        Self {
            input: InputMode::PushToTalk { held: false },
            ..Self::default()
        }
    }

    // -- conversation transitions --------------------------------------------

    pub fn begin_scoring(&mut self) {
        self.conversation = ConversationMode::Scoring;
    }

    /// Scoring finished with a result: show it.
    pub fn finish_scoring(&mut self) {
        if self.conversation == ConversationMode::Scoring {
            self.conversation = ConversationMode::Reviewing;
        }
    }

    /// Scoring timed out or was abandoned: back to the conversation.
    pub fn abort_scoring(&mut self) {
        if self.conversation == ConversationMode::Scoring {
            self.conversation = ConversationMode::Live;
        }
    }

    /// Returns `false` while a score request is running.
    pub fn open_review(&mut self) -> bool {
        if self.conversation == ConversationMode::Scoring {
            return false;
        }
        self.conversation = ConversationMode::Reviewing;
        true
    }

    pub fn close_review(&mut self) {
        if self.conversation == ConversationMode::Reviewing {
            self.conversation = ConversationMode::Live;
        }
    }

    // -- input transitions ---------------------------------------------------

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// No-op in continuous mode.
    pub fn press_to_talk(&mut self) {
        if let InputMode::PushToTalk { held } = &mut self.input {
            *held = true;
        }
    }

    pub fn release_to_talk(&mut self) {
        if let InputMode::PushToTalk { held } = &mut self.input {
            *held = false;
        }
    }

    // -- derived --------------------------------------------------------------

    pub fn is_scoring(&self) -> bool {
        self.conversation == ConversationMode::Scoring
    }

    /// Whether captured frames may go out on the link.
    pub fn mic_transmits(&self) -> bool {
        if self.muted || self.conversation == ConversationMode::Scoring {
            return false;
        }
        match self.input {
            InputMode::Continuous => true,
            InputMode::PushToTalk { held } => held,
        }
    }

    /// Whether the voice-activity monitor must report silence.
    pub fn vad_suppressed(&self) -> bool {
        self.muted || self.conversation != ConversationMode::Live
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
