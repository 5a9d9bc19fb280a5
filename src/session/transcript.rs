//! Transcript assembly from streamed partial text.
//!
//! The agent link reports text in pieces, sometimes cumulative ("Hel",
//! "Hello", "Hello th") and sometimes as fragments ("Hel", "lo", " th").
//! [`UtteranceTracker::delta`] settles which style a channel uses from the
//! second piece of each utterance and returns only the new text, so a
//! repeated partial never gets appended twice and a genuine fragment is
//! never mistaken for one.
//!
//! Agent speech arrives on two channels describing the same words: model
//! text and output transcription.  [`AgentTextMerger`] prefers model text
//! and ignores the transcription channel for the rest of the turn once any
//! model text was seen.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "You",
            Speaker::Agent => "Agnes",
        }
    }
}

/// One streamed piece of transcript; only `is_final` events are durable.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// A durable transcript line.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// UtteranceTracker
// ---------------------------------------------------------------------------

/// How a channel reports one utterance, settled by its second piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PieceStyle {
    #[default]
    Unknown,
    /// Each piece repeats everything so far and extends it.
    Cumulative,
    /// Each piece is new text to append.
    Fragments,
}

/// Accumulated text of one logical utterance.
#[derive(Debug, Default)]
pub struct UtteranceTracker {
    seen: String,
    /// Start of the cumulative run pieces are compared against.
    segment_start: usize,
    style: PieceStyle,
}

impl UtteranceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The part of `incoming` not yet seen, or `None` if nothing is new.
    ///
    /// ```rust
    /// use agnes_voice::session::UtteranceTracker;
    ///
    /// let mut cumulative = UtteranceTracker::new();
    /// assert_eq!(cumulative.delta("Hello").as_deref(), Some("Hello"));
    /// assert_eq!(cumulative.delta("Hello there").as_deref(), Some(" there"));
    /// assert_eq!(cumulative.delta("Hello").as_deref(), None);
    /// assert_eq!(cumulative.text(), "Hello there");
    ///
    /// let mut fragments = UtteranceTracker::new();
    /// fragments.delta("I");
    /// fragments.delta(" said no. ");
    /// assert_eq!(fragments.delta("I").as_deref(), Some("I"));
    /// assert_eq!(fragments.text(), "I said no. I");
    /// ```
    pub fn delta(&mut self, incoming: &str) -> Option<String> {
        if incoming.is_empty() {
            return None;
        }
        match self.style {
            PieceStyle::Fragments => return Some(self.append(incoming)),
            PieceStyle::Unknown if self.seen.is_empty() => return Some(self.append(incoming)),
            PieceStyle::Unknown => {
                let current = &self.seen[self.segment_start..];
                if incoming == current {
                    return None;
                }
                if incoming.starts_with(current) {
                    self.style = PieceStyle::Cumulative;
                } else {
                    self.style = PieceStyle::Fragments;
                    return Some(self.append(incoming));
                }
            }
            PieceStyle::Cumulative => {}
        }

        let current = &self.seen[self.segment_start..];
        if let Some(rest) = incoming.strip_prefix(current) {
            if rest.is_empty() {
                return None;
            }
            let rest = rest.to_string();
            self.seen.push_str(&rest);
            return Some(rest);
        }
        if current.starts_with(incoming) {
            // replay of an earlier partial
            return None;
        }
        Some(self.start_segment(incoming))
    }

    fn append(&mut self, piece: &str) -> String {
        self.seen.push_str(piece);
        piece.to_string()
    }

    /// A cumulative channel restarted mid-utterance; keep what it said before.
    fn start_segment(&mut self, piece: &str) -> String {
        let spaced = !self.seen.ends_with(char::is_whitespace) && !piece.starts_with(char::is_whitespace);
        if spaced {
            self.seen.push(' ');
        }
        self.segment_start = self.seen.len();
        self.seen.push_str(piece);
        if spaced {
            format!(" {piece}")
        } else {
            piece.to_string()
        }
    }

    pub fn text(&self) -> &str {
        &self.seen
    }

    pub fn is_empty(&self) -> bool {
        self.seen.trim().is_empty()
    }

    /// Return the accumulated text and start a new utterance.
    pub fn take(&mut self) -> String {
        self.segment_start = 0;
        self.style = PieceStyle::Unknown;
        std::mem::take(&mut self.seen)
    }
}

// ---------------------------------------------------------------------------
// AgentTextMerger
// ---------------------------------------------------------------------------

/// Merges model text and output transcription for one agent turn.
#[derive(Debug, Default)]
pub struct AgentTextMerger {
    tracker: UtteranceTracker,
    model_text_seen: bool,
}

impl AgentTextMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_model_text(&mut self, text: &str) -> Option<String> {
        if !self.model_text_seen {
            self.model_text_seen = true;
            if !self.tracker.is_empty() {
                // Transcription got there first; model text supersedes it.
                log::debug!("transcript: model text replaces output transcription");
                self.tracker.take();
            }
        }
        self.tracker.delta(text)
    }

    pub fn on_transcription(&mut self, text: &str) -> Option<String> {
        if self.model_text_seen {
            return None;
        }
        self.tracker.delta(text)
    }

    pub fn text(&self) -> &str {
        self.tracker.text()
    }

    /// End the turn; returns the utterance text if any.
    pub fn finish(&mut self) -> Option<String> {
        self.model_text_seen = false;
        let text = self.tracker.take();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptAssembler
// ---------------------------------------------------------------------------

/// Both speakers' in-progress utterances.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    user: UtteranceTracker,
    agent: AgentTextMerger,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partial user text; `is_final` closes the utterance.
    pub fn on_user(&mut self, text: &str, is_final: bool) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();
        if let Some(delta) = self.user.delta(text) {
            events.push(TranscriptEvent {
                speaker: Speaker::User,
                text: delta,
                is_final: false,
            });
        }
        if is_final {
            events.extend(self.finish_user());
        }
        events
    }

    /// Partial agent text from either channel.  The trainee's utterance is
    /// closed the moment the agent starts answering.
    pub fn on_agent(&mut self, text: &str, from_model: bool) -> Vec<TranscriptEvent> {
        let mut events = self.finish_user().into_iter().collect::<Vec<_>>();
        let delta = if from_model {
            self.agent.on_model_text(text)
        } else {
            self.agent.on_transcription(text)
        };
        if let Some(delta) = delta {
            events.push(TranscriptEvent {
                speaker: Speaker::Agent,
                text: delta,
                is_final: false,
            });
        }
        events
    }

    /// Turn complete (or interrupted): close both utterances.
    pub fn finish_turn(&mut self) -> Vec<TranscriptEvent> {
        let mut events: Vec<TranscriptEvent> = self.finish_user().into_iter().collect();
        if let Some(text) = self.agent.finish() {
            events.push(TranscriptEvent {
                speaker: Speaker::Agent,
                text,
                is_final: true,
            });
        }
        events
    }

    /// Agent text of the turn in progress.
    pub fn agent_text(&self) -> &str {
        self.agent.text()
    }

    /// Drop whatever is in progress without emitting it.
    pub fn reset(&mut self) {
        self.user.take();
        self.agent.finish();
    }

    fn finish_user(&mut self) -> Option<TranscriptEvent> {
        let text = self.user.take();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(TranscriptEvent {
            speaker: Speaker::User,
            text: trimmed.to_string(),
            is_final: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
