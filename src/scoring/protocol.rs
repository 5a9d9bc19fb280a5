//! The final-score sub-protocol.
//!
//! ```text
//! Idle ──begin()──▶ Awaiting ──first delta──▶ Accumulating ──ready──▶ Complete
//!                      │                          │
//!                      └────────── deadline ──────┴──▶ TimedOut
//! ```
//!
//! "Ready" needs a recognised score AND one of: the text is long enough,
//! a closing phrase with a shorter minimum, or turn-complete with a small
//! minimum.  Every delta pushes the deadline out again.
//!
//! The protocol only tracks state and time; the session runner decides what
//! to swallow while [`ScoreRequestProtocol::is_active`] is true.

use thiserror::Error;
use tokio::time::Instant;

use super::recognizer::ScoreRecognizers;
use crate::config::ScoringConfig;
use crate::error::SessionError;

/// Instruction turn sent to the agent when a score is requested.
pub const SCORE_INSTRUCTION: &str = "The trainee has ended the role-play. Step out of character \
and evaluate their sales performance in this session. Start your reply with \"AGNES SCORE: N\" \
where N is a whole number from 0 to 100, then give concise narrative feedback with strengths, \
areas to improve and one concrete next step. Finish with \"Good luck\".";

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("a score request is already in progress")]
    AlreadyActive,

    #[error("invalid score pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreState {
    #[default]
    Idle,
    Awaiting,
    Accumulating,
    Complete,
    TimedOut,
}

/// A finished evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreResult {
    pub score: u8,
    pub text: String,
}

pub struct ScoreRequestProtocol {
    config: ScoringConfig,
    recognizers: ScoreRecognizers,
    state: ScoreState,
    accumulated: String,
    numeric_score: Option<u8>,
    deadline: Option<Instant>,
}

impl ScoreRequestProtocol {
    pub fn new(config: ScoringConfig, recognizers: ScoreRecognizers) -> Self {
        Self {
            config,
            recognizers,
            state: ScoreState::Idle,
            accumulated: String::new(),
            numeric_score: None,
            deadline: None,
        }
    }

    /// Start an explicit request; returns the instruction turn to send.
    pub fn begin(&mut self, now: Instant) -> Result<&'static str, ScoreError> {
        self.arm(now)?;
        log::info!("scoring: request sent, waiting up to {}s", self.config.timeout_secs);
        Ok(SCORE_INSTRUCTION)
    }

    /// Start because the agent announced the end on its own.
    ///
    /// `seed` is the agent text seen so far in the current turn; it may
    /// already hold the score.
    pub fn begin_implicit(&mut self, now: Instant, seed: &str) -> Result<Option<ScoreResult>, ScoreError> {
        self.arm(now)?;
        log::info!("scoring: agent ended the session, collecting its evaluation");
        if seed.trim().is_empty() {
            return Ok(None);
        }
        Ok(self.on_delta(seed, now))
    }

    fn arm(&mut self, now: Instant) -> Result<(), ScoreError> {
        if self.is_active() {
            return Err(ScoreError::AlreadyActive);
        }
        self.state = ScoreState::Awaiting;
        self.accumulated.clear();
        self.numeric_score = None;
        self.deadline = Some(now + self.config.timeout());
        Ok(())
    }

    /// Append streamed agent text.
    pub fn on_delta(&mut self, delta: &str, now: Instant) -> Option<ScoreResult> {
        if !self.is_active() || delta.is_empty() {
            return None;
        }
        self.state = ScoreState::Accumulating;
        self.accumulated.push_str(delta);
        self.deadline = Some(now + self.config.timeout());
        self.try_complete(false)
    }

    pub fn on_turn_complete(&mut self) -> Option<ScoreResult> {
        if self.state != ScoreState::Accumulating {
            return None;
        }
        self.try_complete(true)
    }

    /// `Some(ProtocolTimeout)` once the deadline passed without completion.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<SessionError> {
        match self.deadline {
            Some(deadline) if self.is_active() && now >= deadline => {
                log::warn!(
                    "scoring: no complete evaluation after {}s ({} chars received)",
                    self.config.timeout_secs,
                    self.accumulated.chars().count()
                );
                self.state = ScoreState::TimedOut;
                self.accumulated.clear();
                self.deadline = None;
                Some(SessionError::ProtocolTimeout(self.config.timeout_secs))
            }
            _ => None,
        }
    }

    fn try_complete(&mut self, turn_complete: bool) -> Option<ScoreResult> {
        let found = self.recognizers.extract(&self.accumulated)?;
        let len = self.accumulated.trim().chars().count();

        let ready = len >= self.config.min_length
            || (len >= self.config.closing_min_length && self.recognizers.has_closing_phrase(&self.accumulated))
            || (turn_complete && len >= self.config.turn_complete_min_length);
        if !ready {
            return None;
        }

        log::info!("scoring: complete, score {} ({:?}, {len} chars)", found.value, found.pattern);
        self.state = ScoreState::Complete;
        self.numeric_score = Some(found.value);
        self.deadline = None;
        Some(ScoreResult {
            score: found.value,
            text: std::mem::take(&mut self.accumulated).trim().to_string(),
        })
    }

    /// Abandon any request (link lost, session ended).
    pub fn reset(&mut self) {
        self.state = ScoreState::Idle;
        self.accumulated.clear();
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ScoreState::Awaiting | ScoreState::Accumulating)
    }

    pub fn state(&self) -> ScoreState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn numeric_score(&self) -> Option<u8> {
        self.numeric_score
    }

    pub fn recognizers(&self) -> &ScoreRecognizers {
        &self.recognizers
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
