//! Debounced voice-activity monitor.
//!
//! [`VoiceActivityMonitor`] is polled once per UI tick with the RMS
//! magnitude of the latest analysis window.  It has two states, Speaking
//! and Silent, and one timed transition:
//!
//! ```text
//!            magnitude > threshold
//!   Silent ─────────────────────────▶ Speaking
//!     ▲                                  │ magnitude <= threshold
//!     │   silence timer fires            ▼
//!     └──────────────────────── (timer running)
//! ```
//!
//! Any loud tick while the timer runs cancels it.  When the caller says the
//! monitor is *suppressed* (muted, scoring, score review open) it keeps
//! being polled but is forced Silent, its timer is cleared, and it never
//! reports a speech start.

use std::time::Duration;

use tokio::time::Instant;

/// A change in the speaking state, reported by [`VoiceActivityMonitor::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    /// Magnitude crossed the threshold while silent.
    StartedSpeaking,
    /// The silence timer ran out uninterrupted.
    StoppedSpeaking,
    /// Suppression forced an immediate stop.
    Silenced,
}

pub struct VoiceActivityMonitor {
    threshold: f32,
    silence_timeout: Duration,
    speaking: bool,
    silence_deadline: Option<Instant>,
}

impl VoiceActivityMonitor {
    pub fn new(threshold: f32, silence_timeout: Duration) -> Self {
        Self {
            threshold,
            silence_timeout,
            speaking: false,
            silence_deadline: None,
        }
    }

    /// Feed one analysis sample taken at `now`.
    pub fn tick(&mut self, magnitude: f32, suppressed: bool, now: Instant) -> Option<VoiceTransition> {
        if suppressed {
            self.silence_deadline = None;
            if self.speaking {
                self.speaking = false;
                return Some(VoiceTransition::Silenced);
            }
            return None;
        }

        if magnitude > self.threshold {
            self.silence_deadline = None;
            if !self.speaking {
                self.speaking = true;
                return Some(VoiceTransition::StartedSpeaking);
            }
            return None;
        }

        if !self.speaking {
            return None;
        }

        match self.silence_deadline {
            None => {
                self.silence_deadline = Some(now + self.silence_timeout);
                None
            }
            Some(deadline) if now >= deadline => {
                self.silence_deadline = None;
                self.speaking = false;
                Some(VoiceTransition::StoppedSpeaking)
            }
            Some(_) => None,
        }
    }

    /// Force Silent without reporting a transition (session reset).
    pub fn reset(&mut self) {
        self.speaking = false;
        self.silence_deadline = None;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// When the pending silence timer will fire, if one is running.
    pub fn silence_deadline(&self) -> Option<Instant> {
        self.silence_deadline
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
