//! Bounded recovery from an unexpected link loss.
//!
//! [`ReconnectionController`] is a pure state machine over deadlines; the
//! session runner sleeps until [`deadline`](ReconnectionController::deadline)
//! and feeds back what happened.
//!
//! ```text
//! Idle ──link lost──▶ Waiting(n) ──delay──▶ AwaitingOpen(n) ──opened──▶ Idle
//!                        ▲                        │ failed / open timeout
//!                        └──── n < max ◀──────────┤
//!                                                 └── n == max ──▶ Exhausted
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::config::ReconnectConfig;

/// The retry currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl ReconnectAttempt {
    /// Error-slot text, e.g. `"Reconnecting (2/3)…"`.
    pub fn message(&self) -> String {
        format!("Reconnecting ({}/{})…", self.attempt_number, self.max_attempts)
    }
}

/// What the runner should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    /// Nothing to do.
    Noop,
    /// An attempt is scheduled after the delay.
    Scheduled(ReconnectAttempt),
    /// Open a fresh connection now.
    Connect(ReconnectAttempt),
    /// Out of attempts; surface a terminal error.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Waiting { attempt: u32, deadline: Instant },
    AwaitingOpen { attempt: u32, deadline: Instant },
    Exhausted,
}

pub struct ReconnectionController {
    max_attempts: u32,
    delay: Duration,
    open_timeout: Duration,
    phase: Phase,
}

impl ReconnectionController {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
            open_timeout: Duration::from_millis(config.open_timeout_ms),
            phase: Phase::Idle,
        }
    }

    /// The link dropped while the session was active.
    ///
    /// Starts the attempt loop, or counts as a failure of the attempt that
    /// was waiting to open.  Ignored while already waiting.
    pub fn on_link_lost(&mut self, now: Instant) -> ReconnectStep {
        match self.phase {
            Phase::Idle => self.schedule(1, now),
            Phase::AwaitingOpen { .. } => self.on_attempt_failed(now),
            Phase::Waiting { .. } | Phase::Exhausted => ReconnectStep::Noop,
        }
    }

    /// The pending deadline fired.
    pub fn on_deadline(&mut self, now: Instant) -> ReconnectStep {
        match self.phase {
            Phase::Waiting { attempt, deadline } if now >= deadline => {
                self.phase = Phase::AwaitingOpen {
                    attempt,
                    deadline: now + self.open_timeout,
                };
                log::info!("reconnect: attempt {attempt}/{}", self.max_attempts);
                ReconnectStep::Connect(self.describe(attempt))
            }
            Phase::AwaitingOpen { attempt, deadline } if now >= deadline => {
                log::warn!("reconnect: attempt {attempt} did not open in time");
                self.on_attempt_failed(now)
            }
            _ => ReconnectStep::Noop,
        }
    }

    /// The current attempt's connect failed outright.
    pub fn on_attempt_failed(&mut self, now: Instant) -> ReconnectStep {
        let attempt = match self.phase {
            Phase::AwaitingOpen { attempt, .. } | Phase::Waiting { attempt, .. } => attempt,
            Phase::Idle | Phase::Exhausted => return ReconnectStep::Noop,
        };
        if attempt >= self.max_attempts {
            log::error!("reconnect: giving up after {attempt} attempts");
            self.phase = Phase::Exhausted;
            return ReconnectStep::GaveUp;
        }
        self.schedule(attempt + 1, now)
    }

    /// The link reached Open.  Returns `true` if this ended a reconnect.
    pub fn on_opened(&mut self) -> bool {
        let was_reconnecting = self.is_reconnecting();
        if was_reconnecting {
            log::info!("reconnect: link restored");
        }
        self.phase = Phase::Idle;
        was_reconnecting
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    fn schedule(&mut self, attempt: u32, now: Instant) -> ReconnectStep {
        self.phase = Phase::Waiting {
            attempt,
            deadline: now + self.delay,
        };
        ReconnectStep::Scheduled(self.describe(attempt))
    }

    fn describe(&self, attempt: u32) -> ReconnectAttempt {
        ReconnectAttempt {
            attempt_number: attempt,
            max_attempts: self.max_attempts,
            delay_ms: self.delay.as_millis() as u64,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Waiting { deadline, .. } | Phase::AwaitingOpen { deadline, .. } => Some(deadline),
            Phase::Idle | Phase::Exhausted => None,
        }
    }

    pub fn current(&self) -> Option<ReconnectAttempt> {
        match self.phase {
            Phase::Waiting { attempt, .. } | Phase::AwaitingOpen { attempt, .. } => Some(self.describe(attempt)),
            Phase::Idle | Phase::Exhausted => None,
        }
    }

    /// Attempt counter; `0` when not reconnecting.
    pub fn attempt_count(&self) -> u32 {
        self.current().map(|a| a.attempt_number).unwrap_or(0)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self.phase, Phase::Waiting { .. } | Phase::AwaitingOpen { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        self.phase == Phase::Exhausted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
