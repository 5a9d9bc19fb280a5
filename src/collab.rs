//! Narrow interfaces to the collaborators outside the voice core.
//!
//! The session talks to persistence, gamification and media recording only
//! through these traits, and only at session end (recording also at start).
//! Their internals live elsewhere.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::session::TranscriptEntry;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Plain summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub transcript: Vec<TranscriptEntry>,
    pub score: Option<u8>,
    pub feedback: Option<String>,
}

/// Fields updated after the record was first saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub xp_awarded: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakInfo {
    pub current_days: u32,
}

#[derive(Debug, Error)]
#[error("collaborator failed: {0}")]
pub struct CollabError(pub String);

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, record: &SessionRecord) -> Result<(), CollabError>;
    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> Result<(), CollabError>;
}

pub trait XpCalculator: Send + Sync {
    fn calculate_session_xp(&self, record: &SessionRecord, streak: &StreakInfo) -> u32;
    fn award_xp(&self, amount: u32);
}

/// Records the same capture stream; teardown stops it before the devices.
pub trait MediaRecorder: Send {
    fn start(&mut self);
    fn stop(&mut self);
}

/// Everything optional the runner hands results to.
#[derive(Default)]
pub struct Collaborators {
    pub store: Option<Arc<dyn SessionStore>>,
    pub xp: Option<Arc<dyn XpCalculator>>,
    pub recorder: Option<Box<dyn MediaRecorder>>,
    pub streak: StreakInfo,
}

/// Hand the finished session to the store and XP collaborators, once.
///
/// Failures are logged; the session is already over.
pub async fn publish_session(
    record: &SessionRecord,
    store: Option<&Arc<dyn SessionStore>>,
    xp: Option<&Arc<dyn XpCalculator>>,
    streak: &StreakInfo,
) {
    let saved = match store {
        Some(store) => match store.save_session(record).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("collab: saving session {} failed: {e}", record.id);
                false
            }
        },
        None => false,
    };

    let Some(xp) = xp else { return };
    let amount = xp.calculate_session_xp(record, streak);
    xp.award_xp(amount);
    log::info!("collab: awarded {amount} XP for session {}", record.id);

    if let (true, Some(store)) = (saved, store) {
        let patch = SessionPatch {
            xp_awarded: Some(amount),
        };
        if let Err(e) = store.update_session(record.id, patch).await {
            log::warn!("collab: updating session {} failed: {e}", record.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
