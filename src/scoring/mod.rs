//! Final-score request protocol and the score/closing-phrase recognizers it
//! relies on.

pub mod protocol;
pub mod recognizer;

pub use protocol::{ScoreError, ScoreRequestProtocol, ScoreResult, ScoreState, SCORE_INSTRUCTION};
pub use recognizer::{ScoreMatch, ScorePattern, ScoreRecognizers};
