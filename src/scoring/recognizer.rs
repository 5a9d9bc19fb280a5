//! Pattern matching over agent text: numeric scores, closing phrases and
//! the narrow set of "session is over" announcements.
//!
//! Every pattern is a tagged recognizer in a list, so the policy can be
//! swapped or tuned without touching the protocol state machine.

use regex::Regex;

use super::protocol::ScoreError;

// ---------------------------------------------------------------------------
// Recognizers
// ---------------------------------------------------------------------------

/// Which phrasing produced a score match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorePattern {
    /// "AGNES SCORE: 87", "score of 87"
    Labeled,
    /// "87/100", "87 out of 100"
    OutOfHundred,
    /// "you scored 87", "scored an 87"
    Scored,
    /// "rated 87", "rating: 87"
    Rated,
}

struct ScoreRecognizer {
    pattern: ScorePattern,
    regex: Regex,
}

/// A valid score found in text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMatch {
    pub pattern: ScorePattern,
    pub value: u8,
    /// Byte offset of the number in the searched text.
    pub offset: usize,
}

const DEFAULT_CLOSING_PHRASES: &[&str] = &[
    "good luck",
    "session complete",
    "keep practicing",
    "keep practising",
    "end of session",
    "that concludes",
];

const SESSION_ENDING_PATTERNS: &[&str] = &[
    r"(?i)\bthat (?:concludes|wraps up) (?:our|this|the) (?:session|role[- ]?play|practice)\b",
    r"(?i)\b(?:this|our) (?:session|role[- ]?play) is (?:now )?(?:over|complete|finished)\b",
    r"(?i)\bwe(?:'ve| have) reached the end of (?:our|this|the) session\b",
    r"(?i)\bhere(?:'s| is) your final (?:score|evaluation)\b",
];

/// The full recognition policy.
pub struct ScoreRecognizers {
    scores: Vec<ScoreRecognizer>,
    closing_phrases: Vec<String>,
    session_ending: Vec<Regex>,
}

impl ScoreRecognizers {
    pub fn new() -> Result<Self, ScoreError> {
        let scores = vec![
            ScoreRecognizer {
                pattern: ScorePattern::Labeled,
                regex: Regex::new(r"(?i)\bscore\s*(?:is|of)?\s*[:=\-]?\s*(\d{1,3})\b")?,
            },
            ScoreRecognizer {
                pattern: ScorePattern::OutOfHundred,
                regex: Regex::new(r"(?i)\b(\d{1,3})\s*(?:/|out\s+of)\s*100\b")?,
            },
            ScoreRecognizer {
                pattern: ScorePattern::Scored,
                regex: Regex::new(r"(?i)\bscored\s+(?:a\s+|an\s+)?(\d{1,3})\b")?,
            },
            ScoreRecognizer {
                pattern: ScorePattern::Rated,
                regex: Regex::new(r"(?i)\brat(?:ed|ing)\s*(?:of|:)?\s*(?:a\s+|an\s+)?(\d{1,3})\b")?,
            },
        ];
        let session_ending = SESSION_ENDING_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scores,
            closing_phrases: DEFAULT_CLOSING_PHRASES.iter().map(|s| s.to_string()).collect(),
            session_ending,
        })
    }

    /// Replace the closing-phrase list (matched case-insensitively).
    pub fn with_closing_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.closing_phrases = phrases.into_iter().map(|p| p.into().to_lowercase()).collect();
        self
    }

    /// Earliest valid (0-100) score in `text`.
    ///
    /// Several distinct values in one text are logged as ambiguous.
    pub fn extract(&self, text: &str) -> Option<ScoreMatch> {
        let mut found: Vec<ScoreMatch> = Vec::new();
        for rec in &self.scores {
            for caps in rec.regex.captures_iter(text) {
                let Some(m) = caps.get(1) else { continue };
                let Ok(value) = m.as_str().parse::<u16>() else { continue };
                if value <= 100 {
                    found.push(ScoreMatch {
                        pattern: rec.pattern,
                        value: value as u8,
                        offset: m.start(),
                    });
                }
            }
        }

        let first = found.iter().min_by_key(|m| m.offset).copied()?;
        if found.iter().any(|m| m.value != first.value) {
            let values: Vec<u8> = found.iter().map(|m| m.value).collect();
            log::warn!(
                "scoring: ambiguous score text, candidates {values:?}; using {} ({:?})",
                first.value,
                first.pattern
            );
        }
        Some(first)
    }

    pub fn has_closing_phrase(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.closing_phrases.iter().any(|p| lower.contains(p.as_str()))
    }

    /// Whether the agent announced on its own that the session is over.
    pub fn is_session_ending(&self, text: &str) -> bool {
        self.session_ending.iter().any(|re| re.is_match(text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
