use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a question. Transitions only move forward:
/// `Editing` -> `Open` on commit, `Open` -> `Closed` by the closing sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionStatus {
    Editing,
    Open,
    Closed,
}

impl QuestionStatus {
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Editing => 0,
            Self::Open => 1,
            Self::Closed => 2,
        }
    }

    pub const fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            0 => Self::Editing,
            1 => Self::Open,
            2 => Self::Closed,
            _ => return None,
        })
    }
}

/// When a question stops accepting answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRules {
    /// Absolute deadline after which the question closes regardless of turnout.
    pub end_time: DateTime<Utc>,
    /// Fewer respondents than this at close time flags the result inconclusive.
    pub min_votes: i64,
    /// The question closes early once this many answers have been recorded.
    pub max_votes: i64,
}

impl CloseRules {
    /// A zero vote ceiling would close the question on the very next sweep
    /// with nobody heard, so the ceiling must be at least one.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.min_votes >= 0
            && self.max_votes >= 1
            && self.min_votes <= self.max_votes
            && self.end_time > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    /// Authors may be deleted without destroying their questions.
    pub author: Option<i64>,
    pub text: String,
    pub status: QuestionStatus,
    pub rules: CloseRules,
}

impl Question {
    /// Whether a draft is complete enough to be committed and broadcast.
    /// `min_variants` is a caller policy knob; two is the smallest ballot
    /// that makes for a meaningful poll.
    pub fn is_ready(&self, variant_count: usize, min_variants: usize, now: DateTime<Utc>) -> bool {
        self.status == QuestionStatus::Editing
            && !self.text.trim().is_empty()
            && variant_count >= min_variants
            && self.rules.is_valid(now)
    }
}

/// One answer option on a ballot, ordered by `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Stable 0-based ballot position.
    pub index: i64,
    pub label: String,
    pub votes: i64,
}

/// What the dialog layer presents to a user who owes an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub question: i64,
    pub text: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTally {
    pub label: String,
    pub votes: i64,
}

/// Aggregate outcome of a closed question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResults {
    pub question: i64,
    pub text: String,
    pub tallies: Vec<VariantTally>,
    /// Total number of users who answered.
    pub respondents: i64,
    /// Closed below its configured minimum vote count.
    pub inconclusive: bool,
}
