pub mod signal;
pub mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;

use crate::EntityCategory;
pub use signal::{
    FeedbackSignal, PerformanceSample, SignalSender, SignalWorkerConfig, spawn_signal_worker,
};
pub use summary::{CategoryCounts, FeedbackSummary, ReasonCount, acceptance_rate, summarize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeedbackKind {
    Accepted,
    Rejected,
    Pending,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Accepted and rejected count towards acceptance; pending does not.
    pub fn is_decided(&self) -> bool {
        matches!(self, FeedbackKind::Accepted | FeedbackKind::Rejected)
    }
}

/// `"{requester_id}:{candidate_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn compose(requester_id: &str, candidate_id: &str) -> Self {
        Self(format!("{requester_id}:{candidate_id}"))
    }

    pub fn parse(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    /// Requester and candidate ids, when the id was composed by this crate.
    pub fn parts(&self) -> Option<(&str, &str)> {
        self.0
            .split_once(':')
            .filter(|(requester, candidate)| !requester.is_empty() && !candidate.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedbackError {
    #[error("feedback field `{0}` must not be blank")]
    BlankField(&'static str),
    #[error("match score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),
}

/// What a caller submits. Everything else on [`FeedbackEvent`] is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub user_id: String,
    pub match_id: String,
    pub match_score: f64,
    pub kind: FeedbackKind,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub counterpart_name: Option<String>,
    #[serde(default)]
    pub counterpart_category: Option<EntityCategory>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One user's verdict on one presented match. Unique per
/// (`user_id`, `match_id`); later writes overwrite and bump `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub user_id: String,
    pub match_id: String,
    pub requester_id: Option<String>,
    pub candidate_id: Option<String>,
    pub match_score: f64,
    pub kind: FeedbackKind,
    pub rejection_reason: Option<String>,
    pub counterpart_name: Option<String>,
    pub counterpart_category: Option<EntityCategory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: i32,
}

impl FeedbackEvent {
    /// Validate and normalise an input into a first-revision event.
    pub fn from_input(input: FeedbackInput, now: DateTime<Utc>) -> Result<Self, FeedbackError> {
        let user_id = input.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(FeedbackError::BlankField("user_id"));
        }
        let match_id = MatchId::parse(&input.match_id);
        if match_id.as_str().is_empty() {
            return Err(FeedbackError::BlankField("match_id"));
        }
        if !input.match_score.is_finite() || !(0.0..=1.0).contains(&input.match_score) {
            return Err(FeedbackError::ScoreOutOfRange(input.match_score));
        }

        let (requester_id, candidate_id) = match match_id.parts() {
            Some((requester, candidate)) => (Some(requester.to_string()), Some(candidate.to_string())),
            None => (None, None),
        };
        let rejection_reason = match input.kind {
            FeedbackKind::Rejected => trimmed(input.rejection_reason),
            _ => None,
        };

        Ok(Self {
            user_id,
            match_id: match_id.into_string(),
            requester_id,
            candidate_id,
            match_score: input.match_score,
            kind: input.kind,
            rejection_reason,
            counterpart_name: trimmed(input.counterpart_name),
            counterpart_category: input.counterpart_category,
            created_at: now,
            updated_at: now,
            revision: 1,
        })
    }

    /// Apply a later write for the same key: keep `created_at`, take the
    /// rest from `incoming`, bump the revision.
    pub fn overwritten_by(&self, incoming: FeedbackEvent) -> FeedbackEvent {
        FeedbackEvent {
            created_at: self.created_at,
            revision: self.revision + 1,
            counterpart_name: incoming.counterpart_name.or_else(|| self.counterpart_name.clone()),
            counterpart_category: incoming.counterpart_category.or(self.counterpart_category),
            ..incoming
        }
    }
}

/// Result of a feedback upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub event: FeedbackEvent,
    /// False when an existing (user, match) row was overwritten.
    pub created: bool,
    /// Kind stored before this write; `None` on insert.
    pub previous_kind: Option<FeedbackKind>,
}

impl UpsertOutcome {
    /// First decision for the pair, or a decision that differs from the
    /// stored one. Resubmitting the same verdict is not new evidence.
    pub fn is_new_decision(&self) -> bool {
        self.event.kind.is_decided() && self.previous_kind != Some(self.event.kind)
    }
}
