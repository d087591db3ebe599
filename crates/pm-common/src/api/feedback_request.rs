use serde::{Deserialize, Serialize};

use crate::EntityCategory;
use crate::feedback::{FeedbackInput, FeedbackKind};

/// Body of `POST /api/feedback`. `user_id` is only read when the caller is
/// not identified by a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub user_id: Option<String>,
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

impl FeedbackRequest {
    pub fn into_input(self, user_id: String) -> FeedbackInput {
        FeedbackInput {
            user_id,
            match_id: self.match_id,
            match_score: self.match_score,
            kind: self.kind,
            rejection_reason: self.rejection_reason,
            counterpart_name: self.counterpart_name,
            counterpart_category: self.counterpart_category,
        }
    }
}
