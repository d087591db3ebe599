use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::feedback::{FeedbackEvent, FeedbackKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackResponse {
    pub match_id: String,
    pub kind: FeedbackKind,
    pub revision: i32,
    pub status: FeedbackStatus,
    pub signal_queued: bool,
}

impl FeedbackResponse {
    pub fn new(event: &FeedbackEvent, created: bool, signal_queued: bool) -> Self {
        Self {
            match_id: event.match_id.clone(),
            kind: event.kind,
            revision: event.revision,
            status: if created {
                FeedbackStatus::Created
            } else {
                FeedbackStatus::Updated
            },
            signal_queued,
        }
    }
}
