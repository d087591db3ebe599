use axum::{
    Json,
    extract::{Query, State},
};

use pm_common::api::{FeedbackRequest, FeedbackResponse, WindowQuery};
use pm_common::feedback::FeedbackSummary;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub async fn submit_feedback(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let user_id = auth.resolve_user_id(payload.user_id.clone())?;
    let ack = state
        .engine
        .record_feedback(payload.into_input(user_id))
        .await?;

    Ok(Json(FeedbackResponse::new(
        &ack.event,
        ack.created,
        ack.signal_queued,
    )))
}

pub async fn summary(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Query(query): Query<WindowQuery>,
) -> Result<Json<FeedbackSummary>, ApiError> {
    let summary = state.engine.summarize_feedback(query.window_days).await?;
    Ok(Json(summary))
}
