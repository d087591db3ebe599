use axum::{
    Json,
    extract::{Query, State},
};

use pm_common::api::{HistoryQuery, RetrainRequest};
use pm_common::matching::{RetrainTrigger, WeightSet};
use pm_common::retraining::RetrainSummary;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Manual retrain. Only activates when accuracy does not regress.
pub async fn retrain(
    State(state): State<SharedState>,
    _auth: AuthUser,
    body: Option<Json<RetrainRequest>>,
) -> Result<Json<RetrainSummary>, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let summary = state
        .engine
        .retrain(request.window_days, RetrainTrigger::Manual)
        .await?;
    Ok(Json(summary))
}

pub async fn history(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<WeightSet>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.engine.weight_history(limit).await?))
}
