use axum::{
    Json,
    extract::{Query, State},
};

use pm_common::api::WindowQuery;
use pm_common::insights::InsightsReport;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub async fn insights(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Query(query): Query<WindowQuery>,
) -> Result<Json<InsightsReport>, ApiError> {
    Ok(Json(state.engine.get_insights(query.window_days).await?))
}
