use axum::{Json, extract::State};

use pm_common::api::RankRequest;
use pm_common::matching::RankedList;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// Upper bound on candidates scored per request.
const MAX_CANDIDATES: usize = 500;

pub async fn rank_matches(
    State(state): State<SharedState>,
    _auth: AuthUser,
    Json(request): Json<RankRequest>,
) -> Result<Json<RankedList>, ApiError> {
    if request.candidates.len() > MAX_CANDIDATES {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_CANDIDATES} candidates per request"
        )));
    }

    let ranked = state
        .engine
        .rank_matches(&request.requester, &request.candidates, &request.preferences)
        .await?;

    Ok(Json(ranked))
}
