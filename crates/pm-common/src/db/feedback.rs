use std::str::FromStr;

use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::instrument;

use crate::EntityCategory;
use crate::db::PgPool;
use crate::db::util::TimedClientExt;
use crate::feedback::{FeedbackEvent, FeedbackKind, UpsertOutcome};
use crate::store::StoreError;

const EVENT_COLUMNS: &str = "user_id, match_id, requester_id, candidate_id, match_score, kind, \
     rejection_reason, counterpart_name, counterpart_category, created_at, updated_at, revision";

pub(crate) fn row_to_event(row: &Row) -> Result<FeedbackEvent, StoreError> {
    let kind: String = row.get("kind");
    let kind = FeedbackKind::from_str(&kind)
        .map_err(|_| StoreError::Corrupt(format!("unknown feedback kind {kind:?}")))?;
    let category: Option<String> = row.get("counterpart_category");
    let counterpart_category = match category {
        Some(raw) => Some(
            EntityCategory::from_str(&raw)
                .map_err(|_| StoreError::Corrupt(format!("unknown category {raw:?}")))?,
        ),
        None => None,
    };

    Ok(FeedbackEvent {
        user_id: row.get("user_id"),
        match_id: row.get("match_id"),
        requester_id: row.get("requester_id"),
        candidate_id: row.get("candidate_id"),
        match_score: row.get("match_score"),
        kind,
        rejection_reason: row.get("rejection_reason"),
        counterpart_name: row.get("counterpart_name"),
        counterpart_category,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        revision: row.get("revision"),
    })
}

/// Insert or overwrite the (user_id, match_id) row and append the write to
/// the revision history, in one transaction.
#[instrument(skip(pool, event), fields(match_id = %event.match_id))]
pub async fn upsert_feedback_event(
    pool: &PgPool,
    event: &FeedbackEvent,
) -> Result<UpsertOutcome, StoreError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    let previous_kind = tx
        .timed_query_opt_cached(
            "SELECT kind FROM pm.feedback_events
             WHERE user_id = $1 AND match_id = $2
             FOR UPDATE",
            &[&event.user_id, &event.match_id],
            "feedback_events.previous_kind",
        )
        .await?
        .map(|row| {
            let kind: String = row.get("kind");
            FeedbackKind::from_str(&kind)
                .map_err(|_| StoreError::Corrupt(format!("unknown feedback kind {kind:?}")))
        })
        .transpose()?;

    let statement = format!(
        "INSERT INTO pm.feedback_events ({EVENT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
         ON CONFLICT (user_id, match_id) DO UPDATE SET
             requester_id = EXCLUDED.requester_id,
             candidate_id = EXCLUDED.candidate_id,
             match_score = EXCLUDED.match_score,
             kind = EXCLUDED.kind,
             rejection_reason = EXCLUDED.rejection_reason,
             counterpart_name = COALESCE(EXCLUDED.counterpart_name, pm.feedback_events.counterpart_name),
             counterpart_category = COALESCE(EXCLUDED.counterpart_category, pm.feedback_events.counterpart_category),
             updated_at = EXCLUDED.updated_at,
             revision = pm.feedback_events.revision + 1
         RETURNING id, {EVENT_COLUMNS}, (xmax = 0) AS inserted"
    );
    let category = event.counterpart_category.map(|c| c.as_str().to_string());

    let row = tx
        .timed_query_one_cached(
            &statement,
            &[
                &event.user_id,
                &event.match_id,
                &event.requester_id,
                &event.candidate_id,
                &event.match_score,
                &event.kind.as_str(),
                &event.rejection_reason,
                &event.counterpart_name,
                &category,
                &event.created_at,
                &event.updated_at,
            ],
            "feedback_events.upsert",
        )
        .await?;

    let id: i64 = row.get("id");
    let created: bool = row.get("inserted");
    let stored = row_to_event(&row)?;

    tx.timed_execute_cached(
        "INSERT INTO pm.feedback_event_revisions
             (feedback_event_id, revision, kind, match_score, rejection_reason, recorded_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[
            &id,
            &stored.revision,
            &stored.kind.as_str(),
            &stored.match_score,
            &stored.rejection_reason,
            &stored.updated_at,
        ],
        "feedback_event_revisions.insert",
    )
    .await?;

    tx.commit().await?;

    Ok(UpsertOutcome {
        event: stored,
        created,
        previous_kind,
    })
}

#[instrument(skip(pool))]
pub async fn fetch_feedback_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<FeedbackEvent>, StoreError> {
    let client = pool.get().await?;
    let statement = format!(
        "SELECT {EVENT_COLUMNS}
         FROM pm.feedback_events
         WHERE updated_at >= $1
         ORDER BY updated_at, user_id, match_id"
    );
    let rows = client
        .timed_query_cached(&statement, &[&since], "feedback_events.since")
        .await?;

    rows.iter().map(row_to_event).collect()
}
