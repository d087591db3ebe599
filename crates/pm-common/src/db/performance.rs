use chrono::{DateTime, Utc};
use tokio_postgres::types::Json;
use tracing::instrument;

use crate::db::PgPool;
use crate::db::util::TimedClientExt;
use crate::feedback::PerformanceSample;
use crate::store::StoreError;

#[instrument(skip(pool, sample), fields(metric = %sample.metric))]
pub async fn insert_performance_sample(
    pool: &PgPool,
    sample: &PerformanceSample,
) -> Result<(), StoreError> {
    let client = pool.get().await?;
    client
        .timed_execute_cached(
            "INSERT INTO pm.performance_samples (metric, value, context, recorded_at)
             VALUES ($1, $2, $3, $4)",
            &[
                &sample.metric,
                &sample.value,
                &Json(&sample.context),
                &sample.recorded_at,
            ],
            "performance_samples.insert",
        )
        .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn fetch_samples_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<PerformanceSample>, StoreError> {
    let client = pool.get().await?;
    let rows = client
        .timed_query_cached(
            "SELECT metric, value, context, recorded_at
             FROM pm.performance_samples
             WHERE recorded_at >= $1
             ORDER BY recorded_at, id",
            &[&since],
            "performance_samples.since",
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| PerformanceSample {
            metric: row.get("metric"),
            value: row.get("value"),
            context: row.get("context"),
            recorded_at: row.get("recorded_at"),
        })
        .collect())
}
