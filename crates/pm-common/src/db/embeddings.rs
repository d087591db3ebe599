use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use crate::db::PgPool;
use crate::db::util::TimedClientExt;
use crate::encoder::{EmbeddingSource, EmbeddingVector};
use crate::store::StoreError;

/// Cached vector for (profile, fingerprint). A row that no longer satisfies
/// the vector invariant is treated as a miss.
#[instrument(skip(pool))]
pub async fn load_embedding(
    pool: &PgPool,
    profile_id: &str,
    fingerprint: &str,
) -> Result<Option<EmbeddingVector>, StoreError> {
    let client = pool.get().await?;
    let row = client
        .timed_query_opt_cached(
            "SELECT vector, source, created_at
             FROM pm.profile_embeddings
             WHERE profile_id = $1 AND fingerprint = $2",
            &[&profile_id, &fingerprint],
            "profile_embeddings.load",
        )
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let values: Vec<f32> = row.get("vector");
    let source: String = row.get("source");
    let created_at: DateTime<Utc> = row.get("created_at");
    let source = EmbeddingSource::from_str(&source)
        .map_err(|_| StoreError::Corrupt(format!("unknown embedding source {source:?}")))?;

    match EmbeddingVector::from_stored(values, source, created_at) {
        Ok(vector) => Ok(Some(vector)),
        Err(err) => {
            warn!(error = %err, profile_id, "discarding invalid cached embedding");
            Ok(None)
        }
    }
}

#[instrument(skip(pool, embedding))]
pub async fn save_embedding(
    pool: &PgPool,
    profile_id: &str,
    fingerprint: &str,
    embedding: &EmbeddingVector,
) -> Result<(), StoreError> {
    let source: &str = embedding.source.as_ref();
    let client = pool.get().await?;
    client
        .timed_execute_cached(
            "INSERT INTO pm.profile_embeddings (profile_id, fingerprint, vector, source, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (profile_id, fingerprint) DO UPDATE SET
                 vector = EXCLUDED.vector,
                 source = EXCLUDED.source,
                 created_at = EXCLUDED.created_at",
            &[
                &profile_id,
                &fingerprint,
                &embedding.values(),
                &source,
                &embedding.created_at,
            ],
            "profile_embeddings.save",
        )
        .await?;
    Ok(())
}
