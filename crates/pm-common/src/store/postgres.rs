use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{MatchStore, StoreError};
use crate::db::{self, PgPool};
use crate::encoder::{EmbeddingSource, EmbeddingVector};
use crate::feedback::{FeedbackEvent, PerformanceSample, UpsertOutcome};
use crate::matching::WeightSet;

/// [`MatchStore`] over the `pm` Postgres schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MatchStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn load_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
    ) -> Result<Option<EmbeddingVector>, StoreError> {
        db::load_embedding(&self.pool, profile_id, fingerprint).await
    }

    async fn save_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
        embedding: &EmbeddingVector,
    ) -> Result<(), StoreError> {
        if embedding.source != EmbeddingSource::Analyzer {
            return Ok(());
        }
        db::save_embedding(&self.pool, profile_id, fingerprint, embedding).await
    }

    async fn active_weight_set(&self) -> Result<WeightSet, StoreError> {
        db::fetch_active_weight_set(&self.pool).await
    }

    async fn weight_sets(&self, limit: usize) -> Result<Vec<WeightSet>, StoreError> {
        db::fetch_weight_sets(&self.pool, limit).await
    }

    async fn activate_weight_set(&self, set: &WeightSet) -> Result<(), StoreError> {
        db::activate_weight_set(&self.pool, set).await
    }

    async fn active_versions(&self) -> Result<Vec<String>, StoreError> {
        db::fetch_active_versions(&self.pool).await
    }

    async fn upsert_feedback(&self, event: FeedbackEvent) -> Result<UpsertOutcome, StoreError> {
        db::upsert_feedback_event(&self.pool, &event).await
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEvent>, StoreError> {
        db::fetch_feedback_since(&self.pool, since).await
    }

    async fn append_performance_sample(&self, sample: &PerformanceSample) -> Result<(), StoreError> {
        db::insert_performance_sample(&self.pool, sample).await
    }

    async fn performance_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceSample>, StoreError> {
        db::fetch_samples_since(&self.pool, since).await
    }
}
