pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::db_error;
use crate::encoder::EmbeddingVector;
use crate::feedback::{FeedbackEvent, PerformanceSample, UpsertOutcome};
use crate::matching::WeightSet;
pub use memory::MemoryStore;
pub use postgres::PgStore;

db_error!(StoreError {
    #[error("stored data is invalid: {0}")]
    Corrupt(String),
    #[error("no active weight set")]
    NoActiveWeightSet,
    #[error("store state unavailable: {0}")]
    Unavailable(String),
});

impl StoreError {
    /// Transient failures the caller may retry.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Pool(_) | StoreError::Postgres(_) | StoreError::Unavailable(_)
        )
    }
}

/// Everything the engine persists. Implementations must keep exactly one
/// weight set active and upsert feedback on (user_id, match_id).
#[async_trait]
pub trait MatchStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn load_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
    ) -> Result<Option<EmbeddingVector>, StoreError>;

    async fn save_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
        embedding: &EmbeddingVector,
    ) -> Result<(), StoreError>;

    async fn active_weight_set(&self) -> Result<WeightSet, StoreError>;

    /// Newest first.
    async fn weight_sets(&self, limit: usize) -> Result<Vec<WeightSet>, StoreError>;

    /// Insert `set` (if not yet stored) and make it the only active set, as
    /// one atomic step. Re-activating a stored version is allowed.
    async fn activate_weight_set(&self, set: &WeightSet) -> Result<(), StoreError>;

    /// Versions currently flagged active. Exactly one in a healthy store.
    async fn active_versions(&self) -> Result<Vec<String>, StoreError>;

    async fn upsert_feedback(&self, event: FeedbackEvent) -> Result<UpsertOutcome, StoreError>;

    /// Events whose last update is at or after `since`.
    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEvent>, StoreError>;

    async fn append_performance_sample(&self, sample: &PerformanceSample) -> Result<(), StoreError>;

    /// Oldest first.
    async fn performance_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceSample>, StoreError>;
}
