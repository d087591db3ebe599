pub mod embeddings;
pub mod feedback;
pub mod migrations;
pub mod performance;
pub mod pool;
pub mod util;
pub mod weight_sets;

/// Storage error enum with the pool/postgres variants every table module
/// needs, plus the module's own variants.
macro_rules! db_error {
    ($name:ident { $($(#[$meta:meta])* $variant:ident $(($($(#[$fmeta:meta])* $field:ty),* $(,)?))?),* $(,)? }) => {
        #[derive(Debug, thiserror::Error)]
        pub enum $name {
            #[error("failed to get postgres connection: {0}")]
            Pool(#[from] deadpool_postgres::PoolError),
            #[error("postgres error: {0}")]
            Postgres(#[from] tokio_postgres::Error),
            $($(#[$meta])* $variant $(($($(#[$fmeta])* $field),*))?,)*
        }
    };
}
pub(crate) use db_error;

// Keep re-exports unique so downstream crates see a single symbol per helper.
pub use embeddings::{load_embedding, save_embedding};
pub use feedback::{fetch_feedback_since, upsert_feedback_event};
pub use migrations::{MigrationError, run_migrations};
pub use performance::{fetch_samples_since, insert_performance_sample};
pub use pool::{DbPoolError, PgPool, create_pool_from_url};
pub use weight_sets::{activate_weight_set, fetch_active_versions, fetch_active_weight_set, fetch_weight_sets};
