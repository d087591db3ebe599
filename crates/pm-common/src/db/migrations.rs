use tracing::{info, instrument};

use crate::db::{DbPoolError, PgPool, db_error};

db_error!(MigrationError {
    #[error("failed to build pool: {0}")]
    PoolBuild(#[from] DbPoolError),
});

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "profile embedding cache + versioned weight sets",
        sql: r#"
CREATE TABLE IF NOT EXISTS pm.profile_embeddings (
    profile_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    vector REAL[] NOT NULL,
    source TEXT NOT NULL CHECK (source IN ('analyzer', 'fallback')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (profile_id, fingerprint),
    CONSTRAINT chk_embedding_dimension CHECK (cardinality(vector) = 384)
);

CREATE TABLE IF NOT EXISTS pm.weight_sets (
    version TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    weights JSONB NOT NULL,
    accuracy DOUBLE PRECISION NOT NULL,
    active BOOLEAN NOT NULL DEFAULT FALSE,
    trained_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    parent_version TEXT REFERENCES pm.weight_sets(version),
    sample_size INTEGER NOT NULL DEFAULT 0,
    acceptance_rate DOUBLE PRECISION,
    trigger_kind TEXT NOT NULL CHECK (trigger_kind IN ('bootstrap', 'scheduled', 'manual')),
    CONSTRAINT chk_weight_set_accuracy CHECK (accuracy >= 0.5 AND accuracy <= 0.95)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_weight_sets_single_active
    ON pm.weight_sets ((active))
    WHERE active;

INSERT INTO pm.weight_sets
    (version, name, weights, accuracy, active, trained_at, sample_size, trigger_kind)
VALUES (
    '00000000000000000000000000',
    'bootstrap',
    '{"location":0.25,"expertise":0.35,"compliance":0.15,"size":0.10,"rating":0.15}',
    0.5,
    TRUE,
    '1970-01-01T00:00:00Z',
    0,
    'bootstrap'
)
ON CONFLICT (version) DO NOTHING;
"#,
    },
    Migration {
        id: 2,
        description: "feedback events keyed by (user_id, match_id) + revision history",
        sql: r#"
CREATE TABLE IF NOT EXISTS pm.feedback_events (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT NOT NULL,
    match_id TEXT NOT NULL,
    requester_id TEXT,
    candidate_id TEXT,
    match_score DOUBLE PRECISION NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('accepted', 'rejected', 'pending')),
    rejection_reason TEXT,
    counterpart_name TEXT,
    counterpart_category TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    revision INTEGER NOT NULL DEFAULT 1,
    CONSTRAINT uq_feedback_user_match UNIQUE (user_id, match_id),
    CONSTRAINT chk_feedback_score_range CHECK (match_score >= 0.0 AND match_score <= 1.0)
);

CREATE INDEX IF NOT EXISTS idx_feedback_events_updated_at
    ON pm.feedback_events(updated_at);

CREATE TABLE IF NOT EXISTS pm.feedback_event_revisions (
    id BIGSERIAL PRIMARY KEY,
    feedback_event_id BIGINT NOT NULL REFERENCES pm.feedback_events(id),
    revision INTEGER NOT NULL,
    kind TEXT NOT NULL,
    match_score DOUBLE PRECISION NOT NULL,
    rejection_reason TEXT,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#,
    },
    Migration {
        id: 3,
        description: "append-only performance samples",
        sql: r#"
CREATE TABLE IF NOT EXISTS pm.performance_samples (
    id BIGSERIAL PRIMARY KEY,
    metric TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL,
    context JSONB NOT NULL DEFAULT '{}'::jsonb,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_performance_samples_recorded_at
    ON pm.performance_samples(metric, recorded_at);
"#,
    },
];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS pm;
             CREATE TABLE IF NOT EXISTS pm.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pm.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO pm.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{DEFAULT_WEIGHTS, FactorWeights, WeightSet};

    #[test]
    fn migration_ids_are_strictly_increasing() {
        let ids: Vec<i32> = MIGRATIONS.iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn seeded_bootstrap_row_matches_default_weights() {
        let sql = MIGRATIONS[0].sql;
        assert!(sql.contains(WeightSet::BOOTSTRAP_VERSION));

        let start = sql.find("'{").unwrap() + 1;
        let end = sql[start..].find("}'").unwrap() + start + 1;
        let seeded: FactorWeights = serde_json::from_str(&sql[start..end]).unwrap();
        assert_eq!(seeded, DEFAULT_WEIGHTS);
    }
}
