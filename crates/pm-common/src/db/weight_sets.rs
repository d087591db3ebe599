use std::str::FromStr;

use tokio_postgres::Row;
use tokio_postgres::types::Json;
use tracing::{info, instrument};

use crate::db::PgPool;
use crate::db::util::TimedClientExt;
use crate::matching::{FactorWeights, RetrainTrigger, WeightSet};
use crate::store::StoreError;

const SET_COLUMNS: &str = "version, name, weights, accuracy, active, trained_at, parent_version, \
     sample_size, acceptance_rate, trigger_kind";

fn row_to_weight_set(row: &Row) -> Result<WeightSet, StoreError> {
    let trigger: String = row.get("trigger_kind");
    let trigger = RetrainTrigger::from_str(&trigger)
        .map_err(|_| StoreError::Corrupt(format!("unknown retrain trigger {trigger:?}")))?;
    let Json(weights): Json<FactorWeights> = row.get("weights");

    Ok(WeightSet {
        version: row.get("version"),
        name: row.get("name"),
        weights,
        accuracy: row.get("accuracy"),
        active: row.get("active"),
        trained_at: row.get("trained_at"),
        parent_version: row.get("parent_version"),
        sample_size: row.get::<_, i32>("sample_size").max(0) as u32,
        acceptance_rate: row.get("acceptance_rate"),
        trigger,
    })
}

#[instrument(skip(pool))]
pub async fn fetch_active_weight_set(pool: &PgPool) -> Result<WeightSet, StoreError> {
    let client = pool.get().await?;
    let statement = format!(
        "SELECT {SET_COLUMNS} FROM pm.weight_sets WHERE active ORDER BY version DESC LIMIT 1"
    );
    let row = client
        .timed_query_opt_cached(&statement, &[], "weight_sets.active")
        .await?
        .ok_or(StoreError::NoActiveWeightSet)?;

    row_to_weight_set(&row)
}

#[instrument(skip(pool))]
pub async fn fetch_weight_sets(pool: &PgPool, limit: usize) -> Result<Vec<WeightSet>, StoreError> {
    let client = pool.get().await?;
    let statement =
        format!("SELECT {SET_COLUMNS} FROM pm.weight_sets ORDER BY version DESC LIMIT $1");
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = client
        .timed_query_cached(&statement, &[&limit], "weight_sets.history")
        .await?;

    rows.iter().map(row_to_weight_set).collect()
}

#[instrument(skip(pool))]
pub async fn fetch_active_versions(pool: &PgPool) -> Result<Vec<String>, StoreError> {
    let client = pool.get().await?;
    let rows = client
        .timed_query_cached(
            "SELECT version FROM pm.weight_sets WHERE active ORDER BY version",
            &[],
            "weight_sets.active_versions",
        )
        .await?;

    Ok(rows.iter().map(|row| row.get("version")).collect())
}

/// Insert the set (if new), deactivate every other set and activate this
/// one, all in one transaction. The table lock serialises concurrent
/// activations; the partial unique index rejects a second active row.
#[instrument(skip(pool, set), fields(version = %set.version))]
pub async fn activate_weight_set(pool: &PgPool, set: &WeightSet) -> Result<(), StoreError> {
    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.batch_execute("LOCK TABLE pm.weight_sets IN SHARE ROW EXCLUSIVE MODE")
        .await?;

    let sample_size = i32::try_from(set.sample_size).unwrap_or(i32::MAX);
    let inserted = tx
        .timed_execute_cached(
            "INSERT INTO pm.weight_sets
                 (version, name, weights, accuracy, active, trained_at, parent_version,
                  sample_size, acceptance_rate, trigger_kind)
             VALUES ($1, $2, $3, $4, FALSE, $5, $6, $7, $8, $9)
             ON CONFLICT (version) DO NOTHING",
            &[
                &set.version,
                &set.name,
                &Json(&set.weights),
                &set.accuracy,
                &set.trained_at,
                &set.parent_version,
                &sample_size,
                &set.acceptance_rate,
                &set.trigger.as_str(),
            ],
            "weight_sets.insert",
        )
        .await?;

    tx.timed_execute_cached(
        "UPDATE pm.weight_sets SET active = FALSE WHERE active AND version <> $1",
        &[&set.version],
        "weight_sets.deactivate",
    )
    .await?;

    let activated = tx
        .timed_execute_cached(
            "UPDATE pm.weight_sets SET active = TRUE WHERE version = $1",
            &[&set.version],
            "weight_sets.activate",
        )
        .await?;
    if activated != 1 {
        return Err(StoreError::Corrupt(format!(
            "weight set {} vanished during activation",
            set.version
        )));
    }

    tx.commit().await?;
    info!(inserted = inserted == 1, "weight set activated");
    Ok(())
}
