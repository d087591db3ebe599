use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::update::{FeedbackStats, RetrainConfig, derive_weight_update};
use crate::matching::{FactorWeights, RetrainTrigger, WeightSet};
use crate::store::{MatchStore, StoreError};
use crate::{InvalidWindow, resolve_window_days, run_id};

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error("store error during retraining: {0}")]
    Store(#[from] StoreError),
    #[error("weight set {version} still not the single active set after {attempts} attempts")]
    InconsistentState { version: String, attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetrainOutcome {
    /// A new weight set was stored and is now active.
    Activated,
    /// Not enough decided feedback in the window; nothing written.
    Skipped,
    /// Manual run whose accuracy would not beat the active set; nothing written.
    NotImproved,
}

impl RetrainOutcome {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainSummary {
    pub outcome: RetrainOutcome,
    pub trigger: RetrainTrigger,
    pub run_id: String,
    pub window_days: u32,
    pub stats: FeedbackStats,
    pub acceptance_rate: f64,
    pub previous_version: String,
    pub previous_accuracy: f64,
    pub previous_weights: FactorWeights,
    pub version: Option<String>,
    pub accuracy: Option<f64>,
    pub weights: Option<FactorWeights>,
    pub activation_attempts: u32,
}

/// Derives a new weight set from recent feedback and swaps it in.
pub struct RetrainingJob {
    store: Arc<dyn MatchStore>,
    config: RetrainConfig,
}

impl RetrainingJob {
    pub fn new(store: Arc<dyn MatchStore>, config: RetrainConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RetrainConfig {
        &self.config
    }

    /// Nothing is written before the activation step, so dropping the future
    /// earlier leaves the store untouched.
    #[instrument(skip(self), fields(run_id = run_id::get()))]
    pub async fn run(
        &self,
        window_days: Option<u32>,
        trigger: RetrainTrigger,
    ) -> Result<RetrainSummary, RetrainError> {
        let window_days = resolve_window_days(window_days, self.config.window_days)?;
        let since = Utc::now() - Duration::days(i64::from(window_days));

        let events = self.store.feedback_since(since).await?;
        let stats = FeedbackStats::from_events(&events);
        let current = self.store.active_weight_set().await?;

        let mut summary = RetrainSummary {
            outcome: RetrainOutcome::Skipped,
            trigger,
            run_id: run_id::get().to_string(),
            window_days,
            stats,
            acceptance_rate: stats.acceptance_rate(),
            previous_version: current.version.clone(),
            previous_accuracy: current.accuracy,
            previous_weights: current.weights,
            version: None,
            accuracy: None,
            weights: None,
            activation_attempts: 0,
        };

        if stats.decided() < self.config.min_decided_events {
            info!(
                decided = stats.decided(),
                required = self.config.min_decided_events,
                "not enough decided feedback; retraining skipped"
            );
            return Ok(summary);
        }

        let update = derive_weight_update(&current.weights, &stats, &self.config);
        summary.accuracy = Some(update.accuracy);
        summary.weights = Some(update.weights);

        if trigger == RetrainTrigger::Manual && update.accuracy < current.accuracy {
            info!(
                accuracy = update.accuracy,
                current_accuracy = current.accuracy,
                "manual retrain did not improve accuracy; keeping active set"
            );
            summary.outcome = RetrainOutcome::NotImproved;
            return Ok(summary);
        }

        let trained_at = Utc::now();
        let candidate = WeightSet {
            version: run_id::new_version(),
            name: format!("{}-{}", trigger.as_str(), trained_at.format("%Y%m%d%H%M%S")),
            weights: update.weights,
            accuracy: update.accuracy,
            active: true,
            trained_at,
            parent_version: Some(current.version.clone()),
            sample_size: stats.decided(),
            acceptance_rate: Some(update.acceptance_rate),
            trigger,
        };

        let attempts = self.activate_verified(&candidate).await?;

        info!(
            version = %candidate.version,
            previous = %current.version,
            accuracy = candidate.accuracy,
            acceptance_rate = update.acceptance_rate,
            decided = stats.decided(),
            attempts,
            "weight set activated"
        );

        summary.outcome = RetrainOutcome::Activated;
        summary.version = Some(candidate.version);
        summary.activation_attempts = attempts;
        Ok(summary)
    }

    /// Activate, then check that exactly one set is active and that it is
    /// this one or a newer one. Retries the activation on mismatch.
    async fn activate_verified(&self, set: &WeightSet) -> Result<u32, RetrainError> {
        let max_attempts = self.config.activation_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.store.activate_weight_set(set).await?;

            let active = self.store.active_versions().await?;
            match active.as_slice() {
                [only] if only.as_str() >= set.version.as_str() => return Ok(attempt),
                _ => warn!(
                    attempt,
                    version = %set.version,
                    active = ?active,
                    "active weight set check failed after activation"
                ),
            }
        }

        Err(RetrainError::InconsistentState {
            version: set.version.clone(),
            attempts: max_attempts,
        })
    }
}
