pub mod trend;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use thiserror::Error;
use tracing::instrument;

use crate::feedback::{FeedbackSummary, PerformanceSample, summarize};
use crate::matching::WeightSet;
use crate::store::{MatchStore, StoreError};
use crate::{InvalidWindow, resolve_window_days};
pub use trend::{Trend, TrendAnalysis, analyze_trend};

#[derive(Debug, Clone, PartialEq)]
pub struct InsightsConfig {
    pub window_days: u32,
    /// Length of each of the two trend windows.
    pub trend_days: i64,
    /// Relative change beyond which the trend is no longer stable.
    pub trend_threshold: f64,
    pub acceptance_floor: f64,
    pub min_decided_events: u32,
    pub history_depth: usize,
    /// Share of rejections a single reason must reach to be called out.
    pub dominant_reason_share: f64,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            trend_days: 7,
            trend_threshold: 0.05,
            acceptance_floor: 0.5,
            min_decided_events: 5,
            history_depth: 5,
            dominant_reason_share: 0.4,
        }
    }
}

impl InsightsConfig {
    /// `PM_RETRAIN_WINDOW_DAYS`, `PM_ACCEPTANCE_FLOOR` and
    /// `PM_RETRAIN_MIN_EVENTS` over the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_days: std::env::var("PM_RETRAIN_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|d| (1..=crate::MAX_WINDOW_DAYS).contains(d))
                .unwrap_or(defaults.window_days),
            acceptance_floor: std::env::var("PM_ACCEPTANCE_FLOOR")
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|v| (0.0..=1.0).contains(v))
                .unwrap_or(defaults.acceptance_floor),
            min_decided_events: std::env::var("PM_RETRAIN_MIN_EVENTS")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(defaults.min_decided_events),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendationKind {
    ScheduleRetraining,
    AdjustWeights,
    ReviewRejectionReason,
    CollectMoreFeedback,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSetDigest {
    pub version: String,
    pub name: String,
    pub accuracy: f64,
    pub active: bool,
    pub trained_at: DateTime<Utc>,
}

impl From<&WeightSet> for WeightSetDigest {
    fn from(set: &WeightSet) -> Self {
        Self {
            version: set.version.clone(),
            name: set.name.clone(),
            accuracy: set.accuracy,
            active: set.active,
            trained_at: set.trained_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub acceptance_rate: f64,
    pub summary: FeedbackSummary,
    pub trend: TrendAnalysis,
    /// Percent change between the two newest weight-set accuracies.
    pub improvement_rate: Option<f64>,
    pub weight_history: Vec<WeightSetDigest>,
    pub recommendations: Vec<Recommendation>,
}

/// `(latest − previous) / previous · 100`; `None` with fewer than two sets.
pub fn improvement_rate(newest_first: &[WeightSet]) -> Option<f64> {
    match newest_first {
        [latest, previous, ..] if previous.accuracy > 0.0 => {
            Some((latest.accuracy - previous.accuracy) / previous.accuracy * 100.0)
        }
        _ => None,
    }
}

fn recommendations(
    summary: &FeedbackSummary,
    trend: &TrendAnalysis,
    config: &InsightsConfig,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if trend.trend == Trend::Declining {
        out.push(Recommendation {
            kind: RecommendationKind::ScheduleRetraining,
            message: "Acceptance is declining week over week; schedule immediate retraining."
                .into(),
        });
    }

    if summary.decided() > 0 && summary.acceptance_rate < config.acceptance_floor {
        out.push(Recommendation {
            kind: RecommendationKind::AdjustWeights,
            message: format!(
                "Acceptance rate {:.0}% is below the {:.0}% floor; adjust weights.",
                summary.acceptance_rate * 100.0,
                config.acceptance_floor * 100.0
            ),
        });
    }

    if let Some(top) = summary.rejection_reasons.first() {
        let share = top.count as f64 / summary.rejected.max(1) as f64;
        if top.count >= 2 && share >= config.dominant_reason_share {
            out.push(Recommendation {
                kind: RecommendationKind::ReviewRejectionReason,
                message: format!(
                    "\"{}\" accounts for {:.0}% of rejections; review how it is scored.",
                    top.reason,
                    share * 100.0
                ),
            });
        }
    }

    if summary.decided() < config.min_decided_events {
        out.push(Recommendation {
            kind: RecommendationKind::CollectMoreFeedback,
            message: format!(
                "Only {} decided feedback events in the last {} days; collect more feedback.",
                summary.decided(),
                summary.window_days
            ),
        });
    }

    out
}

/// Assemble a report from already-loaded data. `weight_sets` newest first.
pub fn build_report(
    now: DateTime<Utc>,
    summary: FeedbackSummary,
    samples: &[PerformanceSample],
    weight_sets: &[WeightSet],
    config: &InsightsConfig,
) -> InsightsReport {
    let trend = analyze_trend(now, samples, config.trend_days, config.trend_threshold);
    let recommendations = recommendations(&summary, &trend, config);

    InsightsReport {
        generated_at: now,
        window_days: summary.window_days,
        acceptance_rate: summary.acceptance_rate,
        improvement_rate: improvement_rate(weight_sets),
        weight_history: weight_sets
            .iter()
            .take(config.history_depth)
            .map(WeightSetDigest::from)
            .collect(),
        trend,
        summary,
        recommendations,
    }
}

#[derive(Debug, Error)]
pub enum InsightsError {
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error("store error while building insights: {0}")]
    Store(#[from] StoreError),
}

/// Read-only view over feedback, samples and weight history.
pub struct InsightsReporter {
    store: Arc<dyn MatchStore>,
    config: InsightsConfig,
}

impl InsightsReporter {
    pub fn new(store: Arc<dyn MatchStore>, config: InsightsConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self))]
    pub async fn report(&self, window_days: Option<u32>) -> Result<InsightsReport, InsightsError> {
        let window_days = resolve_window_days(window_days, self.config.window_days)?;
        let now = Utc::now();

        let events = self
            .store
            .feedback_since(now - Duration::days(i64::from(window_days)))
            .await?;
        let samples = self
            .store
            .performance_samples_since(now - Duration::days(self.config.trend_days * 2))
            .await?;
        let weight_sets = self.store.weight_sets(self.config.history_depth).await?;

        Ok(build_report(
            now,
            summarize(&events, window_days),
            &samples,
            &weight_sets,
            &self.config,
        ))
    }
}
