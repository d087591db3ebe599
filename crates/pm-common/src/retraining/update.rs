use serde::{Deserialize, Serialize};

use crate::feedback::{FeedbackEvent, FeedbackKind, acceptance_rate};
use crate::matching::FactorWeights;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrainConfig {
    pub window_days: u32,
    /// Below this many accepted+rejected events a run is skipped.
    pub min_decided_events: u32,
    pub high_confidence_rate: f64,
    pub boost: f64,
    pub dampen: f64,
    pub compliance_boost: f64,
    pub max_accuracy: f64,
    pub activation_attempts: u32,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_decided_events: 5,
            high_confidence_rate: 0.8,
            boost: 1.1,
            dampen: 0.9,
            compliance_boost: 1.05,
            max_accuracy: 0.95,
            activation_attempts: 3,
        }
    }
}

impl RetrainConfig {
    /// `PM_RETRAIN_WINDOW_DAYS` (1–365) and `PM_RETRAIN_MIN_EVENTS` over the
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_days: std::env::var("PM_RETRAIN_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|d| (1..=crate::MAX_WINDOW_DAYS).contains(d))
                .unwrap_or(defaults.window_days),
            min_decided_events: std::env::var("PM_RETRAIN_MIN_EVENTS")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(defaults.min_decided_events),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub accepted: u32,
    pub rejected: u32,
    pub pending: u32,
}

impl FeedbackStats {
    pub fn from_events(events: &[FeedbackEvent]) -> Self {
        events.iter().fold(Self::default(), |mut stats, event| {
            match event.kind {
                FeedbackKind::Accepted => stats.accepted += 1,
                FeedbackKind::Rejected => stats.rejected += 1,
                FeedbackKind::Pending => stats.pending += 1,
            }
            stats
        })
    }

    pub fn decided(&self) -> u32 {
        self.accepted + self.rejected
    }

    pub fn acceptance_rate(&self) -> f64 {
        acceptance_rate(self.accepted, self.rejected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightUpdate {
    pub weights: FactorWeights,
    pub accuracy: f64,
    pub acceptance_rate: f64,
    pub adjustment: f64,
}

/// New weights from the current ones and the window's feedback.
///
/// High acceptance boosts location and expertise, anything else dampens
/// them; compliance always gets a small boost. The result is renormalised
/// to sum 1, so size and rating only move through the renormalisation.
pub fn derive_weight_update(
    current: &FactorWeights,
    stats: &FeedbackStats,
    config: &RetrainConfig,
) -> WeightUpdate {
    let rate = stats.acceptance_rate();
    let adjustment = if rate >= config.high_confidence_rate {
        config.boost
    } else {
        config.dampen
    };

    let base = current.sanitized();
    let adjusted = FactorWeights {
        location: base.location * adjustment,
        expertise: base.expertise * adjustment,
        compliance: base.compliance * config.compliance_boost,
        size: base.size,
        rating: base.rating,
    };

    WeightUpdate {
        weights: adjusted.normalized(),
        accuracy: (0.5 + rate * 0.5).min(config.max_accuracy),
        acceptance_rate: rate,
        adjustment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::DEFAULT_WEIGHTS;

    fn stats(accepted: u32, rejected: u32) -> FeedbackStats {
        FeedbackStats {
            accepted,
            rejected,
            pending: 0,
        }
    }

    #[test]
    fn high_acceptance_raises_location_and_expertise() {
        let update = derive_weight_update(&DEFAULT_WEIGHTS, &stats(8, 2), &RetrainConfig::default());

        assert!((update.acceptance_rate - 0.8).abs() < 1e-12);
        assert_eq!(update.adjustment, 1.1);
        assert!(update.weights.location > DEFAULT_WEIGHTS.location);
        assert!(update.weights.expertise > DEFAULT_WEIGHTS.expertise);
        assert!(update.weights.size < DEFAULT_WEIGHTS.size);
        assert!((update.weights.sum() - 1.0).abs() < 1e-9);
        assert!((update.accuracy - 0.9).abs() < 1e-12);
    }

    #[test]
    fn low_acceptance_dampens_location_and_expertise() {
        let update = derive_weight_update(&DEFAULT_WEIGHTS, &stats(2, 8), &RetrainConfig::default());

        assert_eq!(update.adjustment, 0.9);
        assert!(update.weights.location < DEFAULT_WEIGHTS.location);
        assert!(update.weights.expertise < DEFAULT_WEIGHTS.expertise);
        assert!(update.weights.compliance > DEFAULT_WEIGHTS.compliance);
        assert!((update.weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn accuracy_is_capped() {
        let update = derive_weight_update(&DEFAULT_WEIGHTS, &stats(10, 0), &RetrainConfig::default());
        assert_eq!(update.accuracy, 0.95);

        let none = derive_weight_update(&DEFAULT_WEIGHTS, &stats(0, 0), &RetrainConfig::default());
        assert_eq!(none.accuracy, 0.5);
    }

    #[test]
    fn derivation_is_deterministic() {
        let config = RetrainConfig::default();
        assert_eq!(
            derive_weight_update(&DEFAULT_WEIGHTS, &stats(6, 4), &config),
            derive_weight_update(&DEFAULT_WEIGHTS, &stats(6, 4), &config)
        );
    }
}
