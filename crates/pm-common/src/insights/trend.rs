use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::feedback::PerformanceSample;
use crate::feedback::signal::ACCEPTANCE_METRIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl Trend {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    pub recent_mean: Option<f64>,
    pub prior_mean: Option<f64>,
    /// `(recent − prior) / prior`; absent when either window is empty or the
    /// prior mean is zero.
    pub relative_change: Option<f64>,
    pub recent_samples: usize,
    pub prior_samples: usize,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn pair_key(sample: &PerformanceSample) -> Option<(&str, &str)> {
    Some((
        sample.context.get("user_id")?.as_str()?,
        sample.context.get("match_id")?.as_str()?,
    ))
}

/// Newest sample of each (user, match) pair, oldest first. Samples without
/// that context all count.
fn latest_per_pair<'a>(
    samples: impl Iterator<Item = &'a PerformanceSample>,
) -> Vec<&'a PerformanceSample> {
    let mut newest: HashMap<(&str, &str), &PerformanceSample> = HashMap::new();
    let mut kept = Vec::new();

    for sample in samples {
        match pair_key(sample) {
            Some(key) => {
                newest
                    .entry(key)
                    .and_modify(|current| {
                        if sample.recorded_at >= current.recorded_at {
                            *current = sample;
                        }
                    })
                    .or_insert(sample);
            }
            None => kept.push(sample),
        }
    }

    kept.extend(newest.into_values());
    kept.sort_by_key(|s| s.recorded_at);
    kept
}

/// Mean acceptance over the last `days` vs the `days` before that.
///
/// Stateless: the relative change is compared against a fixed `±threshold`
/// band on every call, with no memory of the previous classification.
/// Either window empty means stable; a zero prior mean with a positive
/// recent mean counts as improving. A (user, match) pair contributes only
/// its latest verdict.
pub fn analyze_trend(
    now: DateTime<Utc>,
    samples: &[PerformanceSample],
    days: i64,
    threshold: f64,
) -> TrendAnalysis {
    let recent_start = now - Duration::days(days);
    let prior_start = recent_start - Duration::days(days);

    let acceptance = latest_per_pair(
        samples
            .iter()
            .filter(|s| s.metric == ACCEPTANCE_METRIC && s.value.is_finite()),
    );
    let recent: Vec<f64> = acceptance
        .iter()
        .filter(|s| s.recorded_at >= recent_start && s.recorded_at <= now)
        .map(|s| s.value)
        .collect();
    let prior: Vec<f64> = acceptance
        .iter()
        .filter(|s| s.recorded_at >= prior_start && s.recorded_at < recent_start)
        .map(|s| s.value)
        .collect();

    let recent_mean = mean(&recent);
    let prior_mean = mean(&prior);

    let (trend, relative_change) = match (recent_mean, prior_mean) {
        (Some(recent), Some(prior)) if prior > 0.0 => {
            let change = (recent - prior) / prior;
            let trend = if change > threshold {
                Trend::Improving
            } else if change < -threshold {
                Trend::Declining
            } else {
                Trend::Stable
            };
            (trend, Some(change))
        }
        (Some(recent), Some(_)) if recent > 0.0 => (Trend::Improving, None),
        _ => (Trend::Stable, None),
    };

    TrendAnalysis {
        trend,
        recent_mean,
        prior_mean,
        relative_change,
        recent_samples: recent.len(),
        prior_samples: prior.len(),
    }
}
