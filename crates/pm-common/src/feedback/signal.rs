use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{FeedbackEvent, FeedbackKind, UpsertOutcome};
use crate::matching::RetrainTrigger;
use crate::retraining::RetrainingJob;
use crate::store::MatchStore;

pub const ACCEPTANCE_METRIC: &str = "match_acceptance";

/// Emitted after an accepted/rejected feedback write.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSignal {
    pub user_id: String,
    pub match_id: String,
    pub kind: FeedbackKind,
    pub match_score: f64,
    pub revision: i32,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackSignal {
    /// `None` for pending feedback, which carries no learning signal.
    pub fn from_event(event: &FeedbackEvent) -> Option<Self> {
        event.kind.is_decided().then(|| Self {
            user_id: event.user_id.clone(),
            match_id: event.match_id.clone(),
            kind: event.kind,
            match_score: event.match_score,
            revision: event.revision,
            recorded_at: event.updated_at,
        })
    }

    /// Signal for a stored write, only when it is a new decision for its
    /// (user, match) pair. Repeating the stored verdict emits nothing.
    pub fn from_outcome(outcome: &UpsertOutcome) -> Option<Self> {
        if !outcome.is_new_decision() {
            return None;
        }
        Self::from_event(&outcome.event)
    }
}

/// Append-only scalar observation used by the trend analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub recorded_at: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    pub context: Value,
}

impl PerformanceSample {
    pub fn from_signal(signal: &FeedbackSignal) -> Self {
        let value = match signal.kind {
            FeedbackKind::Accepted => 1.0,
            _ => 0.0,
        };
        Self {
            recorded_at: signal.recorded_at,
            metric: ACCEPTANCE_METRIC.to_string(),
            value,
            context: json!({
                "user_id": signal.user_id,
                "match_id": signal.match_id,
                "match_score": signal.match_score,
                "revision": signal.revision,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalWorkerConfig {
    pub capacity: usize,
    /// Run a retrain after this many decided signals; `None` disables it.
    pub auto_retrain_after: Option<u32>,
}

impl Default for SignalWorkerConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            auto_retrain_after: None,
        }
    }
}

impl SignalWorkerConfig {
    /// `PM_AUTO_RETRAIN_AFTER` (0 or unset disables) and `PM_SIGNAL_CAPACITY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: std::env::var("PM_SIGNAL_CAPACITY")
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.capacity),
            auto_retrain_after: std::env::var("PM_AUTO_RETRAIN_AFTER")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|v| *v > 0),
        }
    }
}

/// Non-blocking handle onto the signal channel.
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<FeedbackSignal>,
}

impl SignalSender {
    /// Never blocks and never fails the caller; a full or closed channel
    /// drops the signal with a warning.
    pub fn emit(&self, signal: FeedbackSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                warn!(match_id = %signal.match_id, "feedback signal channel full; dropping signal");
                false
            }
            Err(TrySendError::Closed(signal)) => {
                warn!(match_id = %signal.match_id, "feedback signal worker stopped; dropping signal");
                false
            }
        }
    }
}

/// Start the background consumer. It stops once every [`SignalSender`] is
/// dropped and the queue has drained.
pub fn spawn_signal_worker(
    store: Arc<dyn MatchStore>,
    retrainer: Option<Arc<RetrainingJob>>,
    config: SignalWorkerConfig,
) -> (SignalSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<FeedbackSignal>(config.capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut decided_since_retrain = 0u32;

        while let Some(signal) = rx.recv().await {
            let sample = PerformanceSample::from_signal(&signal);
            if let Err(err) = store.append_performance_sample(&sample).await {
                error!(error = %err, match_id = %signal.match_id, "failed to record performance sample");
                continue;
            }
            debug!(match_id = %signal.match_id, value = sample.value, "performance sample recorded");

            decided_since_retrain += 1;
            let (Some(threshold), Some(job)) = (config.auto_retrain_after, retrainer.as_ref()) else {
                continue;
            };
            if decided_since_retrain < threshold {
                continue;
            }

            decided_since_retrain = 0;
            match job.run(None, RetrainTrigger::Scheduled).await {
                Ok(summary) => info!(
                    outcome = summary.outcome.as_str(),
                    version = summary.version.as_deref().unwrap_or("-"),
                    "auto retrain finished"
                ),
                Err(err) => error!(error = %err, "auto retrain failed"),
            }
        }

        debug!("feedback signal worker stopped");
    });

    (SignalSender { tx }, handle)
}
