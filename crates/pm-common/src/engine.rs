//! Invocation boundary of the matching subsystem. The HTTP surface and the
//! retrainer binary only ever talk to [`MatchingEngine`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::encoder::{
    EmbeddingVector, EncoderConfig, ProfileEncoder, fallback_values, profile_text,
};
use crate::feedback::{
    FeedbackError, FeedbackEvent, FeedbackInput, FeedbackSignal, FeedbackSummary, SignalSender,
    SignalWorkerConfig, spawn_signal_worker, summarize,
};
use crate::insights::{InsightsConfig, InsightsError, InsightsReport, InsightsReporter};
use crate::matching::{
    CompatibilityScorer, EncodedCandidate, MatchingConfig, RankedList, RetrainTrigger, WeightSet,
    check_eligibility, rank_candidates,
};
use crate::normalize::text_fingerprint;
use crate::retraining::{RetrainConfig, RetrainError, RetrainSummary, RetrainingJob};
use crate::store::{MatchStore, StoreError};
use crate::{EntityProfile, InvalidWindow, ProfileError, SearchPreferences, resolve_window_days};

/// Most weight sets a single history call returns.
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub encoder: EncoderConfig,
    pub matching: MatchingConfig,
    pub retrain: RetrainConfig,
    pub insights: InsightsConfig,
    pub signals: SignalWorkerConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            encoder: EncoderConfig::from_env(),
            matching: MatchingConfig::from_env(),
            retrain: RetrainConfig::from_env(),
            insights: InsightsConfig::from_env(),
            signals: SignalWorkerConfig::from_env(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidProfile(#[from] ProfileError),
    #[error(transparent)]
    InvalidFeedback(#[from] FeedbackError),
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("weight set {version} could not be made the single active set after {attempts} attempts")]
    RetrainingInconsistentState { version: String, attempts: u32 },
}

impl From<RetrainError> for EngineError {
    fn from(err: RetrainError) -> Self {
        match err {
            RetrainError::InvalidWindow(window) => EngineError::InvalidWindow(window),
            RetrainError::Store(store) => EngineError::Store(store),
            RetrainError::InconsistentState { version, attempts } => {
                EngineError::RetrainingInconsistentState { version, attempts }
            }
        }
    }
}

impl From<InsightsError> for EngineError {
    fn from(err: InsightsError) -> Self {
        match err {
            InsightsError::InvalidWindow(window) => EngineError::InvalidWindow(window),
            InsightsError::Store(store) => EngineError::Store(store),
        }
    }
}

/// Stored feedback plus whether a learning signal was queued for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackAck {
    pub event: FeedbackEvent,
    pub created: bool,
    pub signal_queued: bool,
}

pub struct MatchingEngine {
    store: Arc<dyn MatchStore>,
    encoder: ProfileEncoder,
    config: EngineConfig,
    retrainer: Arc<RetrainingJob>,
    insights: InsightsReporter,
    signals: Option<SignalSender>,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn MatchStore>, encoder: ProfileEncoder, config: EngineConfig) -> Self {
        let retrainer = Arc::new(RetrainingJob::new(store.clone(), config.retrain.clone()));
        let insights = InsightsReporter::new(store.clone(), config.insights.clone());
        Self {
            store,
            encoder,
            config,
            retrainer,
            insights,
            signals: None,
        }
    }

    /// Engine whose encoder is built from `config.encoder`.
    pub fn from_config(store: Arc<dyn MatchStore>, config: EngineConfig) -> Self {
        let encoder = ProfileEncoder::from_config(config.encoder.clone());
        Self::new(store, encoder, config)
    }

    /// Start the feedback signal worker and route decided feedback to it.
    /// The worker stops after the engine (and every sender clone) is dropped.
    pub fn with_signal_worker(mut self) -> (Self, JoinHandle<()>) {
        let (sender, handle) = spawn_signal_worker(
            self.store.clone(),
            Some(self.retrainer.clone()),
            self.config.signals.clone(),
        );
        self.signals = Some(sender);
        (self, handle)
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score `candidates` against `requester` with the active weight set.
    ///
    /// An invalid requester is an error; invalid, inactive, excluded or self
    /// candidates are dropped. No eligible candidates yields an empty list.
    #[instrument(skip_all, fields(requester = %requester.id, candidates = candidates.len()))]
    pub async fn rank_matches(
        &self,
        requester: &EntityProfile,
        candidates: &[EntityProfile],
        preferences: &SearchPreferences,
    ) -> Result<RankedList, EngineError> {
        requester.validate()?;
        let weight_set = self.store.active_weight_set().await?;

        let eligible: Vec<&EntityProfile> = candidates
            .iter()
            .filter(|candidate| match check_eligibility(requester, preferences, candidate) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(candidate = %candidate.id, reason = ?reason, "candidate skipped");
                    false
                }
            })
            .collect();

        if eligible.is_empty() {
            info!(version = %weight_set.version, "no eligible candidates");
            return Ok(RankedList::empty(weight_set.version, candidates.len()));
        }

        let requester_vector = self
            .encoder
            .encode_text(&profile_text(requester, Some(preferences)))
            .await;
        let vectors = self.candidate_vectors(&eligible).await;

        let encoded: Vec<EncodedCandidate<'_>> = eligible
            .iter()
            .zip(&vectors)
            .map(|(&profile, embedding)| EncodedCandidate { profile, embedding })
            .collect();

        let scorer = CompatibilityScorer::new(self.config.matching.clone(), weight_set.weights);
        let ranked = rank_candidates(
            &scorer,
            &weight_set,
            requester,
            preferences,
            &requester_vector,
            &encoded,
            candidates.len(),
        );

        info!(
            version = %ranked.weight_set_version,
            eligible = ranked.eligible,
            returned = ranked.matches.len(),
            floor_relaxed = ranked.floor_relaxed,
            "candidates ranked"
        );
        Ok(ranked)
    }

    /// Read-through embedding cache keyed by (profile id, text fingerprint).
    /// Cache errors only cost a re-encode.
    async fn candidate_vectors(&self, eligible: &[&EntityProfile]) -> Vec<EmbeddingVector> {
        let texts: Vec<String> = eligible.iter().map(|p| profile_text(p, None)).collect();
        let fingerprints: Vec<String> = texts.iter().map(|t| text_fingerprint(t)).collect();

        let mut vectors: Vec<Option<EmbeddingVector>> = Vec::with_capacity(eligible.len());
        for (profile, fingerprint) in eligible.iter().zip(&fingerprints) {
            match self.store.load_embedding(&profile.id, fingerprint).await {
                Ok(hit) => vectors.push(hit),
                Err(err) => {
                    warn!(error = %err, profile = %profile.id, "embedding cache read failed");
                    vectors.push(None);
                }
            }
        }

        let misses: Vec<usize> = (0..vectors.len()).filter(|&i| vectors[i].is_none()).collect();
        debug!(hits = vectors.len() - misses.len(), misses = misses.len(), "embedding cache lookup");

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let encoded = self.encoder.encode_batch(&miss_texts).await;

            for (idx, vector) in misses.into_iter().zip(encoded) {
                if let Err(err) = self
                    .store
                    .save_embedding(&eligible[idx].id, &fingerprints[idx], &vector)
                    .await
                {
                    warn!(error = %err, profile = %eligible[idx].id, "embedding cache write failed");
                }
                vectors[idx] = Some(vector);
            }
        }

        vectors
            .into_iter()
            .zip(&texts)
            .map(|(vector, text)| {
                vector.unwrap_or_else(|| EmbeddingVector::from_fallback(fallback_values(text)))
            })
            .collect()
    }

    /// Validate and upsert feedback, then queue a learning signal when the
    /// write is a new accept/reject decision for its pair. Signal problems
    /// never fail the call.
    #[instrument(skip_all, fields(match_id = %input.match_id, kind = input.kind.as_str()))]
    pub async fn record_feedback(&self, input: FeedbackInput) -> Result<FeedbackAck, EngineError> {
        let event = FeedbackEvent::from_input(input, Utc::now())?;
        let outcome = self.store.upsert_feedback(event).await?;

        let signal_queued = match (FeedbackSignal::from_outcome(&outcome), &self.signals) {
            (Some(signal), Some(sender)) => sender.emit(signal),
            _ => false,
        };

        info!(
            revision = outcome.event.revision,
            created = outcome.created,
            signal_queued,
            "feedback recorded"
        );
        Ok(FeedbackAck {
            event: outcome.event,
            created: outcome.created,
            signal_queued,
        })
    }

    #[instrument(skip(self))]
    pub async fn summarize_feedback(
        &self,
        window_days: Option<u32>,
    ) -> Result<FeedbackSummary, EngineError> {
        let window_days = resolve_window_days(window_days, self.config.insights.window_days)?;
        let since = Utc::now() - Duration::days(i64::from(window_days));
        let events = self.store.feedback_since(since).await?;
        Ok(summarize(&events, window_days))
    }

    pub async fn retrain(
        &self,
        window_days: Option<u32>,
        trigger: RetrainTrigger,
    ) -> Result<RetrainSummary, EngineError> {
        Ok(self.retrainer.run(window_days, trigger).await?)
    }

    pub async fn get_insights(&self, window_days: Option<u32>) -> Result<InsightsReport, EngineError> {
        Ok(self.insights.report(window_days).await?)
    }

    /// Newest first, at most [`MAX_HISTORY`].
    pub async fn weight_history(&self, limit: usize) -> Result<Vec<WeightSet>, EngineError> {
        Ok(self.store.weight_sets(limit.clamp(1, MAX_HISTORY)).await?)
    }
}
