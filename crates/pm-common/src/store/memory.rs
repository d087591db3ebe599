use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MatchStore, StoreError};
use crate::encoder::{EmbeddingSource, EmbeddingVector};
use crate::feedback::{FeedbackEvent, PerformanceSample, UpsertOutcome};
use crate::matching::WeightSet;

#[derive(Default)]
struct State {
    embeddings: HashMap<(String, String), EmbeddingVector>,
    weight_sets: Vec<WeightSet>,
    feedback: HashMap<(String, String), FeedbackEvent>,
    samples: Vec<PerformanceSample>,
}

/// In-process store. Every mutation happens under one write lock, which is
/// what makes weight-set activation and the feedback upsert atomic here.
pub struct MemoryStore {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store seeded with the bootstrap weight set.
    pub fn new() -> Self {
        let state = State {
            weight_sets: vec![WeightSet::bootstrap()],
            ..State::default()
        };
        Self {
            state: RwLock::new(state),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail as unavailable, like a lost database.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.check_online()?;
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.check_online()?;
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    async fn load_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
    ) -> Result<Option<EmbeddingVector>, StoreError> {
        let state = self.read()?;
        Ok(state
            .embeddings
            .get(&(profile_id.to_string(), fingerprint.to_string()))
            .cloned())
    }

    async fn save_embedding(
        &self,
        profile_id: &str,
        fingerprint: &str,
        embedding: &EmbeddingVector,
    ) -> Result<(), StoreError> {
        if embedding.source != EmbeddingSource::Analyzer {
            return Ok(());
        }
        let mut state = self.write()?;
        state.embeddings.insert(
            (profile_id.to_string(), fingerprint.to_string()),
            embedding.clone(),
        );
        Ok(())
    }

    async fn active_weight_set(&self) -> Result<WeightSet, StoreError> {
        let state = self.read()?;
        state
            .weight_sets
            .iter()
            .filter(|set| set.active)
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned()
            .ok_or(StoreError::NoActiveWeightSet)
    }

    async fn weight_sets(&self, limit: usize) -> Result<Vec<WeightSet>, StoreError> {
        let state = self.read()?;
        let mut sets = state.weight_sets.clone();
        sets.sort_by(|a, b| b.version.cmp(&a.version));
        sets.truncate(limit);
        Ok(sets)
    }

    async fn activate_weight_set(&self, set: &WeightSet) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.weight_sets.iter().any(|s| s.version == set.version) {
            state.weight_sets.push(set.clone());
        }
        for stored in state.weight_sets.iter_mut() {
            stored.active = stored.version == set.version;
        }
        Ok(())
    }

    async fn active_versions(&self) -> Result<Vec<String>, StoreError> {
        let state = self.read()?;
        Ok(state
            .weight_sets
            .iter()
            .filter(|set| set.active)
            .map(|set| set.version.clone())
            .collect())
    }

    async fn upsert_feedback(&self, event: FeedbackEvent) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.write()?;
        let key = (event.user_id.clone(), event.match_id.clone());
        let (stored, previous_kind) = match state.feedback.get(&key) {
            Some(existing) => (existing.overwritten_by(event), Some(existing.kind)),
            None => (event, None),
        };
        state.feedback.insert(key, stored.clone());
        Ok(UpsertOutcome {
            event: stored,
            created: previous_kind.is_none(),
            previous_kind,
        })
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackEvent>, StoreError> {
        let state = self.read()?;
        let mut events: Vec<FeedbackEvent> = state
            .feedback
            .values()
            .filter(|event| event.updated_at >= since)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        Ok(events)
    }

    async fn append_performance_sample(&self, sample: &PerformanceSample) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.samples.push(sample.clone());
        Ok(())
    }

    async fn performance_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceSample>, StoreError> {
        let state = self.read()?;
        let mut samples: Vec<PerformanceSample> = state
            .samples
            .iter()
            .filter(|sample| sample.recorded_at >= since)
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::encoder::fallback_values;
    use crate::feedback::{FeedbackInput, FeedbackKind};
    use crate::matching::{DEFAULT_WEIGHTS, RetrainTrigger};
    use crate::run_id;

    fn feedback(kind: FeedbackKind, at: DateTime<Utc>) -> FeedbackEvent {
        FeedbackEvent::from_input(
            FeedbackInput {
                user_id: "u-1".into(),
                match_id: "co-1:lab-1".into(),
                match_score: 0.5,
                kind,
                rejection_reason: Some("price".into()),
                counterpart_name: None,
                counterpart_category: None,
            },
            at,
        )
        .unwrap()
    }

    fn trained_set() -> WeightSet {
        WeightSet {
            version: run_id::new_version(),
            name: "test".into(),
            weights: DEFAULT_WEIGHTS,
            accuracy: 0.7,
            active: true,
            trained_at: Utc::now(),
            parent_version: Some(WeightSet::BOOTSTRAP_VERSION.into()),
            sample_size: 10,
            acceptance_rate: Some(0.4),
            trigger: RetrainTrigger::Manual,
        }
    }

    #[tokio::test]
    async fn starts_with_bootstrap_active() {
        let store = MemoryStore::new();
        let active = store.active_weight_set().await.unwrap();
        assert_eq!(active.version, WeightSet::BOOTSTRAP_VERSION);
        assert_eq!(store.active_versions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activation_swaps_the_single_active_set() {
        let store = MemoryStore::new();
        let set = trained_set();
        store.activate_weight_set(&set).await.unwrap();
        store.activate_weight_set(&set).await.unwrap();

        assert_eq!(store.active_versions().await.unwrap(), vec![set.version.clone()]);
        let history = store.weight_sets(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, set.version);
        assert!(!history[1].active);
    }

    #[tokio::test]
    async fn double_feedback_upserts_one_row() {
        let store = MemoryStore::new();
        let first = store
            .upsert_feedback(feedback(FeedbackKind::Rejected, Utc::now()))
            .await
            .unwrap();
        let second = store
            .upsert_feedback(feedback(FeedbackKind::Accepted, Utc::now()))
            .await
            .unwrap();

        assert!(first.created);
        assert_eq!(first.previous_kind, None);
        assert!(!second.created);
        assert_eq!(second.previous_kind, Some(FeedbackKind::Rejected));
        assert_eq!(second.event.revision, 2);

        let events = store
            .feedback_since(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FeedbackKind::Accepted);
    }

    #[tokio::test]
    async fn only_analyzer_embeddings_are_cached() {
        let store = MemoryStore::new();
        let fallback = EmbeddingVector::from_fallback(fallback_values("x"));
        store.save_embedding("p-1", "abc", &fallback).await.unwrap();
        assert!(store.load_embedding("p-1", "abc").await.unwrap().is_none());

        let analyzed = EmbeddingVector::from_analyzer(&[0.5], &fallback_values("x"));
        store.save_embedding("p-1", "abc", &analyzed).await.unwrap();
        assert_eq!(
            store.load_embedding("p-1", "abc").await.unwrap(),
            Some(analyzed)
        );
        assert!(store.load_embedding("p-1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_unavailable());
        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
