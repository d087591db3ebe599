pub mod analyzer;
pub mod config;
pub mod embedding;
pub mod fallback;
pub mod parse;
pub mod similarity;
pub mod text;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{EMBEDDING_DIMENSION, EntityProfile, ProfileError, SearchPreferences};
pub use analyzer::{EncodingError, HttpTextAnalyzer, TextAnalyzer};
pub use config::EncoderConfig;
pub use embedding::{EmbeddingError, EmbeddingSource, EmbeddingVector};
pub use fallback::fallback_values;
pub use parse::extract_feature_array;
pub use similarity::cosine_similarity;
pub use text::profile_text;

/// Fixed instruction sent with every profile text.
pub const FEATURE_INSTRUCTION: &str = "You analyse business partner profiles. \
Return ONLY a JSON array of up to 384 numbers between 0 and 1, each describing one \
semantic feature of the profile (industry, expertise, regulatory focus, location, \
scale). No prose, no keys, just the array.";

/// Text → [`EmbeddingVector`]. Never fails: every analyzer problem degrades to
/// the deterministic fallback of the same text.
#[derive(Clone)]
pub struct ProfileEncoder {
    analyzer: Option<Arc<dyn TextAnalyzer>>,
    config: EncoderConfig,
}

impl ProfileEncoder {
    pub fn new(analyzer: Option<Arc<dyn TextAnalyzer>>, config: EncoderConfig) -> Self {
        Self { analyzer, config }
    }

    /// Encoder that only ever uses the deterministic path.
    pub fn fallback_only() -> Self {
        Self::new(None, EncoderConfig::default())
    }

    /// HTTP analyzer when enabled, fallback-only otherwise (including when
    /// the HTTP client cannot be built).
    pub fn from_config(config: EncoderConfig) -> Self {
        if !config.enabled {
            return Self::new(None, config);
        }

        match HttpTextAnalyzer::new(&config) {
            Ok(analyzer) => Self::new(Some(Arc::new(analyzer)), config),
            Err(err) => {
                warn!(error = %err, "failed to build analyzer client; encoder runs fallback-only");
                Self::new(None, config)
            }
        }
    }

    pub fn analyzer_name(&self) -> &'static str {
        self.analyzer
            .as_ref()
            .map(|analyzer| analyzer.name())
            .unwrap_or("fallback")
    }

    async fn analyze(&self, text: &str) -> Result<Vec<f64>, EncodingError> {
        let analyzer = self.analyzer.as_ref().ok_or(EncodingError::Disabled)?;

        let response = timeout(self.config.timeout, analyzer.analyze(FEATURE_INSTRUCTION, text))
            .await
            .map_err(|_| EncodingError::Timeout(self.config.timeout))??;

        extract_feature_array(&response).ok_or(EncodingError::Unparseable)
    }

    pub async fn encode_text(&self, text: &str) -> EmbeddingVector {
        let fill = fallback_values(text);

        match self.analyze(text).await {
            Ok(raw) => {
                let vector = EmbeddingVector::from_analyzer(&raw, &fill);
                if vector.filled_positions > 0 {
                    debug!(
                        supplied = raw.len().min(EMBEDDING_DIMENSION),
                        filled = vector.filled_positions,
                        "analyzer returned a short vector; filled deterministically"
                    );
                }
                vector
            }
            Err(EncodingError::Disabled) => EmbeddingVector::from_fallback(fill),
            Err(err) => {
                warn!(
                    error = %err,
                    analyzer = self.analyzer_name(),
                    "encoding unavailable; using deterministic fallback"
                );
                EmbeddingVector::from_fallback(fill)
            }
        }
    }

    /// Validate, build the text block and encode. Validation failures are the
    /// only error and happen before any outbound call.
    pub async fn encode_profile(
        &self,
        profile: &EntityProfile,
        preferences: Option<&SearchPreferences>,
    ) -> Result<EmbeddingVector, ProfileError> {
        profile.validate()?;
        Ok(self.encode_text(&profile_text(profile, preferences)).await)
    }

    /// Encode many texts, `batch_concurrency` at a time. Output order matches
    /// input order; a task that dies falls back for its own text only.
    pub async fn encode_batch(&self, texts: &[String]) -> Vec<EmbeddingVector> {
        let chunk_size = self.config.batch_concurrency.max(1);
        let mut encoded: Vec<Option<EmbeddingVector>> = vec![None; texts.len()];

        for (chunk_idx, chunk) in texts.chunks(chunk_size).enumerate() {
            let mut tasks = JoinSet::new();
            for (offset, text) in chunk.iter().enumerate() {
                let idx = chunk_idx * chunk_size + offset;
                let encoder = self.clone();
                let text = text.clone();
                tasks.spawn(async move { (idx, encoder.encode_text(&text).await) });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((idx, vector)) => encoded[idx] = Some(vector),
                    Err(err) => warn!(error = %err, "encoding task failed; using fallback"),
                }
            }
        }

        encoded
            .into_iter()
            .zip(texts)
            .map(|(vector, text)| {
                vector.unwrap_or_else(|| EmbeddingVector::from_fallback(fallback_values(text)))
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::StubAnalyzer;
    use super::*;
    use crate::EntityCategory;

    fn encoder_with(stub: StubAnalyzer) -> ProfileEncoder {
        let config = EncoderConfig {
            enabled: true,
            timeout: Duration::from_millis(50),
            batch_concurrency: 2,
            ..EncoderConfig::default()
        };
        ProfileEncoder::new(Some(Arc::new(stub)), config)
    }

    fn assert_valid(vector: &EmbeddingVector) {
        assert_eq!(vector.len(), EMBEDDING_DIMENSION);
        assert!(
            vector
                .values()
                .iter()
                .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
        );
    }

    #[tokio::test]
    async fn uses_analyzer_array_and_fills_the_rest() {
        let encoder = encoder_with(StubAnalyzer::Reply("features: [0.9, 2.0, -1]".into()));
        let vector = encoder.encode_text("laboratory").await;

        assert_valid(&vector);
        assert_eq!(vector.source, EmbeddingSource::Analyzer);
        assert_eq!(vector.values()[0], 0.9);
        assert_eq!(vector.values()[1], 1.0);
        assert_eq!(vector.values()[2], 0.0);
        assert_eq!(vector.values()[3], fallback_values("laboratory")[3]);
        assert_eq!(vector.filled_positions, EMBEDDING_DIMENSION - 3);
    }

    #[tokio::test]
    async fn failing_analyzer_falls_back() {
        let encoder = encoder_with(StubAnalyzer::Fail);
        let vector = encoder.encode_text("consultant").await;

        assert_valid(&vector);
        assert_eq!(vector.source, EmbeddingSource::Fallback);
        assert_eq!(vector.values(), fallback_values("consultant").as_slice());
    }

    #[tokio::test]
    async fn malformed_output_falls_back() {
        let encoder = encoder_with(StubAnalyzer::Reply("<html>502 Bad Gateway</html>".into()));
        let vector = encoder.encode_text("company").await;

        assert_valid(&vector);
        assert_eq!(vector.source, EmbeddingSource::Fallback);
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let encoder = encoder_with(StubAnalyzer::Hang);
        let vector = encoder.encode_text("company").await;

        assert_valid(&vector);
        assert_eq!(vector.source, EmbeddingSource::Fallback);
    }

    #[tokio::test]
    async fn fallback_only_encoder_never_calls_out() {
        let encoder = ProfileEncoder::fallback_only();
        assert_eq!(encoder.analyzer_name(), "fallback");
        let vector = encoder.encode_text("").await;
        assert_valid(&vector);
    }

    #[tokio::test]
    async fn invalid_profile_is_rejected_before_encoding() {
        let encoder = encoder_with(StubAnalyzer::Panic);
        let profile = EntityProfile::new("x", EntityCategory::Company, "");

        let result = encoder.encode_profile(&profile, None).await;
        assert!(matches!(result, Err(ProfileError::MissingField { field: "name", .. })));
    }

    #[tokio::test]
    async fn batch_keeps_order_and_isolates_failures() {
        let encoder = encoder_with(StubAnalyzer::Panic);
        let texts: Vec<String> = vec!["ok one".into(), "explode".into(), "ok two".into()];

        let vectors = encoder.encode_batch(&texts).await;

        assert_eq!(vectors.len(), 3);
        vectors.iter().for_each(assert_valid);
        assert_eq!(vectors[0].source, EmbeddingSource::Analyzer);
        assert_eq!(vectors[1].source, EmbeddingSource::Fallback);
        assert_eq!(vectors[1].values(), fallback_values("explode").as_slice());
        assert_eq!(vectors[2].source, EmbeddingSource::Analyzer);
    }
}
