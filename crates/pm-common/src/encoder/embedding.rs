use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;

use crate::EMBEDDING_DIMENSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmbeddingSource {
    /// Produced by the external analyzer (possibly with filled gaps).
    Analyzer,
    /// Derived purely from the text's character codes.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding has {0} values, expected 384")]
    WrongLength(usize),
    #[error("embedding value at {0} is outside [0, 1] or not finite")]
    OutOfRange(usize),
}

/// Fixed-length profile encoding. Always exactly [`EMBEDDING_DIMENSION`]
/// finite values in `[0, 1]`; the constructors are the only way in.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Vec<f32>,
    pub source: EmbeddingSource,
    /// Positions the analyzer did not supply (or supplied as non-finite).
    pub filled_positions: usize,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingVector {
    /// Build from analyzer output. `fill` must be the fallback vector of the
    /// same text and supplies every position the analyzer left out.
    pub fn from_analyzer(raw: &[f64], fill: &[f32]) -> Self {
        let mut filled_positions = 0;
        let values = (0..EMBEDDING_DIMENSION)
            .map(|idx| match raw.get(idx) {
                Some(value) if value.is_finite() => value.clamp(0.0, 1.0) as f32,
                _ => {
                    filled_positions += 1;
                    fill.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0)
                }
            })
            .collect();

        Self {
            values,
            source: EmbeddingSource::Analyzer,
            filled_positions,
            created_at: Utc::now(),
        }
    }

    pub fn from_fallback(values: Vec<f32>) -> Self {
        let values: Vec<f32> = (0..EMBEDDING_DIMENSION)
            .map(|idx| {
                values
                    .get(idx)
                    .copied()
                    .filter(|v| v.is_finite())
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0)
            })
            .collect();

        Self {
            filled_positions: EMBEDDING_DIMENSION,
            values,
            source: EmbeddingSource::Fallback,
            created_at: Utc::now(),
        }
    }

    /// Rehydrate a cached vector, re-checking the invariant at the boundary.
    pub fn from_stored(
        values: Vec<f32>,
        source: EmbeddingSource,
        created_at: DateTime<Utc>,
    ) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIMENSION {
            return Err(EmbeddingError::WrongLength(values.len()));
        }
        if let Some(idx) = values
            .iter()
            .position(|v| !v.is_finite() || !(0.0..=1.0).contains(v))
        {
            return Err(EmbeddingError::OutOfRange(idx));
        }

        Ok(Self {
            values,
            source,
            filled_positions: 0,
            created_at,
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_analyzer_output_is_filled_and_clamped() {
        let fill = vec![0.25f32; EMBEDDING_DIMENSION];
        let vector = EmbeddingVector::from_analyzer(&[1.7, -0.3, 0.5, f64::NAN], &fill);

        assert_eq!(vector.len(), EMBEDDING_DIMENSION);
        assert_eq!(vector.values()[0], 1.0);
        assert_eq!(vector.values()[1], 0.0);
        assert_eq!(vector.values()[2], 0.5);
        assert_eq!(vector.values()[3], 0.25);
        assert_eq!(vector.values()[383], 0.25);
        assert_eq!(vector.filled_positions, EMBEDDING_DIMENSION - 3);
        assert_eq!(vector.source, EmbeddingSource::Analyzer);
    }

    #[test]
    fn long_analyzer_output_is_truncated() {
        let raw = vec![0.5f64; 1000];
        let vector = EmbeddingVector::from_analyzer(&raw, &[]);
        assert_eq!(vector.len(), EMBEDDING_DIMENSION);
        assert_eq!(vector.filled_positions, 0);
    }

    #[test]
    fn stored_vectors_are_validated() {
        let now = Utc::now();
        assert_eq!(
            EmbeddingVector::from_stored(vec![0.5; 10], EmbeddingSource::Analyzer, now),
            Err(EmbeddingError::WrongLength(10))
        );

        let mut values = vec![0.5; EMBEDDING_DIMENSION];
        values[7] = 1.5;
        assert_eq!(
            EmbeddingVector::from_stored(values, EmbeddingSource::Analyzer, now),
            Err(EmbeddingError::OutOfRange(7))
        );

        let ok = EmbeddingVector::from_stored(
            vec![0.5; EMBEDDING_DIMENSION],
            EmbeddingSource::Analyzer,
            now,
        );
        assert!(ok.is_ok());
    }
}
