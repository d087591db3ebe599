use serde::{Deserialize, Serialize};

use super::location::evaluate_location;
use super::weights::{Factor, FactorWeights};
use crate::encoder::{EmbeddingVector, cosine_similarity};
use crate::normalize::contains_keyword;
use crate::{EntityProfile, SearchPreferences};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Share of the final score taken by embedding similarity; the factor
    /// score gets the rest.
    pub similarity_blend: f64,
    pub state_match_ratio: f64,
    pub adjacent_size_ratio: f64,
    pub min_score: f64,
    pub fallback_top_k: usize,
    pub max_results: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_blend: 0.4,
            state_match_ratio: 0.5,
            adjacent_size_ratio: 0.5,
            min_score: 0.3,
            fallback_top_k: 3,
            max_results: 20,
        }
    }
}

impl MatchingConfig {
    /// Defaults overridden by `PM_SIMILARITY_BLEND`, `PM_MIN_MATCH_SCORE`,
    /// `PM_FALLBACK_TOP_K` and `PM_MAX_RESULTS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            similarity_blend: env_f64("PM_SIMILARITY_BLEND")
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(defaults.similarity_blend),
            min_score: env_f64("PM_MIN_MATCH_SCORE")
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(defaults.min_score),
            fallback_top_k: env_usize("PM_FALLBACK_TOP_K").unwrap_or(defaults.fallback_top_k),
            max_results: env_usize("PM_MAX_RESULTS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_results),
            ..defaults
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// One factor's share of a compatibility score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    pub factor: Factor,
    pub weight: f64,
    pub score: f64,
    pub contribution: f64,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityScore {
    pub similarity: f64,
    pub factor_score: f64,
    pub score: f64,
    pub percent: u8,
    pub factors: Vec<FactorContribution>,
}

pub struct CompatibilityScorer {
    config: MatchingConfig,
    weights: FactorWeights,
}

impl CompatibilityScorer {
    pub fn new(config: MatchingConfig, weights: FactorWeights) -> Self {
        Self {
            config,
            weights: weights.sanitized(),
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn score(
        &self,
        requester: &EntityProfile,
        preferences: &SearchPreferences,
        requester_vector: &EmbeddingVector,
        candidate: &EntityProfile,
        candidate_vector: &EmbeddingVector,
    ) -> CompatibilityScore {
        let similarity =
            cosine_similarity(requester_vector.values(), candidate_vector.values()) as f64;

        let factors: Vec<FactorContribution> = Factor::ALL
            .iter()
            .map(|factor| {
                let (score, details) = self.score_factor(*factor, requester, preferences, candidate);
                let weight = self.weights.get(*factor);
                FactorContribution {
                    factor: *factor,
                    weight,
                    score,
                    contribution: weight * score,
                    details,
                }
            })
            .collect();

        let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
        let factor_score = if total_weight > 0.0 {
            (factors.iter().map(|f| f.contribution).sum::<f64>() / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let score = self.blend(similarity, factor_score);
        CompatibilityScore {
            similarity,
            factor_score,
            score,
            percent: to_percent(score),
            factors,
        }
    }

    /// `blend·clamp(sim) + (1 − blend)·factor`, bounded to [0, 1].
    pub fn blend(&self, similarity: f64, factor_score: f64) -> f64 {
        let ratio = self.config.similarity_blend.clamp(0.0, 1.0);
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let factor_score = if factor_score.is_finite() {
            factor_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        (ratio * similarity + (1.0 - ratio) * factor_score).clamp(0.0, 1.0)
    }

    fn score_factor(
        &self,
        factor: Factor,
        requester: &EntityProfile,
        preferences: &SearchPreferences,
        candidate: &EntityProfile,
    ) -> (f64, String) {
        match factor {
            Factor::Location => {
                let eval = evaluate_location(
                    requester,
                    preferences,
                    candidate,
                    self.config.state_match_ratio,
                );
                (eval.score, eval.details)
            }
            Factor::Expertise => score_expertise(preferences, candidate),
            Factor::Compliance => match candidate.compliance_verified {
                Some(true) => (1.0, "compliance verified".into()),
                Some(false) => (0.0, "compliance not verified".into()),
                None => (0.0, "compliance unknown".into()),
            },
            Factor::Rating => score_rating(preferences, candidate),
            Factor::Size => self.score_size(preferences, candidate),
        }
    }

    fn score_size(&self, preferences: &SearchPreferences, candidate: &EntityProfile) -> (f64, String) {
        let (Some(wanted), Some(band)) = (preferences.preferred_size, candidate.size_band()) else {
            return (0.0, "size unknown".into());
        };
        match wanted.distance(&band) {
            0 => (1.0, format!("size {}", band.as_ref())),
            1 => (
                self.config.adjacent_size_ratio.clamp(0.0, 1.0),
                format!("size {} (adjacent to {})", band.as_ref(), wanted.as_ref()),
            ),
            _ => (0.0, format!("size {} (wanted {})", band.as_ref(), wanted.as_ref())),
        }
    }
}

fn score_expertise(preferences: &SearchPreferences, candidate: &EntityProfile) -> (f64, String) {
    if preferences.expertise.iter().all(|k| k.trim().is_empty()) {
        return (0.0, "no expertise requested".into());
    }

    let offered = candidate.certifications.iter().chain(&candidate.specialties);
    for item in offered {
        if let Some(keyword) = preferences
            .expertise
            .iter()
            .find(|keyword| contains_keyword(item, keyword))
        {
            return (1.0, format!("{} matches {}", item.trim(), keyword.trim()));
        }
    }
    (0.0, "no requested expertise offered".into())
}

fn score_rating(preferences: &SearchPreferences, candidate: &EntityProfile) -> (f64, String) {
    let Some(rating) = candidate.rating.filter(|r| r.is_finite()) else {
        return (0.0, "unrated".into());
    };
    if let Some(min) = preferences.min_rating {
        if rating < min {
            return (0.0, format!("rating {rating:.1} below minimum {min:.1}"));
        }
    }
    ((rating / 5.0).clamp(0.0, 1.0), format!("rating {rating:.1}"))
}

pub fn to_percent(score: f64) -> u8 {
    (score.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::fallback_values;
    use crate::matching::weights::DEFAULT_WEIGHTS;
    use crate::{EntityCategory, SizeBand};

    fn requester() -> EntityProfile {
        let mut profile = EntityProfile::new("co-1", EntityCategory::Company, "Acme Pharma");
        profile.city = Some("São Paulo".into());
        profile.state = Some("SP".into());
        profile
    }

    fn candidate() -> EntityProfile {
        let mut profile = EntityProfile::new("lab-1", EntityCategory::Laboratory, "Lab");
        profile.city = Some("sao paulo".into());
        profile.state = Some("SP".into());
        profile.certifications = vec!["ANVISA Regulatory GLP".into()];
        profile.rating = Some(4.0);
        profile.capacity = Some(40);
        profile.compliance_verified = Some(true);
        profile
    }

    fn prefs() -> SearchPreferences {
        SearchPreferences {
            expertise: vec!["regulatory".into()],
            preferred_size: Some(SizeBand::Medium),
            ..SearchPreferences::default()
        }
    }

    fn vector(text: &str) -> EmbeddingVector {
        EmbeddingVector::from_fallback(fallback_values(text))
    }

    fn factor(score: &CompatibilityScore, factor: Factor) -> &FactorContribution {
        score.factors.iter().find(|f| f.factor == factor).unwrap()
    }

    #[test]
    fn full_factor_profile_scores_every_factor() {
        let scorer = CompatibilityScorer::new(MatchingConfig::default(), DEFAULT_WEIGHTS);
        let v = vector("same");
        let result = scorer.score(&requester(), &prefs(), &v, &candidate(), &v);

        assert_eq!(factor(&result, Factor::Location).score, 1.0);
        assert_eq!(factor(&result, Factor::Expertise).score, 1.0);
        assert_eq!(factor(&result, Factor::Compliance).score, 1.0);
        assert_eq!(factor(&result, Factor::Size).score, 1.0);
        assert!((factor(&result, Factor::Rating).score - 0.8).abs() < 1e-9);

        let expected_factor = 0.25 + 0.35 + 0.15 + 0.10 + 0.15 * 0.8;
        assert!((result.factor_score - expected_factor).abs() < 1e-9);
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert!((result.score - (0.4 + 0.6 * expected_factor)).abs() < 1e-6);
        assert_eq!(result.percent, to_percent(result.score));
    }

    #[test]
    fn missing_data_contributes_zero() {
        let scorer = CompatibilityScorer::new(MatchingConfig::default(), DEFAULT_WEIGHTS);
        let mut bare = EntityProfile::new("c-9", EntityCategory::Consultant, "Bare");
        bare.description = Some("generalist".into());
        let v = vector("x");

        let result = scorer.score(&requester(), &SearchPreferences::default(), &v, &bare, &v);
        assert_eq!(result.factor_score, 0.0);
        assert!(result.factors.iter().all(|f| f.contribution == 0.0));
    }

    #[test]
    fn rating_below_minimum_scores_zero() {
        let prefs = SearchPreferences {
            min_rating: Some(4.5),
            ..prefs()
        };
        let (score, details) = score_rating(&prefs, &candidate());
        assert_eq!(score, 0.0);
        assert!(details.contains("below minimum"));
    }

    #[test]
    fn adjacent_size_band_scores_half() {
        let scorer = CompatibilityScorer::new(MatchingConfig::default(), DEFAULT_WEIGHTS);
        let mut large = candidate();
        large.capacity = Some(500);
        let (score, _) = scorer.score_size(&prefs(), &large);
        assert_eq!(score, 0.5);

        let mut small = candidate();
        small.capacity = Some(2);
        let prefs = SearchPreferences {
            preferred_size: Some(SizeBand::Large),
            ..prefs()
        };
        assert_eq!(scorer.score_size(&prefs, &small).0, 0.0);
    }

    #[test]
    fn blend_is_bounded_and_monotonic() {
        let scorer = CompatibilityScorer::new(MatchingConfig::default(), DEFAULT_WEIGHTS);
        assert_eq!(scorer.blend(-0.7, 0.0), 0.0);
        assert_eq!(scorer.blend(1.0, 1.0), 1.0);
        assert!(scorer.blend(0.5, 0.6) > scorer.blend(0.4, 0.6));
        assert!(scorer.blend(0.5, 0.6) > scorer.blend(0.5, 0.5));
        assert!((scorer.blend(1.0, 0.0) - 0.4).abs() < 1e-12);
        assert_eq!(scorer.blend(f64::NAN, 0.5), scorer.blend(0.0, 0.5));
    }

    #[test]
    fn zero_weights_give_zero_factor_score() {
        let zero = FactorWeights {
            location: 0.0,
            expertise: 0.0,
            compliance: 0.0,
            size: 0.0,
            rating: 0.0,
        };
        let scorer = CompatibilityScorer::new(MatchingConfig::default(), zero);
        let v = vector("y");
        let result = scorer.score(&requester(), &prefs(), &v, &candidate(), &v);
        assert_eq!(result.factor_score, 0.0);
    }

    #[test]
    fn percent_rounds() {
        assert_eq!(to_percent(0.676), 68);
        assert_eq!(to_percent(1.2), 100);
        assert_eq!(to_percent(-0.1), 0);
    }
}
