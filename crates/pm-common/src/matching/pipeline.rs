use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use super::scoring::{CompatibilityScorer, FactorContribution};
use super::weights::WeightSet;
use crate::encoder::{EmbeddingSource, EmbeddingVector};
use crate::feedback::MatchId;
use crate::{EntityCategory, EntityProfile, SearchPreferences};

/// Why a candidate was left out before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Ineligible {
    Inactive,
    SelfMatch,
    CategoryExcluded,
    InvalidProfile,
}

pub fn check_eligibility(
    requester: &EntityProfile,
    preferences: &SearchPreferences,
    candidate: &EntityProfile,
) -> Result<(), Ineligible> {
    if !candidate.active {
        return Err(Ineligible::Inactive);
    }
    if candidate.id == requester.id {
        return Err(Ineligible::SelfMatch);
    }
    if !preferences.allows(candidate.category) {
        return Err(Ineligible::CategoryExcluded);
    }
    if candidate.validate().is_err() {
        return Err(Ineligible::InvalidProfile);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub candidate_id: String,
    pub candidate_name: String,
    pub category: EntityCategory,
    pub match_id: String,
    pub similarity: f64,
    pub factor_score: f64,
    pub compatibility_score: f64,
    pub compatibility_percent: u8,
    pub embedding_source: EmbeddingSource,
    pub contributing_factors: Vec<FactorContribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub weight_set_version: String,
    pub matches: Vec<RankedMatch>,
    /// Set when the score floor would have emptied the list and the top-K
    /// unfiltered matches were returned instead.
    pub floor_relaxed: bool,
    pub considered: usize,
    pub eligible: usize,
}

impl RankedList {
    pub fn empty(weight_set_version: impl Into<String>, considered: usize) -> Self {
        Self {
            weight_set_version: weight_set_version.into(),
            matches: Vec::new(),
            floor_relaxed: false,
            considered,
            eligible: 0,
        }
    }
}

/// An eligible candidate with its encoding.
pub struct EncodedCandidate<'a> {
    pub profile: &'a EntityProfile,
    pub embedding: &'a EmbeddingVector,
}

/// Score, sort (descending score, then candidate id) and apply the floor.
///
/// Callers filter eligibility first; `considered` is the pre-filter count.
pub fn rank_candidates(
    scorer: &CompatibilityScorer,
    weight_set: &WeightSet,
    requester: &EntityProfile,
    preferences: &SearchPreferences,
    requester_vector: &EmbeddingVector,
    candidates: &[EncodedCandidate<'_>],
    considered: usize,
) -> RankedList {
    let mut ranked: Vec<RankedMatch> = candidates
        .iter()
        .map(|candidate| {
            let score = scorer.score(
                requester,
                preferences,
                requester_vector,
                candidate.profile,
                candidate.embedding,
            );
            RankedMatch {
                candidate_id: candidate.profile.id.clone(),
                candidate_name: candidate.profile.name.clone(),
                category: candidate.profile.category,
                match_id: MatchId::compose(&requester.id, &candidate.profile.id).into_string(),
                similarity: score.similarity,
                factor_score: score.factor_score,
                compatibility_score: score.score,
                compatibility_percent: score.percent,
                embedding_source: candidate.embedding.source,
                contributing_factors: score.factors,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.compatibility_score
            .partial_cmp(&a.compatibility_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });

    let config = scorer.config();
    let eligible = ranked.len();
    let above_floor = ranked
        .iter()
        .take_while(|m| m.compatibility_score >= config.min_score)
        .count();

    let floor_relaxed = above_floor == 0 && eligible > 0;
    let keep = if floor_relaxed {
        config.fallback_top_k.max(1)
    } else {
        above_floor
    };
    ranked.truncate(keep.min(config.max_results.max(1)));

    RankedList {
        weight_set_version: weight_set.version.clone(),
        matches: ranked,
        floor_relaxed,
        considered,
        eligible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::fallback_values;
    use crate::matching::scoring::MatchingConfig;
    use crate::matching::weights::DEFAULT_WEIGHTS;

    fn profile(id: &str, category: EntityCategory, city: &str, state: &str) -> EntityProfile {
        let mut profile = EntityProfile::new(id, category, format!("{id} name"));
        profile.city = Some(city.into());
        profile.state = Some(state.into());
        profile
    }

    // Same text for everyone: similarity is constant, factors decide.
    fn shared_vector() -> EmbeddingVector {
        EmbeddingVector::from_fallback(fallback_values("shared"))
    }

    fn run(
        config: MatchingConfig,
        requester: &EntityProfile,
        prefs: &SearchPreferences,
        pool: &[EntityProfile],
    ) -> RankedList {
        let scorer = CompatibilityScorer::new(config, DEFAULT_WEIGHTS);
        let vectors: Vec<EmbeddingVector> = pool.iter().map(|_| shared_vector()).collect();
        let eligible: Vec<EncodedCandidate<'_>> = pool
            .iter()
            .zip(&vectors)
            .filter(|(p, _)| check_eligibility(requester, prefs, p).is_ok())
            .map(|(profile, embedding)| EncodedCandidate { profile, embedding })
            .collect();
        rank_candidates(
            &scorer,
            &WeightSet::bootstrap(),
            requester,
            prefs,
            &shared_vector(),
            &eligible,
            pool.len(),
        )
    }

    fn sao_paulo_requester() -> (EntityProfile, SearchPreferences) {
        let requester = profile("co-1", EntityCategory::Company, "São Paulo", "SP");
        let prefs = SearchPreferences {
            expertise: vec!["regulatory".into()],
            ..SearchPreferences::default()
        };
        (requester, prefs)
    }

    #[test]
    fn local_regulatory_lab_ranks_first() {
        let (requester, prefs) = sao_paulo_requester();
        let mut local = profile("lab-sp", EntityCategory::Laboratory, "sao paulo", "SP");
        local.certifications = vec!["Regulatory affairs (ANVISA)".into()];
        local.rating = Some(4.0);
        let mut remote = profile("lab-rio", EntityCategory::Laboratory, "Rio de Janeiro", "RJ");
        remote.specialties = vec!["microbiology".into()];
        remote.rating = Some(5.0);

        let list = run(MatchingConfig::default(), &requester, &prefs, &[remote, local]);

        assert_eq!(list.matches[0].candidate_id, "lab-sp");
        assert_eq!(list.matches[0].match_id, "co-1:lab-sp");
        assert!(list.matches[0].compatibility_score > list.matches[1].compatibility_score);
        assert!(!list.floor_relaxed);
    }

    #[test]
    fn ties_break_by_candidate_id() {
        let (requester, prefs) = sao_paulo_requester();
        let pool = vec![
            profile("c-b", EntityCategory::Consultant, "Campinas", "SP"),
            profile("c-a", EntityCategory::Consultant, "Campinas", "SP"),
        ];
        let config = MatchingConfig {
            min_score: 0.0,
            ..MatchingConfig::default()
        };

        let first = run(config.clone(), &requester, &prefs, &pool);
        let second = run(config, &requester, &prefs, &pool);
        let ids: Vec<&str> = first.matches.iter().map(|m| m.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["c-a", "c-b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn floor_excluding_everyone_returns_top_k() {
        let (requester, prefs) = sao_paulo_requester();
        let pool: Vec<EntityProfile> = (0..5)
            .map(|i| profile(&format!("c-{i}"), EntityCategory::Consultant, "Manaus", "AM"))
            .collect();
        let config = MatchingConfig {
            min_score: 0.99,
            fallback_top_k: 3,
            ..MatchingConfig::default()
        };

        let list = run(config, &requester, &prefs, &pool);
        assert!(list.floor_relaxed);
        assert_eq!(list.matches.len(), 3);
        assert_eq!(list.eligible, 5);
    }

    #[test]
    fn floor_filters_low_scores_when_something_passes() {
        let (requester, prefs) = sao_paulo_requester();
        let mut strong = profile("lab-1", EntityCategory::Laboratory, "São Paulo", "SP");
        strong.certifications = vec!["regulatory".into()];
        strong.compliance_verified = Some(true);
        let weak = profile("lab-2", EntityCategory::Laboratory, "Manaus", "AM");
        let config = MatchingConfig {
            min_score: 0.6,
            ..MatchingConfig::default()
        };

        let list = run(config, &requester, &prefs, &[strong, weak]);
        assert!(!list.floor_relaxed);
        assert_eq!(list.matches.len(), 1);
        assert_eq!(list.matches[0].candidate_id, "lab-1");
    }

    #[test]
    fn results_are_capped() {
        let (requester, prefs) = sao_paulo_requester();
        let pool: Vec<EntityProfile> = (0..10)
            .map(|i| profile(&format!("c-{i}"), EntityCategory::Consultant, "São Paulo", "SP"))
            .collect();
        let config = MatchingConfig {
            max_results: 4,
            ..MatchingConfig::default()
        };
        let list = run(config, &requester, &prefs, &pool);
        assert_eq!(list.matches.len(), 4);
    }

    #[test]
    fn eligibility_rules() {
        let (requester, mut prefs) = sao_paulo_requester();
        prefs.categories = vec![EntityCategory::Laboratory];

        let mut inactive = profile("lab-x", EntityCategory::Laboratory, "São Paulo", "SP");
        inactive.active = false;
        let consultant = profile("c-1", EntityCategory::Consultant, "São Paulo", "SP");
        let mut blank = EntityProfile::new("lab-y", EntityCategory::Laboratory, "Blank");
        blank.description = None;

        assert_eq!(
            check_eligibility(&requester, &prefs, &inactive),
            Err(Ineligible::Inactive)
        );
        assert_eq!(
            check_eligibility(&requester, &prefs, &requester),
            Err(Ineligible::SelfMatch)
        );
        assert_eq!(
            check_eligibility(&requester, &prefs, &consultant),
            Err(Ineligible::CategoryExcluded)
        );
        assert_eq!(
            check_eligibility(&requester, &prefs, &blank),
            Err(Ineligible::InvalidProfile)
        );
    }

    #[test]
    fn no_eligible_candidates_is_an_empty_list() {
        let (requester, prefs) = sao_paulo_requester();
        let list = run(MatchingConfig::default(), &requester, &prefs, &[]);
        assert!(list.matches.is_empty());
        assert!(!list.floor_relaxed);
    }
}
