pub mod location;
pub mod pipeline;
pub mod scoring;
pub mod weights;

pub use location::{LocationEvaluation, evaluate_location};
pub use pipeline::{
    EncodedCandidate, Ineligible, RankedList, RankedMatch, check_eligibility, rank_candidates,
};
pub use scoring::{CompatibilityScore, CompatibilityScorer, FactorContribution, MatchingConfig};
pub use weights::{DEFAULT_WEIGHTS, Factor, FactorWeights, RetrainTrigger, WeightSet};
