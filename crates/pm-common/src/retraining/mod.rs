pub mod job;
pub mod update;

pub use job::{RetrainError, RetrainOutcome, RetrainSummary, RetrainingJob};
pub use update::{FeedbackStats, RetrainConfig, WeightUpdate, derive_weight_update};
