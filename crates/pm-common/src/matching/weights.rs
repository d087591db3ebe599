use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Closed set of scoring factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Factor {
    Location,
    Expertise,
    Compliance,
    Size,
    Rating,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Location,
        Factor::Expertise,
        Factor::Compliance,
        Factor::Size,
        Factor::Rating,
    ];

    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Bootstrap weights, used until the first retraining run.
/// Expertise leads, location second, the rest share the remainder.
pub const DEFAULT_WEIGHTS: FactorWeights = FactorWeights {
    location: 0.25,
    expertise: 0.35,
    compliance: 0.15,
    size: 0.10,
    rating: 0.15,
};

pub const BOOTSTRAP_ACCURACY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub location: f64,
    pub expertise: f64,
    pub compliance: f64,
    pub size: f64,
    pub rating: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

impl FactorWeights {
    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Location => self.location,
            Factor::Expertise => self.expertise,
            Factor::Compliance => self.compliance,
            Factor::Size => self.size,
            Factor::Rating => self.rating,
        }
    }

    pub fn sum(&self) -> f64 {
        Factor::ALL.iter().map(|f| self.get(*f)).sum()
    }

    /// Negative or non-finite weights become 0.
    pub fn sanitized(&self) -> Self {
        let fix = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        Self {
            location: fix(self.location),
            expertise: fix(self.expertise),
            compliance: fix(self.compliance),
            size: fix(self.size),
            rating: fix(self.rating),
        }
    }

    /// Scale to sum 1.0. An all-zero set falls back to [`DEFAULT_WEIGHTS`].
    pub fn normalized(&self) -> Self {
        let clean = self.sanitized();
        let total = clean.sum();
        if total <= 0.0 {
            return DEFAULT_WEIGHTS;
        }
        Self {
            location: clean.location / total,
            expertise: clean.expertise / total,
            compliance: clean.compliance / total,
            size: clean.size / total,
            rating: clean.rating / total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetrainTrigger {
    Bootstrap,
    Scheduled,
    Manual,
}

impl RetrainTrigger {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Versioned, immutable weight set. Exactly one is active at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub version: String,
    pub name: String,
    pub weights: FactorWeights,
    pub accuracy: f64,
    pub active: bool,
    pub trained_at: DateTime<Utc>,
    pub parent_version: Option<String>,
    pub sample_size: u32,
    pub acceptance_rate: Option<f64>,
    pub trigger: RetrainTrigger,
}

impl WeightSet {
    pub const BOOTSTRAP_VERSION: &'static str = "00000000000000000000000000";

    /// The seeded set every store starts with.
    pub fn bootstrap() -> Self {
        Self {
            version: Self::BOOTSTRAP_VERSION.into(),
            name: "bootstrap".into(),
            weights: DEFAULT_WEIGHTS,
            accuracy: BOOTSTRAP_ACCURACY,
            active: true,
            trained_at: DateTime::<Utc>::default(),
            parent_version: None,
            sample_size: 0,
            acceptance_rate: None,
            trigger: RetrainTrigger::Bootstrap,
        }
    }
}
