pub mod api;
pub mod db;
pub mod encoder;
pub mod engine;
pub mod feedback;
pub mod insights;
pub mod logging;
pub mod matching;
pub mod normalize;
pub mod retraining;
pub mod run_id;
pub mod store;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;

/// Number of features in every profile embedding.
pub const EMBEDDING_DIMENSION: usize = 384;

/// Longest look-back accepted by summaries, retraining and insights.
pub const MAX_WINDOW_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("window of {0} days is outside 1..=365")]
pub struct InvalidWindow(pub u32);

/// Requested look-back in days, or `default` when absent.
pub fn resolve_window_days(requested: Option<u32>, default: u32) -> Result<u32, InvalidWindow> {
    let days = requested.unwrap_or(default);
    if (1..=MAX_WINDOW_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(InvalidWindow(days))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityCategory {
    Company,
    Laboratory,
    Consultant,
}

impl EntityCategory {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Headcount buckets used by the size factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SizeBand {
    Small,
    Medium,
    Large,
}

impl SizeBand {
    pub fn from_capacity(capacity: u32) -> Self {
        match capacity {
            0..=9 => SizeBand::Small,
            10..=99 => SizeBand::Medium,
            _ => SizeBand::Large,
        }
    }

    /// 0 for the same band, 1 for neighbours, 2 for small vs large.
    pub fn distance(&self, other: &SizeBand) -> u8 {
        (*self as i8 - *other as i8).unsigned_abs()
    }
}

// Matchable participant. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub id: String,
    pub category: EntityCategory,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub compliance_verified: Option<bool>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl EntityProfile {
    pub fn new(id: impl Into<String>, category: EntityCategory, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            name: name.into(),
            description: None,
            city: None,
            state: None,
            specialties: Vec::new(),
            certifications: Vec::new(),
            hourly_rate: None,
            capacity: None,
            rating: None,
            compliance_verified: None,
            active: true,
        }
    }

    pub fn size_band(&self) -> Option<SizeBand> {
        self.capacity.map(SizeBand::from_capacity)
    }

    /// Required fields must be present before any encoding is attempted.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.id.trim().is_empty() {
            return Err(ProfileError::MissingField {
                profile_id: self.id.clone(),
                field: "id",
            });
        }
        if self.name.trim().is_empty() {
            return Err(ProfileError::MissingField {
                profile_id: self.id.clone(),
                field: "name",
            });
        }

        let has_text = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        let has_list = |values: &[String]| values.iter().any(|v| !v.trim().is_empty());

        let descriptive = has_text(&self.description)
            || has_text(&self.city)
            || has_text(&self.state)
            || has_list(&self.specialties)
            || has_list(&self.certifications);

        if !descriptive {
            return Err(ProfileError::NoDescriptiveText {
                profile_id: self.id.clone(),
            });
        }

        if let Some(rating) = self.rating {
            if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
                return Err(ProfileError::InvalidNumber {
                    profile_id: self.id.clone(),
                    field: "rating",
                });
            }
        }
        if let Some(rate) = self.hourly_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ProfileError::InvalidNumber {
                    profile_id: self.id.clone(),
                    field: "hourly_rate",
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("profile {profile_id:?} is missing required field `{field}`")]
    MissingField {
        profile_id: String,
        field: &'static str,
    },
    #[error("profile {profile_id:?} has no descriptive text to encode")]
    NoDescriptiveText { profile_id: String },
    #[error("profile {profile_id:?} has an invalid `{field}`")]
    InvalidNumber {
        profile_id: String,
        field: &'static str,
    },
}

/// Requester-side search preferences. Location fields override the
/// requester's own city/state when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPreferences {
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub categories: Vec<EntityCategory>,
    #[serde(default)]
    pub min_rating: Option<f64>,
    #[serde(default)]
    pub preferred_size: Option<SizeBand>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SearchPreferences {
    pub fn allows(&self, category: EntityCategory) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab() -> EntityProfile {
        let mut profile = EntityProfile::new("lab-1", EntityCategory::Laboratory, "Lab One");
        profile.city = Some("São Paulo".into());
        profile
    }

    #[test]
    fn validates_minimal_profile() {
        assert!(lab().validate().is_ok());
    }

    #[test]
    fn rejects_blank_name() {
        let mut profile = lab();
        profile.name = "  ".into();
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn rejects_profile_without_descriptive_text() {
        let mut profile = lab();
        profile.city = None;
        profile.specialties = vec!["   ".into()];
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::NoDescriptiveText { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_rating() {
        let mut profile = lab();
        profile.rating = Some(7.5);
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::InvalidNumber { field: "rating", .. })
        ));
    }

    #[test]
    fn size_bands_and_distance() {
        assert_eq!(SizeBand::from_capacity(3), SizeBand::Small);
        assert_eq!(SizeBand::from_capacity(50), SizeBand::Medium);
        assert_eq!(SizeBand::from_capacity(500), SizeBand::Large);
        assert_eq!(SizeBand::Small.distance(&SizeBand::Large), 2);
        assert_eq!(SizeBand::Medium.distance(&SizeBand::Small), 1);
    }

    #[test]
    fn window_days_are_bounded() {
        assert_eq!(resolve_window_days(None, 30), Ok(30));
        assert_eq!(resolve_window_days(Some(365), 30), Ok(365));
        assert_eq!(resolve_window_days(Some(0), 30), Err(InvalidWindow(0)));
        assert_eq!(resolve_window_days(Some(400), 30), Err(InvalidWindow(400)));
    }

    #[test]
    fn category_round_trips_through_strings() {
        use std::str::FromStr;
        assert_eq!(EntityCategory::Laboratory.as_str(), "laboratory");
        assert_eq!(
            EntityCategory::from_str("consultant").unwrap(),
            EntityCategory::Consultant
        );
    }
}
