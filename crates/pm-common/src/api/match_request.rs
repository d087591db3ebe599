use serde::{Deserialize, Serialize};

use crate::{EntityProfile, SearchPreferences};

/// Body of `POST /api/matches/rank`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankRequest {
    pub requester: EntityProfile,
    pub candidates: Vec<EntityProfile>,
    #[serde(default)]
    pub preferences: SearchPreferences,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityCategory;

    #[test]
    fn preferences_default_when_missing() {
        let request: RankRequest = serde_json::from_str(
            r#"{
                "requester": {"id": "co-1", "category": "company", "name": "Acme", "city": "Recife"},
                "candidates": [{"id": "lab-1", "category": "laboratory", "name": "Lab", "state": "PE"}]
            }"#,
        )
        .unwrap();
        assert_eq!(request.preferences, SearchPreferences::default());
        assert_eq!(request.candidates[0].category, EntityCategory::Laboratory);
        assert!(request.candidates[0].active);
    }
}
