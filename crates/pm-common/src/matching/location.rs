use crate::normalize::same_place;
use crate::{EntityProfile, SearchPreferences};

#[derive(Debug, Clone, PartialEq)]
pub struct LocationEvaluation {
    /// In `[0, 1]`: 1 for the same city, the state ratio for the same state.
    pub score: f64,
    pub details: String,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Compare where the requester wants a partner with where the candidate is.
///
/// Preference city/state override the requester's own. Same city scores 1.0
/// (unless both states are known and differ, e.g. two towns sharing a name);
/// same state only scores `state_ratio`.
pub fn evaluate_location(
    requester: &EntityProfile,
    preferences: &SearchPreferences,
    candidate: &EntityProfile,
    state_ratio: f64,
) -> LocationEvaluation {
    let want_city = present(preferences.city.as_deref()).or(present(requester.city.as_deref()));
    let want_state =
        present(preferences.state.as_deref()).or(present(requester.state.as_deref()));
    let cand_city = present(candidate.city.as_deref());
    let cand_state = present(candidate.state.as_deref());

    let states_conflict = matches!(
        (want_state, cand_state),
        (Some(a), Some(b)) if !same_place(a, b)
    );

    if let (Some(want), Some(have)) = (want_city, cand_city) {
        if same_place(want, have) && !states_conflict {
            return LocationEvaluation {
                score: 1.0,
                details: format!("same city: {have}"),
            };
        }
    }

    if let (Some(want), Some(have)) = (want_state, cand_state) {
        if same_place(want, have) {
            return LocationEvaluation {
                score: state_ratio.clamp(0.0, 1.0),
                details: format!("same state: {have}"),
            };
        }
    }

    if (want_city.is_none() && want_state.is_none()) || (cand_city.is_none() && cand_state.is_none())
    {
        return LocationEvaluation {
            score: 0.0,
            details: "location unknown".into(),
        };
    }

    LocationEvaluation {
        score: 0.0,
        details: format!(
            "different region: {}",
            [cand_city, cand_state]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityCategory;

    fn located(id: &str, city: Option<&str>, state: Option<&str>) -> EntityProfile {
        let mut profile = EntityProfile::new(id, EntityCategory::Laboratory, id);
        profile.city = city.map(Into::into);
        profile.state = state.map(Into::into);
        profile
    }

    #[test]
    fn same_city_scores_full() {
        let requester = located("r", Some("São Paulo"), Some("SP"));
        let candidate = located("c", Some("Sao Paulo"), Some("sp"));
        let eval = evaluate_location(&requester, &SearchPreferences::default(), &candidate, 0.5);
        assert_eq!(eval.score, 1.0);
    }

    #[test]
    fn same_state_scores_partial() {
        let requester = located("r", Some("São Paulo"), Some("SP"));
        let candidate = located("c", Some("Campinas"), Some("SP"));
        let eval = evaluate_location(&requester, &SearchPreferences::default(), &candidate, 0.5);
        assert_eq!(eval.score, 0.5);
        assert!(eval.details.contains("same state"));
    }

    #[test]
    fn homonymous_cities_in_different_states_do_not_match() {
        let requester = located("r", Some("Santa Maria"), Some("RS"));
        let candidate = located("c", Some("Santa Maria"), Some("DF"));
        let eval = evaluate_location(&requester, &SearchPreferences::default(), &candidate, 0.5);
        assert_eq!(eval.score, 0.0);
    }

    #[test]
    fn preferences_override_requester_location() {
        let requester = located("r", Some("Recife"), Some("PE"));
        let candidate = located("c", Some("Rio de Janeiro"), Some("RJ"));
        let prefs = SearchPreferences {
            city: Some("Rio de Janeiro".into()),
            state: Some("RJ".into()),
            ..SearchPreferences::default()
        };
        let eval = evaluate_location(&requester, &prefs, &candidate, 0.5);
        assert_eq!(eval.score, 1.0);
    }

    #[test]
    fn unknown_location_scores_zero() {
        let requester = located("r", Some("Recife"), None);
        let candidate = located("c", None, None);
        let eval = evaluate_location(&requester, &SearchPreferences::default(), &candidate, 0.5);
        assert_eq!(eval.score, 0.0);
        assert_eq!(eval.details, "location unknown");
    }
}
