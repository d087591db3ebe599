use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{FeedbackEvent, FeedbackKind};
use crate::normalize::normalize_reason;

/// `accepted / (accepted + rejected)`; 0 when nothing was decided.
pub fn acceptance_rate(accepted: u32, rejected: u32) -> f64 {
    let decided = accepted + rejected;
    if decided == 0 {
        0.0
    } else {
        accepted as f64 / decided as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub accepted: u32,
    pub rejected: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub window_days: u32,
    pub total: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub pending: u32,
    pub acceptance_rate: f64,
    /// Most frequent first.
    pub rejection_reasons: Vec<ReasonCount>,
    /// Ten buckets: `[0.0, 0.1)`, …, `[0.9, 1.0]`.
    pub score_deciles: Vec<u32>,
    pub by_category: BTreeMap<String, CategoryCounts>,
}

impl FeedbackSummary {
    pub fn decided(&self) -> u32 {
        self.accepted + self.rejected
    }
}

fn decile(score: f64) -> usize {
    ((score.clamp(0.0, 1.0) * 10.0).floor() as usize).min(9)
}

/// Aggregate events already restricted to the window by the caller.
pub fn summarize(events: &[FeedbackEvent], window_days: u32) -> FeedbackSummary {
    let mut accepted = 0u32;
    let mut rejected = 0u32;
    let mut pending = 0u32;
    let mut reasons: HashMap<String, u32> = HashMap::new();
    let mut deciles = vec![0u32; 10];
    let mut by_category: BTreeMap<String, CategoryCounts> = BTreeMap::new();

    for event in events {
        let bucket = event
            .counterpart_category
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let counts = by_category.entry(bucket).or_default();

        match event.kind {
            FeedbackKind::Accepted => {
                accepted += 1;
                counts.accepted += 1;
            }
            FeedbackKind::Rejected => {
                rejected += 1;
                counts.rejected += 1;
                if let Some(reason) = normalize_reason(event.rejection_reason.as_deref()) {
                    *reasons.entry(reason).or_default() += 1;
                }
            }
            FeedbackKind::Pending => {
                pending += 1;
                counts.pending += 1;
            }
        }

        if event.match_score.is_finite() {
            deciles[decile(event.match_score)] += 1;
        }
    }

    let mut rejection_reasons: Vec<ReasonCount> = reasons
        .into_iter()
        .map(|(reason, count)| ReasonCount { reason, count })
        .collect();
    rejection_reasons.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));

    FeedbackSummary {
        window_days,
        total: accepted + rejected + pending,
        accepted,
        rejected,
        pending,
        acceptance_rate: acceptance_rate(accepted, rejected),
        rejection_reasons,
        score_deciles: deciles,
        by_category,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::EntityCategory;
    use crate::feedback::FeedbackInput;

    fn event(kind: FeedbackKind, score: f64, reason: Option<&str>) -> FeedbackEvent {
        FeedbackEvent::from_input(
            FeedbackInput {
                user_id: "u".into(),
                match_id: format!("r:{score}"),
                match_score: score,
                kind,
                rejection_reason: reason.map(Into::into),
                counterpart_name: None,
                counterpart_category: Some(EntityCategory::Laboratory),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn empty_window_has_zero_rate() {
        let summary = summarize(&[], 30);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.acceptance_rate, 0.0);
        assert_eq!(summary.score_deciles, vec![0; 10]);
    }

    #[test]
    fn pending_does_not_count_towards_rate() {
        let events = vec![
            event(FeedbackKind::Accepted, 0.8, None),
            event(FeedbackKind::Rejected, 0.4, Some("price")),
            event(FeedbackKind::Pending, 0.5, None),
        ];
        let summary = summarize(&events, 30);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.decided(), 2);
        assert_eq!(summary.acceptance_rate, 0.5);
        assert_eq!(summary.by_category["laboratory"].pending, 1);
    }

    #[test]
    fn eight_of_ten_accepted() {
        let mut events: Vec<FeedbackEvent> = (0..8)
            .map(|i| event(FeedbackKind::Accepted, 0.1 * i as f64, None))
            .collect();
        events.push(event(FeedbackKind::Rejected, 0.3, None));
        events.push(event(FeedbackKind::Rejected, 0.35, None));
        assert!((summarize(&events, 30).acceptance_rate - 0.8).abs() < 1e-12);
    }

    #[test]
    fn reasons_group_case_insensitively_by_frequency() {
        let events = vec![
            event(FeedbackKind::Rejected, 0.2, Some("Too Far")),
            event(FeedbackKind::Rejected, 0.2, Some("too far ")),
            event(FeedbackKind::Rejected, 0.2, Some("Price")),
        ];
        let summary = summarize(&events, 7);
        assert_eq!(
            summary.rejection_reasons,
            vec![
                ReasonCount {
                    reason: "too far".into(),
                    count: 2
                },
                ReasonCount {
                    reason: "price".into(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn perfect_score_lands_in_last_decile() {
        let events = vec![
            event(FeedbackKind::Accepted, 1.0, None),
            event(FeedbackKind::Accepted, 0.0, None),
            event(FeedbackKind::Accepted, 0.95, None),
        ];
        let summary = summarize(&events, 30);
        assert_eq!(summary.score_deciles[9], 2);
        assert_eq!(summary.score_deciles[0], 1);
    }
}
