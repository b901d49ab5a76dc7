//! Rule-based cause inference.
//!
//! Causes are assigned by an ordered decision table over the mean percent
//! deviation of an event and its point count. The first rule whose
//! condition holds wins; when none hold the event is Unclassified.

use serde::{Deserialize, Serialize};

use crate::analysis::stats::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LikelyCause {
    #[serde(rename = "Supply Issue / Recall")]
    SupplyIssue,
    #[serde(rename = "Competitor Entry")]
    CompetitorEntry,
    #[serde(rename = "Promotion / Campaign")]
    Promotion,
    #[serde(rename = "Unclassified")]
    Unclassified,
}

impl std::fmt::Display for LikelyCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LikelyCause::SupplyIssue => "Supply Issue / Recall",
            LikelyCause::CompetitorEntry => "Competitor Entry",
            LikelyCause::Promotion => "Promotion / Campaign",
            LikelyCause::Unclassified => "Unclassified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Mean strictly below the threshold.
    Below,
    /// Mean strictly above the threshold.
    Above,
}

/// One row of the decision table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseRule {
    pub cause: LikelyCause,
    pub direction: Direction,
    pub mean_threshold: f64,
    /// Minimum number of points in the event; 0 disables the check.
    #[serde(default)]
    pub min_points: usize,
}

impl CauseRule {
    pub fn matches(&self, mean: f64, points: usize) -> bool {
        let mean_ok = match self.direction {
            Direction::Below => mean < self.mean_threshold,
            Direction::Above => mean > self.mean_threshold,
        };
        mean_ok && points >= self.min_points
    }

    /// Supply issue, then competitor entry, then promotion.
    pub fn default_table() -> Vec<CauseRule> {
        vec![
            CauseRule {
                cause: LikelyCause::SupplyIssue,
                direction: Direction::Below,
                mean_threshold: -0.35,
                min_points: 0,
            },
            CauseRule {
                cause: LikelyCause::CompetitorEntry,
                direction: Direction::Below,
                mean_threshold: -0.20,
                min_points: 6,
            },
            CauseRule {
                cause: LikelyCause::Promotion,
                direction: Direction::Above,
                mean_threshold: 0.20,
                min_points: 0,
            },
        ]
    }
}

/// Walk `rules` top to bottom over an event's percent deviations.
pub fn infer_cause(rules: &[CauseRule], pct_deviations: &[f64]) -> LikelyCause {
    let sample = Sample::new(pct_deviations.to_vec());
    let Some(mean) = sample.mean() else {
        return LikelyCause::Unclassified;
    };
    rules
        .iter()
        .find(|rule| rule.matches(mean, sample.len()))
        .map(|rule| rule.cause)
        .unwrap_or(LikelyCause::Unclassified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(values: &[f64]) -> LikelyCause {
        infer_cause(&CauseRule::default_table(), values)
    }

    #[test]
    fn test_deep_drop_is_supply_issue() {
        assert_eq!(infer(&[-0.5, -0.4]), LikelyCause::SupplyIssue);
    }

    #[test]
    fn test_supply_issue_outranks_competitor_entry() {
        // Also satisfies the competitor rule, but supply comes first.
        assert_eq!(infer(&[-0.4; 8]), LikelyCause::SupplyIssue);
    }

    #[test]
    fn test_sustained_moderate_drop_is_competitor_entry() {
        assert_eq!(infer(&[-0.20, -0.22, -0.24, -0.26, -0.27, -0.28]), LikelyCause::CompetitorEntry);
    }

    #[test]
    fn test_short_moderate_drop_is_unclassified() {
        assert_eq!(infer(&[-0.25; 5]), LikelyCause::Unclassified);
    }

    #[test]
    fn test_lift_is_promotion() {
        assert_eq!(infer(&[0.3, 0.35]), LikelyCause::Promotion);
    }

    #[test]
    fn test_boundaries_are_strict() {
        assert_eq!(infer(&[0.20]), LikelyCause::Unclassified);
        assert_eq!(infer(&[-0.35]), LikelyCause::Unclassified);
    }

    #[test]
    fn test_rule_order_is_respected() {
        let mut rules = CauseRule::default_table();
        rules.reverse();
        // Promotion first now, then competitor, then supply.
        assert_eq!(infer_cause(&rules, &[-0.4; 8]), LikelyCause::CompetitorEntry);
    }

    #[test]
    fn test_display_uses_report_labels() {
        assert_eq!(LikelyCause::SupplyIssue.to_string(), "Supply Issue / Recall");
        assert_eq!(
            serde_json::to_string(&LikelyCause::Promotion).unwrap(),
            "\"Promotion / Campaign\""
        );
    }

    #[test]
    fn test_empty_event_is_unclassified() {
        assert_eq!(infer_cause(&CauseRule::default_table(), &[]), LikelyCause::Unclassified);
    }

    #[test]
    fn test_point_count_gates_competitor_rule() {
        let rules = CauseRule::default_table();
        assert_eq!(infer_cause(&rules, &[-0.25; 5]), LikelyCause::Unclassified);
        assert_eq!(infer_cause(&rules, &[-0.25; 6]), LikelyCause::CompetitorEntry);
    }
}
