//! Executive summary of a cohort's top-ranked impact event.

use serde::{Deserialize, Serialize};

use crate::analysis::Cohort;
use crate::detect::cause::LikelyCause;
use crate::detect::impact::ImpactReport;
use crate::detect::Severity;

/// Closing line of every rendered summary.
pub const RECOMMENDED_ACTION: &str = "Immediate investigation and targeted field intervention.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub product: String,
    pub region: String,
    pub avg_pct_deviation: f64,
    pub duration_weeks: usize,
    pub total_revenue_impact: f64,
    pub severity: Severity,
    pub likely_cause: LikelyCause,
}

impl ExecutiveSummary {
    /// Summary of the first event in `report`, if there is one.
    pub fn from_top(cohort: &Cohort, report: &ImpactReport) -> Option<Self> {
        let top = report.top()?;
        Some(Self {
            product: cohort.product.clone(),
            region: cohort.region.clone(),
            avg_pct_deviation: top.avg_pct_deviation,
            duration_weeks: top.duration_weeks,
            total_revenue_impact: top.total_revenue_impact,
            severity: top.severity,
            likely_cause: top.likely_cause,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "Key finding: prescription uptake for {} in {} shows a {:.1}% deviation \
             from expected levels over {} weeks.\n\
             Business impact: estimated revenue impact of {}.\n\
             Severity: {}\n\
             Likely cause: {}\n\
             Recommended action: {RECOMMENDED_ACTION}",
            self.product,
            self.region,
            self.avg_pct_deviation.abs() * 100.0,
            self.duration_weeks,
            group_thousands(self.total_revenue_impact),
            self.severity,
            self.likely_cause,
        )
    }
}

/// Format a non-negative amount rounded to whole units with `,` separators.
pub fn group_thousands(amount: f64) -> String {
    let rounded = amount.round();
    let sign = if rounded < 0.0 { "-" } else { "" };
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("{sign}{out}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::impact::ImpactEvent;
    use chrono::NaiveDate;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(661_500.0), "661,500");
        assert_eq!(group_thousands(999.4), "999");
        assert_eq!(group_thousands(1_000.0), "1,000");
        assert_eq!(group_thousands(1_234_567.8), "1,234,568");
        assert_eq!(group_thousands(-4_500.0), "-4,500");
        assert_eq!(group_thousands(0.0), "0");
    }

    #[test]
    fn test_summary_uses_top_event() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let report = ImpactReport {
            events: vec![ImpactEvent {
                start_date: date,
                end_date: date,
                duration_weeks: 6,
                avg_pct_deviation: -0.245,
                total_revenue_impact: 661_500.0,
                severity: Severity::Low,
                likely_cause: LikelyCause::CompetitorEntry,
            }],
        };
        let summary = ExecutiveSummary::from_top(&Cohort::new("Drug_A", "North"), &report).unwrap();
        let text = summary.render();
        assert!(text.contains("Drug_A in North"));
        assert!(text.contains("24.5% deviation"));
        assert!(text.contains("over 6 weeks"));
        assert!(text.contains("661,500"));
        assert!(text.contains("Competitor Entry"));
        assert!(text.ends_with(
            "Recommended action: Immediate investigation and targeted field intervention."
        ));
    }

    #[test]
    fn test_no_summary_for_empty_report() {
        let report = ImpactReport::default();
        assert!(ExecutiveSummary::from_top(&Cohort::new("Drug_A", "North"), &report).is_none());
    }
}
