//! Business-impact scoring of anomaly events.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::stats::Sample;
use crate::analysis::AnalysisError;
use crate::config::{ImpactConfig, SeverityThresholds};
use crate::detect::cause::{infer_cause, LikelyCause};
use crate::detect::events::anomaly_events;
use crate::detect::{AnomalyRecord, Severity};

/// One contiguous anomaly run, priced and classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEvent {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Number of flagged weeks in the event.
    pub duration_weeks: usize,
    pub avg_pct_deviation: f64,
    pub total_revenue_impact: f64,
    pub severity: Severity,
    pub likely_cause: LikelyCause,
}

/// Impact events ranked by severity, then revenue impact. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub events: Vec<ImpactEvent>,
}

impl ImpactReport {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Highest-priority event.
    pub fn top(&self) -> Option<&ImpactEvent> {
        self.events.first()
    }
}

#[derive(Debug, Clone)]
pub struct ImpactScorer {
    config: ImpactConfig,
    gap_days: i64,
}

impl ImpactScorer {
    /// `gap_days` is the exact spacing that keeps flagged points in one event.
    pub fn new(config: ImpactConfig, gap_days: i64) -> Self {
        Self { config, gap_days }
    }

    pub fn severity(&self, avg_pct_deviation: f64) -> Severity {
        classify_severity(&self.config.severity, avg_pct_deviation)
    }

    /// Turn the flagged points of `records` into a ranked report.
    ///
    /// An event containing a point with an undefined percent deviation is
    /// rejected rather than averaged.
    pub fn score(
        &self,
        records: &[AnomalyRecord],
        price_per_unit: f64,
    ) -> Result<ImpactReport, AnalysisError> {
        let mut events = Vec::new();

        for event in anomaly_events(records, self.gap_days) {
            let members = &records[event.span.clone()];
            let deviations: Vec<f64> = members
                .iter()
                .map(|r| r.pct_deviation)
                .collect::<Option<Vec<f64>>>()
                .ok_or(AnalysisError::UndefinedDeviation {
                    start: event.start,
                    end: event.end,
                })?;

            let total_revenue_impact: f64 =
                members.iter().map(|r| r.residual.abs() * price_per_unit).sum();
            let avg_pct_deviation = Sample::new(deviations.clone()).mean().unwrap_or(0.0);

            events.push(ImpactEvent {
                start_date: event.start,
                end_date: event.end,
                duration_weeks: members.len(),
                avg_pct_deviation,
                total_revenue_impact,
                severity: self.severity(avg_pct_deviation),
                likely_cause: infer_cause(&self.config.cause_rules, &deviations),
            });
        }

        rank(&mut events);
        debug!(events = events.len(), price_per_unit, "scored impact events");
        Ok(ImpactReport { events })
    }
}

/// Severity ladder on |avg|: High at or above `high`, Medium at or above
/// `medium`, Low otherwise. `low` does not split a tier.
pub fn classify_severity(thresholds: &SeverityThresholds, avg_pct_deviation: f64) -> Severity {
    let magnitude = avg_pct_deviation.abs();
    if magnitude >= thresholds.high {
        Severity::High
    } else if magnitude >= thresholds.medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Stable sort: severity descending, then revenue impact descending.
pub fn rank(events: &mut [ImpactEvent]) {
    events.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.total_revenue_impact.total_cmp(&a.total_revenue_impact))
    });
}
