//! Detection-quality backtest against labelled ground truth.
//!
//! Ground-truth labels and anomaly flags are each grouped into events, then
//! matched greedily in ground-truth order. Each detected event can satisfy at
//! most one ground-truth event.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BacktestConfig;
use crate::detect::events::{anomaly_events, ground_truth_events, TemporalEvent};
use crate::detect::AnomalyRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub ground_truth_label: String,
    pub ground_truth_start: NaiveDate,
    pub detected_start: NaiveDate,
    pub latency_weeks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub ground_truth_count: usize,
    pub detected_count: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub precision: f64,
    pub recall: f64,
    /// `None` when nothing matched.
    pub avg_latency_weeks: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone)]
pub struct BacktestEvaluator {
    config: BacktestConfig,
}

impl BacktestEvaluator {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Evaluate the flags in `records` against date-ordered ground-truth
    /// `labels` of the same cohort.
    pub fn evaluate<'a, I>(&self, labels: I, records: &[AnomalyRecord]) -> BacktestReport
    where
        I: IntoIterator<Item = (NaiveDate, &'a str)>,
    {
        let truth = ground_truth_events(
            labels,
            &self.config.inactive_label,
            self.config.ground_truth_max_gap_days,
        );
        let detected = anomaly_events(records, self.config.detected_exact_gap_days);

        let matches = match_events(&truth, &detected);
        let metrics = compute_metrics(truth.len(), detected.len(), &matches);

        info!(
            ground_truth = metrics.ground_truth_count,
            detected = metrics.detected_count,
            true_positives = metrics.true_positives,
            precision = metrics.precision,
            recall = metrics.recall,
            "backtest complete"
        );

        BacktestReport { metrics, matches }
    }
}

/// Greedy 1:1 matching.
///
/// For each ground-truth event in order, candidates are the unused detections
/// that do not end before it starts. The candidate with the closest start
/// wins; ties go to the earliest detection.
pub fn match_events<L, D>(truth: &[TemporalEvent<L>], detected: &[TemporalEvent<D>]) -> Vec<MatchRecord>
where
    L: AsRef<str>,
{
    let mut used = vec![false; detected.len()];
    let mut matches = Vec::new();

    for gt in truth {
        let best = detected
            .iter()
            .enumerate()
            .filter(|(i, d)| !used[*i] && d.end >= gt.start)
            .min_by_key(|(_, d)| ((d.start - gt.start).num_days().abs(), d.start));

        if let Some((i, d)) = best {
            used[i] = true;
            matches.push(MatchRecord {
                ground_truth_label: gt.label.as_ref().to_string(),
                ground_truth_start: gt.start,
                detected_start: d.start,
                latency_weeks: (d.start - gt.start).num_days().abs() / 7,
            });
        }
    }

    matches
}

pub fn compute_metrics(
    ground_truth_count: usize,
    detected_count: usize,
    matches: &[MatchRecord],
) -> BacktestMetrics {
    let true_positives = matches.len();
    let precision = if detected_count > 0 {
        true_positives as f64 / detected_count as f64
    } else {
        0.0
    };
    let recall = if ground_truth_count > 0 {
        true_positives as f64 / ground_truth_count as f64
    } else {
        0.0
    };
    let avg_latency_weeks = if matches.is_empty() {
        None
    } else {
        Some(matches.iter().map(|m| m.latency_weeks as f64).sum::<f64>() / matches.len() as f64)
    };

    BacktestMetrics {
        ground_truth_count,
        detected_count,
        true_positives,
        false_positives: detected_count.saturating_sub(true_positives),
        precision,
        recall,
        avg_latency_weeks,
    }
}
