//! Temporal event grouping.
//!
//! One scan turns a time-ordered labelled sequence into maximal runs of the
//! same label. Whether two neighbouring points belong to the same run is
//! decided by a [`Continuity`] rule on the gap between them. Ground truth and
//! detections are grouped with different rules.

use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::detect::AnomalyRecord;

/// Label carried by events built from anomaly flags.
pub const ANOMALY_LABEL: &str = "anomaly";

/// Continuity predicate on the gap (in days) between a point and the end of
/// the open event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuity {
    /// Continue when the gap is at most this many days.
    WithinDays(i64),
    /// Continue only when the gap is exactly this many days.
    ExactDays(i64),
}

impl Continuity {
    pub fn continues(&self, gap_days: i64) -> bool {
        match *self {
            Continuity::WithinDays(max) => gap_days <= max,
            Continuity::ExactDays(exact) => gap_days == exact,
        }
    }
}

/// A closed run of same-label points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalEvent<L> {
    pub label: L,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Positions of the members in the grouped sequence.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl<L> TemporalEvent<L> {
    /// Number of member points.
    pub fn len(&self) -> usize {
        self.span.len()
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    pub fn duration_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Group `points` into events. `None` is the inactive label: it closes any
/// open event and never starts one.
pub fn group_events<L, I>(points: I, continuity: Continuity) -> Vec<TemporalEvent<L>>
where
    L: PartialEq,
    I: IntoIterator<Item = (NaiveDate, Option<L>)>,
{
    let mut events = Vec::new();
    let mut open: Option<TemporalEvent<L>> = None;

    for (idx, (date, label)) in points.into_iter().enumerate() {
        let Some(label) = label else {
            if let Some(event) = open.take() {
                events.push(event);
            }
            continue;
        };

        if let Some(event) = open.as_mut() {
            if event.label == label && continuity.continues((date - event.end).num_days()) {
                event.end = date;
                event.span.end = idx + 1;
                continue;
            }
        }

        if let Some(event) = open.take() {
            events.push(event);
        }
        open = Some(TemporalEvent {
            label,
            start: date,
            end: date,
            span: idx..idx + 1,
        });
    }

    if let Some(event) = open {
        events.push(event);
    }
    events
}

/// Group labelled ground truth. Same-label points up to `max_gap_days` apart
/// stay in one event.
pub fn ground_truth_events<'a, I>(
    labels: I,
    inactive_label: &str,
    max_gap_days: i64,
) -> Vec<TemporalEvent<String>>
where
    I: IntoIterator<Item = (NaiveDate, &'a str)>,
{
    group_events(
        labels.into_iter().map(|(date, label)| {
            let label = (label != inactive_label).then(|| label.to_string());
            (date, label)
        }),
        Continuity::WithinDays(max_gap_days),
    )
}

/// Group flagged points of a scored series. Anomalous points stay in one
/// event only when exactly `gap_days` apart; any other gap splits them.
pub fn anomaly_events(records: &[AnomalyRecord], gap_days: i64) -> Vec<TemporalEvent<&'static str>> {
    group_events(
        records
            .iter()
            .map(|r| (r.date, r.is_anomaly.then_some(ANOMALY_LABEL))),
        Continuity::ExactDays(gap_days),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, 3).unwrap() + Duration::days(offset)
    }

    fn labelled(points: &[(i64, &'static str)]) -> Vec<(NaiveDate, &'static str)> {
        points.iter().map(|(d, l)| (day(*d), *l)).collect()
    }

    fn flagged(offsets: &[(i64, bool)]) -> Vec<AnomalyRecord> {
        offsets
            .iter()
            .map(|(d, flag)| AnomalyRecord {
                date: day(*d),
                actual: 0.0,
                expected: 1.0,
                residual: -1.0,
                pct_deviation: Some(-1.0),
                z_score: if *flag { -10.0 } else { 0.0 },
                is_anomaly: *flag,
            })
            .collect()
    }

    #[test]
    fn test_within_rule_splits_on_eight_day_gap() {
        let events = ground_truth_events(
            labelled(&[(0, "promotion"), (7, "promotion"), (15, "promotion"), (22, "promotion")]),
            "none",
            7,
        );
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].start, events[0].end), (day(0), day(7)));
        assert_eq!((events[1].start, events[1].end), (day(15), day(22)));
    }

    #[test]
    fn test_within_rule_accepts_short_gap() {
        let events = ground_truth_events(labelled(&[(0, "supply_issue"), (5, "supply_issue")]), "none", 7);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].len(), 2);
    }

    #[test]
    fn test_exact_rule_splits_on_missing_week() {
        let events = anomaly_events(&flagged(&[(0, true), (7, true), (21, true), (28, true)]), 7);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].span, 0..2);
        assert_eq!(events[1].span, 2..4);
    }

    #[test]
    fn test_exact_rule_treats_eight_and_fourteen_day_gaps_alike() {
        let eight = anomaly_events(&flagged(&[(0, true), (8, true)]), 7);
        let fourteen = anomaly_events(&flagged(&[(0, true), (14, true)]), 7);
        assert_eq!(eight.len(), 2);
        assert_eq!(fourteen.len(), 2);
    }

    #[test]
    fn test_rules_diverge_on_short_irregular_gap() {
        let gt = ground_truth_events(labelled(&[(0, "x"), (6, "x")]), "none", 7);
        let detected = anomaly_events(&flagged(&[(0, true), (6, true)]), 7);
        assert_eq!(gt.len(), 1);
        assert_eq!(detected.len(), 2);
    }

    #[test]
    fn test_inactive_label_closes_event() {
        let events = ground_truth_events(
            labelled(&[(0, "promotion"), (7, "none"), (14, "promotion"), (21, "none")]),
            "none",
            7,
        );
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.len() == 1));
    }

    #[test]
    fn test_label_change_starts_new_event() {
        let events = ground_truth_events(
            labelled(&[(0, "supply_issue"), (7, "supply_issue"), (14, "promotion")]),
            "none",
            7,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].label, "supply_issue");
        assert_eq!(events[0].duration_days(), 7);
        assert_eq!(events[1].label, "promotion");
    }

    #[test]
    fn test_trailing_event_is_emitted() {
        let events = anomaly_events(&flagged(&[(0, false), (7, false), (14, true), (21, true)]), 7);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, day(14));
        assert_eq!(events[0].end, day(21));
        assert_eq!(events[0].label, ANOMALY_LABEL);
    }

    #[test]
    fn test_all_inactive_yields_nothing() {
        assert!(anomaly_events(&flagged(&[(0, false), (7, false)]), 7).is_empty());
        assert!(anomaly_events(&[], 7).is_empty());
    }
}
