//! Anomaly scoring, event grouping and business-impact scoring.

pub mod anomaly;
pub mod cause;
pub mod events;
pub mod impact;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Severity tiers of an impact event, ordered Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
        }
    }
}

/// Actual vs expected for one observed date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub date: NaiveDate,
    pub actual: f64,
    pub expected: f64,
    /// `actual - expected`.
    pub residual: f64,
    /// `residual / expected`; `None` when the expected value is zero.
    pub pct_deviation: Option<f64>,
    pub z_score: f64,
    pub is_anomaly: bool,
}
