//! Core analytics: baseline forecasting, robust statistics and the backtest
//! evaluator.

pub mod backtest;
pub mod forecast;
pub mod stats;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no observations found for {product} - {region}")]
    DataNotFound { product: String, region: String },

    #[error("insufficient data to fit the baseline: need {needed} observations, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("invalid series: {reason}")]
    InvalidSeries { reason: String },

    /// The forecaster returned no expected value for an observed date.
    /// This is a contract violation inside the pipeline, not a data problem.
    #[error("forecast has no expected value for observation dated {date}")]
    ForecastAlignment { date: NaiveDate },

    #[error("percent deviation undefined (expected value is zero) in event {start}..{end}")]
    UndefinedDeviation { start: NaiveDate, end: NaiveDate },

    #[error("no price per unit configured for product {product}")]
    MissingPrice { product: String },

    #[error("observation store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("observation store pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// A (product, region) pair -- the unit of independent analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cohort {
    pub product: String,
    pub region: String,
}

impl Cohort {
    pub fn new(product: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.product, self.region)
    }
}

/// One observed weekly volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub actual: f64,
}

impl Observation {
    pub fn new(date: NaiveDate, actual: f64) -> Self {
        Self { date, actual }
    }
}

/// Expected value produced by a [`forecast::Forecaster`] for one observed date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub expected: f64,
}
