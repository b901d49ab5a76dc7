use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::analysis::stats::Sample;
use crate::analysis::{AnalysisError, ForecastPoint, Observation};
use crate::config::DetectorConfig;
use crate::detect::AnomalyRecord;

/// Robust residual scorer.
///
/// The center (median) and scale (MAD + epsilon) are computed over the
/// entire series on every call. Scores are therefore not causal: extending a
/// series can change the score of earlier points.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    config: DetectorConfig,
}

impl AnomalyScorer {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.z_threshold
    }

    /// Join `observations` with `forecast` by date and score every observation.
    ///
    /// Forecast dates with no observation are ignored. An observation with no
    /// forecast is a [`AnalysisError::ForecastAlignment`].
    pub fn score(
        &self,
        observations: &[Observation],
        forecast: &[ForecastPoint],
    ) -> Result<Vec<AnomalyRecord>, AnalysisError> {
        let expected_by_date: HashMap<NaiveDate, f64> =
            forecast.iter().map(|f| (f.date, f.expected)).collect();

        let mut joined = Vec::with_capacity(observations.len());
        for o in observations {
            let expected = *expected_by_date
                .get(&o.date)
                .ok_or(AnalysisError::ForecastAlignment { date: o.date })?;
            joined.push((o, expected));
        }

        let residuals = Sample::new(joined.iter().map(|(o, e)| o.actual - e).collect());
        let Some(center) = residuals.median() else {
            return Ok(Vec::new());
        };
        let scale = residuals.mad(center).unwrap_or(0.0) + self.config.mad_epsilon;

        let records: Vec<AnomalyRecord> = joined
            .into_iter()
            .map(|(o, expected)| {
                let residual = o.actual - expected;
                let z_score = (residual - center) / scale;
                AnomalyRecord {
                    date: o.date,
                    actual: o.actual,
                    expected,
                    residual,
                    pct_deviation: if expected == 0.0 {
                        None
                    } else {
                        Some(residual / expected)
                    },
                    z_score,
                    is_anomaly: z_score.abs() > self.config.z_threshold,
                }
            })
            .collect();

        debug!(
            points = records.len(),
            anomalies = records.iter().filter(|r| r.is_anomaly).count(),
            center,
            scale,
            threshold = self.config.z_threshold,
            "scored residuals"
        );

        Ok(records)
    }
}
