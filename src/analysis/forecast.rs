//! Baseline forecasting.
//!
//! The baseline is an additive model fitted in-sample over the whole history:
//!
//! ```text
//! y(t) = trend(t) + sum over enabled periods of fourier(t)
//! ```
//!
//! The trend is piecewise linear with changepoints spread over the first
//! part of the history. Every component is estimated in one penalized least
//! squares solve, so a fit is a fixed numerical procedure and repeated calls
//! on the same input return identical values.

use chrono::{Datelike, NaiveDate};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::analysis::stats::median_days;
use crate::analysis::{AnalysisError, ForecastPoint, Observation};
use crate::config::ForecastConfig;

const YEAR_DAYS: f64 = 365.25;
const WEEK_DAYS: f64 = 7.0;
const DAY_DAYS: f64 = 1.0;
const WEEKLY_FOURIER_ORDER: usize = 3;
const DAILY_FOURIER_ORDER: usize = 4;

/// Prior scale on the trend intercept and base slope.
const TREND_PRIOR_SCALE: f64 = 5.0;
/// Noise variance assumed by the first of the two fitting passes.
const INITIAL_NOISE_VARIANCE: f64 = 1e-4;
const MIN_NOISE_VARIANCE: f64 = 1e-12;
const MIN_TREND_POINTS: usize = 3;

/// Produces an expected value for every observed date of a cohort's history.
pub trait Forecaster: Send + Sync {
    /// Fit on `series` and predict in-sample. The input must be ordered by
    /// date with no duplicates; the output has exactly the input's dates.
    fn fit_predict(&self, series: &[Observation]) -> Result<Vec<ForecastPoint>, AnalysisError>;
}

/// One Fourier block of the design matrix.
#[derive(Debug, Clone, Copy)]
struct Seasonality {
    period_days: f64,
    order: usize,
}

/// Seasonal + piecewise-linear trend baseline.
#[derive(Debug, Clone)]
pub struct SeasonalTrendModel {
    config: ForecastConfig,
}

impl SeasonalTrendModel {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    fn seasonalities(&self) -> Vec<Seasonality> {
        let mut out = Vec::new();
        if self.config.yearly_seasonality {
            out.push(Seasonality {
                period_days: YEAR_DAYS,
                order: self.config.yearly_fourier_order,
            });
        }
        if self.config.weekly_seasonality {
            out.push(Seasonality {
                period_days: WEEK_DAYS,
                order: WEEKLY_FOURIER_ORDER,
            });
        }
        if self.config.daily_seasonality {
            out.push(Seasonality {
                period_days: DAY_DAYS,
                order: DAILY_FOURIER_ORDER,
            });
        }
        out
    }

    /// Observations needed before a fit is attempted: `min_cycles` full
    /// cycles of the longest enabled seasonality at the series cadence
    /// (104 for weekly data with yearly seasonality).
    pub fn min_points(&self, cadence_days: i64) -> usize {
        let longest = self
            .seasonalities()
            .iter()
            .map(|s| s.period_days)
            .fold(0.0_f64, f64::max);
        if longest <= 0.0 {
            return MIN_TREND_POINTS;
        }
        let per_cycle = (longest / cadence_days.max(1) as f64).floor().max(1.0) as usize;
        (self.config.min_cycles * per_cycle).max(MIN_TREND_POINTS)
    }

    /// Changepoint locations in scaled time, spread over the first
    /// `changepoint_range` of the history.
    fn changepoints(&self, t: &[f64]) -> Vec<f64> {
        let n = t.len();
        let hist_size = ((n as f64) * self.config.changepoint_range).floor() as usize;
        if hist_size < 2 || self.config.n_changepoints == 0 {
            return Vec::new();
        }
        let count = self.config.n_changepoints.min(hist_size - 1);
        let last = (hist_size - 1) as f64;
        (1..=count)
            .map(|i| {
                let idx = (last * i as f64 / count as f64).round() as usize;
                t[idx.min(n - 1)]
            })
            .collect()
    }
}

impl Forecaster for SeasonalTrendModel {
    fn fit_predict(&self, series: &[Observation]) -> Result<Vec<ForecastPoint>, AnalysisError> {
        validate_order(series)?;

        let n = series.len();
        if n < MIN_TREND_POINTS {
            return Err(AnalysisError::InsufficientData {
                needed: self.min_points(7),
                have: n,
            });
        }

        let gaps: Vec<i64> = series
            .windows(2)
            .map(|w| (w[1].date - w[0].date).num_days())
            .collect();
        let cadence = median_days(&gaps).unwrap_or(7);
        let needed = self.min_points(cadence);
        if n < needed {
            return Err(AnalysisError::InsufficientData { needed, have: n });
        }

        let origin = series[0].date;
        let span = (series[n - 1].date - origin).num_days() as f64;
        let t: Vec<f64> = series
            .iter()
            .map(|o| (o.date - origin).num_days() as f64 / span)
            .collect();

        let y_scale = series
            .iter()
            .map(|o| o.actual.abs())
            .fold(0.0_f64, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let y = DVector::from_iterator(n, series.iter().map(|o| o.actual / y_scale));

        let changepoints = self.changepoints(&t);
        let seasonalities = self.seasonalities();
        let design = design_matrix(series, &t, &changepoints, &seasonalities);

        let mut prior_scales = vec![TREND_PRIOR_SCALE, TREND_PRIOR_SCALE];
        prior_scales.extend(
            std::iter::repeat(self.config.changepoint_prior_scale).take(changepoints.len()),
        );
        prior_scales.extend(
            std::iter::repeat(self.config.seasonality_prior_scale)
                .take(design.ncols() - 2 - changepoints.len()),
        );

        // Pass 1 estimates the noise level; pass 2 weighs the priors by it.
        let first = solve_penalized(&design, &y, &prior_scales, INITIAL_NOISE_VARIANCE)?;
        let residuals = &y - &design * &first;
        let dof = n.saturating_sub(design.ncols()).max(1);
        let noise_variance = (residuals.norm_squared() / dof as f64).max(MIN_NOISE_VARIANCE);
        let beta = solve_penalized(&design, &y, &prior_scales, noise_variance)?;

        debug!(
            points = n,
            cadence_days = cadence,
            changepoints = changepoints.len(),
            columns = design.ncols(),
            noise_variance,
            "fitted seasonal baseline"
        );

        let fitted = &design * &beta;
        Ok(series
            .iter()
            .zip(fitted.iter())
            .map(|(o, yhat)| ForecastPoint {
                date: o.date,
                expected: yhat * y_scale,
            })
            .collect())
    }
}

fn validate_order(series: &[Observation]) -> Result<(), AnalysisError> {
    for w in series.windows(2) {
        if w[1].date <= w[0].date {
            return Err(AnalysisError::InvalidSeries {
                reason: format!(
                    "dates must be strictly increasing ({} follows {})",
                    w[1].date, w[0].date
                ),
            });
        }
    }
    Ok(())
}

fn design_matrix(
    series: &[Observation],
    t: &[f64],
    changepoints: &[f64],
    seasonalities: &[Seasonality],
) -> DMatrix<f64> {
    let fourier_cols: usize = seasonalities.iter().map(|s| 2 * s.order).sum();
    let cols = 2 + changepoints.len() + fourier_cols;

    DMatrix::from_fn(series.len(), cols, |i, j| {
        if j == 0 {
            return 1.0;
        }
        if j == 1 {
            return t[i];
        }
        let j = j - 2;
        if j < changepoints.len() {
            return (t[i] - changepoints[j]).max(0.0);
        }
        let mut j = j - changepoints.len();
        let day = absolute_day(series[i].date);
        for s in seasonalities {
            if j < 2 * s.order {
                let k = (j / 2 + 1) as f64;
                let angle = 2.0 * std::f64::consts::PI * k * day / s.period_days;
                return if j % 2 == 0 { angle.sin() } else { angle.cos() };
            }
            j -= 2 * s.order;
        }
        0.0
    })
}

fn absolute_day(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

/// MAP estimate under independent Gaussian priors:
/// `(X'X + noise * diag(1 / scale^2)) beta = X'y`.
fn solve_penalized(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    prior_scales: &[f64],
    noise_variance: f64,
) -> Result<DVector<f64>, AnalysisError> {
    let xt = x.transpose();
    let mut normal = &xt * x;
    for (j, scale) in prior_scales.iter().enumerate() {
        normal[(j, j)] += noise_variance / (scale * scale);
    }
    let rhs = &xt * y;

    if let Some(chol) = normal.clone().cholesky() {
        return Ok(chol.solve(&rhs));
    }
    normal.lu().solve(&rhs).ok_or_else(|| AnalysisError::InvalidSeries {
        reason: "baseline design matrix is singular".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn weekly(values: &[f64]) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Observation::new(start + Duration::weeks(i as i64), *v))
            .collect()
    }

    fn seasonal_values(weeks: usize) -> Vec<f64> {
        (0..weeks)
            .map(|i| {
                let t = i as f64;
                1000.0 * (1.0 + 0.015 * t / 52.0) * (1.0 + 0.25 * (2.0 * std::f64::consts::PI * t / 52.0).sin())
            })
            .collect()
    }

    #[test]
    fn test_min_points_weekly() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        assert_eq!(model.min_points(7), 104);
    }

    #[test]
    fn test_rejects_short_history() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let err = model.fit_predict(&weekly(&seasonal_values(60))).unwrap_err();
        match err {
            AnalysisError::InsufficientData { needed, have } => {
                assert_eq!(needed, 104);
                assert_eq!(have, 60);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_dates() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let mut series = weekly(&seasonal_values(120));
        series[10].date = series[9].date;
        assert!(matches!(
            model.fit_predict(&series),
            Err(AnalysisError::InvalidSeries { .. })
        ));
    }

    #[test]
    fn test_forecast_covers_every_input_date() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let series = weekly(&seasonal_values(160));
        let forecast = model.fit_predict(&series).unwrap();
        assert_eq!(forecast.len(), series.len());
        for (o, f) in series.iter().zip(&forecast) {
            assert_eq!(o.date, f.date);
        }
    }

    #[test]
    fn test_tracks_clean_seasonal_signal() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let series = weekly(&seasonal_values(160));
        let forecast = model.fit_predict(&series).unwrap();
        for (o, f) in series.iter().zip(&forecast) {
            let rel = (o.actual - f.expected).abs() / o.actual;
            assert!(rel < 0.05, "{}: actual {} expected {}", o.date, o.actual, f.expected);
        }
    }

    #[test]
    fn test_constant_series_stays_flat() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let series = weekly(&[500.0; 110]);
        let forecast = model.fit_predict(&series).unwrap();
        for f in &forecast {
            assert!((f.expected - 500.0).abs() < 1.0, "expected {}", f.expected);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let model = SeasonalTrendModel::new(ForecastConfig::default());
        let series = weekly(&seasonal_values(130));
        let a = model.fit_predict(&series).unwrap();
        let b = model.fit_predict(&series).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_trend_only_model_needs_three_points() {
        let config = ForecastConfig {
            yearly_seasonality: false,
            ..ForecastConfig::default()
        };
        let model = SeasonalTrendModel::new(config);
        assert_eq!(model.min_points(7), 3);
        let forecast = model.fit_predict(&weekly(&[10.0, 20.0, 30.0, 40.0])).unwrap();
        assert_eq!(forecast.len(), 4);
    }
}
