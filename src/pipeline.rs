//! Per-cohort pipeline: forecast, score, group, price and rank.
//!
//! A [`CohortPipeline`] holds only configuration, so one instance can be
//! shared across threads and run for any number of cohorts concurrently.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::backtest::{BacktestEvaluator, BacktestReport};
use crate::analysis::forecast::{Forecaster, SeasonalTrendModel};
use crate::analysis::{AnalysisError, Cohort, Observation};
use crate::config::{AppConfig, CatalogConfig};
use crate::detect::anomaly::AnomalyScorer;
use crate::detect::impact::{ImpactEvent, ImpactReport, ImpactScorer};
use crate::detect::AnomalyRecord;
use crate::report::ExecutiveSummary;
use crate::storage::{self, Pool, PrescriptionRow};

/// Everything the rendering layer needs for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortReport {
    pub cohort: Cohort,
    pub price_per_unit: f64,
    pub anomalies: Vec<AnomalyRecord>,
    pub impacts: ImpactReport,
    pub summary: Option<ExecutiveSummary>,
}

impl CohortReport {
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|r| r.is_anomaly).count()
    }
}

pub struct CohortPipeline {
    forecaster: Box<dyn Forecaster>,
    scorer: AnomalyScorer,
    impact: ImpactScorer,
    backtest: BacktestEvaluator,
}

impl CohortPipeline {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_forecaster(config, Box::new(SeasonalTrendModel::new(config.forecast.clone())))
    }

    /// Build with a caller-supplied baseline model.
    pub fn with_forecaster(config: &AppConfig, forecaster: Box<dyn Forecaster>) -> Self {
        Self {
            forecaster,
            scorer: AnomalyScorer::new(config.detector.clone()),
            impact: ImpactScorer::new(
                config.impact.clone(),
                config.backtest.detected_exact_gap_days,
            ),
            backtest: BacktestEvaluator::new(config.backtest.clone()),
        }
    }

    /// Fit the baseline on the cohort's rows and score every observation.
    /// Rows belonging to other cohorts are ignored.
    pub fn score(
        &self,
        cohort: &Cohort,
        rows: &[PrescriptionRow],
    ) -> Result<Vec<AnomalyRecord>, AnalysisError> {
        let series: Vec<Observation> = cohort_rows(cohort, rows)
            .map(|r| Observation::new(r.date, r.units as f64))
            .collect();
        if series.is_empty() {
            return Err(AnalysisError::DataNotFound {
                product: cohort.product.clone(),
                region: cohort.region.clone(),
            });
        }

        let forecast = self.forecaster.fit_predict(&series)?;
        let records = self.scorer.score(&series, &forecast)?;

        info!(
            product = %cohort.product,
            region = %cohort.region,
            observations = records.len(),
            anomalies = records.iter().filter(|r| r.is_anomaly).count(),
            threshold = self.scorer.threshold(),
            "scored cohort"
        );
        Ok(records)
    }

    pub fn analyze(
        &self,
        cohort: &Cohort,
        rows: &[PrescriptionRow],
        price_per_unit: f64,
    ) -> Result<CohortReport, AnalysisError> {
        let anomalies = self.score(cohort, rows)?;
        let impacts = self.impact.score(&anomalies, price_per_unit)?;
        let summary = ExecutiveSummary::from_top(cohort, &impacts);

        info!(
            product = %cohort.product,
            region = %cohort.region,
            impact_events = impacts.len(),
            "ranked impact events"
        );

        Ok(CohortReport {
            cohort: cohort.clone(),
            price_per_unit,
            anomalies,
            impacts,
            summary,
        })
    }

    /// Score the cohort and evaluate its flags against the `event_type` labels.
    pub fn backtest(
        &self,
        cohort: &Cohort,
        rows: &[PrescriptionRow],
    ) -> Result<BacktestReport, AnalysisError> {
        let records = self.score(cohort, rows)?;
        let labels = cohort_rows(cohort, rows).map(|r| (r.date, r.event_type.as_str()));
        Ok(self.backtest.evaluate(labels, &records))
    }

    /// [`Self::analyze`] on rows freshly read from the store.
    pub fn analyze_stored(
        &self,
        pool: &Pool,
        cohort: &Cohort,
        price_per_unit: f64,
    ) -> Result<CohortReport, AnalysisError> {
        let rows = storage::read_prescriptions(pool, Some(&cohort.product), Some(&cohort.region))?;
        self.analyze(cohort, &rows, price_per_unit)
    }

    /// [`Self::backtest`] on rows freshly read from the store.
    pub fn backtest_stored(
        &self,
        pool: &Pool,
        cohort: &Cohort,
    ) -> Result<BacktestReport, AnalysisError> {
        let rows = storage::read_prescriptions(pool, Some(&cohort.product), Some(&cohort.region))?;
        self.backtest(cohort, &rows)
    }
}

fn cohort_rows<'a>(
    cohort: &'a Cohort,
    rows: &'a [PrescriptionRow],
) -> impl Iterator<Item = &'a PrescriptionRow> + 'a {
    rows.iter()
        .filter(move |r| r.product == cohort.product && r.region == cohort.region)
}

// ---------------------------------------------------------------------------
// Multi-cohort scan
// ---------------------------------------------------------------------------

/// One line of a catalog scan. Exactly one of `top`/`error` explains the
/// outcome when `impact_events` is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub cohort: Cohort,
    pub anomalies: usize,
    pub impact_events: usize,
    pub top: Option<ImpactEvent>,
    pub error: Option<String>,
}

impl ScanEntry {
    fn from_report(report: &CohortReport) -> Self {
        Self {
            cohort: report.cohort.clone(),
            anomalies: report.anomaly_count(),
            impact_events: report.impacts.len(),
            top: report.impacts.top().cloned(),
            error: None,
        }
    }

    fn failed(cohort: Cohort, error: String) -> Self {
        Self {
            cohort,
            anomalies: 0,
            impact_events: 0,
            top: None,
            error: Some(error),
        }
    }
}

/// Analyse every catalog cohort, one blocking task each.
///
/// A failing cohort is logged and reported in its own entry; the others
/// still complete. Entries come back in catalog order.
pub async fn scan_all(
    pool: Pool,
    pipeline: Arc<CohortPipeline>,
    catalog: &CatalogConfig,
) -> Vec<ScanEntry> {
    let mut tasks = Vec::new();
    for product in &catalog.products {
        for region in &catalog.regions {
            let cohort = Cohort::new(product, region);
            let price = catalog.price(product);
            let pool = pool.clone();
            let pipeline = Arc::clone(&pipeline);
            let task_cohort = cohort.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let price = price.ok_or_else(|| AnalysisError::MissingPrice {
                    product: task_cohort.product.clone(),
                })?;
                pipeline.analyze_stored(&pool, &task_cohort, price)
            });
            tasks.push((cohort, handle));
        }
    }

    let mut entries = Vec::with_capacity(tasks.len());
    for (cohort, handle) in tasks {
        let entry = match handle.await {
            Ok(Ok(report)) => ScanEntry::from_report(&report),
            Ok(Err(e)) => {
                warn!(product = %cohort.product, region = %cohort.region, error = %e, "cohort analysis failed");
                ScanEntry::failed(cohort, e.to_string())
            }
            Err(e) => {
                warn!(product = %cohort.product, region = %cohort.region, error = %e, "cohort task aborted");
                ScanEntry::failed(cohort, format!("analysis task aborted: {e}"))
            }
        };
        entries.push(entry);
    }

    info!(
        cohorts = entries.len(),
        failed = entries.iter().filter(|e| e.error.is_some()).count(),
        "scan complete"
    );
    entries
}
