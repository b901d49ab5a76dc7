//! TOML configuration for rxsentinel.
//!
//! Every section falls back to compiled-in defaults, so a partial or empty
//! file is valid. Thresholds live here and are handed to each component at
//! construction time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::cause::CauseRule;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "RXSENTINEL_CONFIG";
/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "rxsentinel.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub impact: ImpactConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. An explicit path (from `--config`); failing to load it is an error.
    /// 2. The path in `RXSENTINEL_CONFIG`.
    /// 3. `./rxsentinel.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RXSENTINEL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding the `prescriptions` table.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/rxsentinel.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

/// Baseline model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub daily_seasonality: bool,
    pub yearly_fourier_order: usize,
    /// How sharply the trend may bend. Lower is smoother.
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub n_changepoints: usize,
    /// Fraction of the history in which changepoints may be placed.
    pub changepoint_range: f64,
    /// Full seasonal cycles required before fitting.
    pub min_cycles: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            yearly_seasonality: true,
            weekly_seasonality: false,
            daily_seasonality: false,
            yearly_fourier_order: 10,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            n_changepoints: 25,
            changepoint_range: 0.8,
            min_cycles: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// A point is anomalous when |z| is strictly greater than this.
    pub z_threshold: f64,
    /// Added to the MAD so a constant residual series never divides by zero.
    pub mad_epsilon: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.5,
            mad_epsilon: 1e-6,
        }
    }
}

// ---------------------------------------------------------------------------
// Impact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    pub severity: SeverityThresholds,
    /// Evaluated top to bottom; the first matching rule names the cause.
    pub cause_rules: Vec<CauseRule>,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            severity: SeverityThresholds::default(),
            cause_rules: CauseRule::default_table(),
        }
    }
}

/// Bounds on |avg_pct_deviation|.
///
/// Only `medium` and `high` split tiers. `low` is carried for reporting and
/// does not create a tier: anything below `medium` is Low.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 0.15,
            medium: 0.30,
            high: 0.45,
        }
    }
}

// ---------------------------------------------------------------------------
// Backtest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Ground-truth label meaning "no event".
    pub inactive_label: String,
    /// Ground-truth points continue an event when at most this many days apart.
    pub ground_truth_max_gap_days: i64,
    /// Anomalous points continue an event only when exactly this many days apart.
    pub detected_exact_gap_days: i64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            inactive_label: "none".to_string(),
            ground_truth_max_gap_days: 7,
            detected_exact_gap_days: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Selectable products and regions, and the per-product unit price.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub products: Vec<String>,
    pub regions: Vec<String>,
    pub prices: BTreeMap<String, f64>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            products: vec!["Drug_A".to_string(), "Drug_B".to_string()],
            regions: ["North", "South", "East", "West"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            prices: BTreeMap::from([("Drug_A".to_string(), 450.0), ("Drug_B".to_string(), 300.0)]),
        }
    }
}

impl CatalogConfig {
    pub fn price(&self, product: &str) -> Option<f64> {
        self.prices.get(product).copied()
    }

    pub fn contains(&self, product: &str, region: &str) -> bool {
        self.products.iter().any(|p| p == product) && self.regions.iter().any(|r| r == region)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
