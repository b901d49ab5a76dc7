use std::sync::Arc;

use crate::config::AppConfig;
use crate::pipeline::CohortPipeline;
use crate::storage::Pool;

/// Shared, read-only handler state. Every request re-reads its cohort from
/// the pool; nothing computed is cached here.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<CohortPipeline>,
}

impl AppState {
    pub fn new(pool: Pool, config: AppConfig) -> Self {
        let pipeline = CohortPipeline::from_config(&config);
        Self {
            pool,
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }
}
