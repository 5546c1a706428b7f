//! State shared by every HTTP handler.
//!
//! The supervisor owns engine state; routing and health views are built over it through the
//! `EngineGateway` seam so handlers never touch process handles directly.

use std::sync::Arc;

use crate::analysis::AnalysisDefaults;
use crate::config::Config;
use crate::engine::{EngineGateway, EngineSupervisor};
use crate::health::HealthAggregator;
use crate::router::FallbackRouter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: Arc<EngineSupervisor>,
    pub router: Arc<FallbackRouter>,
    pub health: Arc<HealthAggregator>,
    pub defaults: Arc<AnalysisDefaults>,
}

impl AppState {
    pub fn new(config: Config, supervisor: Arc<EngineSupervisor>) -> Self {
        let gateway: Arc<dyn EngineGateway> = supervisor.clone();
        let router = FallbackRouter::new(gateway.clone(), config.fallback_settings());
        let health = HealthAggregator::new(gateway, config.retry_after());
        let defaults = config.analysis_defaults();

        Self {
            config: Arc::new(config),
            supervisor,
            router: Arc::new(router),
            health: Arc::new(health),
            defaults: Arc::new(defaults),
        }
    }

    /// Model path and scraped model name for `engine`, as reported alongside replies.
    pub fn model_info(&self, engine: &str) -> (Option<String>, Option<String>) {
        let model = self
            .supervisor
            .definition(engine)
            .map(|d| d.model.display().to_string());
        let model_name = self
            .supervisor
            .metadata(engine)
            .and_then(|m| m.model_name);
        (model, model_name)
    }
}
