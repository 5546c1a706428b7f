use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::engine::EngineGateway;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub ready: Vec<String>,
    pub warming: Vec<String>,
    pub disabled: Vec<String>,
}

/// Overall readiness across the engine pool.
pub struct HealthAggregator {
    gateway: Arc<dyn EngineGateway>,
    retry_after: Duration,
}

impl HealthAggregator {
    pub fn new(gateway: Arc<dyn EngineGateway>, retry_after: Duration) -> Self {
        Self {
            gateway,
            retry_after,
        }
    }

    /// True when every enabled engine is ready. Disabled engines are not waited for, so a
    /// pool with nothing enabled reports healthy.
    pub fn is_healthy(&self) -> bool {
        self.gateway
            .engine_names()
            .iter()
            .filter(|name| !self.gateway.is_disabled(name))
            .all(|name| self.gateway.is_ready(name))
    }

    pub fn report(&self) -> HealthReport {
        let mut report = HealthReport {
            healthy: true,
            ready: Vec::new(),
            warming: Vec::new(),
            disabled: Vec::new(),
        };
        for name in self.gateway.engine_names() {
            if self.gateway.is_disabled(&name) {
                report.disabled.push(name);
            } else if self.gateway.is_ready(&name) {
                report.ready.push(name);
            } else {
                report.healthy = false;
                report.warming.push(name);
            }
        }
        report
    }

    /// Hint for `Retry-After` on not-ready responses.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    pub fn retry_after_header(&self) -> String {
        self.retry_after.as_secs().max(1).to_string()
    }
}
