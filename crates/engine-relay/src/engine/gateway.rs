use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// The view of the engine pool that routing and health checks need.
///
/// `EngineSupervisor` is the production implementation; tests substitute scripted fakes.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    /// Configured engine names in registry order.
    fn engine_names(&self) -> Vec<String>;

    fn is_disabled(&self, name: &str) -> bool;

    fn is_running(&self, name: &str) -> bool;

    fn is_ready(&self, name: &str) -> bool;

    /// Send one request to `name` and wait for its correlated reply.
    async fn send(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value>;
}
