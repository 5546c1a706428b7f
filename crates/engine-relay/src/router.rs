//! Engine selection policies on top of an `EngineGateway`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::EngineGateway;
use crate::error::{EngineError, Result};

/// Whether routing requires an engine to have passed its warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessGate {
    /// Running engines are used as soon as they exist.
    #[default]
    Opportunistic,
    /// Only engines that answered a warmup probe are used.
    RequireReady,
}

impl FromStr for ReadinessGate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "opportunistic" => Ok(ReadinessGate::Opportunistic),
            "require_ready" => Ok(ReadinessGate::RequireReady),
            other => Err(anyhow::anyhow!(
                "unknown readiness gate '{}' (expected opportunistic or require_ready)",
                other
            )),
        }
    }
}

/// A reply tagged with the engine that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedReply {
    pub engine: String,
    pub reply: Value,
}

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    /// Strongest engine first.
    pub priority: Vec<String>,
    pub default_engine: String,
    pub gate: ReadinessGate,
    pub request_timeout: Duration,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            priority: vec!["hard".into(), "normal".into(), "easy".into()],
            default_engine: "normal".into(),
            gate: ReadinessGate::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct FallbackRouter {
    gateway: Arc<dyn EngineGateway>,
    settings: FallbackSettings,
}

impl FallbackRouter {
    pub fn new(gateway: Arc<dyn EngineGateway>, settings: FallbackSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// Normalise a caller-supplied engine name. Absent or unknown names map to the default engine.
    pub fn resolve_preferred(&self, requested: Option<&str>) -> String {
        let known = self.gateway.engine_names();
        requested
            .map(|name| name.trim().to_lowercase())
            .filter(|name| known.iter().any(|k| k == name))
            .unwrap_or_else(|| self.settings.default_engine.clone())
    }

    /// `[preferred] ++ priority` without repeats.
    pub fn candidates(&self, preferred: &str) -> Vec<String> {
        let mut order: Vec<String> = Vec::with_capacity(self.settings.priority.len() + 1);
        for name in std::iter::once(preferred).chain(self.settings.priority.iter().map(String::as_str)) {
            if !order.iter().any(|seen| seen == name) {
                order.push(name.to_string());
            }
        }
        order
    }

    pub fn is_viable(&self, name: &str) -> bool {
        if self.gateway.is_disabled(name) || !self.gateway.is_running(name) {
            return false;
        }
        match self.settings.gate {
            ReadinessGate::Opportunistic => true,
            ReadinessGate::RequireReady => self.gateway.is_ready(name),
        }
    }

    /// Call the first viable engine, starting from the preferred one.
    ///
    /// The chosen engine's result is returned as-is, errors included.
    pub async fn preference_first(&self, requested: Option<&str>, payload: Value) -> Result<RoutedReply> {
        let preferred = self.resolve_preferred(requested);

        // A disabled engine never warms up, so it falls through to the candidate walk.
        if self.settings.gate == ReadinessGate::RequireReady
            && !self.gateway.is_disabled(&preferred)
            && !self.gateway.is_ready(&preferred)
        {
            return Err(EngineError::Warming(preferred));
        }

        let engine = self
            .candidates(&preferred)
            .into_iter()
            .find(|name| self.is_viable(name))
            .ok_or(EngineError::NoEngineAvailable)?;

        if engine != preferred {
            debug!("[route] {} unavailable, using {}", preferred, engine);
        }

        let reply = self
            .gateway
            .send(&engine, payload, self.settings.request_timeout)
            .await?;
        Ok(RoutedReply { engine, reply })
    }

    /// Walk the priority order and return the first success.
    pub async fn strongest_first(&self, payload: Value) -> Result<RoutedReply> {
        let chain: Vec<&String> = self
            .settings
            .priority
            .iter()
            .filter(|name| self.is_viable(name))
            .collect();
        if chain.is_empty() {
            return Err(EngineError::NoEngineAvailable);
        }

        for engine in chain {
            match self
                .gateway
                .send(engine, payload.clone(), self.settings.request_timeout)
                .await
            {
                Ok(reply) => {
                    return Ok(RoutedReply {
                        engine: engine.clone(),
                        reply,
                    })
                }
                Err(e) => warn!("[route] {} failed, trying next: {}", engine, e),
            }
        }
        Err(EngineError::AllEnginesFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct FakeEngine {
        disabled: bool,
        running: bool,
        ready: bool,
        fails: bool,
    }

    fn up() -> FakeEngine {
        FakeEngine {
            running: true,
            ready: true,
            ..Default::default()
        }
    }

    struct FakeGateway {
        engines: Vec<(String, FakeEngine)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        fn new(engines: &[(&str, FakeEngine)]) -> Arc<Self> {
            Arc::new(Self {
                engines: engines
                    .iter()
                    .map(|(n, e)| (n.to_string(), e.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn get(&self, name: &str) -> FakeEngine {
            self.engines
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e.clone())
                .unwrap_or_default()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EngineGateway for FakeGateway {
        fn engine_names(&self) -> Vec<String> {
            self.engines.iter().map(|(n, _)| n.clone()).collect()
        }

        fn is_disabled(&self, name: &str) -> bool {
            self.get(name).disabled
        }

        fn is_running(&self, name: &str) -> bool {
            self.get(name).running
        }

        fn is_ready(&self, name: &str) -> bool {
            self.get(name).ready
        }

        async fn send(&self, name: &str, payload: Value, _timeout: Duration) -> Result<Value> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.get(name).fails {
                return Err(EngineError::Timeout {
                    name: name.to_string(),
                    timeout_ms: 1,
                });
            }
            Ok(json!({"engine": name, "echo": payload}))
        }
    }

    fn build_router(gateway: Arc<FakeGateway>, priority: &[&str], gate: ReadinessGate) -> FallbackRouter {
        FallbackRouter::new(
            gateway,
            FallbackSettings {
                priority: priority.iter().map(|s| s.to_string()).collect(),
                gate,
                ..FallbackSettings::default()
            },
        )
    }

    #[test]
    fn test_gate_parsing() {
        assert_eq!("require_ready".parse::<ReadinessGate>().unwrap(), ReadinessGate::RequireReady);
        assert_eq!("Require-Ready".parse::<ReadinessGate>().unwrap(), ReadinessGate::RequireReady);
        assert_eq!(" opportunistic ".parse::<ReadinessGate>().unwrap(), ReadinessGate::Opportunistic);
        assert!("strict".parse::<ReadinessGate>().is_err());
    }

    #[test]
    fn test_unknown_preferred_falls_back_to_default() {
        let gateway = FakeGateway::new(&[("easy", up()), ("normal", up()), ("hard", up())]);
        let router = build_router(gateway, &["hard", "normal", "easy"], ReadinessGate::Opportunistic);

        assert_eq!(router.resolve_preferred(Some("  EASY ")), "easy");
        assert_eq!(router.resolve_preferred(Some("../etc")), "normal");
        assert_eq!(router.resolve_preferred(None), "normal");
    }

    #[test]
    fn test_candidates_are_deduplicated() {
        let gateway = FakeGateway::new(&[("easy", up())]);
        let router = build_router(gateway, &["hard", "normal", "easy"], ReadinessGate::Opportunistic);
        assert_eq!(router.candidates("normal"), vec!["normal", "hard", "easy"]);
        assert_eq!(router.candidates("easy"), vec!["easy", "hard", "normal"]);
    }

    #[tokio::test]
    async fn test_preference_first_skips_disabled_and_stopped() {
        let gateway = FakeGateway::new(&[
            (
                "a",
                FakeEngine {
                    disabled: true,
                    ..up()
                },
            ),
            (
                "b",
                FakeEngine {
                    running: false,
                    ..up()
                },
            ),
            ("c", up()),
        ]);
        let router = build_router(gateway.clone(), &["a", "b", "c"], ReadinessGate::Opportunistic);

        let routed = router.preference_first(Some("a"), json!({"moves": []})).await.unwrap();
        assert_eq!(routed.engine, "c");
        assert_eq!(gateway.calls(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_preference_first_returns_error_of_chosen_engine() {
        let gateway = FakeGateway::new(&[
            (
                "normal",
                FakeEngine {
                    fails: true,
                    ..up()
                },
            ),
            ("hard", up()),
        ]);
        let router = build_router(gateway.clone(), &["hard", "normal"], ReadinessGate::Opportunistic);

        let err = router.preference_first(Some("normal"), json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert_eq!(gateway.calls(), vec!["normal"]);
    }

    #[tokio::test]
    async fn test_preference_first_without_viable_engine() {
        let gateway = FakeGateway::new(&[("normal", FakeEngine::default())]);
        let router = build_router(gateway.clone(), &["normal"], ReadinessGate::Opportunistic);

        let err = router.preference_first(None, json!({})).await.unwrap_err();
        assert_eq!(err, EngineError::NoEngineAvailable);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_require_ready_rejects_warming_preferred() {
        let warming = FakeEngine {
            ready: false,
            ..up()
        };
        let gateway = FakeGateway::new(&[("normal", warming.clone()), ("hard", up())]);
        let router = build_router(gateway.clone(), &["hard", "normal"], ReadinessGate::RequireReady);

        let err = router.preference_first(Some("normal"), json!({})).await.unwrap_err();
        assert_eq!(err, EngineError::Warming("normal".to_string()));
        assert!(gateway.calls().is_empty());

        // Opportunistic routing uses it anyway.
        let gateway = FakeGateway::new(&[("normal", warming), ("hard", up())]);
        let router = build_router(gateway, &["hard", "normal"], ReadinessGate::Opportunistic);
        let routed = router.preference_first(Some("normal"), json!({})).await.unwrap();
        assert_eq!(routed.engine, "normal");
    }

    #[tokio::test]
    async fn test_require_ready_routes_past_disabled_preferred() {
        let gateway = FakeGateway::new(&[
            (
                "a",
                FakeEngine {
                    disabled: true,
                    running: false,
                    ready: false,
                    ..Default::default()
                },
            ),
            ("c", up()),
        ]);
        let router = build_router(gateway.clone(), &["a", "c"], ReadinessGate::RequireReady);

        let routed = router.preference_first(Some("a"), json!({})).await.unwrap();
        assert_eq!(routed.engine, "c");
        assert_eq!(gateway.calls(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_strongest_first_moves_past_failures() {
        let gateway = FakeGateway::new(&[
            ("easy", up()),
            ("normal", up()),
            (
                "hard",
                FakeEngine {
                    fails: true,
                    ..up()
                },
            ),
        ]);
        let router = build_router(gateway.clone(), &["hard", "normal", "easy"], ReadinessGate::Opportunistic);

        let routed = router.strongest_first(json!({"maxVisits": 128})).await.unwrap();
        assert_eq!(routed.engine, "normal");
        assert_eq!(routed.reply["echo"]["maxVisits"], 128);
        assert_eq!(gateway.calls(), vec!["hard", "normal"]);
    }

    #[tokio::test]
    async fn test_strongest_first_exhaustion() {
        let broken = FakeEngine {
            fails: true,
            ..up()
        };
        let gateway = FakeGateway::new(&[("hard", broken.clone()), ("easy", broken)]);
        let router = build_router(gateway.clone(), &["hard", "easy"], ReadinessGate::Opportunistic);
        assert_eq!(
            router.strongest_first(json!({})).await.unwrap_err(),
            EngineError::AllEnginesFailed
        );
        assert_eq!(gateway.calls(), vec!["hard", "easy"]);

        let gateway = FakeGateway::new(&[(
            "hard",
            FakeEngine {
                disabled: true,
                ..up()
            },
        )]);
        let router = build_router(gateway, &["hard"], ReadinessGate::Opportunistic);
        assert_eq!(
            router.strongest_first(json!({})).await.unwrap_err(),
            EngineError::NoEngineAvailable
        );
    }
}
