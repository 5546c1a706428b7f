//! Warmup probing after each spawn.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::supervisor::EngineSupervisor;

#[derive(Debug, Clone)]
pub struct WarmupSettings {
    /// Delay before each attempt, ascending.
    pub schedule: Vec<Duration>,
    /// Per-attempt reply deadline.
    pub timeout: Duration,
    pub payload: Value,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            schedule: [1000, 2000, 4000, 8000, 12000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            timeout: Duration::from_secs(10),
            payload: default_warmup_payload(),
        }
    }
}

/// Cheapest possible analysis: empty 9x9 board, one visit.
pub fn default_warmup_payload() -> Value {
    json!({
        "boardXSize": 9,
        "boardYSize": 9,
        "rules": "japanese",
        "komi": 6.5,
        "moves": [],
        "maxVisits": 1,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: usize },
    /// The process was replaced or the engine disabled while probing.
    Superseded,
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessProber {
    settings: WarmupSettings,
}

impl ReadinessProber {
    pub fn new(settings: WarmupSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &WarmupSettings {
        &self.settings
    }

    /// Probe generation `generation` of `name` until it answers or the schedule runs out.
    pub async fn run(
        &self,
        supervisor: &EngineSupervisor,
        name: &str,
        generation: u64,
    ) -> ProbeOutcome {
        for (attempt, delay) in self.settings.schedule.iter().enumerate() {
            tokio::time::sleep(*delay).await;

            if supervisor.is_disabled(name) || supervisor.current_generation(name) != Some(generation)
            {
                return ProbeOutcome::Superseded;
            }

            match supervisor
                .send(name, self.settings.payload.clone(), self.settings.timeout)
                .await
            {
                Ok(_) => {
                    return if supervisor.mark_ready(name, generation) {
                        ProbeOutcome::Ready {
                            attempts: attempt + 1,
                        }
                    } else {
                        ProbeOutcome::Superseded
                    };
                }
                Err(e) => debug!("[warmup] {} attempt {} failed: {}", name, attempt + 1, e),
            }
        }

        warn!(
            "[warmup] {} not ready after {} attempts",
            name,
            self.settings.schedule.len()
        );
        ProbeOutcome::Exhausted
    }
}
