//! Engine process supervisor.
//!
//! Owns every piece of per-engine state: the definition, the disabled and ready flags, the
//! live process handle and the scraped metadata. Each engine moves through
//! `Starting -> Running -> Ready`, drops back to `Starting` when its process exits and is
//! respawned after a constant delay, and ends in `Disabled` if its files are missing or the
//! OS refuses to start it.
//!
//! Writers per field: spawn/exit handling writes the process handle and resets readiness,
//! the prober sets readiness, the stderr pump writes metadata.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::definition::{EngineDefinition, EngineRegistry};
use super::gateway::EngineGateway;
use super::metadata::EngineMetadata;
use super::process::{EngineProcess, ExitInfo, Launched};
use super::prober::{ReadinessProber, WarmupSettings};
use crate::error::{EngineError, Result};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Constant delay between an exit and the respawn.
    pub restart_delay: Duration,
    pub warmup: WarmupSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(1500),
            warmup: WarmupSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Spawned {
        engine: String,
        generation: u64,
        pid: Option<u32>,
    },
    Ready {
        engine: String,
        generation: u64,
    },
    Exited {
        engine: String,
        generation: u64,
        exit: ExitInfo,
    },
    RestartScheduled {
        engine: String,
        delay: Duration,
    },
    Disabled {
        engine: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Disabled,
    Starting,
    Running,
    Ready,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub name: String,
    pub state: EngineState,
    pub disabled: bool,
    pub disabled_reason: Option<String>,
    pub ready: bool,
    pub running: bool,
    pub pid: Option<u32>,
    pub generation: u64,
    pub restarts: u64,
    pub meta: Option<EngineMetadata>,
    pub model_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
}

struct EngineSlot {
    definition: EngineDefinition,
    executable: Option<PathBuf>,
    disabled: AtomicBool,
    disabled_reason: RwLock<Option<String>>,
    ready: AtomicBool,
    generation: AtomicU64,
    restarts: AtomicU64,
    process: ArcSwapOption<EngineProcess>,
    metadata: Arc<RwLock<EngineMetadata>>,
}

impl EngineSlot {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn live_process(&self) -> Option<Arc<EngineProcess>> {
        self.process.load_full().filter(|p| p.is_alive())
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        metrics::set_engine_ready(self.name(), ready);
    }
}

pub struct EngineSupervisor {
    slots: Vec<Arc<EngineSlot>>,
    settings: SupervisorSettings,
    prober: ReadinessProber,
    events: broadcast::Sender<EngineEvent>,
    shutting_down: AtomicBool,
}

impl EngineSupervisor {
    /// Validate every definition once. Engines with missing files start out disabled and
    /// are never spawned.
    pub fn new(registry: &EngineRegistry, settings: SupervisorSettings) -> Arc<Self> {
        let slots = registry
            .iter()
            .map(|definition| {
                let (executable, reason) = match definition.validate() {
                    Ok(exe) => (Some(exe), None),
                    Err(e) => {
                        warn!("[{}] DISABLED ({})", definition.name, e);
                        (None, Some(e.to_string()))
                    }
                };
                definition.log_paths(executable.as_deref());

                Arc::new(EngineSlot {
                    definition: definition.clone(),
                    disabled: AtomicBool::new(reason.is_some()),
                    disabled_reason: RwLock::new(reason),
                    executable,
                    ready: AtomicBool::new(false),
                    generation: AtomicU64::new(0),
                    restarts: AtomicU64::new(0),
                    process: ArcSwapOption::empty(),
                    metadata: Arc::new(RwLock::new(EngineMetadata::default())),
                })
            })
            .collect();

        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            slots,
            prober: ReadinessProber::new(settings.warmup.clone()),
            settings,
            events,
            shutting_down: AtomicBool::new(false),
        })
    }

    fn slot(&self, name: &str) -> Option<&Arc<EngineSlot>> {
        self.slots.iter().find(|s| s.name() == name)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn definition(&self, name: &str) -> Option<&EngineDefinition> {
        self.slot(name).map(|s| &s.definition)
    }

    /// Spawn every enabled engine.
    pub fn start_all(self: &Arc<Self>) {
        for name in self.names() {
            if let Err(e) = self.spawn(&name) {
                debug!("[{}] not started: {}", name, e);
            }
        }
    }

    /// Launch a fresh process for `name`, replacing any previous one.
    ///
    /// A no-op for disabled engines. An OS spawn failure disables the engine permanently.
    pub fn spawn(self: &Arc<Self>, name: &str) -> Result<()> {
        let slot = self
            .slot(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEngine(name.to_string()))?;

        if slot.disabled.load(Ordering::SeqCst) || self.shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        let executable = match &slot.executable {
            Some(exe) => exe.clone(),
            None => return Ok(()),
        };

        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        slot.set_ready(false);

        let Launched { process, exit } = match EngineProcess::launch(
            &slot.definition,
            &executable,
            generation,
            slot.metadata.clone(),
        ) {
            Ok(launched) => launched,
            Err(e) => {
                let reason = e.to_string();
                error!("[{}] spawn error: {}", name, reason);
                self.disable(&slot, reason.clone());
                return Err(EngineError::SpawnFailed {
                    name: name.to_string(),
                    reason,
                });
            }
        };

        if let Some(previous) = slot.process.swap(Some(process.clone())) {
            if previous.is_alive() {
                previous.kill();
            }
        }

        metrics::engine_spawned(name);
        info!(
            "[spawned] {} -> {} (pid {:?}, generation {})",
            name,
            executable.display(),
            process.pid(),
            generation
        );
        self.emit(EngineEvent::Spawned {
            engine: name.to_string(),
            generation,
            pid: process.pid(),
        });

        let supervisor = Arc::clone(self);
        let engine = name.to_string();
        tokio::spawn(async move {
            let exit = exit.await.unwrap_or_default();
            supervisor.on_exit(&engine, generation, exit);
        });

        let supervisor = Arc::clone(self);
        let engine = name.to_string();
        tokio::spawn(async move {
            supervisor.prober.run(&supervisor, &engine, generation).await;
        });

        Ok(())
    }

    /// Exit handling: readiness drops first, then exactly one respawn is scheduled.
    fn on_exit(self: &Arc<Self>, name: &str, generation: u64, exit: ExitInfo) {
        let slot = match self.slot(name) {
            Some(slot) => slot.clone(),
            None => return,
        };

        if slot.generation.load(Ordering::SeqCst) != generation {
            debug!("[{}] stale exit of generation {} ignored", name, generation);
            return;
        }

        slot.set_ready(false);
        if let Some(current) = slot.process.load_full() {
            if current.generation() == generation {
                slot.process.store(None);
            }
        }

        metrics::engine_exited(name);
        warn!(
            "[{}] exited: code={:?} signal={:?}",
            name, exit.code, exit.signal
        );
        self.emit(EngineEvent::Exited {
            engine: name.to_string(),
            generation,
            exit,
        });

        if slot.disabled.load(Ordering::SeqCst) || self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        slot.restarts.fetch_add(1, Ordering::SeqCst);
        let delay = self.settings.restart_delay;
        self.emit(EngineEvent::RestartScheduled {
            engine: name.to_string(),
            delay,
        });

        let supervisor = Arc::clone(self);
        let engine = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Someone else already respawned it.
            if supervisor.current_generation(&engine) != Some(generation) {
                return;
            }
            if let Err(e) = supervisor.spawn(&engine) {
                debug!("[{}] restart failed: {}", engine, e);
            }
        });
    }

    fn disable(&self, slot: &EngineSlot, reason: String) {
        slot.disabled.store(true, Ordering::SeqCst);
        slot.set_ready(false);
        if let Ok(mut current) = slot.disabled_reason.write() {
            *current = Some(reason.clone());
        }
        warn!("[{}] DISABLED ({})", slot.name(), reason);
        self.emit(EngineEvent::Disabled {
            engine: slot.name().to_string(),
            reason,
        });
    }

    /// Record a successful warmup. Ignored if `generation` is no longer the live process.
    pub fn mark_ready(&self, name: &str, generation: u64) -> bool {
        let slot = match self.slot(name) {
            Some(slot) => slot,
            None => return false,
        };

        let current = slot
            .live_process()
            .map(|p| p.generation() == generation)
            .unwrap_or(false);
        if !current || slot.disabled.load(Ordering::SeqCst) {
            return false;
        }

        slot.set_ready(true);
        // An exit landing between the check and the store must win.
        let still_current = slot
            .live_process()
            .map(|p| p.generation() == generation)
            .unwrap_or(false);
        if !still_current || slot.disabled.load(Ordering::SeqCst) {
            slot.set_ready(false);
            return false;
        }

        info!("[ready] {}", self.readiness_line());
        self.emit(EngineEvent::Ready {
            engine: name.to_string(),
            generation,
        });
        true
    }

    fn readiness_line(&self) -> String {
        self.slots
            .iter()
            .map(|s| format!("{}={}", s.name(), s.ready.load(Ordering::SeqCst)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn current_generation(&self, name: &str) -> Option<u64> {
        self.slot(name).map(|s| s.generation.load(Ordering::SeqCst))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.slot(name)
            .map(|s| s.live_process().is_some())
            .unwrap_or(false)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.slot(name)
            .map(|s| s.disabled.load(Ordering::SeqCst))
            .unwrap_or(true)
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.slot(name)
            .map(|s| s.ready.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn state(&self, name: &str) -> Option<EngineState> {
        let slot = self.slot(name)?;
        let state = if slot.disabled.load(Ordering::SeqCst) {
            EngineState::Disabled
        } else if slot.live_process().is_none() {
            EngineState::Starting
        } else if slot.ready.load(Ordering::SeqCst) {
            EngineState::Ready
        } else {
            EngineState::Running
        };
        Some(state)
    }

    pub fn metadata(&self, name: &str) -> Option<EngineMetadata> {
        let slot = self.slot(name)?;
        let meta = slot.metadata.read().ok()?;
        Some(meta.clone())
    }

    pub fn snapshot(&self) -> Vec<EngineStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let name = slot.name();
                let process = slot.live_process();
                let meta = self.metadata(name).filter(|m| !m.is_empty());
                EngineStatus {
                    name: name.to_string(),
                    state: self.state(name).unwrap_or(EngineState::Disabled),
                    disabled: slot.disabled.load(Ordering::SeqCst),
                    disabled_reason: slot
                        .disabled_reason
                        .read()
                        .ok()
                        .and_then(|r| r.clone()),
                    ready: slot.ready.load(Ordering::SeqCst),
                    running: process.is_some(),
                    pid: process.as_ref().and_then(|p| p.pid()),
                    generation: slot.generation.load(Ordering::SeqCst),
                    restarts: slot.restarts.load(Ordering::SeqCst),
                    meta,
                    model_path: slot.definition.model.clone(),
                    started_at: process.as_ref().map(|p| p.started_at()),
                }
            })
            .collect()
    }

    /// Send `payload` to the live process of `name`.
    ///
    /// Fails with `NotRunning` before registering anything if there is no live process.
    pub async fn send(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let slot = self
            .slot(name)
            .ok_or_else(|| EngineError::UnknownEngine(name.to_string()))?;

        let process = slot
            .live_process()
            .filter(|_| !slot.disabled.load(Ordering::SeqCst))
            .ok_or_else(|| EngineError::NotRunning(name.to_string()))?;

        process.correlator().send(payload, timeout).await
    }

    /// Kill every engine immediately. Pending requests are not drained and no restarts follow.
    pub fn shutdown(&self) {
        info!("Shutting down engines...");
        self.shutting_down.store(true, Ordering::SeqCst);
        for slot in &self.slots {
            if let Some(process) = slot.process.load_full() {
                process.kill();
            }
        }
    }
}

#[async_trait]
impl EngineGateway for EngineSupervisor {
    fn engine_names(&self) -> Vec<String> {
        self.names()
    }

    fn is_disabled(&self, name: &str) -> bool {
        EngineSupervisor::is_disabled(self, name)
    }

    fn is_running(&self, name: &str) -> bool {
        EngineSupervisor::is_running(self, name)
    }

    fn is_ready(&self, name: &str) -> bool {
        EngineSupervisor::is_ready(self, name)
    }

    async fn send(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value> {
        EngineSupervisor::send(self, name, payload, timeout).await
    }
}
