// engine-relay/crates/engine-relay/src/lib.rs

pub mod analysis;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod router;
pub mod shared_state;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use config::Config;
pub use engine::{
    EngineDefinition, EngineEvent, EngineGateway, EngineRegistry, EngineState, EngineStatus,
    EngineSupervisor, SupervisorSettings,
};
pub use error::{EngineError, Result};
pub use health::HealthAggregator;
pub use router::{FallbackRouter, FallbackSettings, ReadinessGate, RoutedReply};

#[cfg(feature = "cli")]
pub use server::{build_router, check_engines, run_server};
