//! Engine pool: definitions, subprocess lifecycle, request correlation and readiness.

pub mod correlator;
pub mod definition;
pub mod gateway;
pub mod metadata;
pub mod process;
pub mod prober;
pub mod supervisor;

pub use correlator::RequestCorrelator;
pub use definition::{EngineDefinition, EngineRegistry};
pub use gateway::EngineGateway;
pub use metadata::EngineMetadata;
pub use process::{EngineProcess, ExitInfo};
pub use prober::{ProbeOutcome, ReadinessProber, WarmupSettings};
pub use supervisor::{EngineEvent, EngineState, EngineStatus, EngineSupervisor, SupervisorSettings};
