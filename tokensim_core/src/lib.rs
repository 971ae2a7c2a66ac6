//! TokenSim Core - Client-side orchestration of tokenomics simulation sessions
//!
//! A scenario's simulation either completes in one request/response round
//! trip or streams progress and partial results over a shared channel. This
//! library keeps many such sessions consistent under reconnection, partial
//! failure and cancellation:
//! 1. **Scenario Registry**: named parameter sets plus their shock schedules
//! 2. **Session State Machine**: generation-guarded, immutable snapshots
//! 3. **Transport Client**: one reconnecting channel for every streamed session
//! 4. **Comparison Aggregator**: completed sessions side by side

pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod scenario;
pub mod session;
pub mod session_registry;
pub mod shock;
pub mod transport;
pub mod types;

// Re-export key types for convenience
pub use compare::{ComparisonOptions, ComparisonResult, Metric, MetricRange, MetricsTable};
pub use config::{OrchestratorConfig, ReconnectPolicy};
pub use error::{
    CompareError, Error, ProviderError, RegistryError, Result, SessionError, SessionErrorKind, StateError,
    TransportError, ValidationError,
};
pub use export::ReportExporter;
pub use model::{ScenarioParams, SimulationResult, SummaryMetrics, SupplyField, TokenPoint};
pub use orchestrator::Orchestrator;
pub use provider::{HttpProvider, SimulationProvider};
pub use scenario::{NewScenario, ScenarioConfig, ScenarioRegistry};
pub use session::{DispatchMode, SessionStatus, SimulationSession};
pub use shock::{Annotation, EventType, ShockEvent, ShockSchedule, TimeUnit};
pub use transport::{ConnectionStatus, TransportEvent};
pub use types::{ScenarioId, SessionId, StreamKey};
