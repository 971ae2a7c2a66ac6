//! TokenSim Deterministic Simulation Testing (DST) Harness
//!
//! A controlled environment where the session orchestrator runs against a
//! simulated channel and an in-process simulation engine, deterministically.
//!
//! # Core Principle: Nothing Moves On Its Own
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock, advanced by ticks, provider latency and backoff
//! - **Network**: Frames leave the server only when the harness steps it
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ tokio current_thread, paused clock + SimContext      │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                           │                                 │
//! │                    ┌──────▼───────┐                         │
//! │                    │ Orchestrator │                         │
//! │                    └──┬────────┬──┘                         │
//! │          direct calls │        │ streamed sessions          │
//! │               ┌───────▼──┐  ┌──▼──────────────────┐         │
//! │               │Reference │  │ SimChannel + server │         │
//! │               │ Engine   │  │ (fault injection)   │         │
//! │               └──────────┘  └─────────────────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tokensim_sim::{ChaosScenario, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).run(ChaosScenario::ReconnectResubscribe);
//! assert!(result.passed);
//! ```

mod context;
pub mod engine;
mod exporter;
pub mod network;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use engine::ReferenceEngine;
pub use exporter::{JsonFileExporter, SimReport};
pub use network::{SimChannelController, SimConnection, SimConnector};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use scenarios::ChaosScenario;
pub use world::{SimConfig, SimOrchestrator, SimWorld};
