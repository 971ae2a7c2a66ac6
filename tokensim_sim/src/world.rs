//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::engine::ReferenceEngine;
use crate::network::{SimChannelController, SimConnector};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokensim_core::{
    DispatchMode, Orchestrator, OrchestratorConfig, ReconnectPolicy, ScenarioRegistry, SessionId, SessionStatus,
    SimulationSession,
};
use tokensim_env::{Credential, TokenSimContext};

/// The orchestrator as wired inside the harness.
pub type SimOrchestrator = Orchestrator<SimContext, SimConnector, ReferenceEngine>;

/// How long the runtime must stay idle before the world counts as settled.
///
/// Measured on tokio's clock, which the harness runtime keeps paused, so it
/// costs no wall-clock time.
const QUIESCE: Duration = Duration::from_millis(50);

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Reconnect policy of the orchestrator's transport
    pub reconnect: ReconnectPolicy,

    /// Mode used by `run_scenario`
    pub default_mode: DispatchMode,

    /// Virtual time each provider call takes
    pub provider_latency: Duration,

    /// Virtual time that passes per server tick
    pub tick: Duration,

    /// Credential presented by the orchestrator
    pub credential: Option<Credential>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            reconnect: ReconnectPolicy::default(),
            default_mode: DispatchMode::Direct,
            provider_latency: Duration::from_millis(200),
            tick: Duration::from_millis(100),
            credential: None,
        }
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Reference engine standing in for the simulation API
    pub engine: Arc<ReferenceEngine>,

    /// Channel controller for fault injection
    pub channel: SimChannelController,

    /// The system under test
    pub orchestrator: SimOrchestrator,

    /// Inbound events applied by `settle`
    applied: AtomicU64,

    /// Server ticks so far
    ticks: AtomicU64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    ///
    /// Must be called inside a tokio runtime: the orchestrator spawns onto it.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let engine = Arc::new(ReferenceEngine::new().with_latency(context.clone(), config.provider_latency));
        let channel = SimChannelController::new(context.clone());

        let mut orchestrator_config = OrchestratorConfig::default()
            .with_reconnect(config.reconnect.clone())
            .with_default_mode(config.default_mode);
        if let Some(credential) = config.credential.clone() {
            orchestrator_config = orchestrator_config.with_credential(credential);
        }

        let orchestrator = Orchestrator::new(
            context.clone(),
            Arc::new(channel.connector()),
            engine.clone(),
            orchestrator_config,
        )
        .with_scenarios(ScenarioRegistry::with_defaults());
        orchestrator.start();

        Self {
            config,
            context,
            engine,
            channel,
            orchestrator,
            applied: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    /// Applies inbound events until nothing is left to happen.
    ///
    /// Returns how many events were applied.
    pub async fn settle(&self) -> usize {
        let mut applied = 0;
        while tokio::time::timeout(QUIESCE, self.orchestrator.step()).await.is_ok() {
            applied += 1;
        }
        self.applied.fetch_add(applied as u64, Ordering::SeqCst);
        applied
    }

    /// Advances virtual time by one tick, lets the server release one frame
    /// per subscribed job and settles. Returns the frames released.
    pub async fn tick(&self) -> usize {
        self.context.advance_time(self.config.tick);
        self.ticks.fetch_add(1, Ordering::SeqCst);
        let released = self.channel.step_server();
        self.settle().await;
        released
    }

    /// Ticks until `done` holds for the session or `max_ticks` run out.
    pub async fn tick_until(
        &self,
        session: SessionId,
        max_ticks: u32,
        done: impl Fn(&SimulationSession) -> bool,
    ) -> Option<SimulationSession> {
        for _ in 0..=max_ticks {
            if let Some(snapshot) = self.orchestrator.session(session) {
                if done(&snapshot) {
                    return Some(snapshot);
                }
            }
            self.tick().await;
        }
        None
    }

    /// Ticks until the session reaches a terminal state.
    pub async fn run_to_end(&self, session: SessionId, max_ticks: u32) -> Option<SimulationSession> {
        self.tick_until(session, max_ticks, |s| s.status().is_terminal()).await
    }

    pub fn status(&self, session: SessionId) -> Option<SessionStatus> {
        self.orchestrator.session(session).map(|s| s.status())
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn events_applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokensim_core::ScenarioId;

    #[tokio::test(start_paused = true)]
    async fn test_sim_world_direct_session() {
        let world = SimWorld::new(SimConfig::default());
        let id = world
            .orchestrator
            .run_scenario(&ScenarioId::new("scenario-a"))
            .await
            .unwrap();

        assert_eq!(world.settle().await, 1);
        assert_eq!(world.status(id), Some(SessionStatus::Completed));
        assert_eq!(world.engine.calls(), 1);
        assert_eq!(world.context.now(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_world_tick() {
        let world = SimWorld::new(SimConfig {
            tick: Duration::from_millis(250),
            ..Default::default()
        });

        assert_eq!(world.tick_count(), 0);
        assert_eq!(world.time(), 0.0);

        assert_eq!(world.tick().await, 0);

        assert_eq!(world.tick_count(), 1);
        assert!((world.time() - 0.25).abs() < 0.0001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sim_world_streamed_session_completes() {
        let world = SimWorld::new(SimConfig {
            default_mode: DispatchMode::Streamed,
            ..Default::default()
        });
        let id = world
            .orchestrator
            .run_scenario(&ScenarioId::new("scenario-b"))
            .await
            .unwrap();

        world.settle().await;
        assert_eq!(world.status(id), Some(SessionStatus::Streaming));

        let done = world.run_to_end(id, 10).await.unwrap();
        assert_eq!(done.status(), SessionStatus::Completed);
        assert_eq!(done.progress(), 100);
        assert_eq!(world.engine.calls(), 0);
    }
}
