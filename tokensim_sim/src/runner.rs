//! Scenario runner - executes chaos engineering test scenarios.
//!
//! Every scenario gets a fresh [`SimWorld`] on its own current-thread tokio
//! runtime with the clock paused, so a run is a pure function of the seed.

use crate::engine;
use crate::exporter::JsonFileExporter;
use crate::network::{data_update_frame, error_frame, progress_frame, update_frame};
use crate::scenarios::ChaosScenario;
use crate::world::{SimConfig, SimWorld};

use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokensim_core::transport::{SUBSCRIBE_SIMULATION, UNSUBSCRIBE_SIMULATION};
use tokensim_core::{
    CompareError, ConnectionStatus, DispatchMode, EventType, Metric, ProviderError, ScenarioId, SessionErrorKind,
    SessionId, SessionStatus, ShockEvent, SimulationResult, SimulationSession, SupplyField, TimeUnit,
};
use tokensim_env::{Credential, TokenSimContext};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why a scenario did not pass.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error(transparent)]
    Orchestrator(#[from] tokensim_core::Error),

    #[error("reference engine: {0}")]
    Engine(#[from] ProviderError),

    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), SimError> {
    if condition {
        Ok(())
    } else {
        Err(SimError::Assertion(message.into()))
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ChaosScenario,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Server ticks executed
    pub total_ticks: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Sessions opened
    pub sessions: usize,

    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,

    /// Frames the client sent on the channel
    pub frames_sent: usize,

    /// Frames the server delivered
    pub frames_delivered: u64,

    /// Channel connection attempts, refused ones included
    pub connect_attempts: u64,

    /// Provider calls served by the reference engine
    pub provider_calls: u64,

    /// Inbound events applied by the orchestrator
    pub events_applied: u64,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld) -> Self {
        let sessions = world.orchestrator.sessions();
        let count = |status: SessionStatus| sessions.iter().filter(|s| s.status() == status).count();
        Self {
            sessions: sessions.len(),
            completed: count(SessionStatus::Completed),
            failed: count(SessionStatus::Failed),
            canceled: count(SessionStatus::Canceled),
            frames_sent: world.channel.sent().len(),
            frames_delivered: world.channel.frames_delivered(),
            connect_attempts: world.channel.connect_attempts(),
            provider_calls: world.engine.calls(),
            events_applied: world.events_applied(),
        }
    }
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Upper bound on server ticks while waiting for a session
    max_ticks: u32,

    /// Virtual time per provider call
    provider_latency: Duration,

    /// Where comparison reports go, if anywhere
    export_dir: Option<PathBuf>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_ticks: 20,
            provider_latency: Duration::from_millis(200),
            export_dir: None,
        }
    }

    /// Sets the tick budget per session.
    pub fn with_max_ticks(mut self, ticks: u32) -> Self {
        self.max_ticks = ticks;
        self
    }

    /// Sets the virtual latency of provider calls.
    pub fn with_provider_latency(mut self, latency: Duration) -> Self {
        self.provider_latency = latency;
        self
    }

    /// Exports comparison surfaces into `dir`.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ChaosScenario) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        if scenario.is_network_fault() {
            debug!("Channel faults will be injected");
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.run_in_world(scenario)),
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                total_ticks: 0,
                final_time_secs: 0.0,
                failure_reason: Some(SimError::from(e).to_string()),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    fn config_for(&self, scenario: ChaosScenario) -> SimConfig {
        let mut config = SimConfig {
            seed: self.seed,
            provider_latency: self.provider_latency,
            ..Default::default()
        };
        if scenario == ChaosScenario::CredentialRotation {
            config.credential = Some(Credential::new("token-1"));
        }
        config
    }

    async fn run_in_world(&self, scenario: ChaosScenario) -> ScenarioResult {
        let world = SimWorld::new(self.config_for(scenario));

        let outcome = match scenario {
            ChaosScenario::DirectRoundTrip => self.run_direct_round_trip(&world).await,
            ChaosScenario::StreamedHappyPath => self.run_streamed_happy_path(&world).await,
            ChaosScenario::OutOfOrderProgress => self.run_out_of_order_progress(&world).await,
            ChaosScenario::CancelMidStream => self.run_cancel_mid_stream(&world).await,
            ChaosScenario::ReconnectResubscribe => self.run_reconnect_resubscribe(&world).await,
            ChaosScenario::ReconnectExhaustion => self.run_reconnect_exhaustion(&world).await,
            ChaosScenario::CredentialRotation => self.run_credential_rotation(&world).await,
            ChaosScenario::ParallelComparison => self.run_parallel_comparison(&world).await,
            ChaosScenario::ProviderFailure => self.run_provider_failure(&world).await,
            ChaosScenario::StaleGeneration => self.run_stale_generation(&world).await,
            ChaosScenario::StreamedServerError => self.run_streamed_server_error(&world).await,
            ChaosScenario::MarketDataRefresh => self.run_market_data_refresh(&world).await,
            ChaosScenario::OperatorDisconnect => self.run_operator_disconnect(&world).await,
            ChaosScenario::DropThenExhaustion => self.run_drop_then_exhaustion(&world).await,
        };

        let metrics = ScenarioMetrics::collect(&world);
        world.orchestrator.shutdown().await;

        let failure_reason = outcome.err().map(|e| e.to_string());
        match &failure_reason {
            None => info!("✓ {} passed: {} sessions, {} frames", scenario, metrics.sessions, metrics.frames_delivered),
            Some(reason) => warn!("✗ {} failed: {}", scenario, reason),
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            failure_reason,
            metrics,
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn snapshot(world: &SimWorld, id: SessionId) -> Result<SimulationSession, SimError> {
        world
            .orchestrator
            .session(id)
            .ok_or_else(|| SimError::Assertion(format!("session {} disappeared", id)))
    }

    /// What the provider should produce for the scenario as dispatched.
    fn expected(session: &SimulationSession) -> Result<SimulationResult, SimError> {
        let config = session
            .scenario()
            .ok_or_else(|| SimError::Assertion(format!("session {} has no scenario", session.id())))?;
        Ok(engine::simulate(&config.params, config.shocks.events())?)
    }

    async fn direct(world: &SimWorld, scenario: &ScenarioId) -> Result<SessionId, SimError> {
        let id = world.orchestrator.open_session();
        world.orchestrator.dispatch(id, scenario, DispatchMode::Direct).await?;
        Ok(id)
    }

    /// Dispatches streamed and settles until the server acknowledged.
    async fn streamed(world: &SimWorld, scenario: &ScenarioId) -> Result<SessionId, SimError> {
        let id = world.orchestrator.open_session();
        world.orchestrator.dispatch(id, scenario, DispatchMode::Streamed).await?;
        world.settle().await;
        let status = world.status(id);
        ensure(
            status == Some(SessionStatus::Streaming),
            format!("{} should be streaming after connect, is {:?}", id, status),
        )?;
        Ok(id)
    }

    async fn finish(&self, world: &SimWorld, id: SessionId) -> Result<SimulationSession, SimError> {
        world
            .run_to_end(id, self.max_ticks)
            .await
            .ok_or_else(|| SimError::Assertion(format!("{} not terminal after {} ticks", id, self.max_ticks)))
    }

    /// Snapshots of `id` published since `rx` was opened.
    fn published(rx: &mut broadcast::Receiver<SimulationSession>, id: SessionId) -> Vec<SimulationSession> {
        let mut out = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            if snapshot.id() == id {
                out.push(snapshot);
            }
        }
        out
    }

    fn expect_failed(world: &SimWorld, id: SessionId, kind: SessionErrorKind) -> Result<(), SimError> {
        let session = Self::snapshot(world, id)?;
        ensure(
            session.status() == SessionStatus::Failed,
            format!("{} should have failed, is {}", id, session.status()),
        )?;
        let actual = session.error().map(|e| e.kind);
        ensure(actual == Some(kind), format!("{} failed with {:?}, expected {:?}", id, actual, kind))
    }

    fn scenario_a() -> ScenarioId {
        ScenarioId::new("scenario-a")
    }

    fn scenario_b() -> ScenarioId {
        ScenarioId::new("scenario-b")
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    /// DST-001: Scenario A over the provider, compare with B, annotate.
    async fn run_direct_round_trip(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let burn = ShockEvent::new(6, TimeUnit::Months, EventType::MassBurn, -0.3).with_description("treasury burn");
        orch.add_shock(&Self::scenario_a(), burn)?;

        let a = Self::direct(world, &Self::scenario_a()).await?;
        ensure(world.status(a) == Some(SessionStatus::Requesting), "dispatch returns while Requesting")?;

        world.settle().await;
        let session = Self::snapshot(world, a)?;
        ensure(session.status() == SessionStatus::Completed, format!("A is {}", session.status()))?;
        ensure(session.progress() == 100, "completed session reports 100%")?;
        let result = session.result().ok_or_else(|| SimError::Assertion("no result".into()))?;
        ensure(result.len() == 13, format!("12 months give 13 points, got {}", result.len()))?;
        ensure(**result == Self::expected(&session)?, "direct result matches the engine")?;

        let b = Self::direct(world, &Self::scenario_b()).await?;
        world.settle().await;

        let view = orch.compare(&[a, b])?;
        ensure(view.metrics.columns == ["Scenario A", "Scenario B"], "columns follow caller order")?;
        let burned = view
            .range(Metric::TotalBurned)
            .ok_or_else(|| SimError::Assertion("no burn range".into()))?;
        ensure(burned.max > burned.min, "the shocked scenario burns more")?;

        let annotations = orch.annotations(a, SupplyField::TotalSupply)?;
        ensure(annotations.len() == 1, "one shock, one annotation")?;
        ensure(annotations[0].x == 6 && !annotations[0].clamped, "annotation sits on month 6")?;
        ensure(annotations[0].label == "Mass Burn: -30.0%", annotations[0].label.clone())?;
        ensure(annotations[0].y == result.points()[6].total_supply, "annotation y is the series value")?;

        info!("✓ DirectRoundTrip: final supply {:.2}", result.metrics.final_supply);
        Ok(())
    }

    /// DST-002: Streamed run from dispatch to completion.
    async fn run_streamed_happy_path(&self, world: &SimWorld) -> Result<(), SimError> {
        let mut updates = world.orchestrator.observe();
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        let done = self.finish(world, id).await?;

        ensure(done.status() == SessionStatus::Completed, format!("ended {}", done.status()))?;
        ensure(done.progress() == 100, "completed at 100%")?;
        let result = done.result().ok_or_else(|| SimError::Assertion("no result".into()))?;
        ensure(**result == Self::expected(&done)?, "streamed result matches the engine")?;

        let history = Self::published(&mut updates, id);
        let progress: Vec<u8> = history.iter().map(|s| s.progress()).collect();
        ensure(progress.windows(2).all(|w| w[0] <= w[1]), format!("progress went {:?}", progress))?;
        ensure(
            history
                .iter()
                .any(|s| s.status() == SessionStatus::Streaming && s.result().is_some_and(|r| r.len() < 13)),
            "a partial result was shown before completion",
        )?;

        ensure(world.channel.sent_count(UNSUBSCRIBE_SIMULATION) == 1, "completion releases the stream")?;
        ensure(!world.channel.is_subscribed(done.stream_key()), "server no longer streams to it")?;

        info!("✓ StreamedHappyPath: progress {:?}", progress);
        Ok(())
    }

    /// DST-003: Progress 10, 5, 50 settles on 50.
    async fn run_out_of_order_progress(&self, world: &SimWorld) -> Result<(), SimError> {
        let mut updates = world.orchestrator.observe();
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        let key = Self::snapshot(world, id)?.stream_key();

        for progress in [10.0, 5.0, 50.0] {
            world.channel.push(progress_frame(key, progress));
        }
        world.settle().await;

        let session = Self::snapshot(world, id)?;
        ensure(session.progress() == 50, format!("progress is {}", session.progress()))?;
        let seen: Vec<u8> = Self::published(&mut updates, id).iter().map(|s| s.progress()).collect();
        ensure(!seen.contains(&5), format!("5 must never be published, saw {:?}", seen))?;

        let done = self.finish(world, id).await?;
        ensure(done.status() == SessionStatus::Completed, "still completes")?;
        Ok(())
    }

    /// DST-004: Cancel after the first frame.
    async fn run_cancel_mid_stream(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        world.tick().await;
        let session = Self::snapshot(world, id)?;
        ensure(session.progress() > 0, "first progress frame arrived")?;
        let key = session.stream_key();
        let expected = Self::expected(&session)?;

        let canceled = orch.cancel(id).await?;
        ensure(canceled.status() == SessionStatus::Canceled, "cancel is immediate")?;
        ensure(!world.channel.is_subscribed(key), "server stream released")?;

        // A late final update gets past the server but not the client
        world.channel.push(update_frame(key, &expected, Some(100.0)));
        for _ in 0..5 {
            world.tick().await;
        }
        let session = Self::snapshot(world, id)?;
        ensure(session.status() == SessionStatus::Canceled, format!("now {}", session.status()))?;
        ensure(session.result().is_none(), "late result discarded")?;
        ensure(orch.cancel(id).await.is_err(), "second cancel is an illegal transition")?;

        // Same for a direct call already on its way
        let direct = Self::direct(world, &Self::scenario_b()).await?;
        orch.cancel(direct).await?;
        world.settle().await;
        let session = Self::snapshot(world, direct)?;
        ensure(
            session.status() == SessionStatus::Canceled && session.result().is_none(),
            "direct result after cancel is discarded",
        )?;
        ensure(world.engine.calls() == 1, "the provider call itself still ran")?;
        Ok(())
    }

    /// DST-005: Drop mid-stream, back off, re-subscribe, complete.
    async fn run_reconnect_resubscribe(&self, world: &SimWorld) -> Result<(), SimError> {
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        world.tick().await;

        let dropped_at = world.context.now();
        ensure(world.channel.drop_connection(), "a connection was open")?;
        world.settle().await;

        ensure(
            world.orchestrator.transport_status() == ConnectionStatus::Connected,
            "transport reconnected",
        )?;
        ensure(world.status(id) == Some(SessionStatus::Streaming), "session kept streaming")?;
        ensure(world.channel.sent_count(SUBSCRIBE_SIMULATION) == 2, "re-subscribed once")?;
        ensure(world.channel.connect_attempts() == 2, "one reconnect")?;
        let waited = world.context.now() - dropped_at;
        ensure(waited >= Duration::from_millis(1000), format!("backoff waited {:?}", waited))?;

        let done = self.finish(world, id).await?;
        ensure(done.status() == SessionStatus::Completed, format!("ended {}", done.status()))?;
        let result = done.result().ok_or_else(|| SimError::Assertion("no result".into()))?;
        ensure(**result == Self::expected(&done)?, "result survives the reconnect intact")?;
        Ok(())
    }

    /// DST-006: Every reconnect refused.
    async fn run_reconnect_exhaustion(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        world.channel.refuse_connections(true);
        let mut updates = orch.observe();

        let s1 = orch.open_session();
        orch.dispatch(s1, &Self::scenario_a(), DispatchMode::Streamed).await?;
        let s2 = orch.open_session();
        orch.dispatch(s2, &Self::scenario_b(), DispatchMode::Streamed).await?;
        let direct = Self::direct(world, &Self::scenario_a()).await?;
        world.settle().await;

        let policy = &world.config.reconnect;
        let mut history = Vec::new();
        while let Ok(snapshot) = updates.try_recv() {
            history.push(snapshot);
        }
        for id in [s1, s2] {
            Self::expect_failed(world, id, SessionErrorKind::ConnectionExhausted)?;
            let failures = history
                .iter()
                .filter(|s| s.id() == id && s.status() == SessionStatus::Failed)
                .count();
            ensure(failures == 1, format!("{} published {} failures", id, failures))?;
        }
        ensure(world.status(direct) == Some(SessionStatus::Completed), "direct sibling unaffected")?;
        ensure(
            orch.transport_status() == ConnectionStatus::Disconnected,
            "transport gave up",
        )?;
        ensure(
            world.channel.connect_attempts() == u64::from(policy.max_attempts) + 1,
            format!("{} connect attempts", world.channel.connect_attempts()),
        )?;
        ensure(world.context.now() >= Duration::from_secs(17), "1+2+4+5+5 seconds of backoff")?;

        let mut rx = orch.observe();
        world.settle().await;
        ensure(Self::published(&mut rx, s1).is_empty(), "no further snapshots")?;

        // The channel comes back on the next streamed dispatch
        world.channel.refuse_connections(false);
        orch.reset(s1)?;
        orch.dispatch(s1, &Self::scenario_a(), DispatchMode::Streamed).await?;
        world.settle().await;
        let done = self.finish(world, s1).await?;
        ensure(done.status() == SessionStatus::Completed, "recovers after exhaustion")?;
        ensure(done.generation() == 2, "second generation")?;
        Ok(())
    }

    /// DST-014: Live channel lost under two streams, nothing comes back.
    async fn run_drop_then_exhaustion(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let s1 = Self::streamed(world, &Self::scenario_a()).await?;
        let s2 = Self::streamed(world, &Self::scenario_b()).await?;
        world.tick().await;
        for id in [s1, s2] {
            ensure(world.status(id) == Some(SessionStatus::Streaming), format!("{} live before the drop", id))?;
        }

        let mut updates = orch.observe();
        let before = world.channel.connect_attempts();
        world.channel.refuse_connections(true);
        ensure(world.channel.drop_connection(), "a connection was open")?;
        let direct = Self::direct(world, &Self::scenario_a()).await?;
        world.settle().await;

        let retries = world.channel.connect_attempts() - before;
        ensure(
            retries == u64::from(world.config.reconnect.max_attempts),
            format!("{} connect attempts after the drop", retries),
        )?;

        let mut history = Vec::new();
        while let Ok(snapshot) = updates.try_recv() {
            history.push(snapshot);
        }
        for id in [s1, s2] {
            Self::expect_failed(world, id, SessionErrorKind::ConnectionExhausted)?;
            let failures = history
                .iter()
                .filter(|s| s.id() == id && s.status() == SessionStatus::Failed)
                .count();
            ensure(failures == 1, format!("{} published {} failures", id, failures))?;
        }
        ensure(world.status(direct) == Some(SessionStatus::Completed), "direct sibling completes")?;
        ensure(
            orch.transport_status() == ConnectionStatus::Disconnected,
            "transport gave up",
        )?;

        let mut rx = orch.observe();
        world.tick().await;
        ensure(Self::published(&mut rx, s1).is_empty(), "no snapshots after the failure")?;
        ensure(Self::published(&mut rx, s2).is_empty(), "no snapshots after the failure")?;
        Ok(())
    }

    /// DST-007: Credential swapped under a live stream.
    async fn run_credential_rotation(&self, world: &SimWorld) -> Result<(), SimError> {
        world.channel.require_token(Some("token-1"));
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        world.tick().await;

        world.channel.require_token(Some("token-2"));
        world
            .orchestrator
            .update_credential(Some(Credential::new("token-2")))
            .await;
        world.settle().await;

        let tokens = world.channel.tokens_seen();
        ensure(
            tokens.last().and_then(|t| t.as_deref()) == Some("token-2"),
            format!("tokens presented: {:?}", tokens.len()),
        )?;
        ensure(
            world.orchestrator.transport_status() == ConnectionStatus::Connected,
            "reconnected with the new credential",
        )?;
        ensure(world.status(id) == Some(SessionStatus::Streaming), "stream carried over")?;
        ensure(world.channel.sent_count(SUBSCRIBE_SIMULATION) == 2, "re-subscribed after the cycle")?;

        let done = self.finish(world, id).await?;
        ensure(done.status() == SessionStatus::Completed, format!("ended {}", done.status()))?;
        Ok(())
    }

    /// DST-008: Direct and streamed runs side by side, plus remote comparison.
    async fn run_parallel_comparison(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let da = Self::direct(world, &Self::scenario_a()).await?;
        let db = Self::direct(world, &Self::scenario_b()).await?;
        let sa = Self::streamed(world, &Self::scenario_a()).await?;
        self.finish(world, sa).await?;
        world.settle().await;

        match orch.compare(&[da]) {
            Err(tokensim_core::Error::Compare(CompareError::InsufficientScenarios(1))) => {}
            other => return Err(SimError::Assertion(format!("single column gave {:?}", other.map(|_| ())))),
        }

        let view = orch.compare(&[da, db, sa])?;
        ensure(
            view.metrics.columns == ["Scenario A", "Scenario B", "Scenario A"],
            format!("columns {:?}", view.metrics.columns),
        )?;
        ensure(view.series.len() == 39, format!("{} merged points", view.series.len()))?;
        let final_supply = view
            .metrics
            .row(Metric::FinalSupply)
            .ok_or_else(|| SimError::Assertion("no final supply row".into()))?;
        ensure(
            final_supply.values[0] == final_supply.values[2],
            "same scenario, same numbers, whichever path",
        )?;

        let remote = orch
            .compare_remote(&[Self::scenario_a(), Self::scenario_b()])
            .await?;
        let remote_final = remote
            .metrics
            .row(Metric::FinalSupply)
            .ok_or_else(|| SimError::Assertion("no remote final supply row".into()))?;
        ensure(
            remote_final.values[..] == final_supply.values[..2],
            "remote comparison agrees with the sessions",
        )?;

        if let Some(dir) = &self.export_dir {
            let exporter = JsonFileExporter::new(dir);
            ensure(orch.export_comparison(&exporter, &view, None), "comparison exported")?;
        }
        Ok(())
    }

    /// DST-009: Provider rejects one run.
    async fn run_provider_failure(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        world.engine.fail_next("duration must be <= 360");
        let failing = Self::direct(world, &Self::scenario_a()).await?;
        let sibling = Self::direct(world, &Self::scenario_b()).await?;
        world.settle().await;

        Self::expect_failed(world, failing, SessionErrorKind::Provider)?;
        let message = Self::snapshot(world, failing)?.error().map(|e| e.message.clone());
        ensure(
            message.as_deref() == Some("duration must be <= 360"),
            format!("message {:?}", message),
        )?;
        ensure(world.status(sibling) == Some(SessionStatus::Completed), "sibling unaffected")?;

        let idle = orch.reset(failing)?;
        ensure(
            idle.status() == SessionStatus::Idle
                && idle.progress() == 0
                && idle.result().is_none()
                && idle.error().is_none(),
            "reset clears progress, result and error",
        )?;

        orch.dispatch(failing, &Self::scenario_a(), DispatchMode::Direct).await?;
        world.settle().await;
        let retried = Self::snapshot(world, failing)?;
        ensure(retried.status() == SessionStatus::Completed, "retry succeeds")?;
        ensure(retried.generation() == 2, "retry runs under a new generation")?;

        orch.discard(failing)?;
        ensure(orch.session(failing).is_none(), "discarded")?;
        Ok(())
    }

    /// DST-010: Frames of a canceled generation arrive after re-dispatch.
    async fn run_stale_generation(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        world.tick().await;
        let old = Self::snapshot(world, id)?;
        let old_expected = Self::expected(&old)?;

        orch.cancel(id).await?;
        orch.reset(id)?;
        orch.dispatch(id, &Self::scenario_b(), DispatchMode::Streamed).await?;
        world.settle().await;
        let new = Self::snapshot(world, id)?;
        ensure(new.generation() == old.generation() + 1, "new generation")?;
        ensure(new.status() == SessionStatus::Streaming, format!("is {}", new.status()))?;

        let stale = old.stream_key();
        world.channel.push(progress_frame(stale, 90.0));
        world.channel.push(update_frame(stale, &old_expected, Some(100.0)));
        world.channel.push(error_frame(stale, "stale failure"));
        world.settle().await;

        let session = Self::snapshot(world, id)?;
        ensure(session.status() == SessionStatus::Streaming, format!("is {}", session.status()))?;
        ensure(session.progress() < 90 && session.error().is_none(), "stale frames ignored")?;

        let done = self.finish(world, id).await?;
        let result = done.result().ok_or_else(|| SimError::Assertion("no result".into()))?;
        ensure(**result == Self::expected(&done)?, "result is scenario B's")?;
        ensure(**result != old_expected, "and not scenario A's")?;
        Ok(())
    }

    /// DST-011: Server fails one streamed session.
    async fn run_streamed_server_error(&self, world: &SimWorld) -> Result<(), SimError> {
        world.channel.fail_next_stream("simulation worker crashed");
        let bad = Self::streamed(world, &Self::scenario_a()).await?;
        let good = Self::streamed(world, &Self::scenario_b()).await?;
        world.tick().await;

        Self::expect_failed(world, bad, SessionErrorKind::Provider)?;
        let message = Self::snapshot(world, bad)?.error().map(|e| e.message.clone());
        ensure(message.as_deref() == Some("simulation worker crashed"), format!("{:?}", message))?;
        ensure(world.status(good) == Some(SessionStatus::Streaming), "sibling keeps streaming")?;

        let done = self.finish(world, good).await?;
        ensure(done.status() == SessionStatus::Completed, "sibling completes")?;
        ensure(world.channel.sent_count(UNSUBSCRIBE_SIMULATION) == 2, "both streams released")?;
        Ok(())
    }

    /// DST-012: data_update re-subscribes streaming sessions.
    async fn run_market_data_refresh(&self, world: &SimWorld) -> Result<(), SimError> {
        let id = Self::streamed(world, &Self::scenario_a()).await?;
        let before = world.channel.sent_count(SUBSCRIBE_SIMULATION);

        let tick = world.context.now().as_millis() as u64;
        world.channel.push(data_update_frame(json!(tick), json!({"TKN": 1.02})));
        world.settle().await;
        ensure(
            world.channel.sent_count(SUBSCRIBE_SIMULATION) == before + 1,
            "refresh re-subscribes",
        )?;
        ensure(world.status(id) == Some(SessionStatus::Streaming), "still streaming")?;

        self.finish(world, id).await?;
        let after = world.channel.sent_count(SUBSCRIBE_SIMULATION);
        world.channel.push(data_update_frame(json!(tick + 1), json!({"TKN": 1.01})));
        world.settle().await;
        ensure(
            world.channel.sent_count(SUBSCRIBE_SIMULATION) == after,
            "nothing streaming, nothing to refresh",
        )?;
        Ok(())
    }

    /// DST-013: Explicit disconnect under streamed sessions.
    async fn run_operator_disconnect(&self, world: &SimWorld) -> Result<(), SimError> {
        let orch = &world.orchestrator;
        let s1 = Self::streamed(world, &Self::scenario_a()).await?;
        let s2 = Self::streamed(world, &Self::scenario_b()).await?;
        let direct = Self::direct(world, &Self::scenario_a()).await?;
        world.tick().await;

        orch.disconnect().await;
        world.settle().await;
        for id in [s1, s2] {
            Self::expect_failed(world, id, SessionErrorKind::ConnectionLost)?;
        }
        ensure(
            orch.transport_status() == ConnectionStatus::Disconnected && !world.channel.is_connected(),
            "channel closed",
        )?;

        for _ in 0..3 {
            world.tick().await;
        }
        ensure(world.status(direct) == Some(SessionStatus::Completed), "direct sibling unaffected")?;
        ensure(world.channel.connect_attempts() == 1, "no reconnect after an explicit disconnect")?;
        Ok(())
    }
}
