//! Orchestrator - wires the registries, the transport and the provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! │                                                              │
//! │  ScenarioRegistry ──► dispatch ──┬──► provider task ──┐      │
//! │                                  │                    │      │
//! │                                  └──► TransportClient │      │
//! │                                        (pump task) ───┤      │
//! │                                                       ▼      │
//! │                                              inbound queue   │
//! │                                                       │      │
//! │   observe() ◄── SessionRegistry ◄── step()/drain() ◄──┘      │
//! │                        │                                     │
//! │                        └──► compare() / annotations()        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Provider completions and transport events land on one queue and are
//! applied one at a time, in delivery order, by [`Orchestrator::step`],
//! [`Orchestrator::drain`] or [`Orchestrator::run`]. Nothing else mutates a
//! session behind the caller's back.
//!
//! # Usage
//!
//! ```ignore
//! use tokensim_core::{Orchestrator, OrchestratorConfig, DispatchMode};
//!
//! let orchestrator = Orchestrator::production(OrchestratorConfig::from_env())?;
//! orchestrator.start();
//!
//! let session = orchestrator.run_scenario(&"scenario-a".into()).await?;
//! orchestrator.step().await;
//! ```

use crate::compare::{self, ComparisonOptions, ComparisonResult, ScenarioSeries};
use crate::config::OrchestratorConfig;
use crate::error::{CompareError, ProviderError, RegistryError, Result, SessionError, TransportError};
use crate::export::{default_filename, ReportExporter};
use crate::model::{ScenarioParams, SimulationResult, SupplyField};
use crate::provider::{HttpProvider, SimulationProvider};
use crate::scenario::{NewScenario, ScenarioConfig, ScenarioRegistry};
use crate::session::{DispatchMode, IgnoreReason, Outcome, SessionStatus, SimulationSession};
use crate::session_registry::SessionRegistry;
use crate::shock::{annotate, Annotation, ShockEvent, ShockSchedule};
use crate::transport::{ConnectionStatus, EventSink, TransportClient, TransportEvent};
use crate::types::{ScenarioId, SessionId, StreamKey};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokensim_env::{ChannelConnector, Credential, TokenSimContext, TokioContext, WsConnector};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

/// Something for the orchestrator to apply.
#[derive(Debug)]
pub enum Inbound {
    Transport(TransportEvent),
    /// A direct provider call finished
    Provider {
        key: StreamKey,
        outcome: std::result::Result<SimulationResult, ProviderError>,
    },
}

/// The session orchestrator.
///
/// Generic over the context, channel and provider implementations,
/// allowing the same code to run in production (tokio, WebSocket, HTTP) or
/// in the deterministic harness.
pub struct Orchestrator<Ctx, C, P>
where
    Ctx: TokenSimContext,
    C: ChannelConnector,
    P: SimulationProvider,
{
    ctx: Arc<Ctx>,
    config: OrchestratorConfig,
    scenarios: RwLock<ScenarioRegistry>,
    sessions: SessionRegistry,
    transport: TransportClient<Ctx, C>,
    provider: Arc<P>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    running: AtomicBool,
    stop: Notify,
}

impl Orchestrator<TokioContext, WsConnector, HttpProvider> {
    /// Orchestrator talking to the real simulation API.
    pub fn production(config: OrchestratorConfig) -> Result<Self> {
        let provider = HttpProvider::new(config.api_url.clone(), config.request_timeout)?;
        let connector = WsConnector::new(config.ws_url.clone());
        Ok(Self::new(
            TokioContext::shared(),
            Arc::new(connector),
            Arc::new(provider),
            config,
        ))
    }
}

impl<Ctx, C, P> Orchestrator<Ctx, C, P>
where
    Ctx: TokenSimContext,
    C: ChannelConnector,
    P: SimulationProvider,
{
    pub fn new(ctx: Arc<Ctx>, connector: Arc<C>, provider: Arc<P>, config: OrchestratorConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let sink_tx = inbound_tx.clone();
        let sink: EventSink = Arc::new(move |event: TransportEvent| {
            // Receiver only goes away with the orchestrator
            let _ = sink_tx.send(Inbound::Transport(event));
        });

        let transport = TransportClient::new(
            ctx.clone(),
            connector,
            config.reconnect.clone(),
            config.credential.clone(),
            sink,
        );

        Self {
            ctx,
            config,
            scenarios: RwLock::new(ScenarioRegistry::new()),
            sessions: SessionRegistry::new(),
            transport,
            provider,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            running: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// Replaces the scenario registry (e.g. with [`ScenarioRegistry::with_defaults`]).
    pub fn with_scenarios(self, registry: ScenarioRegistry) -> Self {
        *self.scenarios.write() = registry;
        self
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(seed = self.ctx.seed(), auto_connect = self.config.auto_connect, "Orchestrator started");
        if self.config.auto_connect {
            self.transport.connect();
        }
    }

    /// Cancels in-flight sessions, closes the channel and stops [`run`](Self::run).
    pub async fn shutdown(&self) {
        for session in self.sessions.list() {
            if session.status().is_in_flight() {
                if let Err(e) = self.cancel(session.id()).await {
                    debug!(session = %session.id(), error = %e, "Cancel during shutdown failed");
                }
            }
        }
        self.transport.disconnect().await;
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_waiters();
        info!("Orchestrator shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    pub fn add_scenario(&self, scenario: NewScenario) -> Result<ScenarioId> {
        Ok(self.scenarios.write().add(scenario)?)
    }

    pub fn update_scenario(&self, id: &ScenarioId, params: ScenarioParams) -> Result<()> {
        Ok(self.scenarios.write().update(id, params)?)
    }

    pub fn rename_scenario(&self, id: &ScenarioId, name: impl Into<String>) -> Result<()> {
        Ok(self.scenarios.write().rename(id, name)?)
    }

    pub fn remove_scenario(&self, id: &ScenarioId) -> Result<ScenarioConfig> {
        Ok(self.scenarios.write().remove(id)?)
    }

    pub fn set_active(&self, ids: &[ScenarioId]) -> Result<()> {
        Ok(self.scenarios.write().set_active(ids)?)
    }

    pub fn add_shock(&self, id: &ScenarioId, event: ShockEvent) -> Result<()> {
        Ok(self.scenarios.write().add_shock(id, event)?)
    }

    pub fn remove_shock(&self, id: &ScenarioId, index: usize) -> Result<ShockEvent> {
        Ok(self.scenarios.write().remove_shock(id, index)?)
    }

    pub fn set_shocks(&self, id: &ScenarioId, shocks: ShockSchedule) -> Result<()> {
        Ok(self.scenarios.write().set_shocks(id, shocks)?)
    }

    pub fn scenario(&self, id: &ScenarioId) -> Option<ScenarioConfig> {
        self.scenarios.read().get(id).cloned()
    }

    pub fn scenarios(&self) -> Vec<ScenarioConfig> {
        self.scenarios.read().iter().cloned().collect()
    }

    pub fn active_scenarios(&self) -> Vec<ScenarioId> {
        self.scenarios.read().active().to_vec()
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Creates an Idle session.
    pub fn open_session(&self) -> SessionId {
        self.sessions.open(SessionId::new()).id()
    }

    /// Dispatches `scenario` on an Idle session.
    ///
    /// Returns once the session is Requesting (or already Streaming, when the
    /// channel was up). The scenario is copied; later registry edits do not
    /// reach this run.
    pub async fn dispatch(
        &self,
        session: SessionId,
        scenario: &ScenarioId,
        mode: DispatchMode,
    ) -> Result<SimulationSession> {
        let config = self
            .scenario(scenario)
            .ok_or_else(|| RegistryError::NotFound(scenario.clone()))?;

        let dispatched = self.sessions.transition(session, |s| s.dispatch(config.clone(), mode))?;
        info!(
            session = %session,
            generation = dispatched.generation(),
            scenario = %config.id,
            ?mode,
            "Simulation dispatched"
        );

        match mode {
            DispatchMode::Direct => self.spawn_provider_call(&dispatched, &config),
            DispatchMode::Streamed => {
                if self.transport.is_connected() {
                    self.start_stream(&dispatched).await;
                } else {
                    // Started from the Connected handler
                    self.transport.connect();
                }
            }
        }

        Ok(self.sessions.get(session).unwrap_or(dispatched))
    }

    /// Opens a session and dispatches `scenario` in the configured default mode.
    pub async fn run_scenario(&self, scenario: &ScenarioId) -> Result<SessionId> {
        let session = self.open_session();
        self.dispatch(session, scenario, self.config.default_mode).await?;
        Ok(session)
    }

    /// Cancels an in-flight session. Later events for it are discarded.
    pub async fn cancel(&self, session: SessionId) -> Result<SimulationSession> {
        let bound = self.sessions.get(session).map(|s| s.is_bound()).unwrap_or(false);
        let canceled = self.sessions.transition(session, |s| s.cancel())?;
        info!(session = %session, "Simulation canceled");
        if bound {
            self.release(canceled.stream_key()).await;
        }
        Ok(canceled)
    }

    pub fn reset(&self, session: SessionId) -> Result<SimulationSession> {
        self.sessions.transition(session, |s| s.reset())
    }

    /// Removes a session that is not in flight.
    pub fn discard(&self, session: SessionId) -> Result<SimulationSession> {
        self.sessions.discard(session)
    }

    pub fn session(&self, session: SessionId) -> Option<SimulationSession> {
        self.sessions.get(session)
    }

    pub fn sessions(&self) -> Vec<SimulationSession> {
        self.sessions.list()
    }

    /// Every session snapshot published from now on.
    pub fn observe(&self) -> broadcast::Receiver<SimulationSession> {
        self.sessions.observe()
    }

    // =========================================================================
    // COMPARISON & ANNOTATION
    // =========================================================================

    pub fn compare(&self, sessions: &[SessionId]) -> Result<ComparisonResult> {
        self.compare_with(sessions, &ComparisonOptions::default())
    }

    pub fn compare_with(&self, sessions: &[SessionId], options: &ComparisonOptions) -> Result<ComparisonResult> {
        Ok(compare::compare(&self.sessions, sessions, options)?)
    }

    /// Runs the scenarios through the provider's comparison endpoint.
    pub async fn compare_remote(&self, scenarios: &[ScenarioId]) -> Result<ComparisonResult> {
        let max = self.config.max_remote_scenarios;
        if scenarios.len() < 2 {
            return Err(CompareError::InsufficientScenarios(scenarios.len()).into());
        }
        if scenarios.len() > max {
            return Err(CompareError::TooManyScenarios {
                got: scenarios.len(),
                max,
            }
            .into());
        }

        let configs = scenarios
            .iter()
            .map(|id| self.scenario(id).ok_or_else(|| RegistryError::NotFound(id.clone())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let params: Vec<ScenarioParams> = configs.iter().map(|c| c.params.as_ref().clone()).collect();

        let results = self.provider.compare(&params).await?;
        if results.len() != configs.len() {
            return Err(CompareError::ResultCountMismatch {
                expected: configs.len(),
                got: results.len(),
            }
            .into());
        }

        let columns = configs
            .into_iter()
            .zip(results)
            .map(|(config, result)| ScenarioSeries {
                session_id: None,
                scenario_id: config.id,
                scenario_name: config.name,
                result: Arc::new(result),
            })
            .collect();
        Ok(ComparisonResult::build(columns, &ComparisonOptions::default()))
    }

    /// Places the session's shock events on one column of its result.
    pub fn annotations(&self, session: SessionId, field: SupplyField) -> Result<Vec<Annotation>> {
        let snapshot = self
            .sessions
            .get(session)
            .ok_or(RegistryError::SessionNotFound(session))?;
        let result = snapshot.result().ok_or(CompareError::NotReady(session))?;
        let events = snapshot.scenario().map(|s| s.shocks.events()).unwrap_or(&[]);
        Ok(annotate(&result.series(field), events))
    }

    /// Hands the surface to `exporter`. `None` picks the default filename.
    pub fn export_comparison(
        &self,
        exporter: &dyn ReportExporter,
        surface: &ComparisonResult,
        filename: Option<&str>,
    ) -> bool {
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| default_filename(self.ctx.system_time()));
        let ok = exporter.export(surface, &filename);
        if ok {
            info!(%filename, "Comparison exported");
        } else {
            warn!(%filename, "Comparison export failed");
        }
        ok
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    pub fn connect(&self) {
        self.transport.connect();
    }

    /// Closes the channel. Streamed sessions lose their binding and fail.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        let lost = TransportError::ConnectionLost("transport disconnected".to_string());
        for session in self.streamed_in_flight() {
            self.fail_session(session.stream_key(), SessionError::transport(&lost));
        }
    }

    /// Swaps the channel credential; the channel reconnects if it was up.
    pub async fn update_credential(&self, credential: Option<Credential>) {
        self.transport.update_credential(credential).await;
    }

    pub fn transport_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Waits for the next inbound event and applies it.
    pub async fn step(&self) {
        let next = self.inbound_rx.lock().await.recv().await;
        if let Some(inbound) = next {
            self.apply(inbound).await;
        }
    }

    /// Applies every event already queued. Returns how many were applied.
    pub async fn drain(&self) -> usize {
        let mut applied = 0;
        loop {
            let next = self.inbound_rx.lock().await.try_recv();
            match next {
                Ok(inbound) => {
                    self.apply(inbound).await;
                    applied += 1;
                }
                Err(_) => return applied,
            }
        }
    }

    /// Applies events until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        self.start();
        let mut rx = self.inbound_rx.lock().await;
        while self.is_running() {
            tokio::select! {
                _ = self.stop.notified() => break,
                next = rx.recv() => match next {
                    Some(inbound) => self.apply(inbound).await,
                    None => break,
                },
            }
        }
    }

    async fn apply(&self, inbound: Inbound) {
        match inbound {
            Inbound::Provider { key, outcome } => {
                let applied = match outcome {
                    Ok(result) => {
                        let result = Arc::new(result);
                        self.sessions.apply(key.session, |s| s.complete(key.generation, result))
                    }
                    Err(e) => {
                        warn!(session = %key.session, error = %e, "Provider call failed");
                        let error = SessionError::from(&e);
                        self.sessions.apply(key.session, |s| s.fail(key.generation, error))
                    }
                };
                log_outcome(key, "provider result", &applied);
            }
            Inbound::Transport(event) => self.apply_transport(event).await,
        }
    }

    async fn apply_transport(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                for session in self.streamed_in_flight() {
                    match session.status() {
                        SessionStatus::Streaming => {
                            let key = session.stream_key();
                            if let Err(e) = self.transport.subscribe(key).await {
                                warn!(session = %key.session, error = %e, "Re-subscribe failed");
                                let lost = TransportError::ConnectionLost(e.to_string());
                                self.fail_session(key, SessionError::transport(&lost));
                            }
                        }
                        _ => self.start_stream(&session).await,
                    }
                }
            }
            TransportEvent::Disconnected => {
                debug!(
                    streaming = self.sessions.with_status(SessionStatus::Streaming).len(),
                    "Channel down; streamed sessions wait for reconnect"
                );
            }
            TransportEvent::Exhausted { attempts } => {
                let exhausted = TransportError::ConnectionExhausted { attempts };
                for session in self.streamed_in_flight() {
                    self.fail_session(session.stream_key(), SessionError::transport(&exhausted));
                }
            }
            TransportEvent::Progress { key, percent } => {
                let outcome = self.sessions.apply(key.session, |s| s.apply_progress(key.generation, percent));
                log_outcome(key, "progress", &outcome);
            }
            TransportEvent::Update { key, result, progress } => {
                let outcome = self
                    .sessions
                    .apply(key.session, |s| s.apply_update(key.generation, result, progress));
                log_outcome(key, "update", &outcome);
                if let Outcome::Applied(s) = &outcome {
                    if s.status() == SessionStatus::Completed {
                        info!(session = %key.session, points = s.result().map_or(0, |r| r.len()), "Streamed simulation completed");
                        self.release(key).await;
                    }
                }
            }
            TransportEvent::StreamError { key, message } => {
                warn!(session = %key.session, %message, "Server reported a session error");
                if self.fail_session(key, SessionError::provider(message)) {
                    self.release(key).await;
                }
            }
            TransportEvent::DataUpdate { .. } => {
                // Fresh market data: ask for updated results
                for session in self.sessions.with_status(SessionStatus::Streaming) {
                    if let Err(e) = self.transport.subscribe(session.stream_key()).await {
                        debug!(session = %session.id(), error = %e, "Refresh after data_update failed");
                    }
                }
            }
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn spawn_provider_call(&self, session: &SimulationSession, config: &ScenarioConfig) {
        let key = session.stream_key();
        let provider = self.provider.clone();
        let tx = self.inbound_tx.clone();
        let params = config.params.clone();
        let shocks: Vec<ShockEvent> = config.shocks.events().to_vec();

        self.ctx.spawn("provider", async move {
            let outcome = provider.simulate(&params, &shocks).await;
            let _ = tx.send(Inbound::Provider { key, outcome });
        });
    }

    /// Sends `start_simulation` + `subscribe` for a Requesting streamed session.
    async fn start_stream(&self, session: &SimulationSession) {
        let key = session.stream_key();
        let Some(config) = session.scenario() else {
            return;
        };

        let sent = match self
            .transport
            .start_simulation(key, &config.params, config.shocks.events())
            .await
        {
            Ok(()) => self.transport.subscribe(key).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                let outcome = self.sessions.apply(key.session, |s| s.acknowledge(key.generation));
                if let Outcome::Ignored(_) = outcome {
                    // Canceled while the start was on the wire
                    self.release(key).await;
                }
                log_outcome(key, "acknowledge", &outcome);
            }
            Err(TransportError::NotConnected) => {
                debug!(session = %key.session, "Channel not up; start deferred");
                self.transport.forget(key);
                self.transport.connect();
            }
            Err(e) => {
                warn!(session = %key.session, error = %e, "Start failed");
                self.transport.forget(key);
                let lost = TransportError::ConnectionLost(e.to_string());
                self.fail_session(key, SessionError::transport(&lost));
            }
        }
    }

    /// Streamed sessions that are Requesting or Streaming.
    fn streamed_in_flight(&self) -> Vec<SimulationSession> {
        self.sessions
            .list()
            .into_iter()
            .filter(|s| s.mode() == DispatchMode::Streamed && s.status().is_in_flight())
            .collect()
    }

    /// Returns true when the session actually moved to Failed.
    fn fail_session(&self, key: StreamKey, error: SessionError) -> bool {
        let outcome = self.sessions.apply(key.session, |s| s.fail(key.generation, error));
        log_outcome(key, "failure", &outcome);
        matches!(outcome, Outcome::Applied(_))
    }

    async fn release(&self, key: StreamKey) {
        if let Err(e) = self.transport.unsubscribe(key).await {
            debug!(session = %key.session, error = %e, "Unsubscribe not delivered");
        }
    }
}

fn log_outcome(key: StreamKey, event: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Applied(s) => debug!(key = %key, event, status = %s.status(), progress = s.progress(), "Applied"),
        Outcome::Ignored(IgnoreReason::Regressed) => {
            warn!(key = %key, event, "Progress went backwards; ignored")
        }
        Outcome::Ignored(reason) => debug!(key = %key, event, ?reason, "Ignored"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, SessionErrorKind};
    use crate::model::{SummaryMetrics, TokenPoint};
    use crate::shock::{EventType, TimeUnit};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokensim_env::{ChannelConnection, ChannelFrame, ConnectionId, EnvError};

    /// Linear supply growth, one point per step.
    struct StubProvider {
        fail: bool,
    }

    #[async_trait]
    impl SimulationProvider for StubProvider {
        async fn simulate(
            &self,
            params: &ScenarioParams,
            _shock_events: &[ShockEvent],
        ) -> std::result::Result<SimulationResult, ProviderError> {
            if self.fail {
                return Err(ProviderError::remote("duration must be <= 360"));
            }
            let evolution = (0..=params.duration)
                .map(|time| TokenPoint {
                    time,
                    total_supply: params.initial_supply + f64::from(time),
                    ..Default::default()
                })
                .collect();
            let metrics = SummaryMetrics {
                final_supply: params.initial_supply + f64::from(params.duration),
                ..Default::default()
            };
            SimulationResult::new(evolution, metrics)
        }

        async fn compare(
            &self,
            scenarios: &[ScenarioParams],
        ) -> std::result::Result<Vec<SimulationResult>, ProviderError> {
            let mut out = Vec::with_capacity(scenarios.len());
            for params in scenarios {
                out.push(self.simulate(params, &[]).await?);
            }
            Ok(out)
        }
    }

    struct Offline;
    struct NeverOpened;

    #[async_trait]
    impl ChannelConnector for Offline {
        type Connection = NeverOpened;

        async fn connect(&self, _credential: Option<&Credential>) -> std::result::Result<NeverOpened, EnvError> {
            Err(EnvError::connect("offline"))
        }
    }

    #[async_trait]
    impl ChannelConnection for NeverOpened {
        fn id(&self) -> ConnectionId {
            ConnectionId::from_seed(0)
        }
        async fn send(&self, _frame: ChannelFrame) -> std::result::Result<(), EnvError> {
            Err(EnvError::ChannelClosed)
        }
        async fn recv(&self) -> Option<ChannelFrame> {
            None
        }
        async fn close(&self) {}
    }

    struct CountingExporter {
        succeed: bool,
        calls: AtomicUsize,
    }

    impl ReportExporter for CountingExporter {
        fn export(&self, _surface: &ComparisonResult, _filename: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    fn orchestrator(fail: bool) -> Orchestrator<TokioContext, Offline, StubProvider> {
        Orchestrator::new(
            TokioContext::shared(),
            Arc::new(Offline),
            Arc::new(StubProvider { fail }),
            OrchestratorConfig::default(),
        )
        .with_scenarios(ScenarioRegistry::with_defaults())
    }

    fn scenario_a() -> ScenarioId {
        ScenarioId::new("scenario-a")
    }

    fn scenario_b() -> ScenarioId {
        ScenarioId::new("scenario-b")
    }

    #[tokio::test]
    async fn test_direct_dispatch_completes_scenario_a() {
        let orch = orchestrator(false);
        orch.start();

        let id = orch.run_scenario(&scenario_a()).await.unwrap();
        assert_eq!(orch.session(id).unwrap().status(), SessionStatus::Requesting);

        orch.step().await;
        let session = orch.session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.progress(), 100);
        assert_eq!(session.result().unwrap().len(), 13);
        assert_eq!(session.result().unwrap().metrics.final_supply, 1_000_012.0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_attached_verbatim() {
        let orch = orchestrator(true);
        let id = orch.run_scenario(&scenario_a()).await.unwrap();
        orch.step().await;

        let session = orch.session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        let error = session.error().unwrap();
        assert_eq!(error.kind, SessionErrorKind::Provider);
        assert_eq!(error.message, "duration must be <= 360");
    }

    #[tokio::test]
    async fn test_unknown_scenario_leaves_session_idle() {
        let orch = orchestrator(false);
        let id = orch.open_session();
        let err = orch
            .dispatch(id, &ScenarioId::new("missing"), DispatchMode::Direct)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::NotFound(_))));
        assert_eq!(orch.session(id).unwrap().status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_cancel_discards_late_provider_result() {
        let orch = orchestrator(false);
        let id = orch.run_scenario(&scenario_a()).await.unwrap();
        orch.cancel(id).await.unwrap();

        orch.step().await;
        let session = orch.session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Canceled);
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn test_registry_edit_does_not_reach_in_flight_session() {
        let orch = orchestrator(false);
        let id = orch.run_scenario(&scenario_a()).await.unwrap();
        orch.update_scenario(&scenario_a(), ScenarioParams::monthly(5.0, 3)).unwrap();

        orch.step().await;
        let session = orch.session(id).unwrap();
        assert_eq!(session.scenario().unwrap().params.duration, 12);
        assert_eq!(session.result().unwrap().len(), 13);
    }

    #[tokio::test]
    async fn test_compare_and_annotate() {
        let orch = orchestrator(false);
        orch.add_shock(&scenario_a(), ShockEvent::new(6, TimeUnit::Months, EventType::MassBurn, -0.3))
            .unwrap();

        let a = orch.run_scenario(&scenario_a()).await.unwrap();
        let b = orch.run_scenario(&scenario_b()).await.unwrap();
        orch.step().await;
        orch.step().await;

        let view = orch.compare(&[a, b]).unwrap();
        assert_eq!(view.metrics.columns, vec!["Scenario A", "Scenario B"]);

        let annotations = orch.annotations(a, SupplyField::TotalSupply).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].x, 6);
        assert_eq!(annotations[0].y, 1_000_006.0);
        assert_eq!(annotations[0].label, "Mass Burn: -30.0%");

        assert!(orch.annotations(b, SupplyField::TotalSupply).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_remote_bounds() {
        let orch = orchestrator(false);
        let err = orch.compare_remote(&[scenario_a()]).await.unwrap_err();
        assert_eq!(err, Error::Compare(CompareError::InsufficientScenarios(1)));

        let six: Vec<ScenarioId> = (0..6).map(|_| scenario_a()).collect();
        let err = orch.compare_remote(&six).await.unwrap_err();
        assert_eq!(err, Error::Compare(CompareError::TooManyScenarios { got: 6, max: 5 }));

        let view = orch.compare_remote(&[scenario_b(), scenario_a()]).await.unwrap();
        assert_eq!(view.metrics.columns, vec!["Scenario B", "Scenario A"]);
        assert!(view.scenarios.iter().all(|s| s.session_id.is_none()));
    }

    #[tokio::test]
    async fn test_export_failure_leaves_sessions_alone() {
        let orch = orchestrator(false);
        let a = orch.run_scenario(&scenario_a()).await.unwrap();
        let b = orch.run_scenario(&scenario_b()).await.unwrap();
        orch.step().await;
        orch.step().await;
        let view = orch.compare(&[a, b]).unwrap();
        let before = orch.sessions();

        let failing = CountingExporter {
            succeed: false,
            calls: AtomicUsize::new(0),
        };
        assert!(!orch.export_comparison(&failing, &view, None));
        assert_eq!(orch.sessions(), before);

        let working = CountingExporter {
            succeed: true,
            calls: AtomicUsize::new(0),
        };
        assert!(orch.export_comparison(&working, &view, Some("report.json")));
        assert_eq!(working.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_fails_pending_streamed_session_once() {
        let orch = orchestrator(false);
        let mut updates = orch.observe();

        let id = orch.open_session();
        orch.dispatch(id, &scenario_a(), DispatchMode::Streamed).await.unwrap();
        assert_eq!(orch.session(id).unwrap().status(), SessionStatus::Requesting);

        while orch.session(id).unwrap().status() == SessionStatus::Requesting {
            orch.step().await;
        }

        let session = orch.session(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert_eq!(session.error().unwrap().kind, SessionErrorKind::ConnectionExhausted);

        let mut failed = 0;
        while let Ok(snapshot) = updates.try_recv() {
            if snapshot.status() == SessionStatus::Failed {
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
        assert_eq!(orch.transport_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let orch = orchestrator(false);
        orch.start();
        let id = orch.run_scenario(&scenario_a()).await.unwrap();
        orch.shutdown().await;

        assert!(!orch.is_running());
        assert_eq!(orch.session(id).unwrap().status(), SessionStatus::Canceled);
    }
}
