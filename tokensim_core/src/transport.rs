//! Transport Client: the one long-lived channel shared by streamed sessions.
//!
//! # Connection lifecycle
//!
//! ```text
//!              connect()                  connector ok
//! Disconnected ─────────► Connecting ───────────────────► Connected
//!      ▲                    │   ▲                            │
//!      │ exhausted          │   │ backoff (1s, 2s, 4s, 5s..) │ channel dropped
//!      └────────────────────┘   └────────────────────────────┘
//! ```
//!
//! While the caller wants the channel up, a dedicated task reconnects with
//! bounded exponential backoff. After `max_attempts` consecutive failures it
//! publishes [`TransportEvent::Exhausted`] and stops.
//!
//! # Routing
//!
//! Session events are forwarded only for [`StreamKey`]s the caller has
//! subscribed to on the current connection. Subscriptions are dropped with
//! the connection; the owner re-subscribes on [`TransportEvent::Connected`].

use crate::config::ReconnectPolicy;
use crate::error::TransportError;
use crate::model::{ScenarioParams, SimulationResult};
use crate::shock::ShockEvent;
use crate::types::{SessionId, StreamKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokensim_env::{ChannelConnection, ChannelConnector, ChannelFrame, Credential, TokenSimContext};
use tracing::{debug, error, info, warn};

// =============================================================================
// WIRE EVENTS
// =============================================================================

pub const START_SIMULATION: &str = "start_simulation";
pub const SUBSCRIBE_SIMULATION: &str = "subscribe_simulation";
pub const UNSUBSCRIBE_SIMULATION: &str = "unsubscribe_simulation";
pub const SIMULATION_PROGRESS: &str = "simulation_progress";
pub const SIMULATION_UPDATE: &str = "simulation_update";
pub const ERROR: &str = "error";
pub const DATA_UPDATE: &str = "data_update";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload<'a> {
    #[serde(flatten)]
    key: StreamKey,
    params: &'a ScenarioParams,
    shock_events: &'a [ShockEvent],
}

#[derive(Deserialize)]
struct ProgressPayload {
    #[serde(flatten)]
    key: StreamKey,
    progress: f64,
}

#[derive(Deserialize)]
struct UpdatePayload {
    #[serde(flatten)]
    key: StreamKey,
    result: SimulationResult,
    #[serde(default)]
    progress: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "sessionId", default)]
    session: Option<SessionId>,
    #[serde(default)]
    generation: Option<u64>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct DataUpdatePayload {
    #[serde(default)]
    timestamp: serde_json::Value,
    #[serde(default)]
    prices: serde_json::Value,
}

fn percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

/// Something the transport wants its owner to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// The channel went away. Reconnection follows unless the caller
    /// disconnected on purpose.
    Disconnected,
    /// Reconnection gave up
    Exhausted { attempts: u32 },
    Progress { key: StreamKey, percent: u8 },
    Update {
        key: StreamKey,
        result: Arc<SimulationResult>,
        progress: Option<u8>,
    },
    /// The server failed one session, or sent a result that does not hold up
    StreamError { key: StreamKey, message: String },
    /// Connection-scoped market data tick
    DataUpdate {
        timestamp: serde_json::Value,
        prices: serde_json::Value,
    },
}

/// Receives every [`TransportEvent`]; called from the transport task.
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// =============================================================================
// BACKOFF
// =============================================================================

/// Exponential delay sequence for reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let base = self.policy.initial_delay.as_millis() as f64;
        let grown = base * self.policy.multiplier.powi(self.attempt as i32);
        let capped = grown.min(self.policy.max_delay.as_millis() as f64);
        self.attempt += 1;
        Some(Duration::from_millis(capped as u64))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

struct State<Conn> {
    status: ConnectionStatus,
    /// The caller wants the channel up
    desired: bool,
    /// Bumped on every connect/disconnect; a loop with an old epoch exits
    epoch: u64,
    connection: Option<Arc<Conn>>,
    credential: Option<Credential>,
    subscriptions: HashSet<StreamKey>,
}

struct Shared<Ctx, C: ChannelConnector> {
    ctx: Arc<Ctx>,
    connector: Arc<C>,
    policy: ReconnectPolicy,
    state: Mutex<State<C::Connection>>,
    sink: EventSink,
}

/// Client side of the streamed channel.
pub struct TransportClient<Ctx, C: ChannelConnector> {
    shared: Arc<Shared<Ctx, C>>,
}

impl<Ctx, C> TransportClient<Ctx, C>
where
    Ctx: TokenSimContext,
    C: ChannelConnector,
{
    pub fn new(
        ctx: Arc<Ctx>,
        connector: Arc<C>,
        policy: ReconnectPolicy,
        credential: Option<Credential>,
        sink: EventSink,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                connector,
                policy,
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    desired: false,
                    epoch: 0,
                    connection: None,
                    credential,
                    subscriptions: HashSet::new(),
                }),
                sink,
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn is_subscribed(&self, key: &StreamKey) -> bool {
        self.shared.state.lock().subscriptions.contains(key)
    }

    pub fn subscriptions(&self) -> Vec<StreamKey> {
        self.shared.state.lock().subscriptions.iter().copied().collect()
    }

    /// Brings the channel up in the background. No-op if already wanted.
    pub fn connect(&self) {
        let epoch = {
            let mut state = self.shared.state.lock();
            if state.desired {
                return;
            }
            state.desired = true;
            state.epoch += 1;
            state.status = ConnectionStatus::Connecting;
            state.epoch
        };
        debug!(epoch, "Transport connect requested");
        let shared = self.shared.clone();
        self.shared.ctx.spawn("transport", async move {
            shared.run(epoch).await;
        });
    }

    /// Tears the channel down and drops every subscription.
    pub async fn disconnect(&self) {
        let (connection, was_up) = {
            let mut state = self.shared.state.lock();
            let was_up = state.desired || state.status != ConnectionStatus::Disconnected;
            state.desired = false;
            state.epoch += 1;
            state.status = ConnectionStatus::Disconnected;
            state.subscriptions.clear();
            (state.connection.take(), was_up)
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
        if was_up {
            info!("Transport disconnected");
            (self.shared.sink)(TransportEvent::Disconnected);
        }
    }

    /// Replaces the credential. A wanted channel is cycled so the new one
    /// takes effect.
    pub async fn update_credential(&self, credential: Option<Credential>) {
        let reconnect = {
            let mut state = self.shared.state.lock();
            state.credential = credential;
            state.desired
        };
        if reconnect {
            info!("Credential changed; cycling transport");
            self.disconnect().await;
            self.connect();
        }
    }

    /// Sends one frame. No buffering: fails unless Connected.
    pub async fn send(&self, frame: ChannelFrame) -> Result<(), TransportError> {
        let connection = {
            let state = self.shared.state.lock();
            match (&state.status, &state.connection) {
                (ConnectionStatus::Connected, Some(connection)) => connection.clone(),
                _ => return Err(TransportError::NotConnected),
            }
        };
        connection
            .send(frame)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    /// Asks the server to run a simulation for `key`.
    pub async fn start_simulation(
        &self,
        key: StreamKey,
        params: &ScenarioParams,
        shock_events: &[ShockEvent],
    ) -> Result<(), TransportError> {
        let payload = StartPayload {
            key,
            params,
            shock_events,
        };
        let frame = ChannelFrame::encode(START_SIMULATION, &payload)
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        // The server may answer before the send returns
        self.send_watching(key, frame).await
    }

    /// Registers interest in `key` and tells the server.
    pub async fn subscribe(&self, key: StreamKey) -> Result<(), TransportError> {
        let frame = ChannelFrame::encode(SUBSCRIBE_SIMULATION, &key)
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        self.send_watching(key, frame).await?;
        debug!(key = %key, "Subscribed");
        Ok(())
    }

    /// Stops routing events for `key` without telling the server.
    pub fn forget(&self, key: StreamKey) {
        self.shared.state.lock().subscriptions.remove(&key);
    }

    /// Routes `key` from before `frame` goes out. A failed send takes back
    /// only the registration it made.
    async fn send_watching(&self, key: StreamKey, frame: ChannelFrame) -> Result<(), TransportError> {
        let inserted = self.shared.state.lock().subscriptions.insert(key);
        let sent = self.send(frame).await;
        if sent.is_err() && inserted {
            self.forget(key);
        }
        sent
    }

    /// Drops interest in `key`. Events for it are discarded from now on
    /// even if telling the server fails.
    pub async fn unsubscribe(&self, key: StreamKey) -> Result<(), TransportError> {
        let was_subscribed = self.shared.state.lock().subscriptions.remove(&key);
        if !was_subscribed {
            return Ok(());
        }
        let frame = ChannelFrame::encode(UNSUBSCRIBE_SIMULATION, &key)
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        self.send(frame).await
    }
}

impl<Ctx, C> Shared<Ctx, C>
where
    Ctx: TokenSimContext,
    C: ChannelConnector,
{
    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.epoch == epoch && state.desired
    }

    fn emit(&self, event: TransportEvent) {
        (self.sink)(event);
    }

    /// Connect/pump/reconnect loop for one epoch.
    async fn run(self: Arc<Self>, epoch: u64) {
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            if !self.is_current(epoch) {
                return;
            }

            let credential = self.state.lock().credential.clone();
            match self.connector.connect(credential.as_ref()).await {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    let accepted = {
                        let mut state = self.state.lock();
                        if state.epoch == epoch && state.desired {
                            state.status = ConnectionStatus::Connected;
                            state.connection = Some(connection.clone());
                            state.subscriptions.clear();
                            true
                        } else {
                            false
                        }
                    };
                    if !accepted {
                        connection.close().await;
                        return;
                    }

                    backoff.reset();
                    info!(connection = %connection.id(), "Transport connected");
                    self.emit(TransportEvent::Connected);

                    while let Some(frame) = connection.recv().await {
                        if !self.is_current(epoch) {
                            return;
                        }
                        self.route(frame);
                    }

                    let reconnect = {
                        let mut state = self.state.lock();
                        if state.epoch != epoch {
                            // disconnect() already cleaned up
                            return;
                        }
                        state.connection = None;
                        state.subscriptions.clear();
                        state.status = ConnectionStatus::Connecting;
                        state.desired
                    };
                    warn!(connection = %connection.id(), "Transport channel dropped");
                    self.emit(TransportEvent::Disconnected);
                    if !reconnect {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = backoff.attempt(), "Transport connect attempt failed");
                }
            }

            match backoff.next_delay() {
                Some(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempt(), "Reconnecting");
                    self.ctx.sleep(delay).await;
                }
                None => {
                    let attempts = backoff.attempt();
                    {
                        let mut state = self.state.lock();
                        if state.epoch != epoch {
                            return;
                        }
                        state.desired = false;
                        state.status = ConnectionStatus::Disconnected;
                        state.subscriptions.clear();
                    }
                    error!(attempts, "Transport reconnection exhausted");
                    self.emit(TransportEvent::Exhausted { attempts });
                    return;
                }
            }
        }
    }

    fn subscribed(&self, key: &StreamKey) -> bool {
        self.state.lock().subscriptions.contains(key)
    }

    fn route(&self, frame: ChannelFrame) {
        match frame.event.as_str() {
            SIMULATION_PROGRESS => match frame.decode::<ProgressPayload>() {
                Ok(p) if self.subscribed(&p.key) => self.emit(TransportEvent::Progress {
                    key: p.key,
                    percent: percent(p.progress),
                }),
                Ok(p) => debug!(key = %p.key, "Progress for unsubscribed stream dropped"),
                Err(e) => warn!(error = %e, "Undecodable simulation_progress frame"),
            },
            SIMULATION_UPDATE => match frame.decode::<UpdatePayload>() {
                Ok(u) if self.subscribed(&u.key) => match u.result.validate() {
                    Ok(()) => self.emit(TransportEvent::Update {
                        key: u.key,
                        result: Arc::new(u.result),
                        progress: u.progress.map(percent),
                    }),
                    Err(e) => self.emit(TransportEvent::StreamError {
                        key: u.key,
                        message: e.to_string(),
                    }),
                },
                Ok(u) => debug!(key = %u.key, "Update for unsubscribed stream dropped"),
                Err(e) => warn!(error = %e, "Undecodable simulation_update frame"),
            },
            ERROR => match frame.decode::<ErrorPayload>() {
                Ok(ErrorPayload {
                    session: Some(session),
                    generation: Some(generation),
                    message,
                }) => {
                    let key = StreamKey::new(session, generation);
                    if self.subscribed(&key) {
                        self.emit(TransportEvent::StreamError { key, message });
                    } else {
                        debug!(key = %key, "Error for unsubscribed stream dropped");
                    }
                }
                Ok(e) => warn!(message = %e.message, "Server error without a session"),
                Err(e) => warn!(error = %e, "Undecodable error frame"),
            },
            DATA_UPDATE => match frame.decode::<DataUpdatePayload>() {
                Ok(d) => self.emit(TransportEvent::DataUpdate {
                    timestamp: d.timestamp,
                    prices: d.prices,
                }),
                Err(e) => warn!(error = %e, "Undecodable data_update frame"),
            },
            other => debug!(event = other, "Unhandled channel event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SummaryMetrics, TokenPoint};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokensim_env::{ConnectionId, EnvError, TokioContext};
    use tokio::sync::mpsc;

    type Outbox = Arc<Mutex<Option<mpsc::UnboundedSender<ChannelFrame>>>>;

    #[derive(Default)]
    struct MockConnector {
        refuse: AtomicBool,
        attempts: AtomicU32,
        server: Outbox,
        sent: Arc<Mutex<Vec<ChannelFrame>>>,
        /// Answer queued while a `start_simulation` write is in progress
        reply_on_start: Arc<Mutex<Option<ChannelFrame>>>,
    }

    struct MockConnection {
        inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelFrame>>,
        server: Outbox,
        sent: Arc<Mutex<Vec<ChannelFrame>>>,
        reply_on_start: Arc<Mutex<Option<ChannelFrame>>>,
    }

    #[async_trait]
    impl ChannelConnector for MockConnector {
        type Connection = MockConnection;

        async fn connect(&self, _credential: Option<&Credential>) -> Result<MockConnection, EnvError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(EnvError::connect("refused"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.server.lock() = Some(tx);
            Ok(MockConnection {
                inbound: tokio::sync::Mutex::new(rx),
                server: self.server.clone(),
                sent: self.sent.clone(),
                reply_on_start: self.reply_on_start.clone(),
            })
        }
    }

    #[async_trait]
    impl ChannelConnection for MockConnection {
        fn id(&self) -> ConnectionId {
            ConnectionId::from_seed(0)
        }

        async fn send(&self, frame: ChannelFrame) -> Result<(), EnvError> {
            let is_start = frame.event == START_SIMULATION;
            self.sent.lock().push(frame);
            if is_start {
                let reply = self.reply_on_start.lock().take();
                if let Some(reply) = reply {
                    if let Some(tx) = self.server.lock().as_ref() {
                        let _ = tx.send(reply);
                    }
                }
                // A socket write gives the reader a turn
                tokio::task::yield_now().await;
            }
            Ok(())
        }

        async fn recv(&self) -> Option<ChannelFrame> {
            self.inbound.lock().await.recv().await
        }

        async fn close(&self) {
            self.server.lock().take();
        }
    }

    impl MockConnector {
        fn push(&self, frame: ChannelFrame) {
            if let Some(tx) = self.server.lock().as_ref() {
                let _ = tx.send(frame);
            }
        }

        fn drop_connection(&self) {
            self.server.lock().take();
        }
    }

    fn client(
        connector: Arc<MockConnector>,
    ) -> (TransportClient<TokioContext, MockConnector>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let client = TransportClient::new(
            TokioContext::shared(),
            connector,
            ReconnectPolicy::default(),
            None,
            sink,
        );
        (client, rx)
    }

    fn key(n: u64) -> StreamKey {
        StreamKey::new(SessionId::from_seed(n), 1)
    }

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(percent(42.4), 42);
        assert_eq!(percent(150.0), 100);
        assert_eq!(percent(-3.0), 0);
        assert_eq!(percent(f64::NAN), 0);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (client, _rx) = client(Arc::new(MockConnector::default()));
        let err = client.send(ChannelFrame::new("ping", json!({}))).await.unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(client.subscribe(key(1)).await.unwrap_err(), TransportError::NotConnected);
        assert!(!client.is_subscribed(&key(1)));
    }

    #[tokio::test]
    async fn test_routes_only_subscribed_keys() {
        let connector = Arc::new(MockConnector::default());
        let (client, mut rx) = client(connector.clone());

        client.connect();
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        client.subscribe(key(1)).await.unwrap();
        connector.push(ChannelFrame::new(
            SIMULATION_PROGRESS,
            json!({"sessionId": SessionId::from_seed(2), "generation": 1, "progress": 30}),
        ));
        connector.push(ChannelFrame::new(
            SIMULATION_PROGRESS,
            json!({"sessionId": SessionId::from_seed(1), "generation": 1, "progress": 40}),
        ));

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Progress { key: key(1), percent: 40 })
        );

        let sent = connector.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, SUBSCRIBE_SIMULATION);
        assert_eq!(sent[0].data["generation"], 1);
    }

    #[tokio::test]
    async fn test_answer_during_start_is_not_lost() {
        let connector = Arc::new(MockConnector::default());
        let result = SimulationResult::new(
            vec![TokenPoint { time: 0, ..Default::default() }, TokenPoint { time: 1, ..Default::default() }],
            SummaryMetrics::default(),
        )
        .unwrap();
        *connector.reply_on_start.lock() = Some(ChannelFrame::new(
            SIMULATION_UPDATE,
            json!({"sessionId": SessionId::from_seed(1), "generation": 1, "result": result, "progress": 100}),
        ));
        let (client, mut rx) = client(connector.clone());
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));

        let params = ScenarioParams::monthly(1_000.0, 1);
        client.start_simulation(key(1), &params, &[]).await.unwrap();
        client.subscribe(key(1)).await.unwrap();

        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(TransportEvent::Update { key: k, result, progress })) => {
                assert_eq!(k, key(1));
                assert_eq!(progress, Some(100));
                assert_eq!(result.len(), 2);
            }
            other => panic!("final update lost: {:?}", other),
        }
        assert!(client.is_subscribed(&key(1)));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_subscription() {
        let (client, _rx) = client(Arc::new(MockConnector::default()));
        let params = ScenarioParams::monthly(1_000.0, 1);

        assert_eq!(
            client.start_simulation(key(4), &params, &[]).await,
            Err(TransportError::NotConnected)
        );
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_update_with_malformed_result_becomes_stream_error() {
        let connector = Arc::new(MockConnector::default());
        let (client, mut rx) = client(connector.clone());
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        client.subscribe(key(1)).await.unwrap();

        let bad = SimulationResult {
            evolution: vec![
                TokenPoint { time: 2, ..Default::default() },
                TokenPoint { time: 1, ..Default::default() },
            ],
            metrics: SummaryMetrics::default(),
        };
        connector.push(ChannelFrame::new(
            SIMULATION_UPDATE,
            json!({"sessionId": SessionId::from_seed(1), "generation": 1, "result": bad}),
        ));

        match rx.recv().await {
            Some(TransportEvent::StreamError { key: k, message }) => {
                assert_eq!(k, key(1));
                assert!(message.contains("strictly increasing"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_clears_subscriptions_and_reconnects() {
        let connector = Arc::new(MockConnector::default());
        let (client, mut rx) = client(connector.clone());
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        client.subscribe(key(1)).await.unwrap();

        connector.drop_connection();
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert!(client.subscriptions().is_empty());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_five_attempts() {
        let connector = Arc::new(MockConnector::default());
        connector.refuse.store(true, Ordering::SeqCst);
        let (client, mut rx) = client(connector.clone());

        let started = tokio::time::Instant::now();
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Exhausted { attempts: 5 }));

        // first attempt plus five retries
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 6);
        assert!(started.elapsed() >= Duration::from_millis(17_000));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_clean() {
        let connector = Arc::new(MockConnector::default());
        let (client, mut rx) = client(connector.clone());
        client.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        client.subscribe(key(3)).await.unwrap();

        client.disconnect().await;
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.subscriptions().is_empty());
        assert_eq!(
            client.send(ChannelFrame::new("ping", json!({}))).await,
            Err(TransportError::NotConnected)
        );
    }
}
