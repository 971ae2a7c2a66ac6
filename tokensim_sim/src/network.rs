//! Simulated streaming channel with fault injection.
//!
//! ```text
//!  TransportClient ──send──► SimConnection ──► Net ──► server jobs
//!        ▲                                     │          │
//!        └──────── recv ◄── inbound queue ◄────┴──────────┘
//!                             (push / step_server)
//! ```
//!
//! The simulated server never answers on its own: a `start_simulation`
//! frame only queues the frames of that job, and each
//! [`SimChannelController::step_server`] call releases the next frame of
//! every subscribed job. The harness decides when anything arrives, which
//! keeps every run reproducible from its seed.

use crate::context::SimContext;
use crate::engine;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokensim_core::transport::{
    DATA_UPDATE, ERROR, SIMULATION_PROGRESS, SIMULATION_UPDATE, START_SIMULATION, SUBSCRIBE_SIMULATION,
    UNSUBSCRIBE_SIMULATION,
};
use tokensim_core::{ScenarioParams, ShockEvent, SimulationResult, StreamKey, SummaryMetrics};
use tokensim_env::{ChannelConnection, ChannelConnector, ChannelFrame, ConnectionId, Credential, EnvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// =============================================================================
// SERVER FRAMES
// =============================================================================

/// `simulation_progress` for `key`.
pub fn progress_frame(key: StreamKey, progress: f64) -> ChannelFrame {
    ChannelFrame::new(
        SIMULATION_PROGRESS,
        json!({"sessionId": key.session, "generation": key.generation, "progress": progress}),
    )
}

/// `simulation_update` carrying a whole (possibly partial) result.
pub fn update_frame(key: StreamKey, result: &SimulationResult, progress: Option<f64>) -> ChannelFrame {
    let mut data = json!({"sessionId": key.session, "generation": key.generation, "result": result});
    if let Some(progress) = progress {
        data["progress"] = json!(progress);
    }
    ChannelFrame::new(SIMULATION_UPDATE, data)
}

/// Session-scoped `error`.
pub fn error_frame(key: StreamKey, message: &str) -> ChannelFrame {
    ChannelFrame::new(
        ERROR,
        json!({"sessionId": key.session, "generation": key.generation, "message": message}),
    )
}

/// Connection-scoped `data_update`.
pub fn data_update_frame(timestamp: Value, prices: Value) -> ChannelFrame {
    ChannelFrame::new(DATA_UPDATE, json!({"timestamp": timestamp, "prices": prices}))
}

/// The first `len` points of `result`, summarized at its last point.
fn partial(result: &SimulationResult, len: usize) -> Option<SimulationResult> {
    let points = result.points().get(..len)?.to_vec();
    let last = *points.last()?;
    let metrics = SummaryMetrics {
        final_supply: last.total_supply,
        total_burned: last.burned_supply,
        total_staked: last.staked_supply,
        total_vested: last.vested_supply,
    };
    SimulationResult::new(points, metrics).ok()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    #[serde(flatten)]
    key: StreamKey,
    params: ScenarioParams,
    #[serde(default)]
    shock_events: Vec<ShockEvent>,
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// Queued server output for one started simulation.
struct Job {
    key: StreamKey,
    frames: VecDeque<ChannelFrame>,
    subscribed: bool,
}

struct Live {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ChannelFrame>,
}

struct Net {
    ctx: Arc<SimContext>,
    next_connection: u64,
    /// The one open connection; dropping its sender ends the client's recv
    live: Option<Live>,

    // Faults
    refuse_next: u32,
    refuse_all: bool,
    fail_sends: bool,
    required_token: Option<String>,
    stream_failures: VecDeque<String>,

    // Server
    jobs: Vec<Job>,

    // Counters
    connect_attempts: u64,
    tokens_seen: Vec<Option<String>>,
    sent: Vec<ChannelFrame>,
    delivered: u64,
    drops: u64,
}

impl Net {
    /// Subscriptions are per connection on the server too.
    fn end_connection(&mut self) {
        self.live = None;
        for job in &mut self.jobs {
            job.subscribed = false;
        }
    }

    fn deliver(&mut self, frame: ChannelFrame) -> bool {
        match &self.live {
            Some(live) if live.tx.send(frame).is_ok() => {
                self.delivered += 1;
                true
            }
            _ => false,
        }
    }

    /// Server-side handling of one client frame.
    fn handle(&mut self, frame: &ChannelFrame) {
        match frame.event.as_str() {
            START_SIMULATION => match frame.decode::<StartRequest>() {
                Ok(start) => {
                    let frames = self.plan(&start);
                    self.jobs.retain(|j| j.key != start.key);
                    debug!(key = %start.key, frames = frames.len(), "Server accepted simulation");
                    self.jobs.push(Job {
                        key: start.key,
                        frames,
                        subscribed: false,
                    });
                }
                Err(e) => warn!(error = %e, "Server could not decode start_simulation"),
            },
            SUBSCRIBE_SIMULATION | UNSUBSCRIBE_SIMULATION => match frame.decode::<StreamKey>() {
                Ok(key) => {
                    let subscribe = frame.event == SUBSCRIBE_SIMULATION;
                    if let Some(job) = self.jobs.iter_mut().find(|j| j.key == key) {
                        job.subscribed = subscribe;
                    }
                }
                Err(e) => warn!(error = %e, event = %frame.event, "Server could not decode stream key"),
            },
            other => debug!(event = other, "Server ignored client event"),
        }
    }

    /// Frames the server will stream for `start`, in order.
    fn plan(&mut self, start: &StartRequest) -> VecDeque<ChannelFrame> {
        let key = start.key;
        if let Some(message) = self.stream_failures.pop_front() {
            return VecDeque::from([error_frame(key, &message)]);
        }

        let result = match engine::simulate(&start.params, &start.shock_events) {
            Ok(result) => result,
            Err(e) => return VecDeque::from([error_frame(key, &e.to_string())]),
        };

        let checkpoints = self.ctx.gen_range(1..4);
        let mut frames = VecDeque::new();
        for i in 1..=checkpoints {
            let progress = (100 * i / (checkpoints + 1)) as f64;
            frames.push_back(progress_frame(key, progress));
            if i == 1 {
                let len = (result.len() * i as usize / (checkpoints as usize + 1)).max(1);
                if let Some(head) = partial(&result, len) {
                    frames.push_back(update_frame(key, &head, Some(progress)));
                }
            }
        }
        frames.push_back(update_frame(key, &result, Some(100.0)));
        frames
    }
}

// =============================================================================
// CONNECTOR / CONNECTION
// =============================================================================

/// Opens in-memory connections to the simulated server.
pub struct SimConnector {
    net: Arc<Mutex<Net>>,
}

#[async_trait]
impl ChannelConnector for SimConnector {
    type Connection = SimConnection;

    async fn connect(&self, credential: Option<&Credential>) -> Result<SimConnection, EnvError> {
        let mut net = self.net.lock();
        net.connect_attempts += 1;
        let token = credential.map(|c| c.expose().to_string());
        net.tokens_seen.push(token.clone());

        if net.refuse_all {
            return Err(EnvError::connect("connection refused"));
        }
        if net.refuse_next > 0 {
            net.refuse_next -= 1;
            return Err(EnvError::connect("connection refused"));
        }
        if net.required_token.is_some() && net.required_token != token {
            return Err(EnvError::connect("unauthorized"));
        }

        // One server-side connection at a time
        net.end_connection();
        let id = ConnectionId::from_seed(net.next_connection);
        net.next_connection += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        net.live = Some(Live { id, tx });
        debug!(connection = %id, "Simulated channel opened");

        Ok(SimConnection {
            id,
            rx: tokio::sync::Mutex::new(rx),
            net: self.net.clone(),
        })
    }
}

/// Client end of one simulated connection.
pub struct SimConnection {
    id: ConnectionId,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelFrame>>,
    net: Arc<Mutex<Net>>,
}

#[async_trait]
impl ChannelConnection for SimConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: ChannelFrame) -> Result<(), EnvError> {
        let mut net = self.net.lock();
        if net.live.as_ref().map(|l| l.id) != Some(self.id) {
            return Err(EnvError::ChannelClosed);
        }
        if net.fail_sends {
            return Err(EnvError::network("send failed"));
        }
        net.handle(&frame);
        net.sent.push(frame);
        Ok(())
    }

    async fn recv(&self) -> Option<ChannelFrame> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) {
        let mut net = self.net.lock();
        if net.live.as_ref().map(|l| l.id) == Some(self.id) {
            net.end_connection();
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Channel controller for fault injection and server stepping.
#[derive(Clone)]
pub struct SimChannelController {
    net: Arc<Mutex<Net>>,
}

impl SimChannelController {
    /// Creates a controller whose server draws from `ctx`'s RNG.
    pub fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            net: Arc::new(Mutex::new(Net {
                ctx,
                next_connection: 0,
                live: None,
                refuse_next: 0,
                refuse_all: false,
                fail_sends: false,
                required_token: None,
                stream_failures: VecDeque::new(),
                jobs: Vec::new(),
                connect_attempts: 0,
                tokens_seen: Vec::new(),
                sent: Vec::new(),
                delivered: 0,
                drops: 0,
            })),
        }
    }

    /// A connector bound to this controller's server.
    pub fn connector(&self) -> SimConnector {
        SimConnector { net: self.net.clone() }
    }

    /// Refuses every connection attempt while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.net.lock().refuse_all = refuse;
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        self.net.lock().refuse_next = count;
    }

    /// Makes every send on the open connection fail while set.
    pub fn fail_sends(&self, fail: bool) {
        self.net.lock().fail_sends = fail;
    }

    /// Only connections presenting `token` are accepted.
    pub fn require_token(&self, token: Option<&str>) {
        self.net.lock().required_token = token.map(str::to_string);
    }

    /// The next started simulation streams a single `error` with `message`.
    pub fn fail_next_stream(&self, message: impl Into<String>) {
        self.net.lock().stream_failures.push_back(message.into());
    }

    /// Drops the open connection server-side. Returns false if none was open.
    pub fn drop_connection(&self) -> bool {
        let mut net = self.net.lock();
        let Some(live) = &net.live else {
            return false;
        };
        info!(connection = %live.id, "Injected connection drop");
        net.end_connection();
        net.drops += 1;
        true
    }

    /// Delivers `frame` on the open connection, bypassing the server.
    pub fn push(&self, frame: ChannelFrame) -> bool {
        self.net.lock().deliver(frame)
    }

    /// Releases the next frame of every subscribed job. Returns how many
    /// frames went out.
    pub fn step_server(&self) -> usize {
        let mut net = self.net.lock();
        if net.live.is_none() {
            return 0;
        }
        let mut ready = Vec::new();
        for job in net.jobs.iter_mut().filter(|j| j.subscribed) {
            if let Some(frame) = job.frames.pop_front() {
                ready.push(frame);
            }
        }
        net.jobs.retain(|j| !j.frames.is_empty());

        let mut released = 0;
        for frame in ready {
            if net.deliver(frame) {
                released += 1;
            }
        }
        released
    }

    pub fn is_connected(&self) -> bool {
        self.net.lock().live.is_some()
    }

    /// Jobs the server still has frames for.
    pub fn pending_jobs(&self) -> Vec<StreamKey> {
        self.net.lock().jobs.iter().map(|j| j.key).collect()
    }

    pub fn is_subscribed(&self, key: StreamKey) -> bool {
        self.net.lock().jobs.iter().any(|j| j.key == key && j.subscribed)
    }

    /// Every frame the client sent, in order.
    pub fn sent(&self) -> Vec<ChannelFrame> {
        self.net.lock().sent.clone()
    }

    /// How many frames named `event` the client sent.
    pub fn sent_count(&self, event: &str) -> usize {
        self.net.lock().sent.iter().filter(|f| f.event == event).count()
    }

    pub fn connect_attempts(&self) -> u64 {
        self.net.lock().connect_attempts
    }

    /// Raw tokens presented on each connection attempt.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.net.lock().tokens_seen.clone()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.net.lock().delivered
    }

    pub fn drops(&self) -> u64 {
        self.net.lock().drops
    }
}
