//! Simulation Session State Machine.
//!
//! ```text
//!                 dispatch(Direct)          complete
//!        ┌──────────────────────► Requesting ─────────► Completed
//!        │                           │  │ acknowledge      ▲
//!   Idle ┤                           │  ▼                  │ update(progress = 100)
//!        │  dispatch(Streamed)       │ Streaming ──────────┘
//!        └──────────────────────►    │  │ progress / update (loop)
//!                                    │  │
//!                     fail ──────────┴──┴──► Failed
//!                     cancel ───────────────► Canceled
//!
//!   Completed | Failed | Canceled ── reset ──► Idle
//! ```
//!
//! Every transition returns a new snapshot and leaves `self` untouched.
//!
//! User actions ([`dispatch`](SimulationSession::dispatch),
//! [`cancel`](SimulationSession::cancel), [`reset`](SimulationSession::reset))
//! fail with [`StateError`] when the current state does not allow them.
//! Inbound events (acknowledge, progress, update, complete, fail) never
//! fail: they carry the generation of the dispatch that produced them and
//! come back as [`Outcome::Ignored`] when stale or out of place.

use crate::error::{SessionError, StateError};
use crate::model::SimulationResult;
use crate::scenario::ScenarioConfig;
use crate::types::{SessionId, StreamKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a session's simulation is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One request/response round-trip to the provider
    #[default]
    Direct,
    /// Incremental results over the shared channel
    Streamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Canceled)
    }

    /// Requesting or Streaming.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionStatus::Requesting | SessionStatus::Streaming)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Requesting => "requesting",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Why an inbound event was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Produced by an earlier dispatch
    Stale,
    /// The session is not in a state that accepts this event
    Inactive,
    /// Progress lower than what was already reported
    Regressed,
    /// No session with this id
    Unknown,
}

/// Result of applying an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied(SimulationSession),
    Ignored(IgnoreReason),
}

impl Outcome {
    pub fn applied(self) -> Option<SimulationSession> {
        match self {
            Outcome::Applied(session) => Some(session),
            Outcome::Ignored(_) => None,
        }
    }
}

/// Snapshot of one simulation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSession {
    id: SessionId,
    generation: u64,
    scenario: Option<ScenarioConfig>,
    mode: DispatchMode,
    status: SessionStatus,
    progress: u8,
    result: Option<Arc<SimulationResult>>,
    error: Option<SessionError>,
    /// Holds a transport subscription
    bound: bool,
}

impl SimulationSession {
    /// Creates an Idle session.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            generation: 0,
            scenario: None,
            mode: DispatchMode::Direct,
            status: SessionStatus::Idle,
            progress: 0,
            result: None,
            error: None,
            bound: false,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Incremented by every dispatch
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Configuration copied at dispatch time
    pub fn scenario(&self) -> Option<&ScenarioConfig> {
        self.scenario.as_ref()
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&Arc<SimulationResult>> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Routing key of the current dispatch.
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.id, self.generation)
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// Idle → Requesting under a new generation.
    pub fn dispatch(&self, scenario: ScenarioConfig, mode: DispatchMode) -> Result<Self, StateError> {
        self.require(self.status == SessionStatus::Idle, "dispatch")?;
        Ok(Self {
            id: self.id,
            generation: self.generation + 1,
            scenario: Some(scenario),
            mode,
            status: SessionStatus::Requesting,
            progress: 0,
            result: None,
            error: None,
            bound: false,
        })
    }

    /// Requesting | Streaming → Canceled.
    pub fn cancel(&self) -> Result<Self, StateError> {
        self.require(self.status.is_in_flight(), "cancel")?;
        Ok(Self {
            status: SessionStatus::Canceled,
            bound: false,
            ..self.clone()
        })
    }

    /// Terminal → Idle with progress, result and error cleared.
    pub fn reset(&self) -> Result<Self, StateError> {
        self.require(self.status.is_terminal(), "reset")?;
        Ok(Self {
            status: SessionStatus::Idle,
            progress: 0,
            result: None,
            error: None,
            bound: false,
            ..self.clone()
        })
    }

    // =========================================================================
    // INBOUND EVENTS
    // =========================================================================

    /// The start request went out on the channel: Requesting → Streaming.
    pub fn acknowledge(&self, generation: u64) -> Outcome {
        if let Err(reason) = self.accepts(generation, &[SessionStatus::Requesting]) {
            return Outcome::Ignored(reason);
        }
        if self.mode != DispatchMode::Streamed {
            return Outcome::Ignored(IgnoreReason::Inactive);
        }
        Outcome::Applied(Self {
            status: SessionStatus::Streaming,
            bound: true,
            ..self.clone()
        })
    }

    /// Direct-mode success: Requesting → Completed.
    pub fn complete(&self, generation: u64, result: Arc<SimulationResult>) -> Outcome {
        if let Err(reason) = self.accepts(generation, &[SessionStatus::Requesting]) {
            return Outcome::Ignored(reason);
        }
        Outcome::Applied(Self {
            status: SessionStatus::Completed,
            progress: 100,
            result: Some(result),
            bound: false,
            ..self.clone()
        })
    }

    /// Requesting | Streaming → Failed.
    pub fn fail(&self, generation: u64, error: SessionError) -> Outcome {
        if let Err(reason) = self.accepts(generation, &[SessionStatus::Requesting, SessionStatus::Streaming]) {
            return Outcome::Ignored(reason);
        }
        Outcome::Applied(Self {
            status: SessionStatus::Failed,
            error: Some(error),
            bound: false,
            ..self.clone()
        })
    }

    /// Streamed progress. Values above 100 are capped; values below the
    /// current progress are ignored.
    pub fn apply_progress(&self, generation: u64, percent: u8) -> Outcome {
        if let Err(reason) = self.accepts(generation, &[SessionStatus::Streaming]) {
            return Outcome::Ignored(reason);
        }
        let percent = percent.min(100);
        if percent < self.progress {
            return Outcome::Ignored(IgnoreReason::Regressed);
        }
        Outcome::Applied(Self {
            progress: percent,
            ..self.clone()
        })
    }

    /// Streamed partial or final result. Replaces the result wholesale; a
    /// progress of 100 completes the session.
    pub fn apply_update(&self, generation: u64, result: Arc<SimulationResult>, progress: Option<u8>) -> Outcome {
        if let Err(reason) = self.accepts(generation, &[SessionStatus::Streaming]) {
            return Outcome::Ignored(reason);
        }
        let progress = progress.map_or(self.progress, |p| p.min(100).max(self.progress));
        let done = progress == 100;
        Outcome::Applied(Self {
            status: if done { SessionStatus::Completed } else { SessionStatus::Streaming },
            progress,
            result: Some(result),
            bound: !done,
            ..self.clone()
        })
    }

    fn accepts(&self, generation: u64, states: &[SessionStatus]) -> Result<(), IgnoreReason> {
        if generation != self.generation {
            return Err(IgnoreReason::Stale);
        }
        if !states.contains(&self.status) {
            return Err(IgnoreReason::Inactive);
        }
        Ok(())
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), StateError> {
        if allowed {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }
}
