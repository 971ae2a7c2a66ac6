//! Session Registry: the live set of simulation sessions.
//!
//! Holds the latest snapshot of every session in creation order and
//! broadcasts each new snapshot to observers. Sessions leave the registry
//! only through [`SessionRegistry::discard`].

use crate::error::{Error, RegistryError, StateError};
use crate::session::{IgnoreReason, Outcome, SessionStatus, SimulationSession};
use crate::types::SessionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the observer channel. Slow observers skip ahead.
const OBSERVER_CAPACITY: usize = 256;

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, SimulationSession>,
    order: Vec<SessionId>,
}

pub struct SessionRegistry {
    inner: RwLock<Sessions>,
    updates: broadcast::Sender<SimulationSession>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            inner: RwLock::new(Sessions::default()),
            updates,
        }
    }

    /// Registers a new Idle session.
    pub fn open(&self, id: SessionId) -> SimulationSession {
        let session = SimulationSession::new(id);
        {
            let mut inner = self.inner.write();
            if inner.by_id.insert(id, session.clone()).is_none() {
                inner.order.push(id);
            }
        }
        self.notify(&session);
        session
    }

    /// Applies a user action. Leaves the session untouched on error.
    pub fn transition<F>(&self, id: SessionId, f: F) -> Result<SimulationSession, Error>
    where
        F: FnOnce(&SimulationSession) -> Result<SimulationSession, StateError>,
    {
        let next = {
            let mut inner = self.inner.write();
            let current = inner
                .by_id
                .get(&id)
                .ok_or(RegistryError::SessionNotFound(id))?;
            let next = f(current)?;
            inner.by_id.insert(id, next.clone());
            next
        };
        self.notify(&next);
        Ok(next)
    }

    /// Applies an inbound event. Unknown sessions are reported as ignored.
    pub fn apply<F>(&self, id: SessionId, f: F) -> Outcome
    where
        F: FnOnce(&SimulationSession) -> Outcome,
    {
        let outcome = {
            let mut inner = self.inner.write();
            let Some(current) = inner.by_id.get(&id) else {
                return Outcome::Ignored(IgnoreReason::Unknown);
            };
            let outcome = f(current);
            if let Outcome::Applied(next) = &outcome {
                inner.by_id.insert(id, next.clone());
            }
            outcome
        };
        if let Outcome::Applied(next) = &outcome {
            self.notify(next);
        }
        outcome
    }

    /// Removes a session that is not in flight.
    pub fn discard(&self, id: SessionId) -> Result<SimulationSession, Error> {
        let mut inner = self.inner.write();
        let current = inner
            .by_id
            .get(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;
        if current.status().is_in_flight() {
            return Err(StateError::InvalidTransition {
                from: current.status(),
                action: "discard",
            }
            .into());
        }
        inner.order.retain(|s| *s != id);
        let removed = inner
            .by_id
            .remove(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;
        debug!(session = %id, "Session discarded");
        Ok(removed)
    }

    pub fn get(&self, id: SessionId) -> Option<SimulationSession> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// All sessions in creation order.
    pub fn list(&self) -> Vec<SimulationSession> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Sessions currently in `status`, in creation order.
    pub fn with_status(&self, status: SessionStatus) -> Vec<SimulationSession> {
        self.list().into_iter().filter(|s| s.status() == status).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream of every snapshot published from now on.
    pub fn observe(&self) -> broadcast::Receiver<SimulationSession> {
        self.updates.subscribe()
    }

    fn notify(&self, session: &SimulationSession) {
        // No receivers is fine
        let _ = self.updates.send(session.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioRegistry;
    use crate::session::DispatchMode;
    use crate::types::ScenarioId;

    fn scenario() -> crate::scenario::ScenarioConfig {
        ScenarioRegistry::with_defaults()
            .get(&ScenarioId::new("scenario-b"))
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_open_and_list_in_order() {
        let registry = SessionRegistry::new();
        let a = registry.open(SessionId::from_seed(1)).id();
        let b = registry.open(SessionId::from_seed(2)).id();
        let ids: Vec<_> = registry.list().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_transition_error_leaves_state() {
        let registry = SessionRegistry::new();
        let id = registry.open(SessionId::from_seed(1)).id();

        let err = registry.transition(id, |s| s.cancel()).unwrap_err();
        assert!(matches!(err, Error::State(StateError::InvalidTransition { .. })));
        assert_eq!(registry.get(id).unwrap().status(), SessionStatus::Idle);

        let missing = SessionId::from_seed(99);
        assert_eq!(
            registry.transition(missing, |s| s.cancel()).unwrap_err(),
            Error::Registry(RegistryError::SessionNotFound(missing))
        );
    }

    #[test]
    fn test_apply_unknown_session() {
        let registry = SessionRegistry::new();
        let outcome = registry.apply(SessionId::from_seed(5), |s| s.apply_progress(1, 10));
        assert_eq!(outcome, Outcome::Ignored(IgnoreReason::Unknown));
    }

    #[test]
    fn test_discard_rejects_in_flight() {
        let registry = SessionRegistry::new();
        let id = registry.open(SessionId::from_seed(1)).id();
        registry
            .transition(id, |s| s.dispatch(scenario(), DispatchMode::Direct))
            .unwrap();

        assert!(registry.discard(id).is_err());
        registry.transition(id, |s| s.cancel()).unwrap();
        assert!(registry.discard(id).is_ok());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_observe_receives_snapshots() {
        let registry = SessionRegistry::new();
        let mut rx = registry.observe();

        let id = registry.open(SessionId::from_seed(1)).id();
        registry
            .transition(id, |s| s.dispatch(scenario(), DispatchMode::Direct))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().status(), SessionStatus::Idle);
        assert_eq!(rx.recv().await.unwrap().status(), SessionStatus::Requesting);
    }
}
