//! Exclusive-access token over the SCPI engine.
//!
//! Two transports can feed the engine: the raw TCP server and VXI-11.
//! VXI-11 claims the engine for the lifetime of a link; while the claim is
//! held the raw transport must refuse new clients and drop the one it has.
//! The state is published through a watch channel so the raw transport
//! reacts to a claim without polling.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// The raw transport may serve a client; a VXI-11 link may be created.
    #[default]
    Free,
    /// A VXI-11 link owns the engine.
    ExternalOwned,
}

#[derive(Debug, Clone)]
pub struct EngineGate {
    state: Arc<watch::Sender<GateState>>,
}

impl Default for EngineGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GateState::Free);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Try to claim the engine for an external (VXI-11) consumer.
    /// Returns `false` when it is already owned.
    pub fn claim_external(&self) -> bool {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == GateState::Free {
                *state = GateState::ExternalOwned;
                claimed = true;
                true
            } else {
                false
            }
        });
        if claimed {
            debug!("engine claimed for external control");
        }
        claimed
    }

    /// Release an external claim. Releasing a free gate is a no-op, which
    /// makes teardown paths idempotent.
    pub fn release_external(&self) {
        self.state.send_if_modified(|state| {
            if *state == GateState::ExternalOwned {
                *state = GateState::Free;
                debug!("engine released");
                true
            } else {
                false
            }
        });
    }

    pub fn is_external_owned(&self) -> bool {
        *self.state.borrow() == GateState::ExternalOwned
    }

    /// Subscribe to state changes. The receiver sees the current state
    /// immediately.
    pub fn watch(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let gate = EngineGate::new();
        assert!(!gate.is_external_owned());
        assert!(gate.claim_external());
        assert!(gate.is_external_owned());
        assert!(!gate.claim_external());
        gate.release_external();
        assert!(!gate.is_external_owned());
        assert!(gate.claim_external());
    }

    #[test]
    fn release_without_claim_is_harmless() {
        let gate = EngineGate::new();
        gate.release_external();
        assert!(gate.claim_external());
    }

    #[tokio::test]
    async fn watchers_observe_transitions() {
        let gate = EngineGate::new();
        let mut rx = gate.watch();
        assert_eq!(*rx.borrow(), GateState::Free);

        assert!(gate.claim_external());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), GateState::ExternalOwned);

        gate.release_external();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), GateState::Free);
    }
}
