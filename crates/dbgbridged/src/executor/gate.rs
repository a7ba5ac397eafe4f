//! Global serialisation of native calls.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

#[derive(Debug, Default)]
struct GateState {
    busy: Mutex<bool>,
    released: Condvar,
}

/// Admits one native call at a time across the whole daemon.
///
/// The [`GateTicket`] travels with the call into its worker thread and is
/// released when the call really returns, so a call that was abandoned after
/// its deadline keeps the gate closed until it finishes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGate {
    state: Arc<GateState>,
}

impl ExecutionGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the gate is free or `deadline` passes.
    #[must_use]
    pub fn acquire_until(&self, deadline: Instant) -> Option<GateTicket> {
        let mut busy = self
            .state
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *busy {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            busy = self
                .state
                .released
                .wait_timeout(busy, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *busy = true;
        Some(GateTicket {
            state: Arc::clone(&self.state),
        })
    }

    /// Whether a call currently holds the gate.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        *self
            .state
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission; dropping it reopens the gate.
#[derive(Debug)]
pub struct GateTicket {
    state: Arc<GateState>,
}

impl Drop for GateTicket {
    fn drop(&mut self) {
        let mut busy = self
            .state
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *busy = false;
        self.state.released.notify_one();
    }
}
