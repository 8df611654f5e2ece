//! One-shot readiness gate.

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::lock;

enum GateState {
    Waiting(Vec<oneshot::Sender<()>>),
    Open,
}

/// Latches open once and never closes again.
///
/// Waiters queued before the gate opens are released together when it opens;
/// waiters arriving afterwards pass straight through without queueing.
pub(crate) struct ReadyGate {
    state: Mutex<GateState>,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Waiting(Vec::new())),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*lock(&self.state), GateState::Open)
    }

    /// Open the gate. Returns `true` only for the call that actually opened it.
    pub fn open(&self) -> bool {
        let waiters = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, GateState::Open) {
                GateState::Waiting(waiters) => waiters,
                GateState::Open => return false,
            }
        };

        for waiter in waiters {
            // A waiter whose future was dropped no longer cares.
            let _ = waiter.send(());
        }
        true
    }

    /// Suspend until the gate is open.
    pub async fn wait(&self) {
        let rx = {
            let mut state = lock(&self.state);
            match &mut *state {
                GateState::Open => return,
                GateState::Waiting(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };

        // Err only if the gate itself is gone, in which case nothing will open it.
        let _ = rx.await;
    }

    #[cfg(test)]
    pub fn waiting(&self) -> usize {
        match &*lock(&self.state) {
            GateState::Waiting(waiters) => waiters.len(),
            GateState::Open => 0,
        }
    }
}
