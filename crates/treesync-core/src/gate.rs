#![forbid(unsafe_code)]

//! One-shot startup barrier.
//!
//! A freshly started source emits a flood of additions and removals in the
//! order the tree was generated, not the order it is laid out. Rendering
//! those one by one is slow, so the mirror first lets the source settle,
//! then builds its view from the mostly-complete tree. Listener callbacks
//! that arrive in between park on the [`StartupGate`] and are processed in
//! receipt order once it opens.
//!
//! The gate moves once, irreversibly, from [`GateState::Closed`] to either
//! [`GateState::Open`] or [`GateState::Abandoned`] (the source went away
//! before the view was built). Waiters wake on either transition.
//!
//! ```
//! use std::sync::Arc;
//! use treesync_core::gate::{GateState, StartupGate};
//!
//! let gate = Arc::new(StartupGate::closed());
//! let waiter = {
//!     let gate = Arc::clone(&gate);
//!     std::thread::spawn(move || gate.await_open())
//! };
//! assert!(gate.open());
//! assert_eq!(waiter.join().unwrap(), GateState::Open);
//! ```

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Observable state of a [`StartupGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Event processing is held back.
    Closed,
    /// Events flow.
    Open,
    /// Startup was given up; held-back events are to be dropped.
    Abandoned,
}

/// Binary latch with blocking wait.
#[derive(Debug)]
pub struct StartupGate {
    state: Mutex<GateState>,
    cvar: Condvar,
}

impl StartupGate {
    #[must_use]
    pub fn closed() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            cvar: Condvar::new(),
        }
    }

    #[must_use]
    pub fn opened() -> Self {
        Self {
            state: Mutex::new(GateState::Open),
            cvar: Condvar::new(),
        }
    }

    /// Gate for a startup delay: pre-opened when there is nothing to wait for.
    #[must_use]
    pub fn for_delay(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::opened()
        } else {
            Self::closed()
        }
    }

    /// Open the gate and wake every waiter.
    ///
    /// Returns `true` if this call performed the transition. Opening an
    /// open or abandoned gate changes nothing.
    pub fn open(&self) -> bool {
        self.transition(GateState::Open)
    }

    /// Give up on startup. Waiters wake and observe [`GateState::Abandoned`].
    ///
    /// Returns `true` if this call performed the transition.
    pub fn abandon(&self) -> bool {
        self.transition(GateState::Abandoned)
    }

    fn transition(&self, to: GateState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != GateState::Closed {
            return false;
        }
        *state = to;
        self.cvar.notify_all();
        tracing::debug!(target: "treesync.gate", state = ?to, "startup gate released");
        true
    }

    /// Block until the gate leaves [`GateState::Closed`]. No timeout.
    pub fn await_open(&self) -> GateState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *state == GateState::Closed {
            state = self.cvar.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        *state
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == GateState::Open
    }
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn zero_delay_starts_open() {
        assert!(StartupGate::for_delay(Duration::ZERO).is_open());
        assert_eq!(
            StartupGate::for_delay(Duration::from_millis(5)).state(),
            GateState::Closed
        );
    }

    #[test]
    fn open_is_idempotent() {
        let gate = StartupGate::closed();
        assert!(gate.open());
        assert!(!gate.open());
        assert!(gate.is_open());
        assert_eq!(gate.await_open(), GateState::Open);
    }

    #[test]
    fn abandon_after_open_is_ignored() {
        let gate = StartupGate::closed();
        gate.open();
        assert!(!gate.abandon());
        assert_eq!(gate.state(), GateState::Open);
    }

    #[test]
    fn open_after_abandon_is_ignored() {
        let gate = StartupGate::closed();
        assert!(gate.abandon());
        assert!(!gate.open());
        assert_eq!(gate.await_open(), GateState::Abandoned);
    }

    #[test]
    fn wakes_every_waiter() {
        let gate = Arc::new(StartupGate::closed());
        let released = Arc::new(AtomicUsize::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    let state = gate.await_open();
                    released.fetch_add(1, Ordering::SeqCst);
                    state
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        gate.open();
        for w in waiters {
            assert_eq!(w.join().unwrap(), GateState::Open);
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }
}
