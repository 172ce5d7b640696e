#![forbid(unsafe_code)]

//! Trigger-coalescing update throttle.
//!
//! [`UpdateThrottle`] turns an arbitrary-rate stream of "something changed"
//! triggers into flush callbacks spaced at least one dormant period apart.
//!
//! # State machine
//!
//! ```text
//!          trigger                 accumulation elapsed
//!   Idle ----------> Accumulating ----------------------> flush() -> Dormant
//!    ^                    ^                                             |
//!    |                    |  dormant elapsed, trigger seen while dormant |
//!    |                    +---------------------------------------------+
//!    |                       dormant elapsed, no trigger                 |
//!    +-------------------------------------------------------------------+
//! ```
//!
//! - The first trigger after an idle period flushes after the short
//!   accumulation delay, so near-simultaneous triggers share one flush.
//! - Triggers while dormant are only recorded. When dormancy ends, one more
//!   flush is scheduled if anything was recorded.
//! - A trigger that arrives while the flush callback is running counts as a
//!   dormant trigger: nothing is lost.
//!
//! # Failure containment
//!
//! Errors returned by the flush callback and panics inside it are logged and
//! counted; the throttle keeps scheduling.
//!
//! # Disposal
//!
//! [`dispose`](UpdateThrottle::dispose) cancels pending timers and turns
//! later triggers into no-ops. A flush already running completes but does
//! not reschedule.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use web_time::Duration;

use crate::panic_message;
use crate::scheduler::{Scheduler, TaskHandle};

/// Timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum spacing between the end of one flush and the next.
    pub dormant: Duration,
    /// Delay between the first trigger after idle and its flush.
    pub accumulation: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            dormant: Duration::from_millis(200),
            accumulation: Duration::from_millis(20),
        }
    }
}

impl ThrottleConfig {
    #[must_use]
    pub fn dormant(mut self, dormant: Duration) -> Self {
        self.dormant = dormant;
        self
    }

    #[must_use]
    pub fn accumulation(mut self, accumulation: Duration) -> Self {
        self.accumulation = accumulation;
        self
    }
}

/// Where the throttle is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlePhase {
    Idle,
    Accumulating,
    /// Within the dormant window; `pending` records a trigger seen meanwhile.
    Dormant { pending: bool },
    Disposed,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    pub triggers: u64,
    pub flushes: u64,
    pub failures: u64,
}

type FlushFn = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

struct Core {
    phase: ThrottlePhase,
    timer: Option<TaskHandle>,
}

struct Inner {
    config: ThrottleConfig,
    scheduler: Arc<dyn Scheduler>,
    flush: FlushFn,
    core: Mutex<Core>,
    triggers: AtomicU64,
    flushes: AtomicU64,
    failures: AtomicU64,
}

/// Rate limiter that coalesces triggers into periodic flushes.
pub struct UpdateThrottle {
    inner: Arc<Inner>,
}

impl fmt::Debug for UpdateThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateThrottle")
            .field("config", &self.inner.config)
            .field("phase", &self.phase())
            .field("stats", &self.stats())
            .finish()
    }
}

impl UpdateThrottle {
    /// Create a throttle that calls `flush` on the scheduler's thread.
    pub fn new<F, E>(config: ThrottleConfig, scheduler: Arc<dyn Scheduler>, flush: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let flush: FlushFn = Box::new(move || flush().map_err(|e| e.to_string()));
        Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                flush,
                core: Mutex::new(Core {
                    phase: ThrottlePhase::Idle,
                    timer: None,
                }),
                triggers: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Note that something changed. Never blocks on the flush.
    pub fn trigger(&self) {
        let mut core = self.inner.lock_core();
        match core.phase {
            ThrottlePhase::Disposed => return,
            ThrottlePhase::Idle => {
                core.phase = ThrottlePhase::Accumulating;
                core.timer = Some(schedule_flush(&self.inner));
            }
            ThrottlePhase::Dormant { pending: false } => {
                core.phase = ThrottlePhase::Dormant { pending: true };
            }
            ThrottlePhase::Accumulating | ThrottlePhase::Dormant { pending: true } => {}
        }
        drop(core);
        self.inner.triggers.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop all scheduled activity; later triggers are ignored.
    pub fn dispose(&self) {
        let mut core = self.inner.lock_core();
        if core.phase == ThrottlePhase::Disposed {
            return;
        }
        core.phase = ThrottlePhase::Disposed;
        if let Some(timer) = core.timer.take() {
            timer.cancel();
        }
        drop(core);
        tracing::debug!(target: "treesync.throttle", "update throttle disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.phase() == ThrottlePhase::Disposed
    }

    #[must_use]
    pub fn phase(&self) -> ThrottlePhase {
        self.inner.lock_core().phase
    }

    #[must_use]
    pub fn config(&self) -> ThrottleConfig {
        self.inner.config
    }

    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            triggers: self.inner.triggers.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for UpdateThrottle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn lock_core(&self) -> std::sync::MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accumulation delay elapsed: flush, then go dormant.
    fn fire(self: &Arc<Self>) {
        {
            let mut core = self.lock_core();
            if core.phase != ThrottlePhase::Accumulating {
                return;
            }
            // Dormant before running, so triggers during the flush are kept.
            core.phase = ThrottlePhase::Dormant { pending: false };
            core.timer = None;
        }

        self.run_flush();

        let mut core = self.lock_core();
        if matches!(core.phase, ThrottlePhase::Dormant { .. }) {
            core.timer = Some(schedule_dormant_end(self));
        }
    }

    fn run_flush(&self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.flush)()));
        self.flushes.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(target: "treesync.throttle", error = %message, "throttled flush failed");
            }
            Err(payload) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "treesync.throttle",
                    panic_msg = %panic_message(payload.as_ref()),
                    "throttled flush panicked"
                );
            }
        }
    }

    /// Dormant period elapsed.
    fn end_dormant(self: &Arc<Self>) {
        let mut core = self.lock_core();
        match core.phase {
            ThrottlePhase::Dormant { pending: true } => {
                core.phase = ThrottlePhase::Accumulating;
                core.timer = Some(schedule_flush(self));
            }
            ThrottlePhase::Dormant { pending: false } => {
                core.phase = ThrottlePhase::Idle;
                core.timer = None;
            }
            _ => {}
        }
    }
}

fn schedule_flush(inner: &Arc<Inner>) -> TaskHandle {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.scheduler.schedule(
        inner.config.accumulation,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire();
            }
        }),
    )
}

fn schedule_dormant_end(inner: &Arc<Inner>) -> TaskHandle {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.scheduler.schedule(
        inner.config.dormant,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.end_dormant();
            }
        }),
    )
}
