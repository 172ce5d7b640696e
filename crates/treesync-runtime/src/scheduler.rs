#![forbid(unsafe_code)]

//! Injected timer services.
//!
//! Everything time-driven in treesync (the update throttle, the change
//! indicator's auto-hide, the delayed startup) goes through a [`Scheduler`]
//! handed in at construction instead of a process-wide timer. Production
//! code uses [`TimerService`], a single background thread draining a
//! deadline heap; tests use [`ManualScheduler`], whose clock only moves when
//! the test calls [`advance`](ManualScheduler::advance).
//!
//! # Cancellation
//!
//! [`TaskHandle::cancel`] is best-effort: a task that has not started yet
//! will never run, a task already running completes.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use web_time::{Duration, Instant};

use crate::panic_message;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Timer service that runs tasks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Time elapsed since the scheduler's epoch.
    fn now(&self) -> Duration;
}

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Prevent the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Heap entry ordered so that `BinaryHeap` pops the earliest deadline first,
/// FIFO among equal deadlines.
struct Entry<T> {
    due: T,
    seq: u64,
    task: Task,
    handle: TaskHandle,
}

impl<T: Ord> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl<T: Ord> Eq for Entry<T> {}

impl<T: Ord> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn run_task(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            target: "treesync.scheduler",
            panic_msg = %panic_message(payload.as_ref()),
            "scheduled task panicked"
        );
    }
}

// ---------------------------------------------------------------------------
// TimerService
// ---------------------------------------------------------------------------

struct TimerQueue {
    heap: BinaryHeap<Entry<Instant>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    cvar: Condvar,
    epoch: Instant,
}

/// Background-thread scheduler.
///
/// One named thread sleeps on a condition variable until the earliest
/// deadline and runs due tasks one at a time. A panicking task is logged and
/// does not take the thread down.
pub struct TimerService {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cvar: Condvar::new(),
            epoch: Instant::now(),
        });
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("treesync-timer".into())
                .spawn(move || timer_loop(&shared))?
        };
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Number of tasks waiting for their deadline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .len()
    }

    /// Stop the timer thread. Tasks not yet due are dropped unrun.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.shutdown = true;
            queue.heap.clear();
        }
        self.shared.cvar.notify_all();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // Dropping the last owner from inside a task must not self-join.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Scheduler for TimerService {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.shutdown {
            tracing::debug!(target: "treesync.scheduler", "schedule after shutdown ignored");
            handle.cancel();
            return handle;
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Entry {
            due: Instant::now() + delay,
            seq,
            task,
            handle: handle.clone(),
        });
        drop(queue);
        self.shared.cvar.notify_one();
        handle
    }

    fn now(&self) -> Duration {
        self.shared.epoch.elapsed()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if queue.shutdown {
            return;
        }
        let now = Instant::now();
        let wait = match queue.heap.peek() {
            None => None,
            Some(entry) if entry.due <= now => Some(Duration::ZERO),
            Some(entry) => Some(entry.due - now),
        };
        match wait {
            None => {
                queue = shared.cvar.wait(queue).unwrap_or_else(|e| e.into_inner());
            }
            Some(d) if d.is_zero() => {
                if let Some(entry) = queue.heap.pop() {
                    drop(queue);
                    if !entry.handle.is_cancelled() {
                        run_task(entry.task);
                    }
                    queue = shared.queue.lock().unwrap_or_else(|e| e.into_inner());
                }
            }
            Some(d) => {
                queue = shared
                    .cvar
                    .wait_timeout(queue, d)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

struct ManualState {
    now: Duration,
    heap: BinaryHeap<Entry<Duration>>,
    next_seq: u64,
}

/// Fake-clock scheduler for deterministic tests.
///
/// Nothing runs until [`advance`](Self::advance) is called; tasks then run
/// on the calling thread in deadline order, with the clock set to each
/// task's deadline while it runs.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use treesync_runtime::scheduler::{ManualScheduler, Scheduler};
///
/// let clock = ManualScheduler::new();
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h = Arc::clone(&hits);
/// clock.schedule(Duration::from_millis(10), Box::new(move || {
///     h.fetch_add(1, Ordering::SeqCst);
/// }));
/// clock.advance(Duration::from_millis(9));
/// assert_eq!(hits.load(Ordering::SeqCst), 0);
/// clock.advance(Duration::from_millis(1));
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Move the clock forward, running every task that falls due, including
    /// tasks scheduled by tasks within the window.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            let entry = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let due = state.heap.peek().is_some_and(|entry| entry.due <= target);
                if due {
                    let entry = state.heap.pop();
                    if let Some(entry) = &entry {
                        state.now = state.now.max(entry.due);
                    }
                    entry
                } else {
                    state.now = target;
                    None
                }
            };
            match entry {
                Some(entry) if !entry.handle.is_cancelled() => run_task(entry.task),
                Some(_) => {}
                None => return,
            }
        }
    }

    /// Number of scheduled, not yet run, not cancelled tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .iter()
            .filter(|entry| !entry.handle.is_cancelled())
            .count()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.heap.push(Entry {
            due,
            seq,
            task,
            handle: handle.clone(),
        });
        handle
    }

    fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }
}
