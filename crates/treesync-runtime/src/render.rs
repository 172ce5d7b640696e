#![forbid(unsafe_code)]

//! Render-context hand-off.
//!
//! The view tree's shape is owned by exactly one serialized execution
//! context. Other threads submit closures to it through [`RenderContext`]:
//!
//! - [`run_and_wait`](RenderContext::run_and_wait) blocks the caller until
//!   the job has run. Structural events use this on purpose: a flood of
//!   additions is slowed to the rate the render side can absorb instead of
//!   queueing without bound.
//! - [`run_later`](RenderContext::run_later) enqueues and returns.
//!
//! [`RenderThread`] is a dedicated thread draining a FIFO queue, so jobs run
//! in submission order. [`InlineContext`] runs jobs on the caller for hosts
//! that are already single-threaded.
//!
//! # Error Propagation
//!
//! A job that panics is caught on the render thread, logged, and reported
//! to a waiting submitter as [`HandoffError::JobPanicked`]; the thread keeps
//! serving later jobs. Submitting after shutdown yields
//! [`HandoffError::Disconnected`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;

use crate::panic_message;

/// A closure to execute on the render context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failure to complete a hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("render context is shut down")]
    Disconnected,
    #[error("render job panicked: {message}")]
    JobPanicked { message: String },
}

/// Serialized "run on the rendering thread" primitive.
pub trait RenderContext: Send + Sync {
    /// Run `job` on the render context and block until it has completed.
    ///
    /// Called from the render context itself, the job runs inline.
    fn run_and_wait(&self, job: Job) -> Result<(), HandoffError>;

    /// Enqueue `job` without waiting for it.
    fn run_later(&self, job: Job) -> Result<(), HandoffError>;

    /// Whether the calling thread is the render context.
    fn is_render_thread(&self) -> bool;
}

fn run_guarded(job: Job) -> Result<(), HandoffError> {
    catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(target: "treesync.render", panic_msg = %message, "render job panicked");
        HandoffError::JobPanicked { message }
    })
}

// ---------------------------------------------------------------------------
// RenderThread
// ---------------------------------------------------------------------------

enum RenderMsg {
    Run {
        job: Job,
        done: Option<mpsc::SyncSender<Result<(), HandoffError>>>,
    },
    Shutdown,
}

/// Dedicated render thread.
pub struct RenderThread {
    sender: mpsc::Sender<RenderMsg>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenderThread {
    pub fn start() -> std::io::Result<Self> {
        Self::with_name("treesync-render")
    }

    pub fn with_name(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<RenderMsg>();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || render_loop(&rx))?;
        Ok(Self {
            sender: tx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop after every job already queued has run, and join the thread.
    pub fn shutdown(&self) {
        let _ = self.sender.send(RenderMsg::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.thread().id() != thread::current().id()
        {
            let _ = handle.join();
        }
    }
}

impl RenderContext for RenderThread {
    fn run_and_wait(&self, job: Job) -> Result<(), HandoffError> {
        if self.is_render_thread() {
            return run_guarded(job);
        }
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.sender
            .send(RenderMsg::Run {
                job,
                done: Some(done_tx),
            })
            .map_err(|_| HandoffError::Disconnected)?;
        done_rx.recv().map_err(|_| HandoffError::Disconnected)?
    }

    fn run_later(&self, job: Job) -> Result<(), HandoffError> {
        self.sender
            .send(RenderMsg::Run { job, done: None })
            .map_err(|_| HandoffError::Disconnected)
    }

    fn is_render_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop(rx: &mpsc::Receiver<RenderMsg>) {
    let mut jobs: u64 = 0;
    while let Ok(msg) = rx.recv() {
        match msg {
            RenderMsg::Run { job, done } => {
                jobs += 1;
                let result = run_guarded(job);
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            RenderMsg::Shutdown => break,
        }
    }
    tracing::debug!(target: "treesync.render", jobs, "render thread exiting");
}

// ---------------------------------------------------------------------------
// InlineContext
// ---------------------------------------------------------------------------

/// Runs every job immediately on the calling thread.
///
/// Only correct when all callers are already serialized (a single-threaded
/// host loop, or a test driving everything from one thread).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl RenderContext for InlineContext {
    fn run_and_wait(&self, job: Job) -> Result<(), HandoffError> {
        run_guarded(job)
    }

    fn run_later(&self, job: Job) -> Result<(), HandoffError> {
        // Nobody waits, so a panic is only logged.
        let _ = run_guarded(job);
        Ok(())
    }

    fn is_render_thread(&self) -> bool {
        true
    }
}
