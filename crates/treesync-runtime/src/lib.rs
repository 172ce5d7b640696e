#![forbid(unsafe_code)]

//! Runtime services for treesync.
//!
//! # Key Components
//!
//! - [`Scheduler`] - Injected timer service; [`TimerService`] runs tasks on a
//!   background thread, [`ManualScheduler`] is a fake clock for tests
//! - [`RenderContext`] - Serialized "run on the render thread" primitive with
//!   a blocking hand-off; [`RenderThread`] and [`InlineContext`] implement it
//! - [`UpdateThrottle`] - Coalesces bursts of triggers into bounded-rate flushes
//! - [`ChangeIndicator`] - Self-resetting "structure is changing" flag
//!
//! # How it fits in the system
//! `treesync` wires these around its `TreeMirror`: structural events hand
//! off to the [`RenderContext`] and block until applied, content updates
//! trigger the [`UpdateThrottle`], and both raise the [`ChangeIndicator`].

pub mod indicator;
pub mod render;
pub mod scheduler;
pub mod throttle;

pub use indicator::{ChangeIndicator, IndicatorConfig, IndicatorSink, NoopIndicator};
pub use render::{HandoffError, InlineContext, Job, RenderContext, RenderThread};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskHandle, TimerService};
pub use throttle::{ThrottleConfig, ThrottlePhase, ThrottleStats, UpdateThrottle};

/// Render a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
