#![forbid(unsafe_code)]

//! "Structure is changing" indicator.
//!
//! While nodes are being added or removed the tree is in flux and may not be
//! worth interacting with. [`ChangeIndicator::signal`] shows an indicator on
//! the first change and (re)arms a single hide timer; once no change has
//! been signalled for the quiet period, the indicator hides itself.
//!
//! Showing and hiding happen on the render context through an
//! [`IndicatorSink`] supplied by the embedding view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use web_time::Duration;

use crate::render::RenderContext;
use crate::scheduler::{Scheduler, TaskHandle};

/// Presentation of the indicator (a label, a busy cursor, ...).
pub trait IndicatorSink: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

/// Sink that presents nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl IndicatorSink for NoopIndicator {
    fn show(&self) {}
    fn hide(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorConfig {
    /// How long after the last signal the indicator hides.
    pub quiet_period: Duration,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(1),
        }
    }
}

/// The single pending hide: generation plus its timer.
struct PendingHide {
    generation: u64,
    timer: TaskHandle,
}

struct Inner {
    config: IndicatorConfig,
    scheduler: Arc<dyn Scheduler>,
    render: Arc<dyn RenderContext>,
    sink: Arc<dyn IndicatorSink>,
    pending: Mutex<(u64, Option<PendingHide>)>,
    shown: AtomicBool,
    disposed: AtomicBool,
}

/// Debounced visibility flag.
pub struct ChangeIndicator {
    inner: Arc<Inner>,
}

impl ChangeIndicator {
    pub fn new(
        config: IndicatorConfig,
        scheduler: Arc<dyn Scheduler>,
        render: Arc<dyn RenderContext>,
        sink: Arc<dyn IndicatorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                render,
                sink,
                pending: Mutex::new((0, None)),
                shown: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Record a structural change.
    pub fn signal(&self) {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.0 += 1;
        let generation = pending.0;
        let timer = schedule_hide(inner, generation);
        let previous = pending.1.replace(PendingHide { generation, timer });
        drop(pending);

        match previous {
            Some(previous) => previous.timer.cancel(),
            None => {
                tracing::info!(target: "treesync.indicator", "tree changes start");
                inner.shown.store(true, Ordering::Release);
                inner.on_render(|sink| sink.show());
            }
        }
    }

    #[must_use]
    pub fn is_shown(&self) -> bool {
        self.inner.shown.load(Ordering::Acquire)
    }

    /// Cancel the pending hide and hide now if shown. Later signals are ignored.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .1
            .take();
        if let Some(previous) = previous {
            previous.timer.cancel();
        }
        if inner.shown.swap(false, Ordering::AcqRel) {
            inner.on_render(|sink| sink.hide());
        }
    }
}

impl Drop for ChangeIndicator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    /// Run `f` against the sink on the render context.
    fn on_render(&self, f: impl FnOnce(&dyn IndicatorSink) + Send + 'static) {
        if self.render.is_render_thread() {
            f(self.sink.as_ref());
            return;
        }
        let sink = Arc::clone(&self.sink);
        if let Err(err) = self.render.run_later(Box::new(move || f(sink.as_ref()))) {
            tracing::warn!(target: "treesync.indicator", error = %err, "indicator update dropped");
        }
    }

    /// Hide, unless a newer signal superseded `generation`.
    fn hide_if_current(&self, generation: u64) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match &pending.1 {
                Some(current) if current.generation == generation => {
                    pending.1 = None;
                }
                _ => return,
            }
        }
        tracing::info!(target: "treesync.indicator", "tree changes end");
        self.shown.store(false, Ordering::Release);
        self.sink.hide();
    }
}

fn schedule_hide(inner: &Arc<Inner>, generation: u64) -> TaskHandle {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    inner.scheduler.schedule(
        inner.config.quiet_period,
        Box::new(move || {
            let Some(strong) = weak.upgrade() else {
                return;
            };
            let render = Arc::clone(&strong.render);
            let job = Box::new(move || strong.hide_if_current(generation));
            if let Err(err) = render.run_later(job) {
                tracing::warn!(target: "treesync.indicator", error = %err, "indicator hide dropped");
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::InlineContext;
    use crate::scheduler::ManualScheduler;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<&'static str>>,
    }

    impl IndicatorSink for RecordingSink {
        fn show(&self) {
            self.events.lock().unwrap().push("show");
        }
        fn hide(&self) {
            self.events.lock().unwrap().push("hide");
        }
    }

    fn setup() -> (Arc<ManualScheduler>, Arc<RecordingSink>, ChangeIndicator) {
        let clock = Arc::new(ManualScheduler::new());
        let sink = Arc::new(RecordingSink::default());
        let indicator = ChangeIndicator::new(
            IndicatorConfig::default(),
            Arc::clone(&clock) as Arc<dyn Scheduler>,
            Arc::new(InlineContext),
            Arc::clone(&sink) as Arc<dyn IndicatorSink>,
        );
        (clock, sink, indicator)
    }

    #[test]
    fn hides_after_quiet_period() {
        let (clock, sink, indicator) = setup();
        indicator.signal();
        assert!(indicator.is_shown());
        clock.advance(Duration::from_millis(999));
        assert!(indicator.is_shown());
        clock.advance(Duration::from_millis(1));
        assert!(!indicator.is_shown());
        assert_eq!(*sink.events.lock().unwrap(), vec!["show", "hide"]);
    }

    #[test]
    fn repeated_signals_reschedule_without_stacking() {
        let (clock, sink, indicator) = setup();
        for _ in 0..5 {
            indicator.signal();
            clock.advance(Duration::from_millis(600));
        }
        assert!(indicator.is_shown());
        assert_eq!(clock.pending(), 1);
        clock.advance(Duration::from_millis(400));
        assert!(!indicator.is_shown());
        assert_eq!(*sink.events.lock().unwrap(), vec!["show", "hide"]);
    }

    #[test]
    fn shows_again_after_hiding() {
        let (clock, sink, indicator) = setup();
        indicator.signal();
        clock.advance(Duration::from_secs(2));
        indicator.signal();
        clock.advance(Duration::from_secs(2));
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec!["show", "hide", "show", "hide"]
        );
    }

    #[test]
    fn dispose_hides_and_ignores_signals() {
        let (clock, sink, indicator) = setup();
        indicator.signal();
        indicator.dispose();
        assert!(!indicator.is_shown());
        assert_eq!(clock.pending(), 0);
        indicator.signal();
        clock.advance(Duration::from_secs(2));
        assert_eq!(*sink.events.lock().unwrap(), vec!["show", "hide"]);
    }
}
