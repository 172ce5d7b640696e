#![forbid(unsafe_code)]

//! The tree mirror: keeps a [`ViewTree`] in step with a live [`SourceTree`].
//!
//! # Event flow
//!
//! ```text
//! source thread ──added──▶ build ViewSubtree + index ──run_and_wait──▶ render: insert_sorted
//!               ──removed─▶ unindex subtree ───────────run_and_wait──▶ render: detach + sweep
//!               ──updated─▶ mark path dirty ──trigger──▶ UpdateThrottle
//!                                                          │ (scheduler thread)
//!                                                          └─run_and_wait──▶ render: flush_updates
//! ```
//!
//! Structural events block the source's delivery thread until the render
//! context has applied them, so a flood of additions is slowed down to what
//! the view can absorb. Content updates never block on rendering: they are
//! coalesced into a pending set and applied by the throttle's flush.
//!
//! # Startup
//!
//! With a zero startup delay the view is built while subscribing. With a
//! delay, listener callbacks park on the [`StartupGate`] until the delayed
//! build has run; if the source stopped in the meantime the gate is
//! abandoned and parked events are dropped.
//!
//! Building happens inside [`SourceTree::subscribe`]'s `init`, under the
//! source's own exclusion, and the install job is queued on the render
//! context before the subscription can deliver anything. Render jobs run
//! in submission order, so every event is applied to the installed tree.
//!
//! # Failure Modes
//!
//! Protocol violations (adding an existing path, removing or updating an
//! unknown one, a missing parent) are returned from `on_*` and, when they
//! arrive through the listener, logged at error level with a dump of the
//! view and counted in [`MirrorStats::protocol_violations`]. A failed
//! hand-off to the render context is logged and otherwise ignored.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak, mpsc};

use ahash::{AHashMap, AHashSet};
use treesync_core::{GateState, PathIndex, StartupGate};
use treesync_runtime::{
    ChangeIndicator, HandoffError, IndicatorSink, NoopIndicator, RenderContext, Scheduler,
    TaskHandle, ThrottleStats, UpdateThrottle,
};

use crate::config::{MirrorConfig, RefreshMode};
use crate::error::{MirrorError, Operation, Result};
use crate::selection::{Selection, SelectionModel, retain_selected, substitute_into};
use crate::source::{ListenerId, ModelNode, SourceTree, TreeListener};
use crate::view::{NodeId, ViewSubtree, ViewTree};

/// Collaborators a mirror runs against.
#[derive(Clone)]
pub struct MirrorServices {
    pub scheduler: Arc<dyn Scheduler>,
    pub render: Arc<dyn RenderContext>,
    pub selection: Arc<dyn SelectionModel>,
    pub indicator: Arc<dyn IndicatorSink>,
}

impl MirrorServices {
    /// Services with a fresh [`Selection`] and no visible indicator.
    pub fn new(scheduler: Arc<dyn Scheduler>, render: Arc<dyn RenderContext>) -> Self {
        Self {
            scheduler,
            render,
            selection: Arc::new(Selection::new()),
            indicator: Arc::new(NoopIndicator),
        }
    }

    #[must_use]
    pub fn with_selection(mut self, selection: Arc<dyn SelectionModel>) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn with_indicator(mut self, indicator: Arc<dyn IndicatorSink>) -> Self {
        self.indicator = indicator;
        self
    }
}

impl fmt::Debug for MirrorServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorServices").finish_non_exhaustive()
    }
}

/// Lifecycle of a [`TreeMirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Constructed, startup not begun.
    Unbound,
    /// Waiting for (or running) the initial build.
    Building,
    /// Subscribed and applying events.
    Live,
    /// Disposed; no further events are processed.
    Disposed,
    /// The source stopped before the delayed build ran.
    Abandoned,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub adds: u64,
    pub removes: u64,
    pub updates: u64,
    pub flushes: u64,
    /// Nodes refreshed by flushes (replaced or touched).
    pub replaced: u64,
    pub protocol_violations: u64,
}

#[derive(Default)]
struct Counters {
    adds: AtomicU64,
    removes: AtomicU64,
    updates: AtomicU64,
    flushes: AtomicU64,
    replaced: AtomicU64,
    protocol_violations: AtomicU64,
}

/// Paths waiting for a refresh, each once, in the order first marked.
#[derive(Debug, Default)]
struct PendingUpdates {
    order: Vec<String>,
    members: AHashSet<String>,
}

impl PendingUpdates {
    fn mark(&mut self, path: String) -> bool {
        if self.members.contains(&path) {
            return false;
        }
        self.members.insert(path.clone());
        self.order.push(path);
        true
    }

    fn take(&mut self) -> Vec<String> {
        self.members.clear();
        std::mem::take(&mut self.order)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Mirrors a [`SourceTree`] into a [`ViewTree`] owned by a render context.
///
/// Dropping the mirror disposes it.
pub struct TreeMirror<S: SourceTree> {
    shared: Arc<Shared<S>>,
}

struct Shared<S: SourceTree> {
    source: Arc<S>,
    config: MirrorConfig,
    render: Arc<dyn RenderContext>,
    scheduler: Arc<dyn Scheduler>,
    selection: Arc<dyn SelectionModel>,
    index: PathIndex<NodeId>,
    /// Only locked from the render context.
    view: Mutex<ViewTree<S::Node>>,
    pending: Mutex<PendingUpdates>,
    gate: StartupGate,
    throttle: UpdateThrottle,
    indicator: ChangeIndicator,
    state: Mutex<MirrorState>,
    listener: Mutex<Option<ListenerId>>,
    startup: Mutex<Option<TaskHandle>>,
    counters: Counters,
}

impl<S: SourceTree> TreeMirror<S> {
    /// Create a mirror of `source` and start it.
    ///
    /// With `startup_delay_ms == 0` the view is built before this returns;
    /// the source should not have started emitting yet. Otherwise the build
    /// is scheduled after the delay and expects a running source.
    pub fn new(source: Arc<S>, config: MirrorConfig, services: MirrorServices) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MirrorError::InvalidConfig(errors));
        }
        let delay = config.startup_delay();
        let MirrorServices {
            scheduler,
            render,
            selection,
            indicator,
        } = services;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared<S>>| {
            let flush_target = weak.clone();
            Shared {
                throttle: UpdateThrottle::new(
                    config.to_throttle_config(),
                    Arc::clone(&scheduler),
                    move || match flush_target.upgrade() {
                        Some(shared) => shared.flush_on_render().map(|_| ()),
                        None => Ok(()),
                    },
                ),
                indicator: ChangeIndicator::new(
                    config.to_indicator_config(),
                    Arc::clone(&scheduler),
                    Arc::clone(&render),
                    indicator,
                ),
                gate: StartupGate::for_delay(delay),
                source,
                config,
                render,
                scheduler,
                selection,
                index: PathIndex::new(),
                view: Mutex::new(ViewTree::new()),
                pending: Mutex::new(PendingUpdates::default()),
                state: Mutex::new(MirrorState::Unbound),
                listener: Mutex::new(None),
                startup: Mutex::new(None),
                counters: Counters::default(),
            }
        });

        let mirror = Self { shared };
        mirror
            .shared
            .transition(MirrorState::Unbound, MirrorState::Building);
        if delay.is_zero() {
            mirror.shared.start()?;
        } else {
            let weak = Arc::downgrade(&mirror.shared);
            let handle = mirror.shared.scheduler.schedule(
                delay,
                Box::new(move || {
                    if let Some(shared) = weak.upgrade()
                        && let Err(err) = shared.start()
                    {
                        shared.report(Operation::Build, &err);
                    }
                }),
            );
            *lock(&mirror.shared.startup) = Some(handle);
            tracing::debug!(
                target: "treesync.mirror",
                delay_ms = mirror.shared.config.startup_delay_ms,
                "tree startup delayed"
            );
        }
        Ok(mirror)
    }

    /// Apply an addition reported by the source.
    pub fn on_add(&self, node: &Arc<S::Node>) -> Result<()> {
        self.shared.on_add(node)
    }

    /// Apply a removal reported by the source.
    pub fn on_remove(&self, node: &Arc<S::Node>) -> Result<()> {
        self.shared.on_remove(node)
    }

    /// Mark `node` for refresh at the next throttled flush.
    pub fn on_update(&self, node: &Arc<S::Node>) -> Result<()> {
        self.shared.on_update(node)
    }

    /// Refresh every node marked since the last flush, now.
    ///
    /// Returns how many nodes were refreshed.
    pub fn flush_updates(&self) -> Result<usize> {
        self.shared.on_render(|shared| shared.flush_updates())?
    }

    /// Stop mirroring. Idempotent.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    #[must_use]
    pub fn state(&self) -> MirrorState {
        *lock(&self.shared.state)
    }

    /// Run `f` against the view on the render context.
    pub fn with_view<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&ViewTree<S::Node>) -> R + Send + 'static,
    {
        Ok(self.shared.on_render(move |shared| {
            let view = shared.lock_view();
            f(&*view)
        })?)
    }

    /// Structural problems between view and index; empty when consistent.
    pub fn check_consistency(&self) -> Result<Vec<String>> {
        Ok(self
            .shared
            .on_render(|shared| shared.lock_view().check_consistency(&shared.index))?)
    }

    /// Collapse everything below the root.
    pub fn collapse_all(&self) -> Result<()> {
        Ok(self.shared.on_render(|shared| shared.lock_view().collapse_all())?)
    }

    /// Expand the interior nodes leading to nodes matching `predicate`.
    pub fn expand_where<F>(&self, predicate: F) -> Result<usize>
    where
        F: FnMut(&S::Node) -> bool + Send + 'static,
    {
        Ok(self
            .shared
            .on_render(move |shared| shared.lock_view().expand_where(predicate))?)
    }

    #[must_use]
    pub fn path_index(&self) -> &PathIndex<NodeId> {
        &self.shared.index
    }

    #[must_use]
    pub fn selection(&self) -> &Arc<dyn SelectionModel> {
        &self.shared.selection
    }

    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn stats(&self) -> MirrorStats {
        let c = &self.shared.counters;
        MirrorStats {
            adds: c.adds.load(Ordering::Relaxed),
            removes: c.removes.load(Ordering::Relaxed),
            updates: c.updates.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            replaced: c.replaced.load(Ordering::Relaxed),
            protocol_violations: c.protocol_violations.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn throttle_stats(&self) -> ThrottleStats {
        self.shared.throttle.stats()
    }

    /// Paths currently waiting for a flush.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    #[must_use]
    pub fn is_changing(&self) -> bool {
        self.shared.indicator.is_shown()
    }

    /// Wait until every render job submitted so far has run.
    pub fn sync(&self) -> Result<()> {
        Ok(self.shared.render.run_and_wait(Box::new(|| {}))?)
    }
}

impl<S: SourceTree> Drop for TreeMirror<S> {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl<S: SourceTree> fmt::Debug for TreeMirror<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeMirror")
            .field("state", &self.state())
            .field("indexed", &self.shared.index.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<S: SourceTree> Shared<S> {
    fn lock_view(&self) -> MutexGuard<'_, ViewTree<S::Node>> {
        lock(&self.view)
    }

    fn state(&self) -> MirrorState {
        *lock(&self.state)
    }

    /// Move from `from` to `to`; false if the mirror was elsewhere.
    fn transition(&self, from: MirrorState, to: MirrorState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn is_disposed(&self) -> bool {
        self.state() == MirrorState::Disposed
    }

    /// Run `f` on the render context and hand back its result.
    fn on_render<R, F>(self: &Arc<Self>, f: F) -> std::result::Result<R, HandoffError>
    where
        R: Send + 'static,
        F: FnOnce(&Self) -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let shared = Arc::clone(self);
        self.render.run_and_wait(Box::new(move || {
            let _ = tx.send(f(shared.as_ref()));
        }))?;
        rx.recv().map_err(|_| HandoffError::Disconnected)
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != MirrorState::Building {
            return Ok(());
        }
        let delayed = !self.config.startup_delay().is_zero();
        if delayed && !self.source.is_running() {
            tracing::warn!(target: "treesync.mirror", "source stopped while waiting for tree startup");
            self.transition(MirrorState::Building, MirrorState::Abandoned);
            self.gate.abandon();
            return Err(MirrorError::Abandoned);
        }

        let listener: Arc<dyn TreeListener<S::Node>> = Arc::new(MirrorListener {
            shared: Arc::downgrade(self),
        });
        let mut built: Option<Result<usize>> = None;
        let id = self.source.subscribe(listener, &mut |root: &Arc<S::Node>| {
            built = Some(self.install_root(root));
        });
        *lock(&self.listener) = Some(id);

        let outcome = built
            .unwrap_or_else(|| Err(MirrorError::unknown(Operation::Build, "<root>")))
            .and_then(|nodes| {
                if !self.render.is_render_thread() {
                    self.render.run_and_wait(Box::new(|| {}))?;
                }
                Ok(nodes)
            });
        let nodes = match outcome {
            Ok(nodes) => nodes,
            Err(err) => {
                self.source.unsubscribe(id);
                lock(&self.listener).take();
                self.transition(MirrorState::Building, MirrorState::Abandoned);
                self.gate.abandon();
                return Err(err);
            }
        };

        if !self.transition(MirrorState::Building, MirrorState::Live) {
            // Disposed while building.
            self.source.unsubscribe(id);
            return Err(MirrorError::Disposed);
        }
        if delayed {
            self.indicator.signal();
        }
        self.gate.open();
        tracing::info!(target: "treesync.mirror", nodes, delayed, "tree mirror live");
        Ok(())
    }

    /// Build the initial view from `root` and queue its installation.
    ///
    /// Runs inside `subscribe`, so nothing here may call into the source.
    fn install_root(self: &Arc<Self>, root: &Arc<S::Node>) -> Result<usize> {
        let subtree = ViewSubtree::build(root, &self.index)
            .map_err(|err| MirrorError::from_index(Operation::Build, err))?;
        let nodes = subtree.len();
        let shared = Arc::clone(self);
        let install = move || shared.apply_root(subtree);
        if self.render.is_render_thread() {
            install();
        } else {
            self.render.run_later(Box::new(install))?;
        }
        Ok(nodes)
    }

    fn apply_root(&self, subtree: ViewSubtree<S::Node>) {
        let mut view = self.lock_view();
        view.install_root(subtree);
        if let Some(focus) = &self.config.focus_item
            && view.expand_named_child(focus).is_none()
        {
            tracing::debug!(target: "treesync.mirror", focus = %focus, "focus item not found");
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    /// Wait for startup, then check the mirror still accepts events.
    fn admit(&self) -> Result<()> {
        if self.gate.await_open() != GateState::Open {
            return Err(if self.is_disposed() {
                MirrorError::Disposed
            } else {
                MirrorError::Abandoned
            });
        }
        if self.is_disposed() {
            return Err(MirrorError::Disposed);
        }
        Ok(())
    }

    fn on_add(self: &Arc<Self>, node: &Arc<S::Node>) -> Result<()> {
        self.admit()?;
        let path = node.path_key();
        let missing_parent = || MirrorError::MissingParent {
            operation: Operation::Add,
            path: path.clone(),
        };
        let parent_path = node.parent().map(|p| p.path_key()).ok_or_else(missing_parent)?;
        let parent = self.index.get(&parent_path).ok_or_else(missing_parent)?;
        let subtree = ViewSubtree::build(node, &self.index)
            .map_err(|err| MirrorError::from_index(Operation::Add, err))?;

        self.counters.adds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "treesync.mirror", path = %path, nodes = subtree.len(), "add");
        match self.on_render(move |shared| shared.attach(parent, &parent_path, subtree)) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(target: "treesync.mirror", path = %path, error = %err, "add not applied");
                Ok(())
            }
        }
    }

    /// Render side of an addition.
    ///
    /// A flush may have replaced the parent since `parent` was looked up,
    /// so the index is consulted again here.
    fn attach(
        &self,
        parent: NodeId,
        parent_path: &str,
        subtree: ViewSubtree<S::Node>,
    ) -> Result<()> {
        let mut view = self.lock_view();
        let parent = self
            .index
            .get(parent_path)
            .unwrap_or_else(|| view.resolve(parent));
        if !view.contains(parent) {
            // The parent went away between lookup and hand-off.
            subtree.unindex(&self.index);
            return Err(MirrorError::MissingParent {
                operation: Operation::Add,
                path: subtree.root_model().path_key(),
            });
        }
        let path = subtree.root_model().path_key();
        view.insert_sorted(parent, subtree)
            .map_err(|err| MirrorError::from_view(Operation::Add, path, &err))?;
        drop(view);
        self.indicator.signal();
        Ok(())
    }

    fn on_remove(self: &Arc<Self>, node: &Arc<S::Node>) -> Result<()> {
        self.admit()?;
        let path = node.path_key();
        let id = self
            .index
            .remove(&path)
            .map_err(|err| MirrorError::from_index(Operation::Remove, err))?;
        let descendants = self.unindex_descendants(node);

        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "treesync.mirror", path = %path, descendants, "remove");
        let log_path = path.clone();
        match self.on_render(move |shared| shared.detach(id, &path)) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(target: "treesync.mirror", path = %log_path, error = %err, "remove not applied");
                Ok(())
            }
        }
    }

    /// Drop index entries for the model's current descendants.
    fn unindex_descendants(&self, node: &Arc<S::Node>) -> usize {
        let mut removed = 0;
        for child in node.children() {
            if self.index.remove(&child.path_key()).is_ok() {
                removed += 1;
            }
            removed += self.unindex_descendants(&child);
        }
        removed
    }

    /// Render side of a removal.
    fn detach(&self, id: NodeId, path: &str) -> Result<()> {
        let mut view = self.lock_view();
        let id = view.resolve(id);
        let removed = view
            .detach(id)
            .map_err(|err| MirrorError::from_view(Operation::Remove, path, &err))?;
        drop(view);

        // The view's own children cover descendants the model no longer lists.
        let mut gone = AHashSet::with_capacity(removed.len());
        for node in &removed {
            self.index.remove_if(&node.model().path_key(), node.id());
            gone.insert(node.id());
        }
        retain_selected(self.selection.as_ref(), |id| !gone.contains(&id));
        self.indicator.signal();
        Ok(())
    }

    fn on_update(&self, node: &Arc<S::Node>) -> Result<()> {
        self.admit()?;
        let path = node.path_key();
        if !self.index.contains(&path) {
            return Err(MirrorError::unknown(Operation::Update, path));
        }
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        let fresh = lock(&self.pending).mark(path);
        tracing::trace!(target: "treesync.mirror", fresh, "update marked");
        self.throttle.trigger();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Throttle callback, on the scheduler's thread.
    fn flush_on_render(self: &Arc<Self>) -> Result<usize> {
        if self.is_disposed() {
            return Ok(0);
        }
        self.on_render(|shared| shared.flush_updates())?
    }

    /// Refresh every marked node. Render context only.
    fn flush_updates(&self) -> Result<usize> {
        let paths = lock(&self.pending).take();
        if paths.is_empty() {
            return Ok(0);
        }
        let mut view = self.lock_view();
        let mut replaced = AHashMap::new();
        let mut refreshed = 0usize;
        for path in &paths {
            // Removed since it was marked.
            let Some(id) = self.index.get(path) else {
                continue;
            };
            // Not attached yet, or the root.
            if view.parent_of(id).is_none() {
                continue;
            }
            match self.config.refresh_mode {
                RefreshMode::Replace => {
                    let fresh = view
                        .replace(id)
                        .map_err(|err| MirrorError::from_view(Operation::Flush, path.as_str(), &err))?;
                    if self.index.replace(path, fresh).is_err() {
                        // A removal of this path is already queued behind us.
                        view.replace_forwarding(id, fresh);
                    }
                    replaced.insert(id, fresh);
                }
                RefreshMode::InPlace => {
                    view.touch(id)
                        .map_err(|err| MirrorError::from_view(Operation::Flush, path.as_str(), &err))?;
                }
            }
            refreshed += 1;
        }
        drop(view);

        substitute_into(self.selection.as_ref(), &replaced);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .replaced
            .fetch_add(refreshed as u64, Ordering::Relaxed);
        tracing::debug!(
            target: "treesync.mirror",
            marked = paths.len(),
            refreshed,
            "flushed updates"
        );
        Ok(refreshed)
    }

    // -----------------------------------------------------------------------
    // Reporting and disposal
    // -----------------------------------------------------------------------

    fn report(self: &Arc<Self>, operation: Operation, err: &MirrorError) {
        if err.is_protocol_violation() {
            self.counters
                .protocol_violations
                .fetch_add(1, Ordering::Relaxed);
            let tree = self
                .on_render(|shared| shared.lock_view().dump())
                .unwrap_or_else(|e| format!("<view unavailable: {e}>"));
            tracing::error!(
                target: "treesync.mirror",
                %operation,
                path = err.path().unwrap_or_default(),
                error = %err,
                tree = %tree,
                "view diverged from source"
            );
            return;
        }
        match err {
            MirrorError::Disposed | MirrorError::Abandoned => {
                tracing::debug!(target: "treesync.mirror", %operation, error = %err, "event dropped");
            }
            _ => {
                tracing::warn!(target: "treesync.mirror", %operation, error = %err, "event failed");
            }
        }
    }

    fn dispose(&self) {
        {
            let mut state = lock(&self.state);
            if *state == MirrorState::Disposed {
                return;
            }
            *state = MirrorState::Disposed;
        }
        if let Some(task) = lock(&self.startup).take() {
            task.cancel();
        }
        if let Some(id) = lock(&self.listener).take() {
            self.source.unsubscribe(id);
        }
        self.throttle.dispose();
        self.indicator.dispose();
        self.gate.abandon();
        lock(&self.pending).take();
        self.index.clear();
        tracing::info!(target: "treesync.mirror", "tree mirror disposed");
    }
}

/// Adapts source callbacks to the mirror's handlers.
struct MirrorListener<S: SourceTree> {
    shared: Weak<Shared<S>>,
}

impl<S: SourceTree> MirrorListener<S> {
    fn dispatch(
        &self,
        operation: Operation,
        node: &Arc<S::Node>,
        handler: impl FnOnce(&Arc<Shared<S>>, &Arc<S::Node>) -> Result<()>,
    ) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if let Err(err) = handler(&shared, node) {
            shared.report(operation, &err);
        }
    }
}

impl<S: SourceTree> TreeListener<S::Node> for MirrorListener<S> {
    fn added(&self, node: &Arc<S::Node>) {
        self.dispatch(Operation::Add, node, |shared, node| shared.on_add(node));
    }

    fn removed(&self, node: &Arc<S::Node>) {
        self.dispatch(Operation::Remove, node, |shared, node| shared.on_remove(node));
    }

    fn updated(&self, node: &Arc<S::Node>) {
        self.dispatch(Operation::Update, node, |shared, node| shared.on_update(node));
    }
}
