#![forbid(unsafe_code)]

//! The observed side: a live tree that changes on its own threads.
//!
//! A [`SourceTree`] owns [`ModelNode`]s and reports every structural and
//! content change to its subscribed [`TreeListener`]s. The mirror only
//! relies on the contract spelled out here:
//!
//! - Every node has a unique path; a node's path is its parent's path plus
//!   its own name.
//! - `added` for a node arrives after its parent exists. The node may
//!   already carry children; the mirror materializes the whole subtree.
//! - `removed` is reported for the top of a removed subtree only. The node
//!   keeps its children so the mirror can find every descendant.
//! - Events for one listener are delivered in mutation order.
//! - [`SourceTree::subscribe`] runs `init` against the root atomically with
//!   registering the listener: no mutation can fall between the snapshot
//!   `init` observes and the first event the listener receives.

use std::fmt;
use std::sync::Arc;

use treesync_core::TreePath;

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Cannot have children (a single value, a channel, a setting).
    Leaf,
    /// May have children.
    Interior,
}

/// A node of the observed tree.
pub trait ModelNode: Send + Sync + 'static {
    /// Full path of this node. Unique within its tree.
    fn path(&self) -> TreePath;

    /// Last path segment.
    fn name(&self) -> &str;

    /// `None` for the root (or a node already detached from its tree).
    fn parent(&self) -> Option<Arc<Self>>
    where
        Self: Sized;

    /// Snapshot of the current children, in source order.
    fn children(&self) -> Vec<Arc<Self>>
    where
        Self: Sized;

    fn kind(&self) -> NodeKind;

    /// String form of [`path`](Self::path), the key the mirror indexes by.
    fn path_key(&self) -> String {
        self.path().to_string()
    }
}

/// Receiver of change notifications.
///
/// Callbacks run on the source's delivery thread and may block it.
pub trait TreeListener<N: ModelNode>: Send + Sync {
    /// `node` (and whatever subtree it carries) now exists.
    fn added(&self, node: &Arc<N>);

    /// `node` and its subtree are gone.
    fn removed(&self, node: &Arc<N>);

    /// Non-structural content of `node` changed.
    fn updated(&self, node: &Arc<N>);
}

/// Token returned by [`SourceTree::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// A live tree that can be observed.
pub trait SourceTree: Send + Sync + 'static {
    type Node: ModelNode;

    fn root(&self) -> Arc<Self::Node>;

    /// Whether the source is (still) producing events.
    fn is_running(&self) -> bool;

    /// Register `listener`, calling `init` with the root first.
    ///
    /// `init` and the registration happen under the same exclusion as
    /// mutations, so `init` sees exactly the state that precedes the first
    /// event delivered to `listener`. `init` must not call back into the
    /// source.
    fn subscribe(
        &self,
        listener: Arc<dyn TreeListener<Self::Node>>,
        init: &mut dyn FnMut(&Arc<Self::Node>),
    ) -> ListenerId;

    /// Stop delivering to the listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: ListenerId);
}
