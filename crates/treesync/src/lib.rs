#![forbid(unsafe_code)]

//! Incremental mirroring of a live tree into a view tree.
//!
//! A [`SourceTree`] changes on its own threads and reports additions,
//! removals and content updates. A [`TreeMirror`] keeps a [`ViewTree`] in
//! step with it:
//!
//! - Structural changes are applied one by one on the render context,
//!   blocking the source until the view has caught up.
//! - Content updates are coalesced and flushed at a bounded rate.
//! - Children stay in natural order (`item2` before `item10`).
//! - The initial build can be deferred until a freshly started source
//!   has settled.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use treesync::{ConfigTree, MirrorConfig, MirrorServices, TreeMirror};
//! use treesync_core::TreePath;
//! use treesync_runtime::{InlineContext, ManualScheduler};
//!
//! let source = Arc::new(ConfigTree::new("root"));
//! let services = MirrorServices::new(
//!     Arc::new(ManualScheduler::new()),
//!     Arc::new(InlineContext),
//! );
//! let mirror = TreeMirror::new(Arc::clone(&source), MirrorConfig::default(), services)?;
//!
//! source.add_component(&TreePath::root("root"), "pump10").unwrap();
//! source.add_component(&TreePath::root("root"), "pump2").unwrap();
//! let names = mirror.with_view(|view| {
//!     let root = view.root().unwrap();
//!     view.children_of(root)
//!         .iter()
//!         .map(|c| view.name_of(*c).to_owned())
//!         .collect::<Vec<_>>()
//! })?;
//! assert_eq!(names, ["pump2", "pump10"]);
//! # Ok::<(), treesync::MirrorError>(())
//! ```

pub mod config;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod memory;
pub mod mirror;
pub mod selection;
pub mod source;
pub mod view;

pub use config::{ConfigError, MirrorConfig, RefreshMode};
pub use error::{MirrorError, Operation, Result};
pub use memory::{ConfigNode, ConfigTree, NodeContent, NodeSpec, TreeEditError};
pub use mirror::{MirrorServices, MirrorState, MirrorStats, TreeMirror};
pub use selection::{Selection, SelectionModel};
pub use source::{ListenerId, ModelNode, NodeKind, SourceTree, TreeListener};
pub use view::{NodeId, ViewError, ViewNode, ViewSubtree, ViewTree};
