#![forbid(unsafe_code)]

//! Core: leaf data structures for mirroring a live tree into a view.
//!
//! # Role in treesync
//! `treesync-core` owns the pieces every other layer leans on and that carry
//! no notion of threads or time of their own:
//!
//! - [`TreePath`]: hierarchical node identity (`/root/area/pv`).
//! - [`compare_natural`] / [`insertion_point`]: the ordering children are
//!   kept in.
//! - [`PathIndex`]: concurrent path to view-node lookup, the consistency
//!   backbone of the mirror.
//! - [`StartupGate`]: one-shot barrier that holds back event processing
//!   until the initial view has been materialized.
//!
//! # How it fits in the system
//! `treesync-runtime` builds the timing and thread-handoff services on top,
//! and `treesync` wires both into the `TreeMirror` engine.

pub mod gate;
pub mod index;
pub mod natural;
pub mod path;

pub use gate::{GateState, StartupGate};
pub use index::{IndexError, PathIndex};
pub use natural::{compare_natural, insertion_point};
pub use path::{PathError, TreePath};
