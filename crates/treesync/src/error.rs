use std::fmt;

use thiserror::Error;
use treesync_core::IndexError;
use treesync_runtime::HandoffError;

use crate::view::ViewError;

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Which mirror step a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Build,
    Add,
    Remove,
    Update,
    Flush,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "build",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
            Self::Flush => "flush",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("{operation}: view node for {path} already exists")]
    DuplicatePath { operation: Operation, path: String },

    #[error("{operation}: no view node for {path}")]
    UnknownPath { operation: Operation, path: String },

    #[error("{operation}: no view node for the parent of {path}")]
    MissingParent { operation: Operation, path: String },

    #[error("{operation}: view node for {path} is not attached to a parent")]
    DetachedNode { operation: Operation, path: String },

    #[error("invalid mirror configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("mirror is disposed")]
    Disposed,

    #[error("startup was abandoned: the source stopped before the view was built")]
    Abandoned,

    #[error("render hand-off failed: {0}")]
    Handoff(#[from] HandoffError),
}

impl MirrorError {
    pub(crate) fn from_index(operation: Operation, err: IndexError) -> Self {
        match err {
            IndexError::DuplicatePath { path } => Self::DuplicatePath { operation, path },
            IndexError::UnknownPath { path } => Self::UnknownPath { operation, path },
        }
    }

    pub(crate) fn from_view(operation: Operation, path: impl Into<String>, err: &ViewError) -> Self {
        let path = path.into();
        match err {
            ViewError::NoSuchNode(_) => Self::UnknownPath { operation, path },
            ViewError::Detached(_) => Self::DetachedNode { operation, path },
        }
    }

    pub(crate) fn unknown(operation: Operation, path: impl Into<String>) -> Self {
        Self::UnknownPath {
            operation,
            path: path.into(),
        }
    }

    /// Source and view disagree: the source broke its event contract or
    /// the mirror lost track of a node.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePath { .. }
                | Self::UnknownPath { .. }
                | Self::MissingParent { .. }
                | Self::DetachedNode { .. }
        )
    }

    /// Path the failure concerns, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::DuplicatePath { path, .. }
            | Self::UnknownPath { path, .. }
            | Self::MissingParent { path, .. }
            | Self::DetachedNode { path, .. } => Some(path),
            _ => None,
        }
    }
}
