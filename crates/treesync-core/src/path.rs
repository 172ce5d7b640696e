#![forbid(unsafe_code)]

//! Hierarchical node paths.
//!
//! A [`TreePath`] is the identity of a node: its name segments from the root
//! down, rendered `/`-joined with a leading `/` (`/Accelerator/Vacuum/PV1`).
//! Two nodes of one tree never share a path at the same instant.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Errors from parsing a textual path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path {path:?} contains an empty segment")]
    EmptySegment { path: String },
}

/// Path of a node, root segment first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// Path of a tree root.
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Build a path from its segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment {
                path: segments.join("/"),
            });
        }
        Ok(Self { segments })
    }

    /// Path of a child named `name` below this one.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        Self { segments }
    }

    /// Path of the parent, `None` for a root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments; a root has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Whether `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &TreePath) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = PathError;

    /// Parse `/a/b/c` (the leading separator is optional).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix(SEPARATOR).unwrap_or(s);
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        Self::from_segments(trimmed.split(SEPARATOR)).map_err(|_| PathError::EmptySegment {
            path: s.to_owned(),
        })
    }
}
