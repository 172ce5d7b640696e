#![forbid(unsafe_code)]

//! The mirrored view tree.
//!
//! [`ViewTree`] is an arena of [`ViewNode`]s keyed by [`NodeId`]. Each node
//! wraps one model node, keeps its children sorted in natural order by
//! name, and records its parent as an id rather than an owning link, so
//! "navigate to parent" never keeps a detached subtree alive.
//!
//! The tree is owned by the render context. Subtrees for new model nodes
//! are built elsewhere as a [`ViewSubtree`] (indexing every path on the
//! way) and only spliced in on the render context.
//!
//! # Invariants
//!
//! - Every id reachable from the root is present in the arena exactly once
//!   and is listed exactly once in its parent's children.
//! - Children of every node are ordered by [`compare_natural`].
//! - An id is never reused: a replaced or removed node's id stays dead.
//!
//! [`ViewTree::check_consistency`] verifies these together with agreement
//! against the path index.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use thiserror::Error;
use treesync_core::{IndexError, PathIndex, compare_natural, insertion_point};

use crate::source::{ModelNode, NodeKind};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a view node. Fresh for every node ever created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn fresh() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural errors of view operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("no view node {0}")]
    NoSuchNode(NodeId),
    #[error("view node {0} has no parent")]
    Detached(NodeId),
}

/// One displayed element.
#[derive(Debug)]
pub struct ViewNode<N> {
    id: NodeId,
    model: Arc<N>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    expanded: bool,
    revision: u64,
}

impl<N> ViewNode<N> {
    fn new(model: Arc<N>, parent: Option<NodeId>) -> Self {
        Self {
            id: NodeId::fresh(),
            model,
            parent,
            children: Vec::new(),
            expanded: false,
            revision: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn model(&self) -> &Arc<N> {
        &self.model
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Number of refreshes this node has seen (in-place mode), or carried
    /// over from the node it replaced.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// A subtree built off the render context, not yet attached.
#[derive(Debug)]
pub struct ViewSubtree<N> {
    /// `nodes[0]` is the subtree root.
    nodes: Vec<ViewNode<N>>,
}

impl<N: ModelNode> ViewSubtree<N> {
    /// Wrap `model` and all its current descendants, registering each path
    /// in `index`.
    ///
    /// On a duplicate path, every entry registered by this call is rolled
    /// back before the error is returned.
    pub fn build(model: &Arc<N>, index: &PathIndex<NodeId>) -> Result<Self, IndexError> {
        let mut nodes = Vec::new();
        match build_into(model, None, index, &mut nodes) {
            Ok(()) => Ok(Self { nodes }),
            Err(err) => {
                for node in &nodes {
                    index.remove_if(&node.model.path_key(), node.id);
                }
                Err(err)
            }
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.nodes[0].id
    }

    #[must_use]
    pub fn root_model(&self) -> &Arc<N> {
        &self.nodes[0].model
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove this subtree's entries from `index` (it will not be attached).
    pub fn unindex(&self, index: &PathIndex<NodeId>) {
        for node in &self.nodes {
            index.remove_if(&node.model.path_key(), node.id);
        }
    }
}

fn build_into<N: ModelNode>(
    model: &Arc<N>,
    parent: Option<NodeId>,
    index: &PathIndex<NodeId>,
    out: &mut Vec<ViewNode<N>>,
) -> Result<(), IndexError> {
    let node = ViewNode::new(Arc::clone(model), parent);
    let id = node.id;
    index.put(&model.path_key(), id)?;
    let slot = out.len();
    out.push(node);

    let mut children = model.children();
    children.sort_by(|a, b| compare_natural(a.name(), b.name()));
    let mut ids = Vec::with_capacity(children.len());
    for child in &children {
        ids.push(out.len());
        build_into(child, Some(id), index, out)?;
    }
    let ids = ids.into_iter().map(|at| out[at].id).collect();
    out[slot].children = ids;
    Ok(())
}

/// Arena holding the displayed tree.
#[derive(Debug)]
pub struct ViewTree<N> {
    nodes: AHashMap<NodeId, ViewNode<N>>,
    root: Option<NodeId>,
    /// Old id to replacement, kept only for replaced nodes whose removal
    /// was already under way when they were refreshed.
    forwarded: AHashMap<NodeId, NodeId>,
}

impl<N> Default for ViewTree<N> {
    fn default() -> Self {
        Self {
            nodes: AHashMap::new(),
            root: None,
            forwarded: AHashMap::new(),
        }
    }
}

impl<N: ModelNode> ViewTree<N> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `subtree` the whole tree. The root starts expanded.
    pub fn install_root(&mut self, subtree: ViewSubtree<N>) -> NodeId {
        self.nodes.clear();
        self.forwarded.clear();
        let root = subtree.root();
        self.absorb(subtree);
        if let Some(node) = self.nodes.get_mut(&root) {
            node.expanded = true;
        }
        self.root = Some(root);
        root
    }

    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&ViewNode<N>> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Children of `id`, empty if `id` is unknown.
    #[must_use]
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(&id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    #[must_use]
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    #[must_use]
    pub fn model_of(&self, id: NodeId) -> Option<&Arc<N>> {
        self.nodes.get(&id).map(|n| &n.model)
    }

    #[must_use]
    pub fn name_of(&self, id: NodeId) -> &str {
        self.nodes.get(&id).map_or("", |n| n.model.name())
    }

    /// Position of `id` among its siblings.
    #[must_use]
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.children_of(parent).iter().position(|c| *c == id)
    }

    /// Follow replacements recorded by [`replace_forwarding`](Self::replace_forwarding).
    #[must_use]
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Some(next) = self.forwarded.get(&id) {
            id = *next;
        }
        id
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids in depth-first pre-order, starting at the root.
    #[must_use]
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children_of(id).iter().rev().copied());
        }
        out
    }

    /// Attach `subtree` under `parent` at its natural-order position.
    pub fn insert_sorted(
        &mut self,
        parent: NodeId,
        mut subtree: ViewSubtree<N>,
    ) -> Result<usize, ViewError> {
        let siblings = self
            .nodes
            .get(&parent)
            .map(|n| n.children.as_slice())
            .ok_or(ViewError::NoSuchNode(parent))?;
        let name = subtree.root_model().name();
        let at = insertion_point(siblings, name, |id| self.name_of(*id));

        let child = subtree.root();
        subtree.nodes[0].parent = Some(parent);
        self.absorb(subtree);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(at, child);
        }
        Ok(at)
    }

    /// Unlink `id` and its subtree, returning the removed nodes.
    pub fn detach(&mut self, id: NodeId) -> Result<Vec<ViewNode<N>>, ViewError> {
        let node = self.nodes.get(&id).ok_or(ViewError::NoSuchNode(id))?;
        let parent = node.parent.ok_or(ViewError::Detached(id))?;
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children.iter().copied());
                removed.push(node);
            }
        }
        if !self.forwarded.is_empty() {
            let gone: AHashSet<NodeId> = removed.iter().map(|n| n.id).collect();
            self.forwarded
                .retain(|from, to| !gone.contains(from) && !gone.contains(to));
        }
        Ok(removed)
    }

    /// Swap `id` for a fresh node wrapping the same model.
    ///
    /// The replacement takes over position, children, expansion state and
    /// revision (plus one). Returns the new id; `id` is dead afterwards.
    pub fn replace(&mut self, id: NodeId) -> Result<NodeId, ViewError> {
        let old = self.nodes.get(&id).ok_or(ViewError::NoSuchNode(id))?;
        let parent = old.parent.ok_or(ViewError::Detached(id))?;
        let Some(old) = self.nodes.remove(&id) else {
            return Err(ViewError::NoSuchNode(id));
        };

        let mut fresh = ViewNode::new(old.model, Some(parent));
        fresh.children = old.children;
        fresh.expanded = old.expanded;
        fresh.revision = old.revision + 1;
        let new_id = fresh.id;
        for child in &fresh.children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent = Some(new_id);
            }
        }
        self.nodes.insert(new_id, fresh);
        if let Some(parent) = self.nodes.get_mut(&parent)
            && let Some(slot) = parent.children.iter_mut().find(|c| **c == id)
        {
            *slot = new_id;
        }
        Ok(new_id)
    }

    /// Remember that `from` was replaced by `to` while its removal was
    /// pending, so the removal can still find it.
    pub fn replace_forwarding(&mut self, from: NodeId, to: NodeId) {
        self.forwarded.insert(from, to);
    }

    /// Mark `id` refreshed without changing its identity.
    pub fn touch(&mut self, id: NodeId) -> Result<u64, ViewError> {
        let node = self.nodes.get_mut(&id).ok_or(ViewError::NoSuchNode(id))?;
        node.revision += 1;
        Ok(node.revision)
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<(), ViewError> {
        let node = self.nodes.get_mut(&id).ok_or(ViewError::NoSuchNode(id))?;
        node.expanded = expanded;
        Ok(())
    }

    /// Collapse every node below the root.
    pub fn collapse_all(&mut self) {
        let root = self.root;
        for node in self.nodes.values_mut() {
            node.expanded = Some(node.id) == root;
        }
    }

    /// Expand exactly the interior nodes on a path to a node matching
    /// `predicate`, collapsing the rest. The root stays expanded.
    ///
    /// Returns how many nodes matched.
    pub fn expand_where(&mut self, mut predicate: impl FnMut(&N) -> bool) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut matched = 0;
        self.expand_below(root, &mut predicate, &mut matched);
        if let Some(root) = self.nodes.get_mut(&root) {
            root.expanded = true;
        }
        matched
    }

    /// Returns whether the subtree at `id` contains a match.
    fn expand_below(
        &mut self,
        id: NodeId,
        predicate: &mut impl FnMut(&N) -> bool,
        matched: &mut usize,
    ) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let hit = predicate(node.model.as_ref());
        let interior = node.model.kind() == NodeKind::Interior;
        let children = node.children.clone();
        if hit {
            *matched += 1;
        }

        let mut below = false;
        for child in children {
            below |= self.expand_below(child, predicate, matched);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.expanded = interior && below;
        }
        hit || below
    }

    /// Expand the root's child called `name`. Returns its id if found.
    pub fn expand_named_child(&mut self, name: &str) -> Option<NodeId> {
        let root = self.root?;
        let id = self
            .children_of(root)
            .iter()
            .copied()
            .find(|c| self.name_of(*c) == name)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.expanded = true;
        }
        Some(id)
    }

    /// Indented listing of the tree for diagnostics.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(NodeId, usize)> = self.root.map(|r| (r, 0)).into_iter().collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let _ = writeln!(
                out,
                "{:indent$}{} {} r{}{}",
                "",
                node.model.name(),
                node.id,
                node.revision,
                if node.expanded { " +" } else { "" },
                indent = depth * 2
            );
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    /// Describe every disagreement between this tree and `index`.
    ///
    /// Empty when the arena is exactly the set of nodes reachable from the
    /// root, children are sorted and parent links agree, and `index` maps
    /// each node's path to that node and nothing else.
    #[must_use]
    pub fn check_consistency(&self, index: &PathIndex<NodeId>) -> Vec<String> {
        let mut problems = Vec::new();
        let reachable = self.depth_first();
        if reachable.len() != self.nodes.len() {
            problems.push(format!(
                "{} nodes in arena, {} reachable from root",
                self.nodes.len(),
                reachable.len()
            ));
        }
        let mut seen = AHashSet::with_capacity(reachable.len());
        for id in &reachable {
            if !seen.insert(*id) {
                problems.push(format!("{id} reachable more than once"));
                continue;
            }
            let Some(node) = self.nodes.get(id) else {
                problems.push(format!("{id} listed as child but missing"));
                continue;
            };
            let path = node.model.path_key();
            match index.get(&path) {
                Some(indexed) if indexed == *id => {}
                Some(indexed) => problems.push(format!("{path}: index has {indexed}, tree has {id}")),
                None => problems.push(format!("{path}: not indexed")),
            }
            for child in &node.children {
                if self.parent_of(*child) != Some(*id) {
                    problems.push(format!("{child} under {path} has a wrong parent link"));
                }
            }
            for pair in node.children.windows(2) {
                let (a, b) = (self.name_of(pair[0]), self.name_of(pair[1]));
                if compare_natural(a, b) != std::cmp::Ordering::Less {
                    problems.push(format!("{path}: children {a:?} and {b:?} out of order"));
                }
            }
        }
        if index.len() != reachable.len() {
            problems.push(format!(
                "index holds {} paths, tree {} nodes",
                index.len(),
                reachable.len()
            ));
        }
        problems
    }

    fn absorb(&mut self, subtree: ViewSubtree<N>) {
        for node in subtree.nodes {
            self.nodes.insert(node.id, node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ConfigNode, ConfigTree, NodeSpec};
    use crate::source::SourceTree;
    use treesync_core::TreePath;

    fn sample() -> ConfigTree {
        let tree = ConfigTree::new("root");
        let root = TreePath::root("root");
        tree.add_tree(
            &root,
            &NodeSpec::component("area10")
                .with(NodeSpec::leaf("pv2"))
                .with(NodeSpec::leaf("pv1")),
        )
        .unwrap();
        tree.add_component(&root, "area2").unwrap();
        tree
    }

    fn built(source: &ConfigTree) -> (ViewTree<ConfigNode>, PathIndex<NodeId>) {
        let index = PathIndex::new();
        let mut view = ViewTree::new();
        view.install_root(ViewSubtree::build(&source.root(), &index).unwrap());
        (view, index)
    }

    fn names(view: &ViewTree<ConfigNode>, id: NodeId) -> Vec<&str> {
        view.children_of(id).iter().map(|c| view.name_of(*c)).collect()
    }

    #[test]
    fn build_sorts_and_indexes_everything() {
        let source = sample();
        let (view, index) = built(&source);
        let root = view.root().unwrap();
        assert_eq!(names(&view, root), vec!["area2", "area10"]);
        let area10 = index.get("/root/area10").unwrap();
        assert_eq!(names(&view, area10), vec!["pv1", "pv2"]);
        assert_eq!(view.len(), 5);
        assert!(view.check_consistency(&index).is_empty());
    }

    #[test]
    fn failed_build_rolls_back_index() {
        let source = sample();
        let index = PathIndex::new();
        index.put("/root/area10/pv2", NodeId(0)).unwrap();
        let err = ViewSubtree::build(&source.root(), &index).unwrap_err();
        assert_eq!(err.path(), "/root/area10/pv2");
        assert_eq!(index.paths(), vec!["/root/area10/pv2"]);
    }

    #[test]
    fn insert_sorted_places_by_natural_order() {
        let source = sample();
        let (mut view, index) = built(&source);
        let node = source.add_component(&TreePath::root("root"), "area3").unwrap();
        let subtree = ViewSubtree::build(&node, &index).unwrap();
        let root = view.root().unwrap();
        assert_eq!(view.insert_sorted(root, subtree).unwrap(), 1);
        assert_eq!(names(&view, root), vec!["area2", "area3", "area10"]);
        assert!(view.check_consistency(&index).is_empty());
    }

    #[test]
    fn detach_returns_whole_subtree() {
        let source = sample();
        let (mut view, index) = built(&source);
        let area10 = index.get("/root/area10").unwrap();
        let removed = view.detach(area10).unwrap();
        assert_eq!(removed.len(), 3);
        for node in &removed {
            index.remove_if(&node.model().path_key(), node.id());
        }
        assert!(view.check_consistency(&index).is_empty());
        assert_eq!(
            view.detach(view.root().unwrap()).unwrap_err(),
            ViewError::Detached(view.root().unwrap())
        );
    }

    #[test]
    fn replace_keeps_position_children_and_expansion() {
        let source = sample();
        let (mut view, index) = built(&source);
        let old = index.get("/root/area10").unwrap();
        view.set_expanded(old, true).unwrap();
        let kids = view.children_of(old).to_vec();

        let new = view.replace(old).unwrap();
        index.replace("/root/area10", new).unwrap();
        assert_ne!(old, new);
        assert!(!view.contains(old));
        assert_eq!(view.children_of(new), kids.as_slice());
        assert_eq!(view.index_in_parent(new), Some(1));
        let node = view.node(new).unwrap();
        assert!(node.is_expanded());
        assert_eq!(node.revision(), 1);
        assert!(view.check_consistency(&index).is_empty());
    }

    #[test]
    fn touch_bumps_revision_in_place() {
        let source = sample();
        let (mut view, index) = built(&source);
        let id = index.get("/root/area2").unwrap();
        assert_eq!(view.touch(id).unwrap(), 1);
        assert_eq!(view.touch(id).unwrap(), 2);
        assert_eq!(index.get("/root/area2"), Some(id));
    }

    #[test]
    fn forwarding_resolves_and_is_dropped_on_detach() {
        let source = sample();
        let (mut view, index) = built(&source);
        let old = index.get("/root/area2").unwrap();
        let new = view.replace(old).unwrap();
        view.replace_forwarding(old, new);
        assert_eq!(view.resolve(old), new);
        view.detach(new).unwrap();
        assert_eq!(view.resolve(old), old);
    }

    #[test]
    fn expand_where_opens_paths_to_matches() {
        let source = sample();
        source
            .update("/root/area10/pv2", |c| c.enabled = false)
            .unwrap();
        let (mut view, index) = built(&source);
        let matched = view.expand_where(|n| !n.is_enabled());
        assert_eq!(matched, 1);
        let root = view.root().unwrap();
        assert!(view.node(root).unwrap().is_expanded());
        let area10 = index.get("/root/area10").unwrap();
        let area2 = index.get("/root/area2").unwrap();
        assert!(view.node(area10).unwrap().is_expanded());
        assert!(!view.node(area2).unwrap().is_expanded());

        view.collapse_all();
        assert!(!view.node(area10).unwrap().is_expanded());
        assert!(view.node(root).unwrap().is_expanded());
    }

    #[test]
    fn expand_named_child_finds_top_level() {
        let source = sample();
        let (mut view, _index) = built(&source);
        let id = view.expand_named_child("area10").unwrap();
        assert!(view.node(id).unwrap().is_expanded());
        assert!(view.expand_named_child("pv1").is_none());
    }

    #[test]
    fn dump_lists_in_order() {
        let source = sample();
        let (view, _index) = built(&source);
        let dump = view.dump();
        let names: Vec<&str> = dump
            .lines()
            .map(|l| l.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(names, vec!["root", "area2", "area10", "pv1", "pv2"]);
        assert!(dump.lines().nth(3).unwrap().starts_with("    pv1"));
    }
}
