#![forbid(unsafe_code)]

//! Thread-safe in-memory [`SourceTree`].
//!
//! [`ConfigTree`] is a hierarchy of components (interior nodes) and leaves,
//! each carrying a small [`NodeContent`] payload. Any thread may mutate it;
//! each mutation notifies subscribers while still holding the structural
//! lock, so listeners see changes in exactly the order they were applied.
//! Listeners must therefore not mutate the tree from inside a callback.
//!
//! The listener list itself is copy-on-write (`arc-swap`) and independent of
//! the structural lock: [`unsubscribe`](SourceTree::unsubscribe) never waits
//! for a mutation in progress.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ahash::AHashMap;
use arc_swap::ArcSwap;
use thiserror::Error;
use treesync_core::TreePath;

use crate::source::{ListenerId, ModelNode, NodeKind, SourceTree, TreeListener};

/// Rejected edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeEditError {
    #[error("no node at {path}")]
    NoSuchNode { path: String },
    #[error("node {path} already exists")]
    AlreadyExists { path: String },
    #[error("{path} is a leaf and cannot have children")]
    LeafParent { path: String },
    #[error("the root node cannot be removed")]
    RootRemoval,
    #[error("invalid node name {name:?}")]
    InvalidName { name: String },
}

/// Mutable, non-structural payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContent {
    pub description: String,
    pub enabled: bool,
}

impl Default for NodeContent {
    fn default() -> Self {
        Self {
            description: String::new(),
            enabled: true,
        }
    }
}

/// A node of a [`ConfigTree`].
pub struct ConfigNode {
    path: TreePath,
    kind: NodeKind,
    parent: Weak<ConfigNode>,
    children: Mutex<Vec<Arc<ConfigNode>>>,
    content: Mutex<NodeContent>,
}

impl fmt::Debug for ConfigNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigNode")
            .field("path", &self.path.to_string())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ConfigNode {
    fn new(path: TreePath, kind: NodeKind, parent: Weak<ConfigNode>) -> Arc<Self> {
        Arc::new(Self {
            path,
            kind,
            parent,
            children: Mutex::new(Vec::new()),
            content: Mutex::new(NodeContent::default()),
        })
    }

    fn lock_children(&self) -> MutexGuard<'_, Vec<Arc<ConfigNode>>> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current payload.
    #[must_use]
    pub fn content(&self) -> NodeContent {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enabled
    }
}

impl ModelNode for ConfigNode {
    fn path(&self) -> TreePath {
        self.path.clone()
    }

    fn name(&self) -> &str {
        self.path.name()
    }

    fn parent(&self) -> Option<Arc<Self>> {
        self.parent.upgrade()
    }

    fn children(&self) -> Vec<Arc<Self>> {
        self.lock_children().clone()
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// Blueprint for a subtree added in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn component(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Interior,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

type Listeners = Vec<(ListenerId, Arc<dyn TreeListener<ConfigNode>>)>;

/// In-memory live tree.
pub struct ConfigTree {
    root: Arc<ConfigNode>,
    /// Path string to node, for every node currently in the tree.
    structure: Mutex<AHashMap<String, Arc<ConfigNode>>>,
    listeners: ArcSwap<Listeners>,
    next_listener: AtomicU64,
    running: AtomicBool,
}

impl fmt::Debug for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTree")
            .field("root", &self.root.path.to_string())
            .field("nodes", &self.len())
            .field("listeners", &self.listeners.load().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ConfigTree {
    /// A tree holding only its root component. Not running yet.
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = ConfigNode::new(TreePath::root(root_name), NodeKind::Interior, Weak::new());
        let mut structure = AHashMap::new();
        structure.insert(root.path.to_string(), Arc::clone(&root));
        Self {
            root,
            structure: Mutex::new(structure),
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_listener: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_structure().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[must_use]
    pub fn find(&self, path: &str) -> Option<Arc<ConfigNode>> {
        self.lock_structure().get(path).cloned()
    }

    /// Sorted paths of every node.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock_structure().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn add_component(
        &self,
        parent: &TreePath,
        name: &str,
    ) -> Result<Arc<ConfigNode>, TreeEditError> {
        self.add_tree(parent, &NodeSpec::component(name))
    }

    pub fn add_leaf(&self, parent: &TreePath, name: &str) -> Result<Arc<ConfigNode>, TreeEditError> {
        self.add_tree(parent, &NodeSpec::leaf(name))
    }

    /// Add a whole subtree under `parent`, reported as a single addition.
    pub fn add_tree(
        &self,
        parent: &TreePath,
        spec: &NodeSpec,
    ) -> Result<Arc<ConfigNode>, TreeEditError> {
        let mut structure = self.lock_structure();
        let parent_node = structure
            .get(&parent.to_string())
            .cloned()
            .ok_or_else(|| TreeEditError::NoSuchNode {
                path: parent.to_string(),
            })?;
        if parent_node.kind == NodeKind::Leaf {
            return Err(TreeEditError::LeafParent {
                path: parent.to_string(),
            });
        }
        validate_spec(parent, spec, &structure)?;

        let node = materialize(&parent_node, spec, &mut structure);
        parent_node.lock_children().push(Arc::clone(&node));
        tracing::trace!(target: "treesync.source", path = %node.path, "node added");
        for (_, listener) in self.listeners.load_full().iter() {
            listener.added(&node);
        }
        Ok(node)
    }

    /// Remove the node at `path` with its subtree.
    pub fn remove(&self, path: &str) -> Result<Arc<ConfigNode>, TreeEditError> {
        let mut structure = self.lock_structure();
        let node = structure
            .get(path)
            .cloned()
            .ok_or_else(|| TreeEditError::NoSuchNode { path: path.into() })?;
        let Some(parent) = node.parent.upgrade() else {
            return Err(TreeEditError::RootRemoval);
        };
        parent
            .lock_children()
            .retain(|child| !Arc::ptr_eq(child, &node));
        forget_subtree(&node, &mut structure);
        tracing::trace!(target: "treesync.source", path, "node removed");
        for (_, listener) in self.listeners.load_full().iter() {
            listener.removed(&node);
        }
        Ok(node)
    }

    /// Change the payload of the node at `path` and report the update.
    pub fn update(
        &self,
        path: &str,
        edit: impl FnOnce(&mut NodeContent),
    ) -> Result<(), TreeEditError> {
        let structure = self.lock_structure();
        let node = structure
            .get(path)
            .ok_or_else(|| TreeEditError::NoSuchNode { path: path.into() })?;
        edit(&mut node.content.lock().unwrap_or_else(|e| e.into_inner()));
        for (_, listener) in self.listeners.load_full().iter() {
            listener.updated(node);
        }
        Ok(())
    }

    fn lock_structure(&self) -> MutexGuard<'_, AHashMap<String, Arc<ConfigNode>>> {
        self.structure.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SourceTree for ConfigTree {
    type Node = ConfigNode;

    fn root(&self) -> Arc<ConfigNode> {
        Arc::clone(&self.root)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn subscribe(
        &self,
        listener: Arc<dyn TreeListener<ConfigNode>>,
        init: &mut dyn FnMut(&Arc<ConfigNode>),
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let _structure = self.lock_structure();
        init(&self.root);
        self.listeners.rcu(|current| {
            let mut next = Listeners::clone(current);
            next.push((id, Arc::clone(&listener)));
            next
        });
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|(existing, _)| *existing != id)
                .cloned()
                .collect::<Listeners>()
        });
    }
}

fn validate_name(name: &str) -> Result<(), TreeEditError> {
    if name.is_empty() || name.contains('/') {
        return Err(TreeEditError::InvalidName { name: name.into() });
    }
    Ok(())
}

fn validate_spec(
    parent: &TreePath,
    spec: &NodeSpec,
    structure: &AHashMap<String, Arc<ConfigNode>>,
) -> Result<(), TreeEditError> {
    validate_name(&spec.name)?;
    let path = parent.child(spec.name.as_str());
    if structure.contains_key(&path.to_string()) {
        return Err(TreeEditError::AlreadyExists {
            path: path.to_string(),
        });
    }
    if spec.kind == NodeKind::Leaf && !spec.children.is_empty() {
        return Err(TreeEditError::LeafParent {
            path: path.to_string(),
        });
    }
    for (i, child) in spec.children.iter().enumerate() {
        if spec.children[..i].iter().any(|c| c.name == child.name) {
            return Err(TreeEditError::AlreadyExists {
                path: path.child(child.name.as_str()).to_string(),
            });
        }
        validate_spec(&path, child, structure)?;
    }
    Ok(())
}

fn materialize(
    parent: &Arc<ConfigNode>,
    spec: &NodeSpec,
    structure: &mut AHashMap<String, Arc<ConfigNode>>,
) -> Arc<ConfigNode> {
    let node = ConfigNode::new(
        parent.path.child(spec.name.as_str()),
        spec.kind,
        Arc::downgrade(parent),
    );
    structure.insert(node.path.to_string(), Arc::clone(&node));
    for child in &spec.children {
        let child = materialize(&node, child, structure);
        node.lock_children().push(child);
    }
    node
}

fn forget_subtree(node: &Arc<ConfigNode>, structure: &mut AHashMap<String, Arc<ConfigNode>>) {
    structure.remove(&node.path.to_string());
    for child in node.lock_children().iter() {
        forget_subtree(child, structure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TreeListener<ConfigNode> for Recorder {
        fn added(&self, node: &Arc<ConfigNode>) {
            self.events.lock().unwrap().push(format!("+{}", node.path_key()));
        }
        fn removed(&self, node: &Arc<ConfigNode>) {
            self.events.lock().unwrap().push(format!("-{}", node.path_key()));
        }
        fn updated(&self, node: &Arc<ConfigNode>) {
            self.events.lock().unwrap().push(format!("~{}", node.path_key()));
        }
    }

    fn root() -> TreePath {
        TreePath::root("root")
    }

    #[test]
    fn events_follow_mutation_order() {
        let tree = ConfigTree::new("root");
        let rec = Arc::new(Recorder::default());
        tree.subscribe(rec.clone(), &mut |_| {});

        tree.add_component(&root(), "A").unwrap();
        tree.add_leaf(&root().child("A"), "A1").unwrap();
        tree.update("/root/A/A1", |c| c.enabled = false).unwrap();
        tree.remove("/root/A").unwrap();

        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["+/root/A", "+/root/A/A1", "~/root/A/A1", "-/root/A"]
        );
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn removed_node_keeps_its_children() {
        let tree = ConfigTree::new("root");
        tree.add_tree(
            &root(),
            &NodeSpec::component("A").with(NodeSpec::leaf("x")).with(NodeSpec::leaf("y")),
        )
        .unwrap();
        assert_eq!(tree.len(), 4);
        let removed = tree.remove("/root/A").unwrap();
        assert_eq!(removed.children().len(), 2);
        assert!(tree.find("/root/A/x").is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn subtree_addition_is_one_event() {
        let tree = ConfigTree::new("root");
        let rec = Arc::new(Recorder::default());
        tree.subscribe(rec.clone(), &mut |_| {});
        tree.add_tree(&root(), &NodeSpec::component("A").with(NodeSpec::leaf("x")))
            .unwrap();
        assert_eq!(*rec.events.lock().unwrap(), vec!["+/root/A"]);
    }

    #[test]
    fn init_sees_state_before_first_event() {
        let tree = ConfigTree::new("root");
        tree.add_component(&root(), "A").unwrap();
        let rec = Arc::new(Recorder::default());
        let mut seen = Vec::new();
        tree.subscribe(rec.clone(), &mut |r| {
            seen = r.children().iter().map(|c| c.name().to_owned()).collect();
        });
        tree.add_component(&root(), "B").unwrap();
        assert_eq!(seen, vec!["A"]);
        assert_eq!(*rec.events.lock().unwrap(), vec!["+/root/B"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let tree = ConfigTree::new("root");
        let rec = Arc::new(Recorder::default());
        let id = tree.subscribe(rec.clone(), &mut |_| {});
        tree.unsubscribe(id);
        tree.unsubscribe(ListenerId(999));
        tree.add_component(&root(), "A").unwrap();
        assert!(rec.events.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_invalid_edits() {
        let tree = ConfigTree::new("root");
        tree.add_leaf(&root(), "leaf").unwrap();
        assert_eq!(
            tree.add_leaf(&root(), "leaf").unwrap_err(),
            TreeEditError::AlreadyExists {
                path: "/root/leaf".into()
            }
        );
        assert_eq!(
            tree.add_leaf(&root().child("leaf"), "x").unwrap_err(),
            TreeEditError::LeafParent {
                path: "/root/leaf".into()
            }
        );
        assert_eq!(tree.remove("/root").unwrap_err(), TreeEditError::RootRemoval);
        assert!(matches!(
            tree.add_leaf(&root(), "a/b"),
            Err(TreeEditError::InvalidName { .. })
        ));
        assert!(matches!(
            tree.update("/root/nope", |_| {}),
            Err(TreeEditError::NoSuchNode { .. })
        ));
    }

    #[test]
    fn running_flag() {
        let tree = ConfigTree::new("root");
        assert!(!tree.is_running());
        tree.start();
        assert!(tree.is_running());
        tree.stop();
        assert!(!tree.is_running());
    }
}
