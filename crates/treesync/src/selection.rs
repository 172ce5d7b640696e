#![forbid(unsafe_code)]

//! Which view nodes the user has selected.
//!
//! Refreshing a node in replace mode gives it a new [`NodeId`], so the
//! mirror rewrites the selection after every flush. Embedders that keep
//! selection elsewhere implement [`SelectionModel`]; [`Selection`] is the
//! default, read-mostly store (readers never block, writers swap a new
//! snapshot in).

use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;

use crate::view::NodeId;

/// Selection storage the mirror reads and rewrites.
pub trait SelectionModel: Send + Sync {
    /// Currently selected ids, in selection order.
    fn selected(&self) -> Vec<NodeId>;

    /// Replace the whole selection.
    fn set_selected(&self, ids: Vec<NodeId>);
}

/// Lock-free selection snapshot.
#[derive(Debug, Default)]
pub struct Selection {
    ids: ArcSwap<Vec<NodeId>>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the selection (no-op if already selected).
    pub fn select(&self, id: NodeId) {
        self.ids.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.contains(&id) {
                next.push(id);
            }
            next
        });
    }

    pub fn deselect(&self, id: NodeId) {
        self.ids.rcu(|current| {
            current
                .iter()
                .copied()
                .filter(|c| *c != id)
                .collect::<Vec<_>>()
        });
    }

    pub fn set(&self, ids: impl IntoIterator<Item = NodeId>) {
        let mut unique: Vec<NodeId> = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        self.ids.store(Arc::new(unique));
    }

    pub fn clear(&self) {
        self.ids.store(Arc::new(Vec::new()));
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<NodeId>> {
        self.ids.load_full()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.load().contains(&id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.load().is_empty()
    }

    /// Rewrite every selected id that appears as a key of `replaced`.
    /// Returns how many entries changed.
    pub fn substitute(&self, replaced: &AHashMap<NodeId, NodeId>) -> usize {
        substitute_into(self, replaced)
    }
}

impl SelectionModel for Selection {
    fn selected(&self) -> Vec<NodeId> {
        self.snapshot().as_ref().clone()
    }

    fn set_selected(&self, ids: Vec<NodeId>) {
        self.ids.store(Arc::new(ids));
    }
}

/// Apply a replacement map to any [`SelectionModel`].
///
/// Writes only when at least one selected id was replaced.
pub fn substitute_into(model: &dyn SelectionModel, replaced: &AHashMap<NodeId, NodeId>) -> usize {
    if replaced.is_empty() {
        return 0;
    }
    let mut changed = 0;
    let next: Vec<NodeId> = model
        .selected()
        .into_iter()
        .map(|id| match replaced.get(&id) {
            Some(new) => {
                changed += 1;
                *new
            }
            None => id,
        })
        .collect();
    if changed > 0 {
        model.set_selected(next);
    }
    changed
}

/// Drop ids that no longer exist from any [`SelectionModel`].
pub(crate) fn retain_selected(model: &dyn SelectionModel, mut keep: impl FnMut(NodeId) -> bool) {
    let current = model.selected();
    let next: Vec<NodeId> = current.iter().copied().filter(|id| keep(*id)).collect();
    if next.len() != current.len() {
        model.set_selected(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConfigTree;
    use crate::source::SourceTree;
    use crate::view::{ViewSubtree, ViewTree};
    use treesync_core::{PathIndex, TreePath};

    fn ids(n: usize) -> Vec<NodeId> {
        let source = ConfigTree::new("root");
        for i in 0..n {
            source
                .add_component(&TreePath::root("root"), &format!("n{i}"))
                .unwrap();
        }
        let index = PathIndex::new();
        let mut view = ViewTree::new();
        let root = view.install_root(ViewSubtree::build(&source.root(), &index).unwrap());
        view.children_of(root).to_vec()
    }

    #[test]
    fn select_is_idempotent_and_ordered() {
        let ids = ids(3);
        let sel = Selection::new();
        sel.select(ids[2]);
        sel.select(ids[0]);
        sel.select(ids[2]);
        assert_eq!(*sel.snapshot(), vec![ids[2], ids[0]]);
        sel.deselect(ids[2]);
        assert_eq!(sel.selected(), vec![ids[0]]);
        sel.clear();
        assert!(sel.is_empty());
    }

    #[test]
    fn substitute_rewrites_only_replaced() {
        let ids = ids(3);
        let sel = Selection::new();
        sel.set([ids[0], ids[1]]);
        let mut map = AHashMap::new();
        map.insert(ids[1], ids[2]);
        assert_eq!(sel.substitute(&map), 1);
        assert_eq!(sel.selected(), vec![ids[0], ids[2]]);
        assert!(sel.contains(ids[2]));
        assert!(!sel.contains(ids[1]));
        assert_eq!(sel.substitute(&AHashMap::new()), 0);
    }

    #[test]
    fn old_snapshot_is_stable() {
        let ids = ids(2);
        let sel = Selection::new();
        sel.select(ids[0]);
        let before = sel.snapshot();
        sel.select(ids[1]);
        assert_eq!(*before, vec![ids[0]]);
        assert_eq!(sel.snapshot().len(), 2);
    }

    #[test]
    fn retain_drops_dead_ids() {
        let ids = ids(2);
        let sel = Selection::new();
        sel.set(ids.clone());
        retain_selected(&sel, |id| id == ids[1]);
        assert_eq!(sel.selected(), vec![ids[1]]);
    }
}
