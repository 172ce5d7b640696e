//! Property tests: random edit sequences keep view and index in step with
//! the source.
//!
//! After every edit:
//! 1. every view node is indexed under its model's path, and only those;
//! 2. children are in natural order with correct parent links;
//! 3. the indexed paths are exactly the source's paths.
//!
//! Run:
//!   cargo test -p treesync --test structure_props

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use treesync::{ConfigTree, MirrorConfig, MirrorServices, RefreshMode, TreeMirror};
use treesync_core::TreePath;
use treesync_runtime::{InlineContext, ManualScheduler, Scheduler};

#[derive(Debug, Clone)]
enum Edit {
    AddComponent { at: usize, name: String },
    AddLeaf { at: usize, name: String },
    Remove { at: usize },
    Update { at: usize },
    Tick,
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    let name = "(pv|area|x)[0-9]{1,2}";
    prop_oneof![
        3 => (any::<usize>(), name).prop_map(|(at, name)| Edit::AddComponent { at, name }),
        2 => (any::<usize>(), name).prop_map(|(at, name)| Edit::AddLeaf { at, name }),
        2 => any::<usize>().prop_map(|at| Edit::Remove { at }),
        2 => any::<usize>().prop_map(|at| Edit::Update { at }),
        1 => Just(Edit::Tick),
    ]
}

/// Apply `edit` to the source; rejected edits (leaf parent, duplicate
/// name, root removal) are simply skipped.
fn apply(source: &ConfigTree, clock: &ManualScheduler, edit: &Edit) {
    let paths = source.paths();
    let pick = |at: usize| paths[at % paths.len()].clone();
    match edit {
        Edit::AddComponent { at, name } => {
            let parent: TreePath = pick(*at).parse().unwrap();
            let _ = source.add_component(&parent, name);
        }
        Edit::AddLeaf { at, name } => {
            let parent: TreePath = pick(*at).parse().unwrap();
            let _ = source.add_leaf(&parent, name);
        }
        Edit::Remove { at } => {
            let _ = source.remove(&pick(*at));
        }
        Edit::Update { at } => {
            source
                .update(&pick(*at), |c| c.enabled = !c.enabled)
                .unwrap();
        }
        Edit::Tick => clock.advance(Duration::from_millis(50)),
    }
}

fn check_edits(mode: RefreshMode, edits: &[Edit]) -> Result<(), TestCaseError> {
    let clock = Arc::new(ManualScheduler::new());
    let source = Arc::new(ConfigTree::new("root"));
    let mirror = TreeMirror::new(
        Arc::clone(&source),
        MirrorConfig::default().with_refresh_mode(mode),
        MirrorServices::new(Arc::clone(&clock) as Arc<dyn Scheduler>, Arc::new(InlineContext)),
    )
    .unwrap();

    for edit in edits {
        apply(&source, &clock, edit);
        let problems = mirror.check_consistency().unwrap();
        prop_assert!(problems.is_empty(), "after {:?}: {:#?}", edit, problems);
        prop_assert_eq!(mirror.path_index().paths(), source.paths());
    }

    clock.advance(Duration::from_secs(2));
    prop_assert_eq!(mirror.pending_updates(), 0);
    prop_assert!(mirror.check_consistency().unwrap().is_empty());
    prop_assert_eq!(mirror.stats().protocol_violations, 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replace_mode_tracks_source(edits in prop::collection::vec(edit_strategy(), 1..60)) {
        check_edits(RefreshMode::Replace, &edits)?;
    }

    #[test]
    fn in_place_mode_tracks_source(edits in prop::collection::vec(edit_strategy(), 1..60)) {
        check_edits(RefreshMode::InPlace, &edits)?;
    }
}
