//! Divergence between source and view is logged, counted and survived.
//!
//! Run:
//!   cargo test -p treesync --test violation_logging

use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::SubscriberExt;
use treesync::{ConfigTree, MirrorConfig, MirrorServices, TreeMirror};
use treesync_core::TreePath;
use treesync_runtime::{InlineContext, ManualScheduler};

/// Captures level, target, message and the `tree` field of every event.
#[derive(Clone, Default)]
struct EventCapture {
    events: Arc<Mutex<Vec<Captured>>>,
}

#[derive(Debug, Clone)]
struct Captured {
    level: tracing::Level,
    target: String,
    message: String,
    tree: Option<String>,
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    tree: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "tree" => self.tree = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            target: event.metadata().target().to_owned(),
            message: visitor.message,
            tree: visitor.tree,
        });
    }
}

fn mirror_of(source: &Arc<ConfigTree>) -> TreeMirror<ConfigTree> {
    TreeMirror::new(
        Arc::clone(source),
        MirrorConfig::default(),
        MirrorServices::new(Arc::new(ManualScheduler::new()), Arc::new(InlineContext)),
    )
    .unwrap()
}

#[test]
fn repeated_removal_is_logged_with_tree_dump() {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let source = Arc::new(ConfigTree::new("root"));
        source.add_component(&TreePath::root("root"), "keep").unwrap();
        let gone = source.add_component(&TreePath::root("root"), "gone").unwrap();
        let mirror = mirror_of(&source);

        // The view learns of the removal before the source performs it.
        mirror.on_remove(&gone).unwrap();
        source.remove("/root/gone").unwrap();

        assert_eq!(mirror.stats().protocol_violations, 1);
        assert!(mirror.check_consistency().unwrap().is_empty());
        assert_eq!(mirror.path_index().paths(), vec!["/root", "/root/keep"]);
    });

    let events = capture.events.lock().unwrap();
    let diverged: Vec<_> = events
        .iter()
        .filter(|e| e.message.contains("view diverged from source"))
        .collect();
    assert_eq!(diverged.len(), 1, "{events:#?}");
    assert_eq!(diverged[0].level, tracing::Level::ERROR);
    assert_eq!(diverged[0].target, "treesync.mirror");
    let tree = diverged[0].tree.as_deref().unwrap_or_default();
    assert!(tree.contains("keep"), "{tree}");
    assert!(!tree.contains("gone"), "{tree}");
}

#[test]
fn mirror_keeps_working_after_violation() {
    let source = Arc::new(ConfigTree::new("root"));
    let dup = source.add_component(&TreePath::root("root"), "dup").unwrap();
    let mirror = mirror_of(&source);

    assert!(mirror.on_add(&dup).unwrap_err().is_protocol_violation());
    source.add_leaf(&TreePath::root("root").child("dup"), "x").unwrap();
    source.add_component(&TreePath::root("root"), "after").unwrap();

    assert_eq!(mirror.path_index().paths(), source.paths());
    assert!(mirror.check_consistency().unwrap().is_empty());
}

#[test]
fn lifecycle_is_logged_at_info() {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let source = Arc::new(ConfigTree::new("root"));
        let mirror = mirror_of(&source);
        mirror.dispose();
    });

    let events = capture.events.lock().unwrap();
    let info: Vec<_> = events
        .iter()
        .filter(|e| e.level == tracing::Level::INFO && e.target == "treesync.mirror")
        .map(|e| e.message.as_str())
        .collect();
    assert_eq!(info, vec!["tree mirror live", "tree mirror disposed"]);
}
