#![no_main]

use libfuzzer_sys::fuzz_target;
use treesync_core::TreePath;

fuzz_target!(|data: &str| {
    let Ok(path) = data.parse::<TreePath>() else {
        return;
    };

    // Display and parse agree.
    let rendered = path.to_string();
    assert!(rendered.starts_with('/'));
    let reparsed: TreePath = rendered.parse().expect("rendered path parses");
    assert_eq!(reparsed, path);

    assert_eq!(path.depth(), path.segments().len());
    match path.parent() {
        Some(parent) => {
            assert!(parent.is_ancestor_of(&path));
            assert_eq!(parent.child(path.name()), path);
        }
        None => assert!(path.is_root()),
    }
});
