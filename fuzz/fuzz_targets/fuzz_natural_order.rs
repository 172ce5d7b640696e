#![no_main]

use std::cmp::Ordering;

use libfuzzer_sys::fuzz_target;
use treesync_core::{compare_natural, insertion_point};

fuzz_target!(|names: Vec<String>| {
    let names: Vec<String> = names.into_iter().take(64).collect();

    for a in &names {
        assert_eq!(compare_natural(a, a), Ordering::Equal);
        for b in &names {
            assert_eq!(compare_natural(a, b), compare_natural(b, a).reverse());
        }
    }

    // Insertion one by one must agree with a full sort.
    let mut inserted: Vec<String> = Vec::with_capacity(names.len());
    for name in &names {
        let at = insertion_point(&inserted, name, String::as_str);
        inserted.insert(at, name.clone());
    }
    for pair in inserted.windows(2) {
        assert_ne!(
            compare_natural(&pair[0], &pair[1]),
            Ordering::Greater,
            "{:?} placed before {:?}",
            pair[0],
            pair[1]
        );
    }
});
