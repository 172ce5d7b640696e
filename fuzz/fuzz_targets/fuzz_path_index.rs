#![no_main]

use std::collections::HashMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use treesync_core::PathIndex;

#[derive(Debug, Arbitrary)]
enum Op {
    Put(u8, u32),
    Remove(u8),
    RemoveIf(u8, u32),
    Replace(u8, u32),
    Clear,
}

fuzz_target!(|ops: Vec<Op>| {
    let index = PathIndex::new();
    let mut model: HashMap<String, u32> = HashMap::new();
    let key = |k: u8| format!("/root/n{}", k % 16);

    for op in ops.into_iter().take(256) {
        match op {
            Op::Put(k, v) => {
                let ok = index.put(&key(k), v).is_ok();
                assert_eq!(ok, !model.contains_key(&key(k)));
                model.entry(key(k)).or_insert(v);
            }
            Op::Remove(k) => {
                assert_eq!(index.remove(&key(k)).ok(), model.remove(&key(k)));
            }
            Op::RemoveIf(k, v) => {
                let expected = model.get(&key(k)) == Some(&v);
                assert_eq!(index.remove_if(&key(k), v), expected);
                if expected {
                    model.remove(&key(k));
                }
            }
            Op::Replace(k, v) => {
                let old = index.replace(&key(k), v).ok();
                assert_eq!(old, model.get(&key(k)).copied());
                if let Some(slot) = model.get_mut(&key(k)) {
                    *slot = v;
                }
            }
            Op::Clear => {
                index.clear();
                model.clear();
            }
        }
        assert_eq!(index.len(), model.len());
    }
});
