use std::{cmp::Ordering, collections::HashMap, sync::Mutex};

use once_cell::sync::Lazy;

pub type CompareFn = fn(lhs: &[u8], rhs: &[u8]) -> Ordering;

/// Process-wide registry of custom compare functions. A function is
/// identified on disk by the 32-bit hash of its name, which keeps the
/// database descriptor small.
static REGISTRY: Lazy<Mutex<HashMap<u32, CompareFn>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn compare_hash(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

pub fn register_compare(name: &str, func: CompareFn) {
    let mut registry = REGISTRY.lock().unwrap();
    registry.insert(compare_hash(name), func);
}

pub fn find_compare(hash: u32) -> Option<CompareFn> {
    let registry = REGISTRY.lock().unwrap();
    registry.get(&hash).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverse_compare(lhs: &[u8], rhs: &[u8]) -> Ordering {
        rhs.cmp(lhs)
    }

    #[test]
    fn test_register_and_find() {
        register_compare("reverse", reverse_compare);
        let hash = compare_hash("reverse");
        let func = find_compare(hash).unwrap();
        assert_eq!(func(b"a", b"b"), Ordering::Greater);
        assert!(find_compare(compare_hash("missing-function")).is_none());
    }
}
