// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the in-memory key index.

#[cfg(test)]
mod tests {
    use crate::layout::KEY_SIZE;
    use crate::store::index::{KeyFlag, KeyIndex, KeyIndexEntry};

    fn key(name: &[u8]) -> [u8; KEY_SIZE] {
        let mut k = [0u8; KEY_SIZE];
        k[..name.len()].copy_from_slice(name);
        k
    }

    fn entry(name: &[u8], offset: u32) -> KeyIndexEntry {
        KeyIndexEntry {
            key: key(name),
            metadata_offset: offset,
            flag: KeyFlag::Valid,
        }
    }

    #[test]
    fn test_sort_and_find() {
        let mut index = KeyIndex::new();
        index.push(entry(b"zebra", 100));
        index.push(entry(b"apple", 200));
        index.push(entry(b"mango", 300));
        index.sort();

        let i = index.find(&key(b"apple")).unwrap();
        assert_eq!(index.get(i).metadata_offset, 200);
        let i = index.find(&key(b"zebra")).unwrap();
        assert_eq!(index.get(i).metadata_offset, 100);
        assert!(index.find(&key(b"pear")).is_none());

        // Sorted byte-lexicographically.
        let keys: Vec<_> = index.entries().iter().map(|e| e.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_remove_compacts() {
        let mut index = KeyIndex::new();
        index.push(entry(b"a", 1));
        index.push(entry(b"b", 2));
        index.push(entry(b"c", 3));
        index.sort();

        let i = index.find(&key(b"b")).unwrap();
        index.remove(i);

        assert_eq!(index.len(), 2);
        assert!(index.find(&key(b"b")).is_none());
        assert!(index.find(&key(b"a")).is_some());
        assert!(index.find(&key(b"c")).is_some());
    }

    #[test]
    fn test_remove_last_rolls_back_append() {
        let mut index = KeyIndex::new();
        index.push(entry(b"a", 1));
        index.sort();
        index.push(entry(b"pending", 2));
        index.remove_last();

        assert_eq!(index.len(), 1);
        assert!(index.find(&key(b"a")).is_some());
    }

    #[test]
    fn test_set_flag_by_offset() {
        let mut index = KeyIndex::new();
        index.push(KeyIndexEntry {
            key: key(b"k"),
            metadata_offset: 42,
            flag: KeyFlag::InProgress,
        });
        index.sort();

        index.set_flag_by_offset(42, KeyFlag::Valid);
        assert_eq!(index.get(0).flag, KeyFlag::Valid);

        // Unknown offsets are a no-op.
        index.set_flag_by_offset(999, KeyFlag::InProgress);
        assert_eq!(index.get(0).flag, KeyFlag::Valid);
    }
}
