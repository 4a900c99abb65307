// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! In-memory key index.
//!
//! A sorted array of `(key, metadata_offset, flag)` rebuilt from the
//! metadata area at load time. The index is the only structure the lookup
//! path touches before disk; it must be sorted by key whenever
//! `exists/get/delete` run, which `put` restores after every insertion.

use crate::layout::KEY_SIZE;

/// Lifecycle flag of an index entry.
///
/// `InProgress` is a purely in-RAM transient: a crash while a key carries it
/// leaves a slot whose entry CRC never matched, so recovery discards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFlag {
    /// Fully written, CRC recorded, visible to lookups.
    Valid,

    /// Reserved by an ongoing `put`; hidden from lookups.
    InProgress,
}

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyIndexEntry {
    pub key: [u8; KEY_SIZE],
    pub metadata_offset: u32,
    pub flag: KeyFlag,
}

/// Sorted key index.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    entries: Vec<KeyIndexEntry>,
}

impl KeyIndex {
    pub fn new() -> Self {
        KeyIndex {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry (used before a rebuild).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Binary search by byte-lexicographic key. Requires sorted order.
    pub fn find(&self, key: &[u8; KEY_SIZE]) -> Option<usize> {
        self.entries
            .binary_search_by(|e| e.key.as_slice().cmp(key.as_slice()))
            .ok()
    }

    pub fn get(&self, i: usize) -> &KeyIndexEntry {
        &self.entries[i]
    }

    /// Appends an entry at the end; the index is unsorted until
    /// [`KeyIndex::sort`] runs.
    pub fn push(&mut self, entry: KeyIndexEntry) {
        self.entries.push(entry);
    }

    /// Removes the most recently pushed entry (rollback of a failed insert).
    pub fn remove_last(&mut self) {
        self.entries.pop();
    }

    /// Removes entry `i`, compacting the array.
    pub fn remove(&mut self, i: usize) {
        self.entries.remove(i);
    }

    /// Restores sorted order after appends.
    pub fn sort(&mut self) {
        self.entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
    }

    /// Flips the flag of the entry at `metadata_offset`, if present.
    pub fn set_flag_by_offset(&mut self, metadata_offset: u32, flag: KeyFlag) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.metadata_offset == metadata_offset)
        {
            entry.flag = flag;
        }
    }

    pub fn entries(&self) -> &[KeyIndexEntry] {
        &self.entries
    }
}
