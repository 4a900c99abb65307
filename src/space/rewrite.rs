// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page-rewrite counters.
//!
//! One u32 per tracked page (the pages spanned by the user-data and metadata
//! areas), bumped whenever the page is physically rewritten. Monotonically
//! non-decreasing between resets; a CRC mismatch at recovery resets them all,
//! losing nothing but wear history.

/// Rewrite counters for the tracked page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteCounters {
    counts: Vec<u32>,
}

impl RewriteCounters {
    /// Creates `len` zeroed counters.
    pub fn with_len(len: usize) -> Self {
        RewriteCounters {
            counts: vec![0u32; len],
        }
    }

    /// Decodes counters from their stored big-endian form.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let counts = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        RewriteCounters { counts }
    }

    /// Encodes counters to their stored big-endian form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.counts.len() * 4);
        for count in &self.counts {
            bytes.extend_from_slice(&count.to_be_bytes());
        }
        bytes
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when there are no counters.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Counter for tracked page `index`, zero when out of range.
    pub fn get(&self, index: usize) -> u32 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Bumps the counter for tracked page `index`; indices past the tracked
    /// range are ignored (the backup-superblock page is untracked).
    pub fn increment(&mut self, index: usize) {
        if let Some(count) = self.counts.get_mut(index) {
            *count = count.saturating_add(1);
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&mut self) {
        self.counts.fill(0);
    }
}
