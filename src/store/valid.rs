// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Validity predicates over the service structures and individual keys.
//!
//! The bitmaps and counters are judged by comparing a freshly computed CRC32
//! of the RAM copy against the value recorded in the CRC block. A key is
//! judged by the entry CRC, one checksum jointly covering its metadata slot
//! and its aligned value bytes, which is what makes a torn `put` invisible
//! after recovery.

use crate::error::KvsResult;
use crate::io;
use crate::layout::MetadataSlot;
use crate::store::index::KeyFlag;
use crate::store::KvStore;

impl KvStore {
    /// Data bitmap matches its stored CRC.
    pub(crate) fn data_bitmap_valid(&self) -> bool {
        crc32fast::hash(self.data_bitmap.as_bytes()) == self.crc.data_bitmap
    }

    /// Metadata bitmap matches its stored CRC.
    pub(crate) fn metadata_bitmap_valid(&self) -> bool {
        crc32fast::hash(self.metadata_bitmap.as_bytes()) == self.crc.metadata_bitmap
    }

    /// Rewrite counters match their stored CRC.
    pub(crate) fn rewrite_counts_valid(&self) -> bool {
        crc32fast::hash(&self.rewrite_counts.to_bytes()) == self.crc.rewrite
    }

    /// Structural check of a decoded metadata slot.
    ///
    /// Ranges first: the value must lie fully inside the user-data area and
    /// its size must be plausible. Then the aligned value region must not be
    /// fully erased: a slot pointing at blank flash describes nothing.
    pub(crate) fn metadata_entry_valid(&mut self, meta: &MetadataSlot) -> KvsResult<bool> {
        // Size first: a garbage size would overflow the alignment below.
        if meta.value_size == 0 || meta.value_size > self.sb.userdata_size {
            return Ok(false);
        }
        let aligned = self.aligned(meta.value_size);

        if meta.value_offset < self.sb.data_offset
            || meta.value_offset >= self.sb.metadata_offset
            || self.sb.metadata_offset - meta.value_offset < aligned
        {
            return Ok(false);
        }

        let empty = io::is_region_empty(&mut self.dev, meta.value_offset, aligned)?;
        Ok(!empty)
    }

    /// Full validity check of index entry `i`.
    ///
    /// ## Output
    /// - `Ok(true)`: flag is `Valid`, the on-disk slot matches the indexed
    ///   key, and the entry CRC matches the slot + aligned value bytes
    /// - `Ok(false)`: any of the above fails
    /// - `Err`: the device could not be read
    pub(crate) fn key_valid(&mut self, i: usize) -> KvsResult<bool> {
        if i >= self.index.len() {
            return Ok(false);
        }
        if self.index.get(i).flag != KeyFlag::Valid {
            return Ok(false);
        }

        let metadata_offset = self.index.get(i).metadata_offset;
        let expected_key = self.index.get(i).key;

        let mut slot_bytes = [0u8; crate::layout::SLOT_SIZE];
        io::read_region(&mut self.dev, metadata_offset, &mut slot_bytes)?;
        let meta = MetadataSlot::from_bytes(&slot_bytes)?;

        if meta.key != expected_key {
            return Ok(false);
        }

        // The slot may have been rewritten since the index was built, so
        // its fields get the same structural scrutiny as at recovery.
        if meta.value_size == 0 || meta.value_size > self.sb.userdata_size {
            return Ok(false);
        }
        let aligned = self.aligned(meta.value_size);
        if meta.value_offset < self.sb.data_offset
            || meta.value_offset >= self.sb.metadata_offset
            || self.sb.metadata_offset - meta.value_offset < aligned
        {
            return Ok(false);
        }

        let mut value = vec![0u8; aligned as usize];
        io::read_region(&mut self.dev, meta.value_offset, &mut value)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&slot_bytes);
        hasher.update(&value);
        let computed = hasher.finalize();

        let slot = self.sb.slot_index(metadata_offset);
        Ok(computed == self.crc.entry[slot as usize])
    }
}
