// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Public operations: put, get, delete, exists, update.
//!
//! The write path keeps crash atomicity with one trick: the index entry is
//! inserted as `InProgress` and only flipped to `Valid` after the value
//! bytes are on the device and the entry CRC is recomputed. Until the final
//! `persist_all_service_data`, nothing on disk claims the key exists; after
//! it, everything does.

use crate::error::{KvsError, KvsResult};
use crate::io;
use crate::layout::{MetadataSlot, KEY_SIZE, SLOT_SIZE};
use crate::store::gc::GcMode;
use crate::store::index::{KeyFlag, KeyIndexEntry};
use crate::store::KvStore;

impl KvStore {
    /// Stores a new key.
    ///
    /// ## Input
    /// - `key`: exactly [`KEY_SIZE`] bytes, opaque
    /// - `value`: at least one byte
    ///
    /// ## Output
    /// - `Ok(())`: key durable and visible
    /// - `Err(KeyAlreadyExists)`: replacement goes through [`KvStore::update`]
    /// - `Err(NoSpace)`: no slot or no contiguous run, even after GC
    /// - anything else: storage failure; the tentative entry was rolled back
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> KvsResult<()> {
        let key_arr = check_key(key)?;
        if value.is_empty() {
            return Err(KvsError::InvalidParam {
                reason: "value must not be empty".to_string(),
            });
        }
        if self.index.len() as u32 >= self.sb.max_key_count {
            return Err(KvsError::NoSpace);
        }
        if self.exists(key)? {
            return Err(KvsError::KeyAlreadyExists);
        }

        // Pad to the word size with 0xFF so the tail looks erased.
        let aligned_len = self.aligned(value.len() as u32);
        let padded: Vec<u8>;
        let final_value: &[u8] = if aligned_len as usize != value.len() {
            let mut buf = vec![0xFFu8; aligned_len as usize];
            buf[..value.len()].copy_from_slice(value);
            padded = buf;
            &padded
        } else {
            value
        };

        // Allocate a metadata slot, reclaiming slot space if needed.
        let slot = loop {
            if let Some(slot) = self.find_free_metadata_slot() {
                break slot;
            }
            self.log
                .line("No free metadata slot; running garbage collection");
            if self.gc(GcMode::CleanMetadata) == 0 {
                return Err(KvsError::NoSpace);
            }
        };
        let metadata_offset = self.sb.slot_offset(slot);

        // Allocate the data run, reclaiming data space if needed.
        let data_offset = loop {
            if let Some(offset) = self.find_free_data_offset(aligned_len) {
                break offset;
            }
            self.log
                .line("No free data region; running garbage collection");
            if self.gc(GcMode::CleanData) == 0 {
                return Err(KvsError::NoSpace);
            }
        };

        // Tentative entry: invisible to lookups until flipped to Valid.
        self.index.push(KeyIndexEntry {
            key: key_arr,
            metadata_offset,
            flag: KeyFlag::InProgress,
        });

        let meta = MetadataSlot {
            key: key_arr,
            value_offset: data_offset,
            value_size: value.len() as u32,
        };

        if let Err(err) = self.verify_and_prepare_region(data_offset, aligned_len) {
            self.index.remove_last();
            return Err(err);
        }
        if let Err(err) = self.write_slot(metadata_offset, &meta) {
            self.index.remove_last();
            return Err(err);
        }
        if let Err(err) = io::write_region(&mut self.dev, data_offset, final_value) {
            let _ = io::clear_region(&mut self.dev, metadata_offset, SLOT_SIZE as u32);
            self.index.remove_last();
            return Err(err);
        }

        self.index.sort();
        self.index.set_flag_by_offset(metadata_offset, KeyFlag::Valid);

        self.update_entry_crc(slot)?;
        self.metadata_bitmap.set(slot);
        self.rewrite_count_increment_region(metadata_offset, SLOT_SIZE as u32)?;
        self.rewrite_count_increment_region(data_offset, aligned_len)?;
        self.bitmap_set_region(data_offset, aligned_len)?;

        self.persist_all_service_data()
    }

    /// Reads the value of `key` into `buf`.
    ///
    /// ## Output
    /// - `Ok(n)`: exactly `n` value bytes copied into `buf[..n]`
    /// - `Err(KeyNotFound)`: absent, in progress, or failing its CRC
    /// - `Err(BufferTooSmall { required })`: `buf` shorter than the value
    pub fn get(&mut self, key: &[u8], buf: &mut [u8]) -> KvsResult<usize> {
        let key_arr = check_key(key)?;

        let i = match self.index.find(&key_arr) {
            Some(i) => i,
            None => return Err(KvsError::KeyNotFound),
        };
        if !self.key_valid(i).unwrap_or(false) {
            return Err(KvsError::KeyNotFound);
        }

        let meta = self.read_slot(self.index.get(i).metadata_offset)?;
        let size = meta.value_size as usize;
        if buf.len() < size {
            return Err(KvsError::BufferTooSmall { required: size });
        }

        // Read at word granularity, hand back the exact size.
        let aligned = self.aligned(meta.value_size);
        let mut scratch = vec![0u8; aligned as usize];
        io::read_region(&mut self.dev, meta.value_offset, &mut scratch)?;
        buf[..size].copy_from_slice(&scratch[..size]);
        Ok(size)
    }

    /// Deletes `key`, physically clearing its slot and value bytes.
    ///
    /// Idempotent in effect: a second delete of the same key fails with
    /// `KeyNotFound` and touches nothing.
    pub fn delete(&mut self, key: &[u8]) -> KvsResult<()> {
        let key_arr = check_key(key)?;

        let i = match self.index.find(&key_arr) {
            Some(i) => i,
            None => return Err(KvsError::KeyNotFound),
        };
        if !self.key_valid(i).unwrap_or(false) {
            return Err(KvsError::KeyNotFound);
        }

        let metadata_offset = self.index.get(i).metadata_offset;
        let meta = self.read_slot(metadata_offset)?;
        let aligned = self.aligned(meta.value_size);

        io::clear_region(&mut self.dev, meta.value_offset, aligned)?;
        io::clear_region(&mut self.dev, metadata_offset, SLOT_SIZE as u32)?;

        let slot = self.sb.slot_index(metadata_offset);
        self.crc.entry[slot as usize] = 0;
        self.metadata_bitmap.clear(slot);
        self.rewrite_count_increment_region(metadata_offset, SLOT_SIZE as u32)?;
        self.rewrite_count_increment_region(meta.value_offset, aligned)?;
        self.bitmap_clear_region(meta.value_offset, aligned)?;

        self.index.remove(i);

        self.persist_all_service_data()
    }

    /// True iff `key` is present and fully valid.
    pub fn exists(&mut self, key: &[u8]) -> KvsResult<bool> {
        let key_arr = check_key(key)?;
        match self.index.find(&key_arr) {
            Some(i) => Ok(self.key_valid(i).unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Replaces the value of an existing key: delete, then put.
    ///
    /// The window between the two is the one crash-exposing gap of the API;
    /// if the put half fails the key is gone, which is logged and surfaced
    /// as a storage failure.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> KvsResult<()> {
        check_key(key)?;
        if value.is_empty() {
            return Err(KvsError::InvalidParam {
                reason: "value must not be empty".to_string(),
            });
        }

        self.delete(key)?;

        match self.put(key, value) {
            Ok(()) => Ok(()),
            Err(err) => {
                let printable: String = key
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                    .collect();
                self.log.line(&format!(
                    "update lost key '{}': put failed after delete ({})",
                    printable, err
                ));
                Err(KvsError::Io {
                    operation: "update".to_string(),
                    reason: format!("key lost after delete: {}", err),
                })
            }
        }
    }

    /// Makes sure the pages about to hold a value contain no stale bytes.
    ///
    /// A word the bitmap claims free must read 0xFF before it is written;
    /// flash cannot flip bits back to 1. Garbage can survive a crashed put
    /// or GC, so any discrepancy triggers a page-granular clear that keeps
    /// the words whose bitmap bits are set and blanks the rest.
    pub(crate) fn verify_and_prepare_region(&mut self, offset: u32, size: u32) -> KvsResult<()> {
        if size == 0 {
            return Ok(());
        }

        let word_size = self.sb.word_size;
        let page_size = self.sb.page_size;
        let area_start = self.sb.data_offset;
        let area_end = area_start + self.sb.userdata_size;

        let relative_start = offset - area_start;
        let relative_end = relative_start + size;
        let first_page = relative_start / page_size;
        let last_page = (relative_end - 1) / page_size;

        for page in first_page..=last_page {
            let page_start = area_start + page * page_size;

            // Pass 1: does this page hold garbage in bitmap-free words?
            let mut discrepancy = false;
            for word_off in (0..page_size).step_by(word_size as usize) {
                let abs = page_start + word_off;
                if abs >= area_end {
                    break;
                }
                let word_index = (abs - area_start) / word_size;
                if !self.data_bitmap.get(word_index)
                    && !io::is_region_empty(&mut self.dev, abs, word_size)?
                {
                    discrepancy = true;
                    break;
                }
            }
            if !discrepancy {
                continue;
            }

            self.log.line(&format!(
                "Stale bytes on data page {}; clearing around live words",
                page
            ));

            // Pass 2: rewrite the page, blanking exactly the free words.
            let mut page_buf = vec![0u8; page_size as usize];
            io::read_region(&mut self.dev, page_start, &mut page_buf)?;

            for word_off in (0..page_size).step_by(word_size as usize) {
                let abs = page_start + word_off;
                if abs >= area_end {
                    break;
                }
                let word_index = (abs - area_start) / word_size;
                if !self.data_bitmap.get(word_index) {
                    page_buf[word_off as usize..(word_off + word_size) as usize].fill(0xFF);
                }
            }

            io::clear_region(&mut self.dev, page_start, page_size)?;
            io::write_region(&mut self.dev, page_start, &page_buf)?;
        }

        Ok(())
    }
}

fn check_key(key: &[u8]) -> KvsResult<[u8; KEY_SIZE]> {
    if key.len() != KEY_SIZE {
        return Err(KvsError::InvalidParam {
            reason: format!("key must be {} bytes, got {}", KEY_SIZE, key.len()),
        });
    }
    let mut arr = [0u8; KEY_SIZE];
    arr.copy_from_slice(key);
    Ok(arr)
}
