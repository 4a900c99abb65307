// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The store: device handle, recovery, space accounting and the public API.
//!
//! `KvStore` owns the simulated device plus the RAM copies of every service
//! structure. Opening a store either loads and repairs an existing image or
//! formats a fresh one; every mutating operation ends by persisting all
//! service data, so the last successful operation is always the durable one.
//!
//! ## Recovery Order
//! The service structures validate each other cyclically (the CRC block
//! lives at an offset named by the superblock, the data bitmap is rebuilt
//! from the key index, the key index from the metadata bitmap). The knot is
//! broken by a fixed repair order: superblock → CRC block → metadata bitmap
//! → key index → data bitmap → rewrite counters.

pub mod index;

mod api;
mod gc;
mod persist;
mod valid;

#[cfg(test)]
mod index_test;
#[cfg(test)]
mod persist_test;

use crate::error::{KvsError, KvsResult};
use crate::io;
use crate::layout::{align_up, MetadataSlot, Superblock, SLOT_SIZE, SUPERBLOCK_MAGIC};
use crate::log::DiagLog;
use crate::sim::SimDevice;
use crate::space::{find_free_run, find_free_slot, Bitmap, RewriteCounters};
use crate::store::index::KeyIndex;
use crate::store::persist::ServiceCrc;
use std::path::{Path, PathBuf};

pub use gc::GcMode;

/// An open key-value store.
///
/// The store is a value: it exists only between a successful [`KvStore::open`]
/// and [`KvStore::close`] (or drop), so "not initialised" and "initialised
/// twice" are unrepresentable states. Dropping without `close` skips the
/// final service-data persist, exactly what an abrupt process exit does,
/// which the crash-safety tests rely on.
#[derive(Debug)]
pub struct KvStore {
    pub(crate) dev: SimDevice,
    pub(crate) sb: Superblock,
    pub(crate) crc: ServiceCrc,
    pub(crate) data_bitmap: Bitmap,
    pub(crate) metadata_bitmap: Bitmap,
    pub(crate) rewrite_counts: RewriteCounters,
    pub(crate) index: KeyIndex,
    pub(crate) log: DiagLog,
    dir: PathBuf,
}

impl KvStore {
    /// Opens the store inside `dir`, creating `dir` if needed.
    ///
    /// Tries to load and repair an existing image first; any load failure,
    /// including both superblock copies being destroyed, falls back to
    /// formatting a fresh store with a `user_size`-byte user area.
    ///
    /// ## Input
    /// - `dir`: data directory holding the storage file and the log
    /// - `user_size`: requested user-data area in bytes (only used when a
    ///   new store is created; an existing image keeps its own layout)
    ///
    /// ## Error Conditions
    /// - `MetadataAreaTooSmall` / `InvalidParam`: the requested layout is
    ///   impossible
    /// - `Io`: the directory or storage file cannot be created or locked
    pub fn open(dir: &Path, user_size: u32) -> KvsResult<KvStore> {
        SimDevice::ensure_data_dir(dir)?;
        let log = DiagLog::new(dir);
        log.run_separator();

        match Self::load_existing(dir, log.clone()) {
            Ok(store) => {
                store.log.line("Initialisation complete: loaded existing store");
                Ok(store)
            }
            Err(err) => {
                log.line(&format!(
                    "Could not load existing store ({}); creating a new one",
                    err
                ));
                let store = Self::init_new(dir, user_size, log)?;
                store.log.line("Initialisation complete: created new store");
                Ok(store)
            }
        }
    }

    /// Persists all service data and releases the store.
    pub fn close(mut self) -> KvsResult<()> {
        self.log.line("Deinitialising store");
        self.persist_all_service_data()?;
        Ok(())
    }

    /// Arms the simulator's power-loss hook; see
    /// [`SimDevice::set_write_failure_countdown`].
    pub fn set_write_failure_countdown(&mut self, count: i64) {
        self.dev.set_write_failure_countdown(count);
    }

    /// Path of the backing storage file.
    pub fn storage_path(&self) -> PathBuf {
        SimDevice::storage_path(&self.dir)
    }

    /// Number of live index entries (valid and in-progress).
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    /// Formats a fresh store and writes its initial service structures.
    fn init_new(dir: &Path, user_size: u32, log: DiagLog) -> KvsResult<KvStore> {
        log.line(&format!(
            "Creating new store (user area: {} bytes)",
            user_size
        ));

        let sb = Superblock::compute_layout(user_size)?;
        let mut dev = SimDevice::create(dir)?;
        dev.format()?;

        let sb_bytes = sb.to_bytes();
        io::write_region(&mut dev, 0, &sb_bytes)?;
        io::write_region(&mut dev, sb.backup_offset, &sb_bytes)?;

        let mut store = KvStore {
            dev,
            crc: ServiceCrc::with_capacity(sb.max_key_count as usize),
            data_bitmap: Bitmap::with_size(sb.data_bitmap_size as usize),
            metadata_bitmap: Bitmap::with_size(sb.metadata_bitmap_size as usize),
            rewrite_counts: RewriteCounters::with_len(sb.rewrite_size() as usize / 4),
            index: KeyIndex::new(),
            sb,
            log,
            dir: dir.to_path_buf(),
        };
        store.persist_all_service_data()?;
        Ok(store)
    }

    /// Loads, validates and repairs an existing store image.
    fn load_existing(dir: &Path, log: DiagLog) -> KvsResult<KvStore> {
        let mut dev = SimDevice::open_existing(dir)?;

        // Geometry is fixed; both superblock locations follow from it even
        // before either copy has been trusted.
        let sb_size = Superblock::encoded_size();
        let backup_offset = dev.storage_size() - sb_size;

        let mut primary_bytes = vec![0u8; sb_size as usize];
        io::read_region(&mut dev, 0, &mut primary_bytes)?;
        let mut backup_bytes = vec![0u8; sb_size as usize];
        io::read_region(&mut dev, backup_offset, &mut backup_bytes)?;

        let primary = Superblock::from_bytes(&primary_bytes)?;
        let backup = Superblock::from_bytes(&backup_bytes)?;

        // The stored CRCs sit at the head of the CRC block: primary first,
        // backup right after. A garbage superblock yields a garbage offset,
        // so a failed read simply counts as a mismatch.
        let primary_stored = Self::read_crc_word(&mut dev, primary.crc_offset).unwrap_or(0);
        let backup_stored = Self::read_crc_word(&mut dev, backup.crc_offset + 4).unwrap_or(0);

        let primary_ok =
            primary.magic == SUPERBLOCK_MAGIC && crc32fast::hash(&primary_bytes) == primary_stored;
        let backup_ok =
            backup.magic == SUPERBLOCK_MAGIC && crc32fast::hash(&backup_bytes) == backup_stored;

        let sb = if primary_ok {
            primary
        } else if backup_ok {
            log.line("Primary superblock corrupt; restoring it from the backup copy");
            io::write_region(&mut dev, 0, &backup_bytes)?;
            backup
        } else {
            log.line("Both superblock copies are corrupt; store cannot be loaded");
            return Err(KvsError::CorruptSuperblock);
        };

        let crc = ServiceCrc::read(&mut dev, &sb)?;

        let mut data_bitmap_bytes = vec![0u8; sb.data_bitmap_size as usize];
        io::read_region(&mut dev, sb.data_bitmap_offset, &mut data_bitmap_bytes)?;
        let mut metadata_bitmap_bytes = vec![0u8; sb.metadata_bitmap_size as usize];
        io::read_region(&mut dev, sb.metadata_bitmap_offset, &mut metadata_bitmap_bytes)?;
        let mut rewrite_bytes = vec![0u8; sb.rewrite_size() as usize];
        io::read_region(&mut dev, sb.rewrite_offset, &mut rewrite_bytes)?;

        let mut store = KvStore {
            dev,
            crc,
            data_bitmap: Bitmap::from_bytes(data_bitmap_bytes),
            metadata_bitmap: Bitmap::from_bytes(metadata_bitmap_bytes),
            rewrite_counts: RewriteCounters::from_bytes(&rewrite_bytes),
            index: KeyIndex::new(),
            sb,
            log,
            dir: dir.to_path_buf(),
        };

        // Repair pass, in dependency order.
        if !store.metadata_bitmap_valid() {
            store
                .log
                .line("Metadata bitmap corrupt; rebuilding it from the slots");
            store.metadata_bitmap_rebuild()?;
        }

        store.build_key_index()?;

        if !store.data_bitmap_valid() {
            store
                .log
                .line("Data bitmap corrupt; rebuilding it from the key index");
            store.data_bitmap_rebuild()?;
        }

        if !store.rewrite_counts_valid() {
            store.log.line("Rewrite counters corrupt; resetting them");
            let (offset, size) = (store.sb.rewrite_offset, store.sb.rewrite_size());
            io::clear_region(&mut store.dev, offset, size)?;
            store.rewrite_counts.reset();
        }

        store.log.line("Existing store loaded and verified");
        Ok(store)
    }

    fn read_crc_word(dev: &mut SimDevice, offset: u32) -> KvsResult<u32> {
        let mut word = [0u8; 4];
        io::read_region(dev, offset, &mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    /// Value length aligned up to the word size.
    pub(crate) fn aligned(&self, len: u32) -> u32 {
        align_up(len, self.sb.word_size)
    }

    /// Reads and decodes the metadata slot at `offset`.
    pub(crate) fn read_slot(&mut self, offset: u32) -> KvsResult<MetadataSlot> {
        let mut buf = [0u8; SLOT_SIZE];
        io::read_region(&mut self.dev, offset, &mut buf)?;
        MetadataSlot::from_bytes(&buf)
    }

    /// Encodes and writes a metadata slot at `offset`.
    pub(crate) fn write_slot(&mut self, offset: u32, slot: &MetadataSlot) -> KvsResult<()> {
        io::write_region(&mut self.dev, offset, &slot.to_bytes())
    }

    /// Marks the words of `[offset, offset + size)` as occupied in the data
    /// bitmap. The range must lie inside the user-data area.
    pub(crate) fn bitmap_set_region(&mut self, offset: u32, size: u32) -> KvsResult<()> {
        let (start_word, num_words) = self.data_region_words(offset, size)?;
        for i in 0..num_words {
            self.data_bitmap.set(start_word + i);
        }
        Ok(())
    }

    /// Clears the words of `[offset, offset + size)` in the data bitmap.
    pub(crate) fn bitmap_clear_region(&mut self, offset: u32, size: u32) -> KvsResult<()> {
        let (start_word, num_words) = self.data_region_words(offset, size)?;
        for i in 0..num_words {
            self.data_bitmap.clear(start_word + i);
        }
        Ok(())
    }

    fn data_region_words(&self, offset: u32, size: u32) -> KvsResult<(u32, u32)> {
        if offset < self.sb.data_offset || offset + size > self.sb.metadata_offset {
            return Err(KvsError::InvalidParam {
                reason: format!(
                    "region [{}, {}) outside the user-data area",
                    offset,
                    offset + size
                ),
            });
        }
        let word_size = self.sb.word_size;
        let start_word = (offset - self.sb.data_offset) / word_size;
        let num_words = size.div_ceil(word_size);
        Ok((start_word, num_words))
    }

    /// Bumps the rewrite counter of every tracked page intersecting
    /// `[offset, offset + size)`. Pages before the user-data area are not
    /// tracked and are skipped.
    pub(crate) fn rewrite_count_increment_region(
        &mut self,
        offset: u32,
        size: u32,
    ) -> KvsResult<()> {
        if size == 0 {
            return Ok(());
        }
        if offset + size > self.sb.storage_size {
            return Err(KvsError::InvalidParam {
                reason: format!("region [{}, {}) beyond the device", offset, offset + size),
            });
        }

        let page_size = self.sb.page_size;
        let first_page = offset / page_size;
        let last_page = (offset + size - 1) / page_size;
        let first_tracked = self.sb.data_offset / page_size;

        for page in first_page..=last_page {
            if page >= first_tracked {
                self.rewrite_counts.increment((page - first_tracked) as usize);
            }
        }
        Ok(())
    }

    /// Finds a free run for `len` bytes in the user-data area.
    ///
    /// Carousel semantics: the scan starts at `last_data_word_checked` and
    /// the cursor advances past the returned run, so equal-sized requests
    /// land on fresh words until the area wraps.
    pub(crate) fn find_free_data_offset(&mut self, len: u32) -> Option<u32> {
        let word_size = self.sb.word_size;
        let words_needed = len.div_ceil(word_size);
        let total_words = self.sb.userdata_words();

        let mut cursor = self.sb.last_data_word_checked;
        let found = find_free_run(&self.data_bitmap, total_words, words_needed, &mut cursor);
        if found.is_some() {
            self.sb.last_data_word_checked = cursor;
        }
        found.map(|word| self.sb.data_offset + word * word_size)
    }

    /// Finds a free metadata slot, circularly from the slot carousel.
    pub(crate) fn find_free_metadata_slot(&mut self) -> Option<u32> {
        let mut cursor = self.sb.last_metadata_slot_checked;
        let found = find_free_slot(&self.metadata_bitmap, self.sb.max_key_count, &mut cursor);
        if found.is_some() {
            self.sb.last_metadata_slot_checked = cursor;
        }
        found
    }

    /// Rebuilds the metadata bitmap by probing every slot for emptiness.
    pub(crate) fn metadata_bitmap_rebuild(&mut self) -> KvsResult<()> {
        self.metadata_bitmap.clear_all();
        let mut buf = [0u8; SLOT_SIZE];
        for slot in 0..self.sb.max_key_count {
            let offset = self.sb.slot_offset(slot);
            io::read_region(&mut self.dev, offset, &mut buf)?;
            if !MetadataSlot::is_erased(&buf) {
                self.metadata_bitmap.set(slot);
            }
        }
        Ok(())
    }

    /// Rebuilds the key index from the metadata area.
    ///
    /// Slots whose metadata-bitmap bit is clear are skipped without a read.
    /// The rest are decoded and admitted on the structural checks only;
    /// entry CRCs cannot be consulted here because they are what lookups
    /// verify against once the index exists. Admitted entries start as
    /// `Valid`; a CRC mismatch downgrades them lazily at first use.
    pub(crate) fn build_key_index(&mut self) -> KvsResult<()> {
        self.index.clear();

        for slot in 0..self.sb.max_key_count {
            if !self.metadata_bitmap.get(slot) {
                continue;
            }
            let offset = self.sb.slot_offset(slot);
            let meta = self.read_slot(offset)?;
            if self.metadata_entry_valid(&meta)? {
                self.index.push(index::KeyIndexEntry {
                    key: meta.key,
                    metadata_offset: offset,
                    flag: index::KeyFlag::Valid,
                });
            }
        }

        self.index.sort();
        Ok(())
    }

    /// Rebuilds the data bitmap from the key index.
    pub(crate) fn data_bitmap_rebuild(&mut self) -> KvsResult<()> {
        self.data_bitmap.clear_all();
        for i in 0..self.index.len() {
            let offset = self.index.get(i).metadata_offset;
            let meta = self.read_slot(offset)?;
            self.bitmap_set_region(meta.value_offset, meta.value_size)?;
        }
        Ok(())
    }
}
