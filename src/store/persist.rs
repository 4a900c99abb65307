// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Service-data persistence: the CRC block and the write-back of every
//! service structure.
//!
//! Persist order is fixed: primary superblock, backup superblock, data
//! bitmap, metadata bitmap, rewrite counters, CRC block, then a flush. The
//! CRCs are recomputed immediately before the write, so the block on disk
//! always describes the bytes that were just written next to it.

use crate::error::{KvsError, KvsResult};
use crate::io;
use crate::layout::{MetadataSlot, Superblock, SLOT_SIZE};
use crate::store::KvStore;

/// Number of fixed (non-entry) CRCs at the head of the CRC block.
const FIXED_CRC_COUNT: usize = 5;

/// RAM copy of the CRC block.
///
/// Five fixed CRCs (primary superblock, backup superblock, data bitmap,
/// rewrite-counter area, metadata bitmap) followed by one entry CRC per
/// metadata slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceCrc {
    pub superblock: u32,
    pub superblock_backup: u32,
    pub data_bitmap: u32,
    pub rewrite: u32,
    pub metadata_bitmap: u32,
    pub entry: Vec<u32>,
}

impl ServiceCrc {
    /// All-zero CRC block for `max_keys` slots.
    pub fn with_capacity(max_keys: usize) -> Self {
        ServiceCrc {
            superblock: 0,
            superblock_backup: 0,
            data_bitmap: 0,
            rewrite: 0,
            metadata_bitmap: 0,
            entry: vec![0u32; max_keys],
        }
    }

    /// Reads the whole CRC block from the device.
    pub fn read(dev: &mut crate::sim::SimDevice, sb: &Superblock) -> KvsResult<Self> {
        let len = (FIXED_CRC_COUNT + sb.max_key_count as usize) * 4;
        let mut bytes = vec![0u8; len];
        io::read_region(dev, sb.crc_offset, &mut bytes)?;

        let word = |i: usize| {
            u32::from_be_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };

        let entry = (0..sb.max_key_count as usize)
            .map(|i| word(FIXED_CRC_COUNT + i))
            .collect();

        Ok(ServiceCrc {
            superblock: word(0),
            superblock_backup: word(1),
            data_bitmap: word(2),
            rewrite: word(3),
            metadata_bitmap: word(4),
            entry,
        })
    }

    /// Encodes the block to its stored form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((FIXED_CRC_COUNT + self.entry.len()) * 4);
        for crc in [
            self.superblock,
            self.superblock_backup,
            self.data_bitmap,
            self.rewrite,
            self.metadata_bitmap,
        ] {
            bytes.extend_from_slice(&crc.to_be_bytes());
        }
        for crc in &self.entry {
            bytes.extend_from_slice(&crc.to_be_bytes());
        }
        bytes
    }
}

impl KvStore {
    /// Writes every service structure back to the device and flushes.
    ///
    /// This is the durability point of every public operation: after it
    /// returns, a reopen reconstructs exactly the state it recorded.
    pub(crate) fn persist_all_service_data(&mut self) -> KvsResult<()> {
        let sb_bytes = self.sb.to_bytes();
        let sb_crc = crc32fast::hash(&sb_bytes);
        self.crc.superblock = sb_crc;
        self.crc.superblock_backup = sb_crc;
        self.crc.data_bitmap = crc32fast::hash(self.data_bitmap.as_bytes());
        self.crc.metadata_bitmap = crc32fast::hash(self.metadata_bitmap.as_bytes());
        let rewrite_bytes = self.rewrite_counts.to_bytes();
        self.crc.rewrite = crc32fast::hash(&rewrite_bytes);

        io::write_region(&mut self.dev, 0, &sb_bytes)?;
        io::write_region(&mut self.dev, self.sb.backup_offset, &sb_bytes)?;
        io::write_region(
            &mut self.dev,
            self.sb.data_bitmap_offset,
            self.data_bitmap.as_bytes(),
        )?;
        io::write_region(
            &mut self.dev,
            self.sb.metadata_bitmap_offset,
            self.metadata_bitmap.as_bytes(),
        )?;
        io::write_region(&mut self.dev, self.sb.rewrite_offset, &rewrite_bytes)?;

        let crc_bytes = self.crc.to_bytes();
        io::write_region(&mut self.dev, self.sb.crc_offset, &crc_bytes)?;

        self.dev.flush()
    }

    /// Recomputes `entry_crc[slot]` from the bytes currently on the device.
    ///
    /// Reads the slot and its aligned value back rather than trusting any
    /// RAM copy: the checksum must cover what a later recovery will read.
    pub(crate) fn update_entry_crc(&mut self, slot: u32) -> KvsResult<()> {
        if slot >= self.sb.max_key_count {
            return Err(KvsError::InvalidParam {
                reason: format!("slot {} out of range", slot),
            });
        }

        let offset = self.sb.slot_offset(slot);
        let mut slot_bytes = [0u8; SLOT_SIZE];
        io::read_region(&mut self.dev, offset, &mut slot_bytes)?;
        let meta = MetadataSlot::from_bytes(&slot_bytes)?;

        let aligned = self.aligned(meta.value_size);
        let mut value = vec![0u8; aligned as usize];
        io::read_region(&mut self.dev, meta.value_offset, &mut value)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&slot_bytes);
        hasher.update(&value);
        self.crc.entry[slot as usize] = hasher.finalize();
        Ok(())
    }
}
