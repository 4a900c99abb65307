// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Superblock: the root service structure of the store.
//!
//! Two byte-identical copies live on the device: primary at offset 0,
//! backup in the last `superblock_size` bytes. A torn write of either
//! one is survivable. Every region offset and size is frozen here at store
//! creation; only the two carousel cursors mutate afterwards (they persist
//! so wear spreading survives restarts).

use crate::error::{KvsError, KvsResult};
use crate::layout::{align_up, SLOT_SIZE};
use crate::sim::{PAGE_COUNT, WORDS_PER_PAGE, WORD_SIZE};

/// Magic number identifying a FlashKV superblock.
pub const SUPERBLOCK_MAGIC: u32 = 122_221;

/// Smallest metadata capacity a layout may end up with; `open` refuses
/// configurations below it.
pub const MIN_KEY_COUNT: u32 = 16;

/// Encoded superblock length before word alignment: 22 fields x 4 bytes.
pub const ENCODED_LEN: usize = 88;

/// The superblock.
///
/// ## Memory Layout (all fields u32 big-endian)
/// ```text
/// Offset | Field
/// -------|----------------------------
/// 0      | magic (122221)
/// 4      | storage_size
/// 8      | userdata_size
/// 12     | page_count
/// 16     | page_size
/// 20     | words_per_page
/// 24     | word_size
/// 28     | userdata_page_count
/// 32     | superblock_size
/// 36     | metadata_area_size
/// 40     | data_bitmap_size
/// 44     | metadata_bitmap_size
/// 48     | max_key_count
/// 52     | data_bitmap_offset
/// 56     | metadata_bitmap_offset
/// 60     | rewrite_offset
/// 64     | crc_offset
/// 68     | data_offset
/// 72     | metadata_offset
/// 76     | backup_offset
/// 80     | last_data_word_checked
/// 84     | last_metadata_slot_checked
/// ```
/// The stored form is zero-padded up to `superblock_size`
/// (= `align_up(ENCODED_LEN, word_size)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,

    // Device geometry
    pub storage_size: u32,
    pub userdata_size: u32,
    pub page_count: u32,
    pub page_size: u32,
    pub words_per_page: u32,
    pub word_size: u32,

    // Region sizes
    pub userdata_page_count: u32,
    pub superblock_size: u32,
    pub metadata_area_size: u32,
    pub data_bitmap_size: u32,
    pub metadata_bitmap_size: u32,
    pub max_key_count: u32,

    // Region offsets
    pub data_bitmap_offset: u32,
    pub metadata_bitmap_offset: u32,
    pub rewrite_offset: u32,
    pub crc_offset: u32,
    pub data_offset: u32,
    pub metadata_offset: u32,
    pub backup_offset: u32,

    // Allocator carousels
    pub last_data_word_checked: u32,
    pub last_metadata_slot_checked: u32,
}

impl Superblock {
    /// Stored (word-aligned) superblock size for the fixed geometry.
    pub fn encoded_size() -> u32 {
        align_up(ENCODED_LEN as u32, WORD_SIZE)
    }

    /// Computes the full on-device layout for a requested user-area size.
    ///
    /// The service-region sizes are mutually dependent: the metadata area
    /// gets whatever is left after the bitmaps, rewrite counters and CRC
    /// block, yet the metadata bitmap, the rewrite counters and the
    /// entry-CRC array all scale with the metadata area in turn. The knot is
    /// solved by fixed-point iteration on `metadata_area_size`, which
    /// converges in a handful of rounds.
    ///
    /// ## Input
    /// - `user_size`: desired user-data area in bytes (aligned up to a word)
    ///
    /// ## Output
    /// - `Ok(Superblock)`: fully populated layout, cursors at zero
    /// - `Err(MetadataAreaTooSmall)`: fewer than [`MIN_KEY_COUNT`] slots fit
    /// - `Err(InvalidParam)`: the user area alone exceeds the device
    pub fn compute_layout(user_size: u32) -> KvsResult<Superblock> {
        let word_size = WORD_SIZE;
        let words_per_page = WORDS_PER_PAGE;
        let page_count = PAGE_COUNT;
        let page_size = word_size * words_per_page;
        let storage_size = page_size * page_count;
        let superblock_size = Self::encoded_size();
        let userdata_size = align_up(user_size, word_size);

        let fixed_overhead = (superblock_size * 2) as i64 + userdata_size as i64;
        if fixed_overhead >= storage_size as i64 {
            return Err(KvsError::InvalidParam {
                reason: format!(
                    "user area of {} bytes does not fit a {}-byte device",
                    userdata_size, storage_size
                ),
            });
        }

        let mut metadata_size: u32 = 0;
        let mut data_bitmap_size = 0;
        let mut metadata_bitmap_size = 0;
        let mut rewrite_size = 0;
        let mut crc_size = 0;

        // The feedback per round is a few percent of the metadata size, so
        // the iteration contracts quickly; the bound is a hang guard only.
        let mut converged = false;
        for _ in 0..64 {
            let prev_metadata_size = metadata_size;

            let max_keys = metadata_size / SLOT_SIZE as u32;

            // Data bitmap: 1 bit per user-area word.
            let total_words = userdata_size / word_size;
            data_bitmap_size = align_up(total_words.div_ceil(8), 4);

            // Metadata bitmap: 1 bit per slot.
            metadata_bitmap_size = align_up(max_keys.div_ceil(8), 4);

            // Rewrite counters: one u32 per tracked page (user data + metadata).
            let tracked_pages = (userdata_size + metadata_size).div_ceil(page_size);
            rewrite_size = align_up(tracked_pages * 4, 4);

            // CRC block: five fixed CRCs plus one per slot.
            crc_size = align_up(5 * 4 + max_keys * 4, 4);

            let remainder = storage_size as i64
                - (superblock_size * 2) as i64
                - data_bitmap_size as i64
                - metadata_bitmap_size as i64
                - rewrite_size as i64
                - crc_size as i64
                - userdata_size as i64;
            if remainder <= 0 {
                return Err(KvsError::MetadataAreaTooSmall {
                    max_keys: 0,
                    min: MIN_KEY_COUNT,
                });
            }
            metadata_size = align_up(remainder as u32, 4);

            if metadata_size == prev_metadata_size {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(KvsError::InvalidParam {
                reason: "layout computation did not stabilise".to_string(),
            });
        }

        let max_key_count = metadata_size / SLOT_SIZE as u32;
        if max_key_count < MIN_KEY_COUNT {
            return Err(KvsError::MetadataAreaTooSmall {
                max_keys: max_key_count,
                min: MIN_KEY_COUNT,
            });
        }

        let data_bitmap_offset = superblock_size;
        let metadata_bitmap_offset = data_bitmap_offset + data_bitmap_size;
        let rewrite_offset = metadata_bitmap_offset + metadata_bitmap_size;
        let crc_offset = rewrite_offset + rewrite_size;
        let data_offset = crc_offset + crc_size;
        let metadata_offset = data_offset + userdata_size;
        let backup_offset = storage_size - superblock_size;

        Ok(Superblock {
            magic: SUPERBLOCK_MAGIC,
            storage_size,
            userdata_size,
            page_count,
            page_size,
            words_per_page,
            word_size,
            userdata_page_count: userdata_size.div_ceil(page_size),
            superblock_size,
            metadata_area_size: metadata_size,
            data_bitmap_size,
            metadata_bitmap_size,
            max_key_count,
            data_bitmap_offset,
            metadata_bitmap_offset,
            rewrite_offset,
            crc_offset,
            data_offset,
            metadata_offset,
            backup_offset,
            last_data_word_checked: 0,
            last_metadata_slot_checked: 0,
        })
    }

    /// Serialises to the stored, zero-padded form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let fields = [
            self.magic,
            self.storage_size,
            self.userdata_size,
            self.page_count,
            self.page_size,
            self.words_per_page,
            self.word_size,
            self.userdata_page_count,
            self.superblock_size,
            self.metadata_area_size,
            self.data_bitmap_size,
            self.metadata_bitmap_size,
            self.max_key_count,
            self.data_bitmap_offset,
            self.metadata_bitmap_offset,
            self.rewrite_offset,
            self.crc_offset,
            self.data_offset,
            self.metadata_offset,
            self.backup_offset,
            self.last_data_word_checked,
            self.last_metadata_slot_checked,
        ];

        let mut bytes = vec![0u8; Self::encoded_size() as usize];
        for (i, field) in fields.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&field.to_be_bytes());
        }
        bytes
    }

    /// Deserialises from the stored form.
    ///
    /// Deliberately lenient: a decoded superblock is only trusted after its
    /// CRC (kept in the CRC block) has been verified, so garbage decodes to
    /// garbage field values rather than an error here.
    pub fn from_bytes(bytes: &[u8]) -> KvsResult<Superblock> {
        if bytes.len() < ENCODED_LEN {
            return Err(KvsError::InvalidParam {
                reason: format!(
                    "superblock must be at least {} bytes, got {}",
                    ENCODED_LEN,
                    bytes.len()
                ),
            });
        }

        let field = |i: usize| {
            u32::from_be_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };

        Ok(Superblock {
            magic: field(0),
            storage_size: field(1),
            userdata_size: field(2),
            page_count: field(3),
            page_size: field(4),
            words_per_page: field(5),
            word_size: field(6),
            userdata_page_count: field(7),
            superblock_size: field(8),
            metadata_area_size: field(9),
            data_bitmap_size: field(10),
            metadata_bitmap_size: field(11),
            max_key_count: field(12),
            data_bitmap_offset: field(13),
            metadata_bitmap_offset: field(14),
            rewrite_offset: field(15),
            crc_offset: field(16),
            data_offset: field(17),
            metadata_offset: field(18),
            backup_offset: field(19),
            last_data_word_checked: field(20),
            last_metadata_slot_checked: field(21),
        })
    }

    /// Byte offset of metadata slot `i`.
    pub fn slot_offset(&self, slot: u32) -> u32 {
        self.metadata_offset + slot * SLOT_SIZE as u32
    }

    /// Slot index of a metadata byte offset.
    pub fn slot_index(&self, metadata_offset: u32) -> u32 {
        (metadata_offset - self.metadata_offset) / SLOT_SIZE as u32
    }

    /// Size of the rewrite-counter region in bytes.
    pub fn rewrite_size(&self) -> u32 {
        self.crc_offset - self.rewrite_offset
    }

    /// Number of user-area words.
    pub fn userdata_words(&self) -> u32 {
        self.userdata_size / self.word_size
    }
}
