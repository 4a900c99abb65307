// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Metadata slot: the fixed-size on-device record describing one key.

use crate::error::{KvsError, KvsResult};

/// Key width in bytes. Keys are opaque byte strings of exactly this size.
pub const KEY_SIZE: usize = 128;

/// Encoded size of one metadata slot.
///
/// ## Memory Layout
/// ```text
/// Offset | Size | Field
/// -------|------|-------
/// 0      | 128  | key
/// 128    | 4    | value_offset (u32 big-endian)
/// 132    | 4    | value_size (u32 big-endian)
/// ```
pub const SLOT_SIZE: usize = KEY_SIZE + 8;

/// One metadata slot.
///
/// A slot is *erased* when all of its bytes read 0xFF, the state a page
/// erase leaves behind, and *live* when it describes a value region inside
/// the user-data area. The slot participates, together with its aligned
/// value bytes, in the per-entry CRC that decides key validity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSlot {
    /// The key, full width.
    pub key: [u8; KEY_SIZE],

    /// Absolute byte offset of the value inside the user-data area.
    pub value_offset: u32,

    /// Exact (unaligned) value size in bytes.
    pub value_size: u32,
}

impl MetadataSlot {
    /// Serialises the slot to its on-device form.
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut bytes = [0u8; SLOT_SIZE];
        bytes[..KEY_SIZE].copy_from_slice(&self.key);
        bytes[KEY_SIZE..KEY_SIZE + 4].copy_from_slice(&self.value_offset.to_be_bytes());
        bytes[KEY_SIZE + 4..].copy_from_slice(&self.value_size.to_be_bytes());
        bytes
    }

    /// Deserialises a slot from its on-device form.
    ///
    /// ## Error Conditions
    /// - slice length != `SLOT_SIZE`
    pub fn from_bytes(bytes: &[u8]) -> KvsResult<Self> {
        if bytes.len() != SLOT_SIZE {
            return Err(KvsError::InvalidParam {
                reason: format!("slot must be {} bytes, got {}", SLOT_SIZE, bytes.len()),
            });
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);

        let value_offset = u32::from_be_bytes([
            bytes[KEY_SIZE],
            bytes[KEY_SIZE + 1],
            bytes[KEY_SIZE + 2],
            bytes[KEY_SIZE + 3],
        ]);
        let value_size = u32::from_be_bytes([
            bytes[KEY_SIZE + 4],
            bytes[KEY_SIZE + 5],
            bytes[KEY_SIZE + 6],
            bytes[KEY_SIZE + 7],
        ]);

        Ok(MetadataSlot {
            key,
            value_offset,
            value_size,
        })
    }

    /// True iff the encoded slot bytes are in the erased state.
    pub fn is_erased(bytes: &[u8]) -> bool {
        bytes.iter().all(|&b| b == 0xFF)
    }
}
