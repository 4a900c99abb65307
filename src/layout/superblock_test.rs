// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for superblock encoding and layout computation.

#[cfg(test)]
mod tests {
    use crate::error::KvsError;
    use crate::layout::superblock::ENCODED_LEN;
    use crate::layout::{Superblock, MIN_KEY_COUNT, SLOT_SIZE, SUPERBLOCK_MAGIC};
    use crate::sim::{PAGE_COUNT, WORDS_PER_PAGE, WORD_SIZE};

    #[test]
    fn test_encode_decode_round_trip() {
        let sb = Superblock::compute_layout(512 * 1024).unwrap();
        let bytes = sb.to_bytes();
        assert_eq!(bytes.len() as u32, Superblock::encoded_size());

        let back = Superblock::from_bytes(&bytes).unwrap();
        assert_eq!(back, sb);
    }

    #[test]
    fn test_layout_regions_are_contiguous_and_ordered() {
        let sb = Superblock::compute_layout(512 * 1024).unwrap();

        assert_eq!(sb.magic, SUPERBLOCK_MAGIC);
        assert_eq!(sb.storage_size, WORD_SIZE * WORDS_PER_PAGE * PAGE_COUNT);

        // Region chain: superblock, data bitmap, metadata bitmap, rewrite
        // counters, CRC block, user data, metadata, backup superblock.
        assert_eq!(sb.data_bitmap_offset, sb.superblock_size);
        assert_eq!(
            sb.metadata_bitmap_offset,
            sb.data_bitmap_offset + sb.data_bitmap_size
        );
        assert_eq!(
            sb.rewrite_offset,
            sb.metadata_bitmap_offset + sb.metadata_bitmap_size
        );
        assert_eq!(sb.crc_offset, sb.rewrite_offset + sb.rewrite_size());
        assert_eq!(sb.metadata_offset, sb.data_offset + sb.userdata_size);
        assert_eq!(sb.backup_offset, sb.storage_size - sb.superblock_size);

        // The metadata area must end at (or before) the backup superblock.
        assert!(sb.metadata_offset + sb.metadata_area_size <= sb.backup_offset);

        // Every boundary is word-aligned.
        for off in [
            sb.data_bitmap_offset,
            sb.metadata_bitmap_offset,
            sb.rewrite_offset,
            sb.crc_offset,
            sb.data_offset,
            sb.metadata_offset,
            sb.backup_offset,
        ] {
            assert_eq!(off % WORD_SIZE, 0, "offset {} not word-aligned", off);
        }
    }

    #[test]
    fn test_layout_capacity_is_consistent() {
        let sb = Superblock::compute_layout(512 * 1024).unwrap();

        assert!(sb.max_key_count >= MIN_KEY_COUNT);
        assert_eq!(sb.max_key_count, sb.metadata_area_size / SLOT_SIZE as u32);

        // Data bitmap holds one bit per user-area word.
        assert!(sb.data_bitmap_size * 8 >= sb.userdata_words());
        // Metadata bitmap holds one bit per slot.
        assert!(sb.metadata_bitmap_size * 8 >= sb.max_key_count);
        // CRC block holds the 5 fixed CRCs plus the entry array.
        assert!(sb.crc_offset + 20 + sb.max_key_count * 4 <= sb.data_offset);
        // Rewrite counters cover every tracked page.
        let tracked_pages =
            (sb.userdata_size + sb.metadata_area_size).div_ceil(sb.page_size);
        assert!(sb.rewrite_size() / 4 >= tracked_pages);
    }

    #[test]
    fn test_user_size_is_word_aligned() {
        let sb = Superblock::compute_layout(1001).unwrap();
        assert_eq!(sb.userdata_size, 1004);
    }

    #[test]
    fn test_oversized_user_area_is_refused() {
        let result = Superblock::compute_layout(2 * 1024 * 1024);
        assert!(matches!(result, Err(KvsError::InvalidParam { .. })));
    }

    #[test]
    fn test_user_area_squeezing_out_metadata_is_refused() {
        // Leaves room for the service areas but for fewer than
        // MIN_KEY_COUNT slots.
        let storage = 2 * 1024 * 1024;
        let result = Superblock::compute_layout(storage - 40 * 1024);
        match result {
            Err(KvsError::MetadataAreaTooSmall { .. }) | Err(KvsError::InvalidParam { .. }) => {}
            other => panic!("expected a refusal, got {:?}", other),
        }
    }

    #[test]
    fn test_from_bytes_is_lenient_about_garbage() {
        // Garbage decodes to garbage fields; the CRC check is what rejects it.
        let garbage = vec![0x5Au8; ENCODED_LEN];
        let sb = Superblock::from_bytes(&garbage).unwrap();
        assert_ne!(sb.magic, SUPERBLOCK_MAGIC);
    }
}
