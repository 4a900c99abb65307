// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for service-data persistence and the CRC block.

#[cfg(test)]
mod tests {
    use crate::layout::{Superblock, KEY_SIZE};
    use crate::store::persist::ServiceCrc;
    use crate::store::KvStore;
    use tempfile::TempDir;

    fn key(name: &[u8]) -> [u8; KEY_SIZE] {
        let mut k = [0u8; KEY_SIZE];
        k[..name.len()].copy_from_slice(name);
        k
    }

    #[test]
    fn test_crc_block_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let mut store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        store.put(&key(b"k1"), b"one").unwrap();
        store.put(&key(b"k2"), b"two").unwrap();

        let in_ram = store.crc.clone();
        let read_back = ServiceCrc::read(&mut store.dev, &store.sb).unwrap();
        assert_eq!(read_back, in_ram);
    }

    #[test]
    fn test_service_structures_round_trip_through_reopen() {
        let dir = TempDir::new().unwrap();
        let mut store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        store.put(&key(b"k1"), &vec![1u8; 100]).unwrap();
        store.put(&key(b"k2"), &vec![2u8; 200]).unwrap();
        store.delete(&key(b"k1")).unwrap();

        let sb = store.sb.clone();
        let data_bitmap = store.data_bitmap.clone();
        let metadata_bitmap = store.metadata_bitmap.clone();
        let rewrite = store.rewrite_counts.clone();
        let crc = store.crc.clone();
        store.close().unwrap();

        let store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        assert_eq!(store.sb, sb);
        assert_eq!(store.data_bitmap, data_bitmap);
        assert_eq!(store.metadata_bitmap, metadata_bitmap);
        assert_eq!(store.rewrite_counts, rewrite);
        assert_eq!(store.crc, crc);
    }

    #[test]
    fn test_primary_and_backup_superblocks_are_identical() {
        let dir = TempDir::new().unwrap();
        let mut store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        store.put(&key(b"k"), b"value").unwrap();
        let path = store.storage_path();
        let backup_offset = store.sb.backup_offset as usize;
        store.close().unwrap();

        let raw = std::fs::read(path).unwrap();
        let size = Superblock::encoded_size() as usize;
        assert_eq!(raw[..size], raw[backup_offset..backup_offset + size]);

        // Both carry the same stored CRC, and it matches the bytes.
        let sb = Superblock::from_bytes(&raw[..size]).unwrap();
        let crc_at = |off: usize| {
            u32::from_be_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
        };
        let primary_crc = crc_at(sb.crc_offset as usize);
        let backup_crc = crc_at(sb.crc_offset as usize + 4);
        assert_eq!(primary_crc, backup_crc);
        assert_eq!(primary_crc, crc32fast::hash(&raw[..size]));
    }

    #[test]
    fn test_update_entry_crc_reflects_disk_bytes() {
        let dir = TempDir::new().unwrap();
        let mut store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        store.put(&key(b"k"), b"value").unwrap();

        let i = store.index.find(&key(b"k")).unwrap();
        let metadata_offset = store.index.get(i).metadata_offset;
        let slot = store.sb.slot_index(metadata_offset);
        let recorded = store.crc.entry[slot as usize];

        // Recomputing over unchanged bytes is a fixed point.
        store.update_entry_crc(slot).unwrap();
        assert_eq!(store.crc.entry[slot as usize], recorded);

        // Hand-computing from the raw file agrees with the store.
        let meta = store.read_slot(metadata_offset).unwrap();
        let raw = std::fs::read(store.storage_path()).unwrap();
        let slot_bytes =
            &raw[metadata_offset as usize..metadata_offset as usize + crate::layout::SLOT_SIZE];
        let aligned = store.aligned(meta.value_size) as usize;
        let value_bytes = &raw[meta.value_offset as usize..meta.value_offset as usize + aligned];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(slot_bytes);
        hasher.update(value_bytes);
        assert_eq!(hasher.finalize(), recorded);
    }

    #[test]
    fn test_delete_zeroes_the_entry_crc() {
        let dir = TempDir::new().unwrap();
        let mut store = KvStore::open(dir.path(), 64 * 1024).unwrap();
        store.put(&key(b"k"), b"value").unwrap();

        let i = store.index.find(&key(b"k")).unwrap();
        let slot = store.sb.slot_index(store.index.get(i).metadata_offset);
        assert_ne!(store.crc.entry[slot as usize], 0);

        store.delete(&key(b"k")).unwrap();
        assert_eq!(store.crc.entry[slot as usize], 0);
    }
}
