// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! FlashKV - embedded key-value store on a simulated flash device.
//!
//! A single-threaded, file-backed store that persists fixed-size keys and
//! variable-size values onto an SSD/MMC-like medium: writes are word-granular,
//! erases are page-granular, and an erased byte reads 0xFF.
//!
//! ## Features
//!
//! - **Crash safety**: per-entry CRC32 over metadata + value decides validity
//!   at recovery; a torn write is simply never promoted to a visible key
//! - **Redundant superblock**: primary at offset 0, backup in the last bytes
//!   of the device, with automatic failover and repair
//! - **Wear-aware allocation**: carousel cursors spread writes across the
//!   data and metadata areas, and survive restarts inside the superblock
//! - **Two-mode garbage collector**: victim-page selection by garbage count,
//!   with live-data evacuation and a full service-structure rebuild
//!
//! ## Quick Start
//!
//! ```no_run
//! use flashkv::KvStore;
//! use std::path::Path;
//!
//! let mut store = KvStore::open(Path::new("data"), 512 * 1024)?;
//!
//! let mut key = [0u8; flashkv::KEY_SIZE];
//! key[..5].copy_from_slice(b"hello");
//!
//! store.put(&key, b"world")?;
//!
//! let mut buf = [0u8; 16];
//! let n = store.get(&key, &mut buf)?;
//! assert_eq!(&buf[..n], b"world");
//!
//! store.close()?;
//! # Ok::<(), flashkv::KvsError>(())
//! ```
//!
//! ## Architecture
//!
//! - **sim**: block-device simulator (word reads/writes, page erases, crash hook)
//! - **io**: word-aligned region I/O and page-granular region clearing
//! - **layout**: superblock, metadata slots, on-device layout computation
//! - **space**: occupancy bitmaps, rewrite counters, carousel allocators
//! - **store**: key index, validity checks, persistence, GC, the public API
//! - **log**: advisory diagnostic log sink

pub mod error;
pub mod io;
pub mod layout;
pub mod log;
pub mod sim;
pub mod space;
pub mod store;

// Re-export commonly used types
pub use error::{KvsError, KvsResult, Status};
pub use layout::{KEY_SIZE, MIN_KEY_COUNT, SLOT_SIZE, SUPERBLOCK_MAGIC};
pub use sim::{PAGE_COUNT, WORDS_PER_PAGE, WORD_SIZE};
pub use store::KvStore;
