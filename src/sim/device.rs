// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! File-backed flash device with fixed geometry.
//!
//! ## Geometry
//! ```text
//! word  = 4 bytes   (smallest writable unit)
//! page  = 256 words = 1024 bytes (smallest erasable unit)
//! store = 2048 pages = 2 MiB
//! ```
//!
//! ## Crash Injection
//! `set_write_failure_countdown(n)` arms a counter: after `n` further
//! successful word writes, every subsequent write fails with
//! [`KvsError::PowerLoss`] before touching the file. The on-disk image is
//! then byte-for-byte what an abrupt process abort would have left behind,
//! which lets crash scenarios run in-process instead of killing the harness.

use crate::error::{KvsError, KvsResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Total number of pages on the device.
pub const PAGE_COUNT: u32 = 2048;

/// Size of one word in bytes.
pub const WORD_SIZE: u32 = 4;

/// Number of words in one page.
pub const WORDS_PER_PAGE: u32 = 256;

/// Storage file name inside the data directory.
pub const STORAGE_FILENAME: &str = "kvs_storage.bin";

/// Simulated SSD/MMC device backed by a file.
///
/// Owns the backing file exclusively for its lifetime: an advisory lock is
/// taken on open and released on drop, so two processes cannot fight over
/// the same store image.
#[derive(Debug)]
pub struct SimDevice {
    file: File,

    /// Remaining successful word writes before simulated power loss.
    /// Negative means the hook is disarmed.
    write_failure_countdown: i64,
}

impl SimDevice {
    /// Creates a fresh storage file (truncating any existing one) and locks it.
    pub fn create(dir: &Path) -> KvsResult<Self> {
        let path = Self::storage_path(dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| KvsError::io("open_storage", e))?;
        Self::lock_and_wrap(file)
    }

    /// Opens an existing storage file and locks it. Fails if the file is absent.
    pub fn open_existing(dir: &Path) -> KvsResult<Self> {
        let path = Self::storage_path(dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| KvsError::io("open_storage", e))?;
        Self::lock_and_wrap(file)
    }

    fn lock_and_wrap(file: File) -> KvsResult<Self> {
        file.try_lock_exclusive()
            .map_err(|e| KvsError::io("lock_storage", e))?;
        Ok(SimDevice {
            file,
            write_failure_countdown: -1,
        })
    }

    /// Ensures the data directory exists.
    pub fn ensure_data_dir(dir: &Path) -> KvsResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| KvsError::io("create_data_dir", e))
    }

    /// Path of the storage file inside `dir`.
    pub fn storage_path(dir: &Path) -> PathBuf {
        dir.join(STORAGE_FILENAME)
    }

    /// Size of one word in bytes.
    pub fn word_size(&self) -> u32 {
        WORD_SIZE
    }

    /// Number of words per page.
    pub fn words_per_page(&self) -> u32 {
        WORDS_PER_PAGE
    }

    /// Total page count.
    pub fn page_count(&self) -> u32 {
        PAGE_COUNT
    }

    /// Size of one page in bytes.
    pub fn page_size(&self) -> u32 {
        WORD_SIZE * WORDS_PER_PAGE
    }

    /// Total device size in bytes.
    pub fn storage_size(&self) -> u32 {
        self.page_size() * PAGE_COUNT
    }

    /// Arms (or, with a negative count, disarms) the power-loss hook.
    ///
    /// `count` word writes will still succeed; the one after that fails with
    /// [`KvsError::PowerLoss`] without touching the file, and from then on
    /// every mutation (word writes, page erases, formatting) keeps failing.
    /// A dead process cannot issue cleanup I/O, so neither can a dead device.
    pub fn set_write_failure_countdown(&mut self, count: i64) {
        self.write_failure_countdown = count;
    }

    fn check_power(&self) -> KvsResult<()> {
        if self.write_failure_countdown == 0 {
            return Err(KvsError::PowerLoss);
        }
        Ok(())
    }

    /// Reads one word into `dst`.
    ///
    /// ## Input
    /// - `page`: page number, `0..PAGE_COUNT`
    /// - `word`: word offset inside the page, `0..WORDS_PER_PAGE`
    /// - `dst`: buffer of exactly one word
    ///
    /// ## Error Conditions
    /// - `InvalidPage` / `InvalidWordOffset`: out of bounds
    /// - `InvalidParam`: buffer is not exactly `WORD_SIZE` bytes
    /// - `Io`: seek or read failed
    pub fn read_word(&mut self, page: u32, word: u32, dst: &mut [u8]) -> KvsResult<()> {
        self.check_bounds(page, word)?;
        if dst.len() != WORD_SIZE as usize {
            return Err(KvsError::InvalidParam {
                reason: format!("word buffer must be {} bytes, got {}", WORD_SIZE, dst.len()),
            });
        }

        let pos = (page as u64 * WORDS_PER_PAGE as u64 + word as u64) * WORD_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| KvsError::io("seek_read_word", e))?;
        self.file
            .read_exact(dst)
            .map_err(|e| KvsError::io("read_word", e))?;
        Ok(())
    }

    /// Writes one word from `src`.
    ///
    /// Subject to the power-loss countdown: once it reaches zero the write
    /// fails before the file is touched.
    pub fn write_word(&mut self, page: u32, word: u32, src: &[u8]) -> KvsResult<()> {
        self.check_bounds(page, word)?;
        if src.len() != WORD_SIZE as usize {
            return Err(KvsError::InvalidParam {
                reason: format!("word buffer must be {} bytes, got {}", WORD_SIZE, src.len()),
            });
        }

        self.check_power()?;
        if self.write_failure_countdown > 0 {
            self.write_failure_countdown -= 1;
        }

        let pos = (page as u64 * WORDS_PER_PAGE as u64 + word as u64) * WORD_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| KvsError::io("seek_write_word", e))?;
        self.file
            .write_all(src)
            .map_err(|e| KvsError::io("write_word", e))?;
        Ok(())
    }

    /// Erases one page, filling it with 0xFF.
    pub fn erase_page(&mut self, page: u32) -> KvsResult<()> {
        if page >= PAGE_COUNT {
            return Err(KvsError::InvalidPage { page });
        }
        self.check_power()?;

        let page_size = self.page_size() as usize;
        let pos = page as u64 * page_size as u64;
        let erase_buf = vec![0xFFu8; page_size];

        self.file
            .seek(SeekFrom::Start(pos))
            .map_err(|e| KvsError::io("seek_erase_page", e))?;
        self.file
            .write_all(&erase_buf)
            .map_err(|e| KvsError::io("erase_page", e))?;
        self.file
            .flush()
            .map_err(|e| KvsError::io("flush_erase_page", e))?;
        Ok(())
    }

    /// Formats the whole device with 0xFF, in 4 KiB chunks.
    pub fn format(&mut self) -> KvsResult<()> {
        self.check_power()?;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| KvsError::io("seek_format", e))?;

        let chunk = vec![0xFFu8; 4096];
        let mut bytes_left = self.storage_size() as usize;
        while bytes_left > 0 {
            let n = bytes_left.min(chunk.len());
            self.file
                .write_all(&chunk[..n])
                .map_err(|e| KvsError::io("format", e))?;
            bytes_left -= n;
        }
        self.file
            .flush()
            .map_err(|e| KvsError::io("flush_format", e))?;
        Ok(())
    }

    /// Flushes the backing file's buffers.
    pub fn flush(&mut self) -> KvsResult<()> {
        self.file
            .sync_data()
            .map_err(|e| KvsError::io("flush_storage", e))
    }

    fn check_bounds(&self, page: u32, word: u32) -> KvsResult<()> {
        if page >= PAGE_COUNT {
            return Err(KvsError::InvalidPage { page });
        }
        if word >= WORDS_PER_PAGE {
            return Err(KvsError::InvalidWordOffset { word });
        }
        Ok(())
    }
}

impl Drop for SimDevice {
    /// Releases the advisory lock on drop.
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
