// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Region read/write/clear primitives.
//!
//! All offsets and sizes are byte counts that must be multiples of the word
//! size; the translation to (page, word) coordinates happens here, so the
//! rest of the crate never deals with device geometry directly.

use crate::error::{KvsError, KvsResult};
use crate::sim::SimDevice;

fn check_alignment(offset: u32, size: u32, word_size: u32) -> KvsResult<()> {
    if offset % word_size != 0 || size % word_size != 0 {
        return Err(KvsError::Unaligned { offset, size });
    }
    Ok(())
}

/// Reads `dst.len()` bytes starting at byte `offset`.
///
/// ## Input
/// - `offset`: byte offset from the start of the device, word-aligned
/// - `dst`: destination buffer; its length must be a word multiple
///
/// ## Error Conditions
/// - `Unaligned`: offset or length not a word multiple
/// - `InvalidPage`: region runs past the end of the device
pub fn read_region(dev: &mut SimDevice, offset: u32, dst: &mut [u8]) -> KvsResult<()> {
    let word_size = dev.word_size();
    let words_per_page = dev.words_per_page();
    check_alignment(offset, dst.len() as u32, word_size)?;

    let mut cur_word = (offset / word_size) % words_per_page;
    let mut cur_page = offset / (words_per_page * word_size);

    for chunk in dst.chunks_mut(word_size as usize) {
        dev.read_word(cur_page, cur_word, chunk)?;
        cur_word += 1;
        if cur_word == words_per_page {
            cur_word = 0;
            cur_page += 1;
        }
    }
    Ok(())
}

/// Writes `src` starting at byte `offset`. Same alignment rules as
/// [`read_region`].
pub fn write_region(dev: &mut SimDevice, offset: u32, src: &[u8]) -> KvsResult<()> {
    let word_size = dev.word_size();
    let words_per_page = dev.words_per_page();
    check_alignment(offset, src.len() as u32, word_size)?;

    let mut cur_word = (offset / word_size) % words_per_page;
    let mut cur_page = offset / (words_per_page * word_size);

    for chunk in src.chunks(word_size as usize) {
        dev.write_word(cur_page, cur_word, chunk)?;
        cur_word += 1;
        if cur_word == words_per_page {
            cur_word = 0;
            cur_page += 1;
        }
    }
    Ok(())
}

/// Sets `[offset, offset + size)` to 0xFF.
///
/// A flash medium can only force bytes back to 0xFF by erasing whole pages,
/// so for each page intersecting the range: read the page, blank the
/// intersection in the buffer, erase the page, write the buffer back. Bytes
/// outside the range survive.
///
/// ## Error Conditions
/// - any read/erase/write failure of the underlying device
pub fn clear_region(dev: &mut SimDevice, offset: u32, size: u32) -> KvsResult<()> {
    let page_size = dev.page_size();
    let words_per_page = dev.words_per_page();
    let word_size = dev.word_size();

    let mut start = offset;
    let end = offset + size;

    while start < end {
        let cur_page = start / page_size;
        let page_start = cur_page * page_size;
        let page_end = page_start + page_size;

        // Intersection of [offset, end) with this page, page-relative.
        let clear_from = (start - page_start) as usize;
        let clear_to = if end < page_end {
            (end - page_start) as usize
        } else {
            page_size as usize
        };

        let mut page_buf = vec![0u8; page_size as usize];
        for w in 0..words_per_page {
            let at = (w * word_size) as usize;
            dev.read_word(cur_page, w, &mut page_buf[at..at + word_size as usize])?;
        }

        page_buf[clear_from..clear_to].fill(0xFF);

        dev.erase_page(cur_page)?;
        for w in 0..words_per_page {
            let at = (w * word_size) as usize;
            dev.write_word(cur_page, w, &page_buf[at..at + word_size as usize])?;
        }

        start = page_end;
    }

    Ok(())
}

/// True iff every byte in `[offset, offset + size)` reads 0xFF.
pub fn is_region_empty(dev: &mut SimDevice, offset: u32, size: u32) -> KvsResult<bool> {
    if size == 0 {
        return Ok(true);
    }
    let mut buf = vec![0u8; size as usize];
    read_region(dev, offset, &mut buf)?;
    Ok(buf.iter().all(|&b| b == 0xFF))
}
