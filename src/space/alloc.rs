// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Carousel allocators.
//!
//! Both scanners start where the previous search left off instead of at
//! index zero, so repeated allocations march across the whole area rather
//! than hammering its start. The cursors live in the superblock and are
//! persisted with the rest of the service data.

use crate::space::Bitmap;

/// Finds a contiguous run of `words_needed` zero bits.
///
/// Two passes: from `cursor` to the end of the area, then, if nothing was
/// found, from index zero back up to the starting cursor. On success the
/// cursor is moved to the last word of the run so the next search starts
/// beyond it.
///
/// ## Input
/// - `bitmap`: real-usage bitmap, one bit per word
/// - `total_words`: number of addressable words in the area
/// - `words_needed`: run length, must be > 0
/// - `cursor`: carousel position, updated in place on success
///
/// ## Output
/// - `Some(start_word)`: first word index of the free run
/// - `None`: no run of the requested length exists
pub fn find_free_run(
    bitmap: &Bitmap,
    total_words: u32,
    words_needed: u32,
    cursor: &mut u32,
) -> Option<u32> {
    if words_needed == 0 || words_needed > total_words {
        return None;
    }

    let start_scan = (*cursor).min(total_words);

    // Pass 1: cursor to the end of the area.
    let mut run_length = 0u32;
    for i in start_scan..total_words {
        if bitmap.get(i) {
            run_length = 0;
        } else {
            run_length += 1;
        }
        if run_length >= words_needed {
            *cursor = i;
            return Some(i - (words_needed - 1));
        }
    }

    // Pass 2: start of the area back up to the cursor.
    if start_scan > 0 {
        run_length = 0;
        for i in 0..start_scan {
            if bitmap.get(i) {
                run_length = 0;
            } else {
                run_length += 1;
            }
            if run_length >= words_needed {
                *cursor = i;
                return Some(i - (words_needed - 1));
            }
        }
    }

    None
}

/// Finds the first free metadata slot, scanning circularly from `cursor`.
///
/// On success the cursor is left on the returned slot.
pub fn find_free_slot(bitmap: &Bitmap, total_slots: u32, cursor: &mut u32) -> Option<u32> {
    if total_slots == 0 {
        return None;
    }

    let start = (*cursor).min(total_slots - 1);
    for i in 0..total_slots {
        let slot = (start + i) % total_slots;
        if !bitmap.get(slot) {
            *cursor = slot;
            return Some(slot);
        }
    }

    None
}
