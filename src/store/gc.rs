// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Garbage collector.
//!
//! Invoked by the allocators when a request cannot be satisfied. Victim
//! selection works on a differential: a word is *garbage* when the real
//! usage bitmap marks it occupied but no valid key accounts for it (crashed
//! puts, corrupted entries, stale evacuation leftovers). The page with the
//! most garbage words is reclaimed; any live bytes on it are evacuated
//! first. Afterwards every service structure is rebuilt from the metadata
//! area, which is the ground truth the bitmaps and index derive from.
//!
//! The collector is best-effort: every internal failure degrades to "no
//! progress" (a return of 0), and the caller then reports `NoSpace`.

use crate::error::KvsResult;
use crate::io;
use crate::layout::SLOT_SIZE;
use crate::space::Bitmap;
use crate::store::KvStore;

/// What the collector should reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Reclaim a page of the user-data area.
    CleanData,

    /// Reclaim a slot group of the metadata area.
    CleanMetadata,
}

/// One value scheduled for evacuation off the victim page.
struct GcItem {
    metadata_offset: u32,
    old_value_offset: u32,
    aligned_size: u32,
    offset_in_buffer: u32,
}

/// Picks the dirtiest page of an area.
///
/// Pages are scanned round-robin starting right after the carousel cursor,
/// and the first maximum wins; together these spread reclamation (and the
/// erase wear it causes) across the area instead of always hitting the
/// lowest dirty page. The cursor is advanced past each new best candidate.
///
/// ## Input
/// - `usage`: real occupancy bitmap, one bit per unit
/// - `valid`: transient bitmap of units owned by valid keys
/// - `page_count`: number of logical pages in the area
/// - `units_per_page`: bitmap units per logical page
/// - `unit_size`: bytes per unit (a word, or a whole metadata slot)
/// - `total_units`: number of addressable units
/// - `cursor`: carousel position in units, updated in place
///
/// ## Output
/// - `Some((local_page, live_bytes))`: dirtiest page and the bytes of valid
///   data currently on it
/// - `None`: not a single garbage unit anywhere
fn find_victim_page(
    usage: &Bitmap,
    valid: &Bitmap,
    page_count: u32,
    units_per_page: u32,
    unit_size: u32,
    total_units: u32,
    cursor: &mut u32,
) -> Option<(u32, u32)> {
    let mut start_page = *cursor / units_per_page;
    if start_page >= page_count {
        start_page = 0;
    }

    let mut victim = None;
    let mut max_garbage = 0u32;

    for i in 0..page_count {
        let page = (start_page + i) % page_count;
        let first_unit = page * units_per_page;

        let mut garbage_units = 0u32;
        let mut valid_units = 0u32;
        for u in 0..units_per_page {
            let unit = first_unit + u;
            if unit >= total_units {
                break;
            }
            let in_use = usage.get(unit);
            let is_valid = valid.get(unit);
            if in_use && !is_valid {
                garbage_units += 1;
            } else if is_valid {
                valid_units += 1;
            }
        }

        if garbage_units > max_garbage {
            max_garbage = garbage_units;
            victim = Some((page, valid_units * unit_size));

            // Next search starts on the page after this candidate.
            *cursor = (page + 1) * units_per_page;
            if *cursor >= total_units {
                *cursor = 0;
            }
        }
    }

    victim
}

impl KvStore {
    /// Runs one garbage-collection pass.
    ///
    /// Returns the number of bytes reclaimed; 0 means no progress was made
    /// (nothing to collect, or an internal failure, which is logged).
    pub(crate) fn gc(&mut self, mode: GcMode) -> u32 {
        let result = match mode {
            GcMode::CleanData => self.gc_clean_data(),
            GcMode::CleanMetadata => self.gc_clean_metadata(),
        };
        match result {
            Ok(reclaimed) => reclaimed,
            Err(err) => {
                self.log.line(&format!("GC failed: {}", err));
                0
            }
        }
    }

    fn gc_clean_data(&mut self) -> KvsResult<u32> {
        let page_size = self.sb.page_size;
        let word_size = self.sb.word_size;

        // Transient valid-data bitmap: every word a valid key accounts for.
        let mut valid = Bitmap::with_size(self.sb.data_bitmap_size as usize);
        for i in 0..self.index.len() {
            if !self.key_valid(i).unwrap_or(false) {
                continue;
            }
            let meta = match self.read_slot(self.index.get(i).metadata_offset) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let start_word = (meta.value_offset - self.sb.data_offset) / word_size;
            let num_words = self.aligned(meta.value_size) / word_size;
            for w in 0..num_words {
                valid.set(start_word + w);
            }
        }

        let mut cursor = self.sb.last_data_word_checked;
        let victim = find_victim_page(
            &self.data_bitmap,
            &valid,
            self.sb.userdata_page_count,
            self.sb.words_per_page,
            word_size,
            self.sb.userdata_words(),
            &mut cursor,
        );
        self.sb.last_data_word_checked = cursor;

        let (victim_local, live_bytes) = match victim {
            Some(v) => v,
            None => {
                self.log.line("GC: no reclaimable data page found");
                return Ok(0);
            }
        };

        // Absolute range the reclamation will blank. The user area need not
        // be page-aligned, so this logical page may straddle two physical
        // pages; everything below works on the blanked range itself.
        let victim_start = self.sb.data_offset + victim_local * page_size;
        let victim_end = victim_start + page_size;

        // Live metadata must never be destroyed by data GC.
        if victim_end > self.sb.metadata_offset {
            for slot in 0..self.sb.max_key_count {
                let slot_offset = self.sb.slot_offset(slot);
                if slot_offset >= victim_start
                    && slot_offset < victim_end
                    && self.metadata_bitmap.get(slot)
                {
                    self.log.line(&format!(
                        "GC: data page {} overlaps live metadata; reclamation cancelled",
                        victim_local
                    ));
                    return Ok(0);
                }
            }
        }

        // The user area may end mid-page; bitmap bits only cover its part.
        let bitmap_span = page_size.min(self.sb.metadata_offset - victim_start);

        if live_bytes == 0 {
            self.log.line(&format!(
                "GC: data page {} holds no live data; clearing it",
                victim_local
            ));
            io::clear_region(&mut self.dev, victim_start, page_size)?;
            self.bitmap_clear_region(victim_start, bitmap_span)?;
            self.rewrite_count_increment_region(victim_start, page_size)?;
            self.persist_all_service_data()?;
            return Ok(page_size);
        }

        // Collect the valid keys whose values start on the victim page.
        let mut items: Vec<GcItem> = Vec::new();
        let mut staging_size = 0u32;
        for i in 0..self.index.len() {
            if !self.key_valid(i).unwrap_or(false) {
                continue;
            }
            let metadata_offset = self.index.get(i).metadata_offset;
            let meta = match self.read_slot(metadata_offset) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.value_offset >= victim_start && meta.value_offset < victim_end {
                let aligned_size = self.aligned(meta.value_size);
                items.push(GcItem {
                    metadata_offset,
                    old_value_offset: meta.value_offset,
                    aligned_size,
                    offset_in_buffer: staging_size,
                });
                staging_size += aligned_size;
            }
        }

        if !items.is_empty() {
            // A value may spill past the victim page, so the staging buffer
            // is sized by the items, not by the on-page live count.
            let new_base = match self.find_free_data_offset(staging_size) {
                Some(offset) => offset,
                None => {
                    self.log.line(&format!(
                        "GC: no room to evacuate {} live bytes",
                        staging_size
                    ));
                    return Ok(0);
                }
            };
            if new_base < victim_end && new_base + staging_size > victim_start {
                self.log
                    .line("GC: evacuation target overlaps the victim page; cancelled");
                return Ok(0);
            }

            let mut staging = vec![0u8; staging_size as usize];
            for item in &items {
                let at = item.offset_in_buffer as usize;
                io::read_region(
                    &mut self.dev,
                    item.old_value_offset,
                    &mut staging[at..at + item.aligned_size as usize],
                )?;
            }
            io::write_region(&mut self.dev, new_base, &staging)?;
            io::clear_region(&mut self.dev, victim_start, page_size)?;
            self.bitmap_clear_region(victim_start, bitmap_span)?;
            self.rewrite_count_increment_region(victim_start, page_size)?;
            self.rewrite_count_increment_region(new_base, staging_size)?;

            // Point each moved slot at its new home and reseal its CRC.
            for item in &items {
                let mut meta = match self.read_slot(item.metadata_offset) {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                meta.value_offset = new_base + item.offset_in_buffer;
                if self.write_slot(item.metadata_offset, &meta).is_err() {
                    continue;
                }
                let slot = self.sb.slot_index(item.metadata_offset);
                if let Err(err) = self.update_entry_crc(slot) {
                    self.log
                        .line(&format!("GC: entry CRC update failed for slot {}: {}", slot, err));
                }
            }
        } else {
            // Live words with no evacuable owner (a value spilling in from
            // an earlier page) are erased with the rest of the victim.
            io::clear_region(&mut self.dev, victim_start, page_size)?;
            self.bitmap_clear_region(victim_start, bitmap_span)?;
            self.rewrite_count_increment_region(victim_start, page_size)?;
        }

        self.log
            .line("GC (data): rebuilding service structures after reclamation");
        self.metadata_bitmap_rebuild()?;
        self.build_key_index()?;
        self.data_bitmap_rebuild()?;
        self.persist_all_service_data()?;

        self.log.line("GC: data reclamation complete");
        Ok(page_size)
    }

    fn gc_clean_metadata(&mut self) -> KvsResult<u32> {
        let page_size = self.sb.page_size;
        let slots_per_page = page_size / SLOT_SIZE as u32;
        let md_page_count = self.sb.metadata_area_size.div_ceil(page_size);

        // Transient valid-slot bitmap from the index.
        let mut valid = Bitmap::with_size(self.sb.metadata_bitmap_size as usize);
        for i in 0..self.index.len() {
            if self.key_valid(i).unwrap_or(false) {
                valid.set(self.sb.slot_index(self.index.get(i).metadata_offset));
            }
        }

        let mut cursor = self.sb.last_metadata_slot_checked;
        let victim = find_victim_page(
            &self.metadata_bitmap,
            &valid,
            md_page_count,
            slots_per_page,
            SLOT_SIZE as u32,
            self.sb.max_key_count,
            &mut cursor,
        );
        self.sb.last_metadata_slot_checked = cursor;

        let (victim_local, live_bytes) = match victim {
            Some(v) => v,
            None => {
                self.log.line("GC: no reclaimable metadata page found");
                return Ok(0);
            }
        };

        // The victim is a group of whole slots, so clearing it can never
        // shave bytes off a neighbouring group.
        let first_slot = victim_local * slots_per_page;
        let group_len = slots_per_page.min(self.sb.max_key_count - first_slot);
        let group_offset = self.sb.slot_offset(first_slot);
        let group_size = group_len * SLOT_SIZE as u32;

        if live_bytes == 0 {
            self.log.line(&format!(
                "GC: metadata page {} holds no live slots; clearing it",
                victim_local
            ));
            io::clear_region(&mut self.dev, group_offset, group_size)?;
            self.rewrite_count_increment_region(group_offset, group_size)?;
        } else {
            // Evacuate the live slots, clear the group, then re-home them in
            // freshly allocated slots. The old group's bits are still set in
            // the metadata bitmap, so the allocator cannot hand them back
            // before the rebuild below.
            let mut evacuated = Vec::new();
            for s in 0..group_len {
                let slot = first_slot + s;
                if !self.metadata_bitmap.get(slot) {
                    continue;
                }
                let offset = self.sb.slot_offset(slot);
                let live = (0..self.index.len())
                    .find(|&i| self.index.get(i).metadata_offset == offset)
                    .map(|i| self.key_valid(i).unwrap_or(false))
                    .unwrap_or(false);
                if live {
                    evacuated.push(self.read_slot(offset)?);
                }
            }

            io::clear_region(&mut self.dev, group_offset, group_size)?;
            self.rewrite_count_increment_region(group_offset, group_size)?;

            for meta in &evacuated {
                let new_slot = match self.find_free_metadata_slot() {
                    Some(slot) => slot,
                    None => {
                        self.log
                            .line("GC: CRITICAL: no free slot to evacuate metadata into");
                        return Ok(0);
                    }
                };
                let new_offset = self.sb.slot_offset(new_slot);
                self.write_slot(new_offset, meta)?;
                // Claim the bit at once; the allocator must not hand the
                // same slot to the next evacuee. The rebuild below makes it
                // authoritative.
                self.metadata_bitmap.set(new_slot);
            }
        }

        self.log
            .line("GC (metadata): rebuilding service structures after reclamation");
        self.metadata_bitmap_rebuild()?;
        self.build_key_index()?;
        self.data_bitmap_rebuild()?;

        // Slots moved, so every entry CRC is stale.
        for i in 0..self.index.len() {
            let slot = self.sb.slot_index(self.index.get(i).metadata_offset);
            if let Err(err) = self.update_entry_crc(slot) {
                self.log
                    .line(&format!("GC: entry CRC update failed for slot {}: {}", slot, err));
            }
        }

        self.persist_all_service_data()?;
        self.log.line("GC: metadata reclamation complete");
        Ok(page_size)
    }
}
