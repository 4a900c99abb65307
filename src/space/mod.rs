// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Space accounting: occupancy bitmaps, rewrite counters, carousel allocators.
//!
//! Two bitmaps track occupancy: one bit per user-area word, one bit per
//! metadata slot. The allocators scan them with persistent round-robin
//! cursors so consecutive allocations land on different parts of the medium
//! (wear spreading). Rewrite counters record how often each tracked page has
//! been physically rewritten.

pub mod alloc;
pub mod bitmap;
pub mod rewrite;


// Re-export public API
pub use alloc::{find_free_run, find_free_slot};
pub use bitmap::Bitmap;
pub use rewrite::RewriteCounters;
