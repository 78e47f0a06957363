// Copyright 2017 The Australian National University
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # The Mantle segment subsystem
//!
//! This crate is the layer of the Mantle memory manager between the raw
//! address-space arena and the garbage-collected pools built on top. Its
//! unit of currency is the *segment*: a contiguous, granule-aligned range
//! of arena addresses carrying the collector's metadata for that range:
//! colour (white/grey), reference rank, a conservative reference summary,
//! and read/write barrier state.
//!
//! The pieces fit together like this:
//!
//! * the **arena** reserves the address space, keeps the tract table that
//!   maps every granule back to its pool and segment, and owns the
//!   collector-global state (flipped traces, per-rank grey rings);
//! * the **segment class registry** gives pools single-inheritance
//!   subclassing over segments: a class is an immutable record of
//!   operation slots, a subclass copies its parent's record and overrides;
//! * the **generic segment** handles range, lookup and iteration;
//!   the **GC segment** subclass adds summary, buffer, client slot, the
//!   pool and grey ring memberships, and drives the shield;
//! * the **shield** turns shield-mode changes into page protections.
//!
//! A user of this crate:
//!
//! 1. creates an `arena::Arena` and one `pool::Pool` per allocation policy
//! 2. enters the arena (`arena.enter()`) around any segment work; the
//!    lock is recursive so barrier handlers may re-enter
//! 3. allocates segments with `seg::seg_alloc` (or
//!    `seg::seg_of_class_alloc` for a custom class) and frees them with
//!    `seg::seg_free`
//! 4. drives colour/rank/summary through the `Seg` mutators; the shield
//!    follows automatically
//! 5. finds segments from addresses with `seg::seg_of_addr` (the barrier
//!    path) and walks them with `seg::seg_first`/`seg::seg_next`
//!
//! Tracing, pool policy and generation management live above this crate;
//! the segment layer only keeps their per-range state consistent.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate field_offset;
extern crate aligned_alloc;
#[cfg(unix)]
extern crate libc;
extern crate mantle_utils as utils;
extern crate memmap;
extern crate parking_lot;
extern crate stderrlog;
extern crate thiserror;

/// small shared data structures: sets, signatures, raw handles
pub mod common;

/// typed allocation errors
pub mod error;

/// address space, tract table, control allocator, collector globals
pub mod arena;

/// barrier modes to page protections
pub mod shield;

/// the segment layer proper
pub mod seg;

/// the minimal pool header segments attach to
pub mod pool;

/// the minimal allocation buffer handle
pub mod buf;

pub fn start_logging_trace() {
    match stderrlog::new().verbosity(4).init() {
        Ok(()) => info!("logger initialized"),
        Err(e) => error!(
            "failed to init logger, probably already initialized: {:?}",
            e
        ),
    }
}
