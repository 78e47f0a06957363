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

//! The shield: translates segment shield modes (`sm`) into page
//! protections (`pm`).
//!
//! Raising a barrier on an exposed segment, or covering one, cannot
//! reprotect immediately: the collector still holds the contents open. Such
//! segments go on the unsynced queue and `flush` brings `pm` back to `sm`.
//! On every segment, `pm` stays a subset of `sm` (protection never exceeds
//! the requested shield), and a segment with a non-zero expose depth is
//! never page-protected.
//!
//! Shield calls are total. A refused OS protection change is a fatal
//! error, not a result.

use std::mem;

use arena::Arena;
use common::AccessSet;
use common::Raw;
use seg::Seg;

pub struct Shield {
    /// total expose nesting over all segments
    depth: usize,
    /// segments whose pm may lag their sm
    unsynced: Vec<*mut Seg>,
}

impl Shield {
    pub fn new() -> Shield {
        Shield {
            depth: 0,
            unsynced: vec![],
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn unsynced_count(&self) -> usize {
        self.unsynced.len()
    }
}

/// raises barrier modes on a segment; the modes must not already be raised
pub fn raise(arena: Raw<Arena>, mut seg: Raw<Seg>, mode: AccessSet) {
    assert!(!mode.is_empty());
    assert!(seg.sm().inter(mode).is_empty());
    let sm = seg.sm().union(mode);
    seg.set_sm(sm);
    if seg.depth() == 0 {
        sync(arena, seg);
    } else {
        queue(arena, seg);
    }
}

/// lowers barrier modes on a segment; the modes must currently be raised
pub fn lower(arena: Raw<Arena>, mut seg: Raw<Seg>, mode: AccessSet) {
    assert!(!mode.is_empty());
    assert!(seg.sm().contains(mode));
    let sm = seg.sm().minus(mode);
    seg.set_sm(sm);
    if seg.depth() == 0 {
        sync(arena, seg);
    }
    // an exposed segment carries no protection, so there is nothing to
    // drop; cover queues it if the remaining sm needs resyncing
}

/// opens a shielded segment for collector access. Nestable; each expose
/// needs a matching cover.
pub fn expose(mut arena: Raw<Arena>, mut seg: Raw<Seg>) {
    let depth = seg.depth() + 1;
    seg.set_depth(depth);
    arena.shield.depth += 1;
    if !seg.pm().is_empty() {
        protect(arena, seg, AccessSet::EMPTY);
    }
}

/// closes one expose. Reprotection is deferred to `flush`.
pub fn cover(mut arena: Raw<Arena>, mut seg: Raw<Seg>) {
    assert!(seg.depth() > 0);
    assert!(arena.shield.depth > 0);
    let depth = seg.depth() - 1;
    seg.set_depth(depth);
    arena.shield.depth -= 1;
    if seg.pm() != seg.sm() {
        queue(arena, seg);
    }
}

/// brings pm back to sm for every queued segment that is no longer exposed
pub fn flush(mut arena: Raw<Arena>) {
    let pending = {
        let shield = &mut arena.shield;
        let mut pending = vec![];
        mem::swap(&mut shield.unsynced, &mut pending);
        pending
    };
    for ptr in pending {
        let seg = unsafe { Raw::from_ptr(ptr) };
        if seg.depth() == 0 {
            sync(arena, seg);
        } else {
            queue(arena, seg);
        }
    }
}

fn queue(mut arena: Raw<Arena>, seg: Raw<Seg>) {
    let shield = &mut arena.shield;
    let ptr = seg.as_ptr();
    if !shield.unsynced.contains(&ptr) {
        shield.unsynced.push(ptr);
    }
}

fn sync(arena: Raw<Arena>, seg: Raw<Seg>) {
    debug_assert_eq!(seg.depth(), 0);
    if seg.pm() != seg.sm() {
        let sm = seg.sm();
        protect(arena, seg, sm);
    }
}

/// sets the page protection of the segment's range to deny the accesses in
/// `pm`
fn protect(arena: Raw<Arena>, mut seg: Raw<Seg>, pm: AccessSet) {
    seg.set_pm(pm);
    if arena.protects() {
        protect_range(seg.base(), seg.limit(), pm);
    }
}

#[cfg(unix)]
fn protect_range(base: ::utils::Address, limit: ::utils::Address, pm: AccessSet) {
    use libc;

    let prot = if pm.contains(AccessSet::READ) {
        libc::PROT_NONE
    } else if pm.contains(AccessSet::WRITE) {
        libc::PROT_READ
    } else {
        libc::PROT_READ | libc::PROT_WRITE
    };
    let ret = unsafe { libc::mprotect(base.to_ptr_mut(), limit - base, prot) };
    assert_eq!(ret, 0, "mprotect refused to change protection");
}

#[cfg(not(unix))]
fn protect_range(_base: ::utils::Address, _limit: ::utils::Address, _pm: AccessSet) {}

#[cfg(test)]
mod tests {
    use super::*;
    use arena::Arena;
    use arena::ArenaConfig;
    use arena::SegPref;
    use arena::DEFAULT_GRANULE;
    use common::Rank;
    use common::RankSet;
    use common::RefSet;
    use pool::Pool;
    use seg::seg_alloc;
    use seg::seg_free;

    #[test]
    fn test_expose_cover_flush() {
        let mut arena = Arena::create(ArenaConfig {
            size: 8 * DEFAULT_GRANULE,
            ..Default::default()
        });
        let pool = Pool::create(arena).unwrap();
        {
            let arena_lock = arena;
            let _guard = arena_lock.enter();
            let mut seg = seg_alloc(&SegPref::default(), DEFAULT_GRANULE, pool, false).unwrap();

            // raise the write barrier through the normal route
            let restricted = RefSet::EMPTY.add_addr(arena.zone_shift(), seg.base());
            seg.set_rank_and_summary(RankSet::single(Rank::Exact), restricted);
            assert!(seg.sm().contains(AccessSet::WRITE));
            assert_eq!(seg.pm(), seg.sm());

            // expose drops the protection so the collector can write
            expose(arena, seg);
            assert_eq!(seg.depth(), 1);
            assert_eq!(arena.shield.depth(), 1);
            assert!(seg.pm().is_empty());
            unsafe {
                seg.base().store::<usize>(42);
                assert_eq!(seg.base().load::<usize>(), 42);
            }

            // cover defers the reprotect until flush
            cover(arena, seg);
            assert_eq!(seg.depth(), 0);
            assert!(arena.shield.unsynced_count() > 0);
            flush(arena);
            assert_eq!(seg.pm(), seg.sm());
            assert_eq!(arena.shield.unsynced_count(), 0);

            seg.set_rank_and_summary(RankSet::EMPTY, RefSet::EMPTY);
            seg_free(seg);
        }
        Pool::destroy(pool);
        Arena::destroy(arena);
    }

    #[test]
    fn test_raise_while_exposed_waits_for_flush() {
        let mut arena = Arena::create(ArenaConfig {
            size: 8 * DEFAULT_GRANULE,
            ..Default::default()
        });
        let pool = Pool::create(arena).unwrap();
        {
            let arena_lock = arena;
            let _guard = arena_lock.enter();
            let mut seg = seg_alloc(&SegPref::default(), DEFAULT_GRANULE, pool, false).unwrap();

            expose(arena, seg);
            // raising under an expose must not protect the open segment
            seg.set_rank_and_summary(RankSet::single(Rank::Exact), RefSet::EMPTY);
            assert!(seg.sm().contains(AccessSet::WRITE));
            assert!(seg.pm().is_empty());

            cover(arena, seg);
            flush(arena);
            assert_eq!(seg.pm(), seg.sm());

            seg.set_rank_and_summary(RankSet::EMPTY, RefSet::EMPTY);
            seg_free(seg);
        }
        Pool::destroy(pool);
        Arena::destroy(arena);
    }
}
