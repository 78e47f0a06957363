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

extern crate mantle_seg;
extern crate mantle_utils;
extern crate simple_logger;
extern crate log;

use std::mem;

use mantle_seg::arena::Arena;
use mantle_seg::arena::ArenaConfig;
use mantle_seg::arena::SegPref;
use mantle_seg::arena::DEFAULT_GRANULE;
use mantle_seg::buf::Buffer;
use mantle_seg::common::AccessSet;
use mantle_seg::common::Rank;
use mantle_seg::common::RankSet;
use mantle_seg::common::Raw;
use mantle_seg::common::RefSet;
use mantle_seg::common::TraceSet;
use mantle_seg::error::AllocError;
use mantle_seg::pool::Pool;
use mantle_seg::seg;
use mantle_seg::seg::GcSeg;
use mantle_seg::seg::SEG_CLASS;

const GRANULE: usize = DEFAULT_GRANULE;

#[allow(dead_code)]
fn start_logging() {
    match simple_logger::init_with_level(log::Level::Trace) {
        Ok(_) => {}
        Err(_) => {}
    }
}

fn small_arena() -> Raw<Arena> {
    Arena::create(ArenaConfig {
        size: 64 * GRANULE,
        ..Default::default()
    })
}

#[test]
fn test_gc_segment_lifecycle() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let pref = SegPref::default();

        // a four granule segment, freshly allocated
        let mut seg = seg::seg_alloc(&pref, 4 * GRANULE, pool, false).unwrap();
        assert_eq!(seg.size(), 4 * GRANULE);
        let base = seg.base();
        for i in 0..4 {
            let found = seg::seg_of_addr(arena, base + i * GRANULE).unwrap();
            assert_eq!(found, seg);
        }
        assert!(seg.rank_set().is_empty());
        assert_eq!(seg.summary(), RefSet::EMPTY);
        assert!(seg.sm().is_empty());
        assert!(seg::grey_segments(&arena, Rank::Exact).is_empty());
        assert_eq!(pool.seg_count(), 1);
        {
            let on_ring = seg::pool_segments(&pool);
            assert_eq!(on_ring.len(), 1);
            assert_eq!(on_ring[0].seg_raw(), seg);
        }

        // rank exact with a universal summary needs no write barrier
        seg.set_rank_and_summary(RankSet::single(Rank::Exact), RefSet::UNIV);
        assert!(seg.sm().is_empty());
        assert!(seg.grey().is_empty());
        assert!(seg::grey_segments(&arena, Rank::Exact).is_empty());

        // restricting the summary raises the write barrier
        let restricted = RefSet::EMPTY.add_addr(arena.zone_shift(), base);
        seg.set_summary(restricted);
        assert!(seg.sm().contains(AccessSet::WRITE));
        assert!(!seg.sm().contains(AccessSet::READ));

        // greying for a flipped trace raises the read barrier and puts
        // the segment on the grey ring of its rank
        seg::set_flipped_traces(arena, TraceSet::single(0));
        seg.set_grey(TraceSet::single(0));
        {
            let grey = seg::grey_segments(&arena, Rank::Exact);
            assert_eq!(grey.len(), 1);
            assert_eq!(grey[0].seg_raw(), seg);
            assert_eq!(grey[0].summary(), restricted);
        }
        assert_eq!(seg.sm(), AccessSet::RW);

        // ungreying detaches and lowers the read barrier again
        seg.set_grey(TraceSet::EMPTY);
        assert!(seg::grey_segments(&arena, Rank::Exact).is_empty());
        assert_eq!(seg.sm(), AccessSet::WRITE);

        // clearing rank and summary in one step lowers the write barrier
        seg.set_rank_and_summary(RankSet::EMPTY, RefSet::EMPTY);
        assert!(seg.sm().is_empty());

        seg::seg_free(seg);
        for i in 0..4 {
            assert!(seg::seg_of_addr(arena, base + i * GRANULE).is_none());
        }
        assert_eq!(pool.seg_count(), 0);
        assert!(seg::seg_first(arena).is_none());
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
fn test_white_reaches_every_tract() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let mut seg = seg::seg_alloc(&SegPref::default(), 3 * GRANULE, pool, false).unwrap();
        let base = seg.base();

        let white = TraceSet::single(1).add(3);
        seg.set_white(white);
        assert_eq!(seg.white(), white);
        for i in 0..3 {
            let tract = arena.tracts().of_addr(base + i * GRANULE).unwrap();
            assert_eq!(tract.white(), white);
            assert!(tract.has_seg());
            assert_eq!(tract.pool(), Some(pool));
        }

        seg.set_white(TraceSet::EMPTY);
        seg::seg_free(seg);
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
fn test_buffer_and_client_slot() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let mut seg = seg::seg_alloc(&SegPref::default(), GRANULE, pool, false).unwrap();

        assert!(seg.buffer().is_none());
        let buffer = Buffer::create(pool).unwrap();
        seg.set_buffer(Some(buffer));
        assert_eq!(seg.buffer(), Some(buffer));

        seg.set_p(0xdead);
        assert_eq!(seg.p(), 0xdead);

        // the buffer must be detached before the segment can die
        seg.set_buffer(None);
        assert!(seg.buffer().is_none());
        Buffer::destroy(buffer);
        seg::seg_free(seg);
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
fn test_describe_mentions_state() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let mut seg = seg::seg_alloc(&SegPref::default(), GRANULE, pool, false).unwrap();
        seg.set_rank_and_summary(RankSet::single(Rank::Weak), RefSet::UNIV);

        let mut out = String::new();
        seg.describe(&mut out).unwrap();
        assert!(out.contains("Segment"));
        assert!(out.contains("pool serial"));
        assert!(out.contains("ranks: weak"));
        assert!(out.contains("summary"));

        seg.set_rank_and_summary(RankSet::EMPTY, RefSet::EMPTY);
        seg::seg_free(seg);
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
fn test_base_class_segment() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let seg =
            seg::seg_of_class_alloc(&SEG_CLASS, &SegPref::default(), GRANULE, pool, false)
                .unwrap();
        // colour is stored even on the base class
        assert!(seg.grey().is_empty());
        assert!(seg.white().is_empty());
        // but a plain segment is on no pool ring
        assert_eq!(pool.seg_count(), 0);
        seg::seg_free(seg);
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
#[should_panic(expected = "does not implement")]
fn test_base_class_summary_not_reached() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    let arena_lock = arena;
    let _guard = arena_lock.enter();
    let seg =
        seg::seg_of_class_alloc(&SEG_CLASS, &SegPref::default(), GRANULE, pool, false).unwrap();
    let _ = seg.summary();
}

#[test]
fn test_alloc_rollback_on_control_failure() {
    // a commit limit that admits the address range but not the control
    // header: the allocation must fail and leave no trace behind
    let commit_limit =
        mem::size_of::<Pool>() + 4 * GRANULE + mem::size_of::<GcSeg>() - 8;
    let mut arena = Arena::create(ArenaConfig {
        size: 64 * GRANULE,
        commit_limit: commit_limit,
        ..Default::default()
    });
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let committed_before = arena.committed();
        let res = seg::seg_alloc(&SegPref::default(), 4 * GRANULE, pool, false);
        assert_eq!(res.err(), Some(AllocError::CommitLimit));
        assert_eq!(arena.committed(), committed_before);
        assert!(seg::seg_first(arena).is_none());
        assert_eq!(pool.seg_count(), 0);
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}

#[test]
fn test_has_addr_and_pool_of_addr() {
    let mut arena = small_arena();
    let pool = Pool::create(arena).unwrap();
    {
        let arena_lock = arena;
        let _guard = arena_lock.enter();
        let seg = seg::seg_alloc(&SegPref::default(), 2 * GRANULE, pool, false).unwrap();
        let inside = seg.base() + GRANULE / 2;
        assert!(arena.has_addr(inside));
        assert_eq!(arena.pool_of_addr(inside), Some(pool));
        assert!(!arena.has_addr(arena.limit().sub(GRANULE)));
        seg::seg_free(seg);
        assert!(!arena.has_addr(inside));
    }
    Pool::destroy(pool);
    Arena::destroy(arena);
}
