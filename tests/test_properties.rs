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

//! Property tests for the barrier invariants: after any legal operation
//! sequence, the write shield tracks "rank set non-empty and summary below
//! universal", the read shield tracks "grey meets the flipped traces", and
//! the grey ring attachment tracks the grey set exactly.

extern crate mantle_seg;
extern crate mantle_utils;
extern crate proptest;

use proptest::prelude::*;

use mantle_seg::arena::Arena;
use mantle_seg::arena::ArenaConfig;
use mantle_seg::arena::SegPref;
use mantle_seg::arena::DEFAULT_GRANULE;
use mantle_seg::common::AccessSet;
use mantle_seg::common::Rank;
use mantle_seg::common::RankSet;
use mantle_seg::common::Raw;
use mantle_seg::common::RefSet;
use mantle_seg::common::TraceSet;
use mantle_seg::pool::Pool;
use mantle_seg::seg;

const GRANULE: usize = DEFAULT_GRANULE;

fn small_arena() -> Raw<Arena> {
    Arena::create(ArenaConfig {
        size: 16 * GRANULE,
        ..Default::default()
    })
}

/// decode a summary from a small code: empty, a strict subset, universal
fn summary_of(code: u8, arena: &Arena, base: mantle_utils::Address) -> RefSet {
    match code % 3 {
        0 => RefSet::EMPTY,
        1 => RefSet::EMPTY.add_addr(arena.zone_shift(), base),
        _ => RefSet::UNIV,
    }
}

fn write_shield_ok(seg: &mantle_seg::seg::Seg) -> bool {
    let summary = if seg.rank_set().is_empty() {
        RefSet::EMPTY
    } else {
        seg.summary()
    };
    let want = !seg.rank_set().is_empty() && summary != RefSet::UNIV;
    seg.sm().contains(AccessSet::WRITE) == want
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// the write shield equals "rank set non-empty and summary not
    /// universal" after any legal sequence of the three rank/summary
    /// mutators
    #[test]
    fn prop_write_shield_tracks_rank_and_summary(ops in proptest::collection::vec((0u8..3, any::<u8>()), 1..40)) {
        let mut arena = small_arena();
        let pool = Pool::create(arena).unwrap();
        {
            let arena_lock = arena;
            let _guard = arena_lock.enter();
            let mut seg = seg::seg_alloc(&SegPref::default(), GRANULE, pool, false).unwrap();
            let base = seg.base();

            for (op, arg) in ops {
                match op {
                    0 => {
                        // toggle the rank set through the separated
                        // mutator, clearing the summary first as its
                        // precondition demands
                        if seg.rank_set().is_empty() {
                            seg.set_rank_set(RankSet::single(Rank::Exact));
                        } else {
                            seg.set_summary(RefSet::EMPTY);
                            seg.set_rank_set(RankSet::EMPTY);
                        }
                    }
                    1 => {
                        if !seg.rank_set().is_empty() {
                            let summary = summary_of(arg, &arena, base);
                            seg.set_summary(summary);
                        }
                    }
                    _ => {
                        let (rank_set, summary) = if arg % 2 == 0 {
                            (RankSet::EMPTY, RefSet::EMPTY)
                        } else {
                            (RankSet::single(Rank::Exact), summary_of(arg / 2, &arena, base))
                        };
                        seg.set_rank_and_summary(rank_set, summary);
                    }
                }
                prop_assert!(seg.check());
                prop_assert!(write_shield_ok(&seg));
            }

            seg::seg_free(seg);
        }
        Pool::destroy(pool);
        Arena::destroy(arena);
    }

    /// the read shield equals "grey meets the flipped traces" after any
    /// interleaving of grey changes and trace flips, and the grey ring
    /// attachment equals "grey set non-empty"
    #[test]
    fn prop_read_shield_tracks_grey_and_flipped(ops in proptest::collection::vec((0u8..2, any::<u8>()), 1..40)) {
        let mut arena = small_arena();
        let pool = Pool::create(arena).unwrap();
        {
            let arena_lock = arena;
            let _guard = arena_lock.enter();
            let mut seg = seg::seg_alloc(&SegPref::default(), GRANULE, pool, false).unwrap();
            seg.set_rank_and_summary(RankSet::single(Rank::Final), RefSet::UNIV);

            for (op, arg) in ops {
                match op {
                    0 => seg::set_flipped_traces(arena, TraceSet::from_bits(arg)),
                    _ => seg.set_grey(TraceSet::from_bits(arg)),
                }

                let guarded = !seg.grey().inter(arena.flipped_traces()).is_empty();
                prop_assert_eq!(seg.sm().contains(AccessSet::READ), guarded);

                let on_ring = seg::grey_segments(&arena, Rank::Final)
                    .iter()
                    .any(|g| g.seg_raw() == seg);
                prop_assert_eq!(on_ring, !seg.grey().is_empty());
                // and never on another rank's ring
                for index in 0..4 {
                    let rank = Rank::from_index(index);
                    if rank != Rank::Final {
                        prop_assert!(seg::grey_segments(&arena, rank).is_empty());
                    }
                }
                prop_assert!(seg.check());
            }

            seg::seg_free(seg);
        }
        Pool::destroy(pool);
        Arena::destroy(arena);
    }

    /// fused transitions: any legal (rank, summary) pair reached from any
    /// other leaves the write shield exact, with no illegal intermediate
    /// observable to the validator
    #[test]
    fn prop_fused_transitions_are_safe(codes in proptest::collection::vec((any::<bool>(), 0u8..3), 1..30)) {
        let mut arena = small_arena();
        let pool = Pool::create(arena).unwrap();
        {
            let arena_lock = arena;
            let _guard = arena_lock.enter();
            let mut seg = seg::seg_alloc(&SegPref::default(), GRANULE, pool, false).unwrap();
            let base = seg.base();

            for (with_rank, summary_code) in codes {
                let (rank_set, summary) = if with_rank {
                    (
                        RankSet::single(Rank::Ambig),
                        summary_of(summary_code, &arena, base),
                    )
                } else {
                    (RankSet::EMPTY, RefSet::EMPTY)
                };
                seg.set_rank_and_summary(rank_set, summary);

                prop_assert!(seg.check());
                prop_assert!(write_shield_ok(&seg));
                prop_assert_eq!(seg.rank_set(), rank_set);
                if !rank_set.is_empty() {
                    prop_assert_eq!(seg.summary(), summary);
                }
            }

            seg::seg_free(seg);
        }
        Pool::destroy(pool);
        Arena::destroy(arena);
    }
}
