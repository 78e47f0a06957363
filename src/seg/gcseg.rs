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

//! The GC-capable segment class.
//!
//! On top of the generic segment this adds the reference summary, an
//! optional allocation buffer, a client slot, and the two intrusive ring
//! memberships: every GC segment is on its pool's segment ring for its
//! whole life, and on the arena's grey ring for its rank exactly while its
//! grey set is non-empty. The methods here are also where colour, rank and
//! summary changes get turned into shield transitions.

use std::fmt;
use std::mem;
use std::ptr;

use arena::Arena;
use buf::Buffer;
use common::AccessSet;
use common::Rank;
use common::RankSet;
use common::Raw;
use common::RefSet;
use common::Sig;
use common::TraceSet;
use common::RANK_LIMIT;
use common::SIG_INVALID;
use common::SIG_SEG_GC;
use pool::Pool;
use seg::class::SegClass;
use seg::class::SEG_CLASS;
use seg::Seg;
use shield;
use utils::Address;
use utils::ByteSize;
use utils::RingNode;
use utils::Word;

#[repr(C)]
pub struct GcSeg {
    /// the generic segment comes first so a GcSeg handle is a Seg handle
    pub(crate) seg: Seg,
    pub(crate) sig: Sig,
    /// conservative approximation of where the segment's references point
    pub(crate) summary: RefSet,
    pub(crate) buffer: *mut Buffer,
    /// opaque client slot for the owning pool
    pub(crate) p: Word,
    /// membership of the owning pool's segment ring
    pub(crate) pool_ring: RingNode,
    /// membership of the arena's per-rank grey ring; attached iff grey
    pub(crate) grey_ring: RingNode,
}

lazy_static! {
    /// The GC-supporting segment class. Starts as a copy of `SEG_CLASS`
    /// and overrides every slot the base class leaves not-reached.
    pub static ref SEG_GC_CLASS: SegClass = {
        let mut class = SEG_CLASS.subclass("SEGGC", mem::size_of::<GcSeg>());
        class.init = gcseg_init;
        class.finish = gcseg_finish;
        class.set_grey = gcseg_set_grey;
        class.set_white = gcseg_set_white;
        class.set_rank_set = gcseg_set_rank_set;
        class.set_rank_summary = gcseg_set_rank_summary;
        class.summary = gcseg_summary;
        class.set_summary = gcseg_set_summary;
        class.buffer = gcseg_buffer;
        class.set_buffer = gcseg_set_buffer;
        class.p = gcseg_p;
        class.set_p = gcseg_set_p;
        class.describe = gcseg_describe;
        class
    };
}

/// convert a generic segment handle to the GC subclass
fn gcseg_of(seg: Raw<Seg>) -> Raw<GcSeg> {
    debug_assert!(seg.class().is_subclass_of(&SEG_GC_CLASS));
    unsafe { Raw::from_addr(seg.addr()) }
}

fn super_class() -> &'static SegClass {
    match SEG_GC_CLASS.parent {
        Some(parent) => parent,
        None => panic!("SEGGC lost its parent class"),
    }
}

impl GcSeg {
    pub fn seg_raw(&self) -> Raw<Seg> {
        unsafe { Raw::from_ptr(&self.seg as *const Seg as *mut Seg) }
    }

    pub fn summary(&self) -> RefSet {
        self.summary
    }

    pub fn check(&self) -> bool {
        if self.sig != SIG_SEG_GC {
            return false;
        }
        if !self.seg.check() {
            return false;
        }
        if !self.seg.class().is_subclass_of(&SEG_GC_CLASS) {
            return false;
        }
        if !self.buffer.is_null() {
            let buffer = unsafe { &*self.buffer };
            if !buffer.check() {
                return false;
            }
            // the buffer allocates on behalf of the segment's own pool
            if buffer.pool() != self.seg.pool() {
                return false;
            }
        }
        if !self.pool_ring.check() || !self.grey_ring.check() {
            return false;
        }
        // on a grey ring exactly when grey
        if self.seg.grey.is_empty() != self.grey_ring.is_single() {
            return false;
        }
        // no references means nothing to summarize
        if self.seg.rank_set.is_empty() && !self.summary.is_empty() {
            return false;
        }
        true
    }
}

/// the segments currently on a pool's ring, in ring order
pub fn pool_segments(pool: &Pool) -> Vec<Raw<GcSeg>> {
    let offset = offset_of!(GcSeg => pool_ring).get_byte_offset();
    pool.seg_ring
        .iter()
        .map(|node| unsafe { Raw::from_addr(Address::from_mut_ptr(node).sub(offset)) })
        .collect()
}

/// the grey segments of one rank, in ring order; this is how the tracer
/// finds grey work without scanning the arena
pub fn grey_segments(arena: &Arena, rank: Rank) -> Vec<Raw<GcSeg>> {
    let offset = offset_of!(GcSeg => grey_ring).get_byte_offset();
    arena
        .grey_ring_ref(rank)
        .iter()
        .map(|node| unsafe { Raw::from_addr(Address::from_mut_ptr(node).sub(offset)) })
        .collect()
}

/// trace-engine entry point: change the arena's flipped trace set.
///
/// A grey segment needs its read barrier exactly while it is grey for a
/// flipped trace, so flipping must refit the barrier on segments that are
/// already grey; `set_grey` handles only the segments coloured afterwards.
pub fn set_flipped_traces(mut arena: Raw<Arena>, flipped: TraceSet) {
    let old = arena.flipped_traces();
    arena.set_flipped_traces_raw(flipped);
    for index in 0..RANK_LIMIT {
        let rank = Rank::from_index(index);
        for gcseg in grey_segments(&arena, rank) {
            let seg = gcseg.seg_raw();
            let grey = seg.grey();
            let was_guarded = !grey.inter(old).is_empty();
            let now_guarded = !grey.inter(flipped).is_empty();
            if now_guarded && !was_guarded {
                shield::raise(arena, seg, AccessSet::READ);
            } else if was_guarded && !now_guarded {
                shield::lower(arena, seg, AccessSet::READ);
            }
        }
    }
}

fn gcseg_init(seg: Raw<Seg>, pool: Raw<Pool>, base: Address, size: ByteSize) {
    let align = pool.arena().granule();
    assert!(base.is_aligned_to(align));
    assert!(size % align == 0);

    // initialize the superclass fields first via next-method call
    (super_class().init)(seg, pool, base, size);

    let mut gcseg = gcseg_of(seg);
    gcseg.summary = RefSet::EMPTY;
    gcseg.buffer = ptr::null_mut();
    gcseg.p = 0;
    gcseg.pool_ring.init();
    gcseg.grey_ring.init();
    gcseg.sig = SIG_SEG_GC;

    assert!(gcseg.check());
    let mut pool = pool;
    pool.seg_ring.append(&mut gcseg.pool_ring);
}

fn gcseg_finish(seg: Raw<Seg>) {
    let mut seg = seg;
    let mut gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    if !seg.grey().is_empty() {
        gcseg.grey_ring.remove();
        seg.grey = TraceSet::EMPTY;
    }
    gcseg.summary = RefSet::EMPTY;
    gcseg.sig = SIG_INVALID;

    // a dangling buffer would go on allocating into freed space
    assert!(
        gcseg.buffer.is_null(),
        "segment finished with a live buffer"
    );

    gcseg.grey_ring.finish();
    gcseg.pool_ring.remove();
    gcseg.pool_ring.finish();

    // finish the superclass fields last
    (super_class().finish)(seg);
}

/// change greyness, maintaining the grey ring and the read barrier.
/// The read barrier guards segments grey for a flipped trace: one whose
/// mutator roots are already black.
fn gcseg_set_grey(seg: Raw<Seg>, grey: TraceSet) {
    let mut seg = seg;
    assert!(seg.check());
    assert!(!seg.rank_set().is_empty());
    let mut gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    let mut arena = seg.pool().arena();
    let old_grey = seg.grey();
    seg.grey = grey;

    // keep the per-rank grey ring exactly in step with the grey set, so
    // the tracer can find grey segments without scanning
    if old_grey.is_empty() {
        if !grey.is_empty() {
            let rank = match seg.rank_set().rank() {
                Some(rank) => rank,
                None => panic!("grey segment with a non-singleton rank set"),
            };
            arena.grey_ring(rank).insert(&mut gcseg.grey_ring);
        }
    } else {
        if grey.is_empty() {
            gcseg.grey_ring.remove();
        }
    }

    let flipped = arena.flipped_traces();
    if old_grey.inter(flipped).is_empty() {
        if !grey.inter(flipped).is_empty() {
            shield::raise(arena, seg, AccessSet::READ);
        }
    } else {
        if grey.inter(flipped).is_empty() {
            shield::lower(arena, seg, AccessSet::READ);
        }
    }

    trace!("SegSetGrey: seg={:?} grey={}", seg, grey);
}

/// change whiteness; every tract of the segment records the same white set
fn gcseg_set_white(seg: Raw<Seg>, white: TraceSet) {
    let mut seg = seg;
    assert!(seg.check());
    let gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    let mut arena = seg.pool().arena();
    let base = seg.base();
    let granule = arena.granule();
    let first_index = arena.tracts().index_of(base);
    let count = (seg.limit() - base) / granule;
    for index in first_index..first_index + count {
        let tract = arena.tracts_mut().at_mut(index);
        debug_assert!(tract.has_seg());
        tract.set_white(white);
    }
    seg.white = white;
}

/// change the rank set.
///
/// Making the rank set non-empty means the summary (still empty) is now a
/// strict subset of the mutator's universal summary, so the write barrier
/// goes up; emptying it takes the barrier down again. The caller empties
/// the summary before either transition.
fn gcseg_set_rank_set(seg: Raw<Seg>, rank_set: RankSet) {
    let mut seg = seg;
    assert!(seg.check());
    assert!(rank_set.check());
    assert!(rank_set.is_empty() || rank_set.is_single());
    let gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    let arena = seg.pool().arena();
    let old = seg.rank_set();
    // a rank change under a non-empty grey set would strand the grey ring
    // on the old rank
    assert!(seg.grey().is_empty() || rank_set == old);
    seg.rank_set = rank_set;

    if old.is_empty() {
        if !rank_set.is_empty() {
            assert!(gcseg.summary.is_empty());
            shield::raise(arena, seg, AccessSet::WRITE);
        }
    } else {
        if rank_set.is_empty() {
            assert!(gcseg.summary.is_empty());
            shield::lower(arena, seg, AccessSet::WRITE);
        }
    }
}

fn gcseg_summary(seg: Raw<Seg>) -> RefSet {
    assert!(seg.check());
    gcseg_of(seg).summary
}

/// change the summary.
///
/// The write barrier is needed exactly while the segment has references
/// and its summary is strictly smaller than the mutator's, which is
/// assumed universal; so the barrier follows the summary across the
/// universal boundary.
fn gcseg_set_summary(seg: Raw<Seg>, summary: RefSet) {
    assert!(seg.check());
    let mut gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    let arena = seg.pool().arena();
    let old = gcseg.summary;
    gcseg.summary = summary;

    assert!(!seg.rank_set().is_empty());

    if !summary.is_super(RefSet::UNIV) {
        if old.is_super(RefSet::UNIV) {
            shield::raise(arena, seg, AccessSet::WRITE);
        }
    } else {
        if !old.is_super(RefSet::UNIV) {
            shield::lower(arena, seg, AccessSet::WRITE);
        }
    }
}

/// change rank set and summary in one step. The individual setters each
/// require the other field to be in a matching state; the fused form only
/// compares the shielded-ness of the before and after states, so it can
/// cross both regimes without an illegal intermediate.
fn gcseg_set_rank_summary(seg: Raw<Seg>, rank_set: RankSet, summary: RefSet) {
    let mut seg = seg;
    assert!(seg.check());
    assert!(rank_set.check());
    assert!(rank_set.is_empty() || rank_set.is_single());
    let mut gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    // no references forces an empty summary
    assert!(!rank_set.is_empty() || summary.is_empty());
    assert!(seg.grey().is_empty() || rank_set == seg.rank_set());

    let arena = seg.pool().arena();

    let was_shielded = !seg.rank_set().is_empty() && gcseg.summary != RefSet::UNIV;
    let will_be_shielded = !rank_set.is_empty() && summary != RefSet::UNIV;

    seg.rank_set = rank_set;
    gcseg.summary = summary;

    if will_be_shielded && !was_shielded {
        shield::raise(arena, seg, AccessSet::WRITE);
    } else if was_shielded && !will_be_shielded {
        shield::lower(arena, seg, AccessSet::WRITE);
    }
}

fn gcseg_buffer(seg: Raw<Seg>) -> Option<Raw<Buffer>> {
    assert!(seg.check());
    let gcseg = gcseg_of(seg);
    if gcseg.buffer.is_null() {
        None
    } else {
        Some(unsafe { Raw::from_ptr(gcseg.buffer) })
    }
}

fn gcseg_set_buffer(seg: Raw<Seg>, buffer: Option<Raw<Buffer>>) {
    assert!(seg.check());
    let mut gcseg = gcseg_of(seg);
    assert!(gcseg.check());
    match buffer {
        Some(buffer) => {
            assert!(buffer.check());
            assert_eq!(buffer.pool(), seg.pool());
            gcseg.buffer = buffer.as_ptr();
        }
        None => gcseg.buffer = ptr::null_mut(),
    }
}

fn gcseg_p(seg: Raw<Seg>) -> Word {
    assert!(seg.check());
    gcseg_of(seg).p
}

fn gcseg_set_p(seg: Raw<Seg>, p: Word) {
    assert!(seg.check());
    let mut gcseg = gcseg_of(seg);
    gcseg.p = p;
}

fn gcseg_describe(seg: Raw<Seg>, stream: &mut dyn fmt::Write) -> fmt::Result {
    let gcseg = gcseg_of(seg);
    assert!(gcseg.check());

    // describe the superclass fields first via next-method call
    (super_class().describe)(seg, stream)?;

    if !gcseg.buffer.is_null() {
        writeln!(stream, "  buffer {:?}", gcseg.buffer)?;
    }
    writeln!(stream, "  summary {}", gcseg.summary)
}
