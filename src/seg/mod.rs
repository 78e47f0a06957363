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

//! The generic segment interface and its two built-in classes.
//!
//! A segment is a contiguous, granule-aligned range of arena address space
//! carrying the collector's per-range state: colour (white/grey), rank,
//! reference summary, and barrier state. `SEG_CLASS` is as simple as
//! efficiency permits (it still stores colour, so the tracer never has to
//! dispatch to ask); `SEG_GC_CLASS` supports the full feature set. Both
//! may be subclassed by pools that want to hang more state off a segment,
//! through the class mechanism in `class.rs`.
//!
//! Every operation here assumes the caller has entered the arena (holds
//! its recursive lock); nothing below takes locks of its own.

use std::fmt;
use std::ptr;

use arena::Arena;
use arena::SegPref;
use arena::Tract;
use buf::Buffer;
use common::AccessSet;
use common::RankSet;
use common::Raw;
use common::RefSet;
use common::Sig;
use common::TraceSet;
use common::SIG_INVALID;
use common::SIG_SEG;
use error::Res;
use pool::Pool;
use shield;
use utils::Address;
use utils::ByteSize;
use utils::Word;

pub mod class;
mod gcseg;

pub use self::class::SegClass;
pub use self::class::SEG_CLASS;
pub use self::gcseg::grey_segments;
pub use self::gcseg::pool_segments;
pub use self::gcseg::set_flipped_traces;
pub use self::gcseg::GcSeg;
pub use self::gcseg::SEG_GC_CLASS;

#[repr(C)]
pub struct Seg {
    pub(crate) sig: Sig,
    pub(crate) class: &'static SegClass,
    /// one past the last address; the base is derived from the first tract
    pub(crate) limit: Address,
    pub(crate) first_tract: *mut Tract,
    pub(crate) rank_set: RankSet,
    pub(crate) white: TraceSet,
    pub(crate) nailed: TraceSet,
    pub(crate) grey: TraceSet,
    /// protection mode: the accesses the pages currently deny
    pub(crate) pm: AccessSet,
    /// shield mode: the accesses the barrier wants denied
    pub(crate) sm: AccessSet,
    /// expose nesting count
    pub(crate) depth: usize,
}

/// allocate a segment of the full-featured GC class
pub fn seg_alloc(
    pref: &SegPref,
    size: ByteSize,
    pool: Raw<Pool>,
    with_reservoir_permit: bool,
) -> Res<Raw<Seg>> {
    seg_of_class_alloc(&SEG_GC_CLASS, pref, size, pool, with_reservoir_permit)
}

/// allocate a segment of an explicit class from the arena
pub fn seg_of_class_alloc(
    class: &'static SegClass,
    pref: &SegPref,
    size: ByteSize,
    pool: Raw<Pool>,
    with_reservoir_permit: bool,
) -> Res<Raw<Seg>> {
    assert!(class.check());
    assert!(pool.check());
    assert!(size > 0);
    let mut arena = pool.arena();
    assert!(size % arena.granule() == 0);

    // acquire the address range from the arena
    let base = match arena.alloc(pref, size, pool, with_reservoir_permit) {
        Ok(base) => base,
        Err(err) => {
            trace!(
                "SegAllocFail: size={} pool serial={} ({})",
                size,
                pool.serial(),
                err
            );
            return Err(err);
        }
    };

    // allocate the segment structure from the control pool
    let addr = match arena.control_alloc(class.size) {
        Ok(addr) => addr,
        Err(err) => {
            // undo the address acquisition: a failed allocation must not
            // leave the segment partially visible
            arena.free(base, size, pool);
            trace!(
                "SegAllocFail: size={} pool serial={} ({})",
                size,
                pool.serial(),
                err
            );
            return Err(err);
        }
    };

    let seg: Raw<Seg> = unsafe { Raw::from_addr(addr) };
    seg_init(seg, class, pool, base, size);

    trace!(
        "SegAlloc: seg={:?} base={} size={} pool serial={}",
        seg,
        base,
        size,
        pool.serial()
    );
    Ok(seg)
}

/// free a segment back to the arena
pub fn seg_free(seg: Raw<Seg>) {
    assert!(seg.check());
    let pool = seg.pool();
    let mut arena = pool.arena();
    let base = seg.base();
    let size = seg.size();
    let class = seg.class;

    seg_finish(seg);
    arena.control_free(seg.addr(), class.size);
    arena.free(base, size, pool);

    trace!("SegFree: base={} size={}", base, size);
}

/// the generic half of construction; runs before the class-specific init
pub(crate) fn seg_init(
    seg: Raw<Seg>,
    class: &'static SegClass,
    pool: Raw<Pool>,
    base: Address,
    size: ByteSize,
) {
    assert!(pool.check());
    let mut arena = pool.arena();
    let align = arena.granule();
    assert!(base.is_aligned_to(align));
    assert!(size > 0 && size % align == 0);
    let limit = base + size;

    unsafe {
        ptr::write(
            seg.as_ptr(),
            Seg {
                sig: SIG_SEG,
                class: class,
                limit: limit,
                first_tract: ptr::null_mut(),
                rank_set: RankSet::EMPTY,
                white: TraceSet::EMPTY,
                nailed: TraceSet::EMPTY,
                grey: TraceSet::EMPTY,
                pm: AccessSet::EMPTY,
                sm: AccessSet::EMPTY,
                depth: 0,
            },
        );
    }

    // bind every tract in the range back to the new segment
    let mut seg = seg;
    let first_index = arena.tracts().index_of(base);
    let count = size / align;
    for index in first_index..first_index + count {
        let tract = arena.tracts_mut().at_mut(index);
        assert!(tract.is_allocated());
        assert_eq!(tract.pool(), Some(pool));
        assert!(!tract.has_seg());
        assert!(tract.white().is_empty());
        tract.bind(seg);
    }
    seg.first_tract = arena.tracts_mut().at_mut(first_index) as *mut Tract;

    // class-specific initialization comes last
    (class.init)(seg, pool, base, size);

    assert!(seg.check());
}

/// the generic half of destruction; runs the class-specific finish first
pub(crate) fn seg_finish(mut seg: Raw<Seg>) {
    assert!(seg.check());
    let pool = seg.pool();
    let mut arena = pool.arena();

    if !seg.sm.is_empty() {
        shield::lower(arena, seg, seg.sm);
    }

    // class-specific finishing comes first
    (seg.class.finish)(seg);

    seg.rank_set = RankSet::EMPTY;

    // drain deferred reprotections while the range still exists
    shield::flush(arena);

    let base = seg.base();
    let align = arena.granule();
    let first_index = arena.tracts().index_of(base);
    let count = (seg.limit - base) / align;
    for index in first_index..first_index + count {
        let tract = arena.tracts_mut().at_mut(index);
        tract.set_white(TraceSet::EMPTY);
        tract.unbind();
    }

    seg.sig = SIG_INVALID;

    // the segment must not be exposed, shielded, or protected by now
    assert_eq!(seg.depth, 0);
    assert!(seg.sm.is_empty());
    assert!(seg.pm.is_empty());
}

impl Seg {
    fn raw(&self) -> Raw<Seg> {
        unsafe { Raw::from_ptr(self as *const Seg as *mut Seg) }
    }

    pub fn class(&self) -> &'static SegClass {
        self.class
    }

    // base, limit, size and the iteration step below are on the barrier
    // hot path; their checks compile away in release builds

    #[inline(always)]
    pub fn base(&self) -> Address {
        debug_assert!(self.check());
        unsafe { (*self.first_tract).base() }
    }

    #[inline(always)]
    pub fn limit(&self) -> Address {
        debug_assert!(self.check());
        self.limit
    }

    #[inline(always)]
    pub fn size(&self) -> ByteSize {
        debug_assert!(self.check());
        self.limit - unsafe { (*self.first_tract).base() }
    }

    pub fn pool(&self) -> Raw<Pool> {
        let tract = unsafe { &*self.first_tract };
        match tract.pool() {
            Some(pool) => pool,
            None => panic!("segment tract lost its pool"),
        }
    }

    pub fn arena(&self) -> Raw<Arena> {
        self.pool().arena()
    }

    #[inline(always)]
    pub fn rank_set(&self) -> RankSet {
        self.rank_set
    }

    #[inline(always)]
    pub fn white(&self) -> TraceSet {
        self.white
    }

    #[inline(always)]
    pub fn grey(&self) -> TraceSet {
        self.grey
    }

    #[inline(always)]
    pub fn nailed(&self) -> TraceSet {
        self.nailed
    }

    pub fn set_nailed(&mut self, nailed: TraceSet) {
        self.nailed = nailed;
    }

    #[inline(always)]
    pub fn pm(&self) -> AccessSet {
        self.pm
    }

    #[inline(always)]
    pub fn sm(&self) -> AccessSet {
        self.sm
    }

    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn set_pm(&mut self, pm: AccessSet) {
        self.pm = pm;
    }

    pub(crate) fn set_sm(&mut self, sm: AccessSet) {
        self.sm = sm;
    }

    pub(crate) fn set_depth(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub fn summary(&self) -> RefSet {
        assert!(self.check());
        (self.class.summary)(self.raw())
    }

    pub fn buffer(&self) -> Option<Raw<Buffer>> {
        assert!(self.check());
        (self.class.buffer)(self.raw())
    }

    pub fn p(&self) -> Word {
        assert!(self.check());
        (self.class.p)(self.raw())
    }

    /// change the greyness of the segment to the trace set `grey`
    pub fn set_grey(&mut self, grey: TraceSet) {
        assert!(self.check());
        (self.class.set_grey)(self.raw(), grey);
    }

    /// change the whiteness of the segment to the trace set `white`
    pub fn set_white(&mut self, white: TraceSet) {
        assert!(self.check());
        (self.class.set_white)(self.raw(), white);
    }

    /// change the rank set. The caller must empty the summary before
    /// emptying the rank set, and set a rank before setting a summary.
    pub fn set_rank_set(&mut self, rank_set: RankSet) {
        assert!(self.check());
        assert!(rank_set.check());
        (self.class.set_rank_set)(self.raw(), rank_set);
    }

    pub fn set_summary(&mut self, summary: RefSet) {
        assert!(self.check());
        (self.class.set_summary)(self.raw(), summary);
    }

    /// change rank set and summary together, so no intermediate state is
    /// ever observable. This is the only way to move both fields between
    /// their empty and non-empty regimes in one step.
    pub fn set_rank_and_summary(&mut self, rank_set: RankSet, summary: RefSet) {
        assert!(self.check());
        assert!(rank_set.check());
        (self.class.set_rank_summary)(self.raw(), rank_set, summary);
    }

    pub fn set_buffer(&mut self, buffer: Option<Raw<Buffer>>) {
        assert!(self.check());
        if let Some(buffer) = buffer {
            assert!(buffer.check());
        }
        (self.class.set_buffer)(self.raw(), buffer);
    }

    pub fn set_p(&mut self, p: Word) {
        assert!(self.check());
        (self.class.set_p)(self.raw(), p);
    }

    pub fn describe(&self, stream: &mut dyn fmt::Write) -> fmt::Result {
        assert!(self.check());
        let pool = self.pool();
        writeln!(
            stream,
            "Segment {:?} [{},{}) {{",
            self as *const Seg,
            self.base(),
            self.limit
        )?;
        writeln!(stream, "  pool serial {}", pool.serial())?;
        (self.class.describe)(self.raw(), stream)?;
        writeln!(stream, "}} Segment {:?}", self as *const Seg)
    }

    /// the segment validator. Runs the full per-tract agreement loop, so
    /// hot-path callers guard it with debug_assert.
    pub fn check(&self) -> bool {
        if self.sig != SIG_SEG {
            return false;
        }
        if !self.class.check() {
            return false;
        }
        if self.first_tract.is_null() {
            return false;
        }
        let first = unsafe { &*self.first_tract };
        let pool = match first.pool() {
            Some(pool) => pool,
            None => return false,
        };
        if !pool.check() {
            return false;
        }
        let arena = pool.arena();
        let align = arena.granule();
        if !first.base().is_aligned_to(align) || !self.limit.is_aligned_to(align) {
            return false;
        }
        if !(self.limit > first.base()) {
            return false;
        }

        // every tract of the segment must agree with the segment
        {
            let tracts = arena.tracts();
            let mut addr = first.base();
            while addr < self.limit {
                let tract = match tracts.of_addr(addr) {
                    Some(tract) => tract,
                    None => return false,
                };
                if !tract.has_seg() {
                    return false;
                }
                match tract.seg() {
                    Some(seg) if seg.as_ptr() as *const Seg == self as *const Seg => {}
                    _ => return false,
                }
                if tract.white() != self.white {
                    return false;
                }
                if tract.pool() != Some(pool) {
                    return false;
                }
                addr = addr + align;
            }
        }

        if !self.rank_set.check() {
            return false;
        }
        if self.rank_set.is_empty() {
            // with no references in the segment there is nothing to trace
            // or to protect
            if !self.grey.is_empty() {
                return false;
            }
            if !self.sm.is_empty() {
                return false;
            }
            if !self.pm.is_empty() {
                return false;
            }
        } else {
            if !self.rank_set.is_single() {
                return false;
            }
            // the write/read barrier invariants are not checkable here:
            // check runs while the shield is part way through raising or
            // lowering them
        }

        // shield consistency: protection never exceeds the shield, and an
        // exposed segment is never protected
        if !self.sm.contains(self.pm) {
            return false;
        }
        if self.depth > 0 && !self.pm.is_empty() {
            return false;
        }

        true
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut out = String::new();
        self.describe(&mut out)?;
        f.write_str(&out)
    }
}

/// safely recover the segment of a tract, if one is bound
#[inline(always)]
fn seg_of_tract(tract: &Tract) -> Option<Raw<Seg>> {
    match tract.seg() {
        Some(seg) => {
            debug_assert!(seg.check());
            Some(seg)
        }
        None => None,
    }
}

/// the segment covering `addr`, if any. Runs on the barrier path for
/// every trapped access; the caller must have entered the arena first.
pub fn seg_of_addr(arena: Raw<Arena>, addr: Address) -> Option<Raw<Seg>> {
    debug_assert!(arena.check());
    match arena.tracts().of_addr(addr) {
        Some(tract) => seg_of_tract(tract),
        None => None,
    }
}

/// the segment with the lowest base address, to start an iteration over
/// all segments in the arena
pub fn seg_first(arena: Raw<Arena>) -> Option<Raw<Seg>> {
    debug_assert!(arena.check());
    let tracts = arena.tracts();
    let mut cur = tracts.first();
    while let Some(tract) = cur {
        if let Some(seg) = seg_of_tract(tract) {
            return Some(seg);
        }
        cur = tracts.next(tract.base());
    }
    None
}

/// the segment with the lowest base address greater than `addr`; `addr`
/// must be (or once have been) a segment base. Inner tracts of a large
/// segment are skipped in one hop, so walking the arena is linear in the
/// number of tracts visited, not quadratic in segment size.
pub fn seg_next(arena: Raw<Arena>, addr: Address) -> Option<Raw<Seg>> {
    debug_assert!(arena.check());
    let tracts = arena.tracts();
    let granule = arena.granule();
    let mut base = addr;
    loop {
        let tract = match tracts.next(base) {
            Some(tract) => tract,
            None => return None,
        };
        match seg_of_tract(tract) {
            Some(seg) => {
                if tract.base() == seg.base() {
                    return Some(seg);
                }
                // found an inner tract of a large segment whose base is
                // at or below `addr`; continue from its last tract
                debug_assert!(seg.base() <= addr);
                base = seg.limit().sub(granule);
            }
            None => base = tract.base(),
        }
    }
}

// the trivial methods the base class is made of

pub(crate) fn seg_triv_init(seg: Raw<Seg>, pool: Raw<Pool>, base: Address, size: ByteSize) {
    // all the real work happens in seg_init, so there is only checking
    // left to do
    assert!(seg.check());
    assert!(pool.check());
    let align = pool.arena().granule();
    assert!(base.is_aligned_to(align));
    assert!(size % align == 0);
    assert_eq!(seg.base(), base);
    assert_eq!(seg.size(), size);
    assert_eq!(seg.pool(), pool);
}

pub(crate) fn seg_triv_finish(seg: Raw<Seg>) {
    // the generic finishing happens in seg_finish
    assert!(seg.check());
}

pub(crate) fn seg_triv_describe(seg: Raw<Seg>, stream: &mut dyn fmt::Write) -> fmt::Result {
    writeln!(stream, "  shield depth {}", seg.depth())?;
    writeln!(stream, "  protection mode: {}", seg.pm())?;
    writeln!(stream, "  shield mode: {}", seg.sm())?;
    writeln!(stream, "  ranks: {}", seg.rank_set())?;
    writeln!(stream, "  white  {}", seg.white())?;
    writeln!(stream, "  grey   {}", seg.grey())?;
    writeln!(stream, "  nailed {}", seg.nailed())
}
