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

//! The arena: a reserved stretch of address space carved into granules,
//! the tract table over it, the control allocator for metadata headers,
//! and the collector-global state (flipped traces, per-rank grey rings)
//! the segment layer consumes.

use aligned_alloc;
use memmap;
use parking_lot::ReentrantMutex;
use parking_lot::ReentrantMutexGuard;

use common::Raw;
use common::RefSet;
use common::Sig;
use common::TraceSet;
use common::RANK_LIMIT;
use common::SIG_ARENA;
use common::SIG_INVALID;
use common::Rank;
use error::AllocError;
use error::Res;
use pool::Pool;
use shield::Shield;
use utils::Address;
use utils::ByteSize;
use utils::RingNode;
use utils::POINTER_SIZE;

mod tract;

pub use self::tract::Tract;
pub use self::tract::TractMap;

pub const DEFAULT_GRANULE: ByteSize = 1 << 12;
pub const DEFAULT_ARENA_SIZE: ByteSize = 64 << 20;
pub const DEFAULT_ZONE_SHIFT: usize = 20;

const CONTROL_ALIGN: ByteSize = POINTER_SIZE * 2;

/// Placement advice for a segment allocation. Zone preference is advisory:
/// a run inside the preferred zones is used when one exists, any free run
/// otherwise.
#[derive(Copy, Clone, Debug)]
pub struct SegPref {
    pub high: bool,
    pub zones: RefSet,
}

impl Default for SegPref {
    fn default() -> SegPref {
        SegPref {
            high: false,
            zones: RefSet::UNIV,
        }
    }
}

#[derive(Copy, Clone)]
pub struct ArenaConfig {
    /// total managed address space; rounded down to a granule multiple
    pub size: ByteSize,
    /// granule size; the unit of tract mapping and segment alignment
    pub granule: ByteSize,
    /// cap on committed bytes, counting both granule ranges and control
    /// storage
    pub commit_limit: ByteSize,
    /// slice of the commit budget only permit-holding allocations may use
    pub reservoir: ByteSize,
    /// address bits above this shift select the zone of an address
    pub zone_shift: usize,
    /// whether shield modes are synced to page protections
    pub protect: bool,
}

impl Default for ArenaConfig {
    fn default() -> ArenaConfig {
        ArenaConfig {
            size: DEFAULT_ARENA_SIZE,
            granule: DEFAULT_GRANULE,
            commit_limit: usize::MAX,
            reservoir: 0,
            zone_shift: DEFAULT_ZONE_SHIFT,
            protect: cfg!(unix),
        }
    }
}

#[repr(C)]
pub struct Arena {
    sig: Sig,
    granule: ByteSize,
    zone_shift: usize,
    base: Address,
    limit: Address,
    tracts: TractMap,
    committed: ByteSize,
    commit_limit: ByteSize,
    reservoir: ByteSize,
    protect: bool,
    flipped_traces: TraceSet,
    grey_rings: [RingNode; RANK_LIMIT],
    pub(crate) shield: Shield,
    pool_serial: u64,
    lock: ReentrantMutex<()>,
    #[allow(dead_code)]
    mmap: memmap::MmapMut,
}

// The arena is handed between threads behind its own recursive lock; the
// raw pointers inside are only touched in the arena-entered state.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn create(config: ArenaConfig) -> Raw<Arena> {
        assert!(config.granule.is_power_of_two());
        assert!(config.granule >= DEFAULT_GRANULE);
        assert!(config.size >= config.granule);
        assert!(config.zone_shift > 0);

        // reserve the address space through mmap, over-reserving by one
        // granule so the base can be granule aligned
        let mut anon_mmap = match memmap::MmapMut::map_anon(config.size + config.granule) {
            Ok(m) => m,
            Err(_) => panic!("failed to reserve address space for arena"),
        };
        let base = Address::from_mut_ptr(anon_mmap.as_mut_ptr()).align_up(config.granule);
        let size = config.size & !(config.granule - 1);
        let limit = base + size;
        trace!("ArenaCreate: range {} ~ {} ({} bytes)", base, limit, size);

        let arena = Box::new(Arena {
            sig: SIG_ARENA,
            granule: config.granule,
            zone_shift: config.zone_shift,
            base: base,
            limit: limit,
            tracts: TractMap::new(base, limit, config.granule),
            committed: 0,
            commit_limit: config.commit_limit,
            reservoir: config.reservoir,
            protect: config.protect,
            flipped_traces: TraceSet::EMPTY,
            grey_rings: [
                RingNode::new(),
                RingNode::new(),
                RingNode::new(),
                RingNode::new(),
            ],
            shield: Shield::new(),
            pool_serial: 0,
            lock: ReentrantMutex::new(()),
            mmap: anon_mmap,
        });

        let mut arena = unsafe { Raw::from_ptr(Box::into_raw(arena)) };
        // ring nodes link to themselves, so they can only be initialized
        // once the arena has its final address
        for rank in 0..RANK_LIMIT {
            arena.grey_rings[rank].init();
        }
        arena
    }

    pub fn destroy(mut arena: Raw<Arena>) {
        assert!(arena.check());
        assert_eq!(arena.committed, 0, "arena destroyed with live allocations");
        for rank in 0..RANK_LIMIT {
            assert!(arena.grey_rings[rank].is_single());
            arena.grey_rings[rank].finish();
        }
        arena.sig = SIG_INVALID;
        unsafe {
            Box::from_raw(arena.as_ptr());
        }
    }

    /// takes the arena lock. Every segment operation requires the caller
    /// to be in the arena-entered state; operations themselves never lock.
    /// The lock is recursive so barrier handlers can re-enter.
    pub fn enter(&self) -> ReentrantMutexGuard<()> {
        self.lock.lock()
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn size(&self) -> ByteSize {
        self.limit - self.base
    }

    #[inline(always)]
    pub fn granule(&self) -> ByteSize {
        self.granule
    }

    pub fn zone_shift(&self) -> usize {
        self.zone_shift
    }

    pub fn committed(&self) -> ByteSize {
        self.committed
    }

    pub fn commit_limit(&self) -> ByteSize {
        self.commit_limit
    }

    pub fn protects(&self) -> bool {
        self.protect
    }

    #[inline(always)]
    pub fn flipped_traces(&self) -> TraceSet {
        self.flipped_traces
    }

    /// raw field update; `seg::set_flipped_traces` is the entry point
    /// that also refits read barriers on segments that are already grey
    pub(crate) fn set_flipped_traces_raw(&mut self, flipped: TraceSet) {
        self.flipped_traces = flipped;
    }

    #[inline(always)]
    pub fn grey_ring(&mut self, rank: Rank) -> &mut RingNode {
        &mut self.grey_rings[rank.index()]
    }

    pub fn grey_ring_ref(&self, rank: Rank) -> &RingNode {
        &self.grey_rings[rank.index()]
    }

    pub(crate) fn next_pool_serial(&mut self) -> u64 {
        let serial = self.pool_serial;
        self.pool_serial += 1;
        serial
    }

    #[inline(always)]
    pub fn tracts(&self) -> &TractMap {
        &self.tracts
    }

    #[inline(always)]
    pub fn tracts_mut(&mut self) -> &mut TractMap {
        &mut self.tracts
    }

    /// is the address inside a granule some pool owns?
    pub fn has_addr(&self, addr: Address) -> bool {
        self.tracts.of_addr(addr).is_some()
    }

    pub fn pool_of_addr(&self, addr: Address) -> Option<Raw<Pool>> {
        self.tracts.of_addr(addr).and_then(|tract| tract.pool())
    }

    /// acquires `size` bytes of granule-aligned address space for `pool`
    pub fn alloc(
        &mut self,
        pref: &SegPref,
        size: ByteSize,
        pool: Raw<Pool>,
        with_reservoir_permit: bool,
    ) -> Res<Address> {
        assert!(size > 0);
        assert!(size % self.granule == 0);

        if self.committed + size > self.commit_limit {
            trace!("ArenaAllocFail: size={} (commit limit)", size);
            return Err(AllocError::CommitLimit);
        }
        if !with_reservoir_permit
            && self.committed + size > self.commit_limit.saturating_sub(self.reservoir)
        {
            trace!("ArenaAllocFail: size={} (reservoir withheld)", size);
            return Err(AllocError::OutOfMemory);
        }

        let granules = size / self.granule;
        let start = match self.find_run(granules, pref) {
            Some(index) => index,
            None => {
                trace!("ArenaAllocFail: size={} (no free run)", size);
                return Err(AllocError::OutOfMemory);
            }
        };

        for index in start..start + granules {
            self.tracts.at_mut(index).allocate_to(pool);
        }
        self.committed += size;

        let base = self.base + start * self.granule;
        trace!(
            "ArenaAlloc: base={} size={} pool serial={}",
            base,
            size,
            pool.serial()
        );
        Ok(base)
    }

    /// returns a range acquired with `alloc`. Segments bound into the
    /// range must have been freed first.
    pub fn free(&mut self, base: Address, size: ByteSize, pool: Raw<Pool>) {
        assert!(base.is_aligned_to(self.granule));
        assert!(size > 0 && size % self.granule == 0);
        assert!(base >= self.base && base + size <= self.limit);

        let start = self.tracts.index_of(base);
        for index in start..start + size / self.granule {
            {
                let tract = self.tracts.at(index);
                assert!(tract.is_allocated());
                assert_eq!(tract.pool(), Some(pool));
            }
            self.tracts.at_mut(index).release();
        }
        self.committed -= size;
        trace!("ArenaFree: base={} size={}", base, size);
    }

    /// allocates zeroed control storage for a metadata header (a segment
    /// of `class.size` bytes, a pool, a buffer). Counted against the
    /// commit limit like any other memory.
    pub fn control_alloc(&mut self, size: ByteSize) -> Res<Address> {
        assert!(size > 0);
        if self.committed + size > self.commit_limit {
            trace!("ControlAllocFail: size={}", size);
            return Err(AllocError::CommitLimit);
        }
        let ptr = aligned_alloc::aligned_alloc(size, CONTROL_ALIGN);
        if ptr.is_null() {
            trace!("ControlAllocFail: size={}", size);
            return Err(AllocError::OutOfMemory);
        }
        unsafe {
            (ptr as *mut u8).write_bytes(0, size);
        }
        self.committed += size;
        Ok(Address::from_mut_ptr(ptr))
    }

    pub fn control_free(&mut self, addr: Address, size: ByteSize) {
        assert!(!addr.is_zero());
        assert!(size <= self.committed);
        unsafe {
            aligned_alloc::aligned_free(addr.to_ptr_mut::<()>());
        }
        self.committed -= size;
    }

    pub fn check(&self) -> bool {
        if self.sig != SIG_ARENA {
            return false;
        }
        if !(self.base < self.limit) {
            return false;
        }
        if !self.base.is_aligned_to(self.granule) {
            return false;
        }
        if self.committed > self.commit_limit {
            return false;
        }
        for rank in 0..RANK_LIMIT {
            if !self.grey_rings[rank].check() {
                return false;
            }
        }
        true
    }

    /// first-fit run search over the tract table. Pass one honours the
    /// zone preference, pass two takes any free run; `pref.high` flips the
    /// scan direction.
    fn find_run(&self, granules: usize, pref: &SegPref) -> Option<usize> {
        if !pref.zones.is_univ() {
            if let Some(index) = self.scan_free(granules, pref.high, Some(pref.zones)) {
                return Some(index);
            }
        }
        self.scan_free(granules, pref.high, None)
    }

    fn granule_fits(&self, index: usize, zones: Option<RefSet>) -> bool {
        if self.tracts.at(index).is_allocated() {
            return false;
        }
        match zones {
            Some(zones) => {
                let zone = RefSet::zone(self.zone_shift, self.base + index * self.granule);
                zones.bits() & (1 << zone) != 0
            }
            None => true,
        }
    }

    fn scan_free(&self, granules: usize, high: bool, zones: Option<RefSet>) -> Option<usize> {
        let len = self.tracts.len();
        if granules > len {
            return None;
        }
        if !high {
            let mut run = 0;
            for index in 0..len {
                if self.granule_fits(index, zones) {
                    run += 1;
                    if run == granules {
                        return Some(index + 1 - granules);
                    }
                } else {
                    run = 0;
                }
            }
        } else {
            let mut run = 0;
            for index in (0..len).rev() {
                if self.granule_fits(index, zones) {
                    run += 1;
                    if run == granules {
                        return Some(index);
                    }
                } else {
                    run = 0;
                }
            }
        }
        None
    }
}
