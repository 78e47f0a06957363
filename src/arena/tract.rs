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

//! The tract table: one record per arena granule, mapping every address
//! the arena manages back to its pool and (when one is bound) its segment.

use std::ptr;

use common::Raw;
use common::TraceSet;
use pool::Pool;
use seg::Seg;
use utils::Address;
use utils::ByteSize;
use utils::Word;

/// Per-granule metadata. A tract exists for every granule of the arena's
/// address range; it is *allocated* while some pool owns the granule, and
/// it may additionally be bound to a segment. The segment pointer is a
/// weak back-reference: tracts never keep a segment alive, and segments
/// unbind their tracts before they are freed.
#[repr(C)]
pub struct Tract {
    base: Address,
    pool: *mut Pool,
    seg: *mut Seg,
    has_seg: bool,
    white: TraceSet,
    p: Word,
}

impl Tract {
    #[inline(always)]
    pub fn base(&self) -> Address {
        self.base
    }

    #[inline(always)]
    pub fn is_allocated(&self) -> bool {
        !self.pool.is_null()
    }

    #[inline(always)]
    pub fn pool(&self) -> Option<Raw<Pool>> {
        if self.pool.is_null() {
            None
        } else {
            Some(unsafe { Raw::from_ptr(self.pool) })
        }
    }

    #[inline(always)]
    pub fn has_seg(&self) -> bool {
        self.has_seg
    }

    /// the bound segment, if any
    #[inline(always)]
    pub fn seg(&self) -> Option<Raw<Seg>> {
        if self.has_seg {
            debug_assert!(!self.seg.is_null());
            Some(unsafe { Raw::from_ptr(self.seg) })
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn white(&self) -> TraceSet {
        self.white
    }

    pub fn set_white(&mut self, white: TraceSet) {
        debug_assert!(self.is_allocated());
        self.white = white;
    }

    pub fn p(&self) -> Word {
        self.p
    }

    pub fn set_p(&mut self, p: Word) {
        self.p = p;
    }

    pub(crate) fn allocate_to(&mut self, pool: Raw<Pool>) {
        debug_assert!(!self.is_allocated());
        debug_assert!(!self.has_seg);
        self.pool = pool.as_ptr();
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(self.is_allocated());
        debug_assert!(!self.has_seg, "tract released while bound to a segment");
        self.pool = ptr::null_mut();
        self.white = TraceSet::EMPTY;
        self.p = 0;
    }

    pub(crate) fn bind(&mut self, seg: Raw<Seg>) {
        debug_assert!(self.is_allocated());
        debug_assert!(!self.has_seg);
        debug_assert!(self.seg.is_null());
        self.seg = seg.as_ptr();
        self.has_seg = true;
    }

    pub(crate) fn unbind(&mut self) {
        debug_assert!(self.has_seg);
        self.seg = ptr::null_mut();
        self.has_seg = false;
    }

    pub fn check(&self) -> bool {
        if self.has_seg && (self.pool.is_null() || self.seg.is_null()) {
            return false;
        }
        if !self.has_seg && !self.seg.is_null() {
            return false;
        }
        true
    }
}

/// The table itself. Tracts are laid out densely, one per granule, so the
/// address→tract step on the barrier path is a subtraction and a shift.
pub struct TractMap {
    base: Address,
    limit: Address,
    granule: ByteSize,
    tracts: Box<[Tract]>,
}

impl TractMap {
    pub fn new(base: Address, limit: Address, granule: ByteSize) -> TractMap {
        debug_assert!(base.is_aligned_to(granule));
        debug_assert!(limit.is_aligned_to(granule));
        let len = (limit - base) / granule;
        let mut tracts = Vec::with_capacity(len);
        for i in 0..len {
            tracts.push(Tract {
                base: base + i * granule,
                pool: ptr::null_mut(),
                seg: ptr::null_mut(),
                has_seg: false,
                white: TraceSet::EMPTY,
                p: 0,
            });
        }
        TractMap {
            base: base,
            limit: limit,
            granule: granule,
            tracts: tracts.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracts.len()
    }

    pub fn granule(&self) -> ByteSize {
        self.granule
    }

    #[inline(always)]
    pub fn index_of(&self, addr: Address) -> usize {
        debug_assert!(addr >= self.base && addr < self.limit);
        addr.diff(self.base) / self.granule
    }

    #[inline(always)]
    pub fn at(&self, index: usize) -> &Tract {
        &self.tracts[index]
    }

    #[inline(always)]
    pub fn at_mut(&mut self, index: usize) -> &mut Tract {
        &mut self.tracts[index]
    }

    /// the tract at `addr`, if the granule is allocated to some pool
    #[inline(always)]
    pub fn of_addr(&self, addr: Address) -> Option<&Tract> {
        if addr < self.base || addr >= self.limit {
            return None;
        }
        let tract = self.at(self.index_of(addr));
        if tract.is_allocated() {
            Some(tract)
        } else {
            None
        }
    }

    pub fn of_addr_mut(&mut self, addr: Address) -> Option<&mut Tract> {
        if addr < self.base || addr >= self.limit {
            return None;
        }
        let index = self.index_of(addr);
        if self.at(index).is_allocated() {
            Some(self.at_mut(index))
        } else {
            None
        }
    }

    /// the allocated tract with the lowest base
    pub fn first(&self) -> Option<&Tract> {
        self.tracts.iter().find(|t| t.is_allocated())
    }

    /// the allocated tract with the lowest base greater than `addr`
    pub fn next(&self, addr: Address) -> Option<&Tract> {
        let start = if addr < self.base {
            0
        } else if addr >= self.limit {
            return None;
        } else {
            self.index_of(addr) + 1
        };
        self.tracts[start..].iter().find(|t| t.is_allocated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_base() -> Address {
        Address::from_ptr(0x100000 as *const u8)
    }

    #[test]
    fn test_empty_map() {
        let base = dummy_base();
        let map = TractMap::new(base, base + 0x4000, 0x1000);
        assert_eq!(map.len(), 4);
        assert!(map.first().is_none());
        assert!(map.of_addr(base).is_none());
        assert!(map.of_addr(base.sub(1)).is_none());
        assert!(map.of_addr(base + 0x4000).is_none());
    }

    #[test]
    fn test_granule_bases() {
        let base = dummy_base();
        let map = TractMap::new(base, base + 0x4000, 0x1000);
        for i in 0..4 {
            assert_eq!(map.at(i).base(), base + i * 0x1000);
            assert!(map.at(i).check());
        }
        assert_eq!(map.index_of(base + 0x2fff), 2);
    }
}
