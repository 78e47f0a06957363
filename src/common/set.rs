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

//! The small fixed-width sets the collector state is made of: trace sets,
//! rank sets, reference summaries (zone bitmaps) and access sets.

use std::fmt;

use utils::Address;
use utils::Word;
use utils::WORD_BITS;

/// identifies one trace; always `< TRACE_LIMIT`
pub type TraceId = usize;

pub const TRACE_LIMIT: usize = 8;

/// A set of traces, one bit per trace identifier.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TraceSet(u8);

impl TraceSet {
    pub const EMPTY: TraceSet = TraceSet(0);
    pub const UNIV: TraceSet = TraceSet(!0);

    #[inline(always)]
    pub fn single(ti: TraceId) -> TraceSet {
        debug_assert!(ti < TRACE_LIMIT);
        TraceSet(1u8 << ti)
    }

    pub fn from_bits(bits: u8) -> TraceSet {
        TraceSet(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub fn add(self, ti: TraceId) -> TraceSet {
        debug_assert!(ti < TRACE_LIMIT);
        TraceSet(self.0 | (1u8 << ti))
    }

    #[inline(always)]
    pub fn delete(self, ti: TraceId) -> TraceSet {
        debug_assert!(ti < TRACE_LIMIT);
        TraceSet(self.0 & !(1u8 << ti))
    }

    #[inline(always)]
    pub fn union(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 | other.0)
    }

    #[inline(always)]
    pub fn inter(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 & other.0)
    }

    #[inline(always)]
    pub fn diff(self, other: TraceSet) -> TraceSet {
        TraceSet(self.0 & !other.0)
    }

    #[inline(always)]
    pub fn is_member(self, ti: TraceId) -> bool {
        debug_assert!(ti < TRACE_LIMIT);
        self.0 & (1u8 << ti) != 0
    }

    /// is self a subset of other?
    #[inline(always)]
    pub fn sub(self, other: TraceSet) -> bool {
        self.0 & !other.0 == 0
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_univ(self) -> bool {
        self.0 == !0
    }

    #[inline(always)]
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }
}

impl fmt::Display for TraceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:08b}", self.0)
    }
}

/// The strength class of the references a segment holds.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Rank {
    Ambig = 0,
    Exact = 1,
    Final = 2,
    Weak = 3,
}

pub const RANK_LIMIT: usize = 4;

impl Rank {
    pub fn from_index(index: usize) -> Rank {
        match index {
            0 => Rank::Ambig,
            1 => Rank::Exact,
            2 => Rank::Final,
            3 => Rank::Weak,
            _ => panic!("rank index {} out of range", index),
        }
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Rank::Ambig => "ambiguous",
            Rank::Exact => "exact",
            Rank::Final => "final",
            Rank::Weak => "weak",
        }
    }
}

/// A set of ranks. The segment layer only ever stores the empty set or a
/// singleton; the general set form survives because clients pass rank
/// requests around as sets.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RankSet(u8);

impl RankSet {
    pub const EMPTY: RankSet = RankSet(0);

    #[inline(always)]
    pub fn single(rank: Rank) -> RankSet {
        RankSet(1u8 << rank.index())
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    #[inline(always)]
    pub fn is_member(self, rank: Rank) -> bool {
        self.0 & (1u8 << rank.index()) != 0
    }

    /// the unique member of a singleton rank set
    pub fn rank(self) -> Option<Rank> {
        if self.is_single() {
            Some(Rank::from_index(self.0.trailing_zeros() as usize))
        } else {
            None
        }
    }

    /// a rank set is well formed iff no bit beyond RANK_LIMIT is set
    pub fn check(self) -> bool {
        self.0 & !((1u8 << RANK_LIMIT) - 1) == 0
    }
}

impl fmt::Display for RankSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for index in 0..RANK_LIMIT {
            let rank = Rank::from_index(index);
            if self.is_member(rank) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", rank.name())?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// A conservative approximation of a set of references, kept as one bit
/// per address zone. A zone is the address bits above `zone_shift`, modulo
/// the word width, so zone membership is one shift and one mask on the hot
/// path.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RefSet(Word);

impl RefSet {
    pub const EMPTY: RefSet = RefSet(0);
    pub const UNIV: RefSet = RefSet(!0);

    pub fn from_bits(bits: Word) -> RefSet {
        RefSet(bits)
    }

    pub fn bits(self) -> Word {
        self.0
    }

    #[inline(always)]
    pub fn zone(zone_shift: usize, addr: Address) -> usize {
        (addr.as_usize() >> zone_shift) & (WORD_BITS - 1)
    }

    #[inline(always)]
    pub fn add_addr(self, zone_shift: usize, addr: Address) -> RefSet {
        RefSet(self.0 | (1 << RefSet::zone(zone_shift, addr)))
    }

    #[inline(always)]
    pub fn union(self, other: RefSet) -> RefSet {
        RefSet(self.0 | other.0)
    }

    #[inline(always)]
    pub fn inter(self, other: RefSet) -> RefSet {
        RefSet(self.0 & other.0)
    }

    /// is self a superset of other?
    #[inline(always)]
    pub fn is_super(self, other: RefSet) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_univ(self) -> bool {
        self.0 == !0
    }
}

impl fmt::Display for RefSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A set of barrier modes, subset of {read, write}.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AccessSet(u8);

const ACCESS_READ_BIT: u8 = 1;
const ACCESS_WRITE_BIT: u8 = 2;

impl AccessSet {
    pub const EMPTY: AccessSet = AccessSet(0);
    pub const READ: AccessSet = AccessSet(ACCESS_READ_BIT);
    pub const WRITE: AccessSet = AccessSet(ACCESS_WRITE_BIT);
    pub const RW: AccessSet = AccessSet(ACCESS_READ_BIT | ACCESS_WRITE_BIT);

    #[inline(always)]
    pub fn union(self, other: AccessSet) -> AccessSet {
        AccessSet(self.0 | other.0)
    }

    #[inline(always)]
    pub fn minus(self, other: AccessSet) -> AccessSet {
        AccessSet(self.0 & !other.0)
    }

    #[inline(always)]
    pub fn inter(self, other: AccessSet) -> AccessSet {
        AccessSet(self.0 & other.0)
    }

    /// is self a superset of other?
    #[inline(always)]
    pub fn contains(self, other: AccessSet) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AccessSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        if self.contains(AccessSet::READ) {
            write!(f, " read")?;
        }
        if self.contains(AccessSet::WRITE) {
            write!(f, " write")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_set() {
        let ts = TraceSet::single(0).add(2);
        assert!(ts.is_member(0));
        assert!(!ts.is_member(1));
        assert!(ts.is_member(2));
        assert!(ts.sub(TraceSet::from_bits(0b111)));
        assert!(!TraceSet::from_bits(0b111).sub(ts));
        assert_eq!(ts.inter(TraceSet::single(2)), TraceSet::single(2));
        assert!(ts.delete(0).delete(2).is_empty());
        assert!(TraceSet::UNIV.is_univ());
        assert!(!ts.is_univ());
        assert_eq!(ts.diff(TraceSet::single(0)), TraceSet::single(2));
        assert!(TraceSet::single(5).is_single());
        assert!(!ts.is_single());
    }

    #[test]
    fn test_rank_set() {
        assert!(RankSet::EMPTY.check());
        assert!(RankSet::EMPTY.rank().is_none());
        let rs = RankSet::single(Rank::Exact);
        assert!(rs.check());
        assert!(rs.is_single());
        assert_eq!(rs.rank(), Some(Rank::Exact));
        assert!(rs.is_member(Rank::Exact));
        assert!(!rs.is_member(Rank::Weak));
    }

    #[test]
    fn test_ref_set() {
        let shift = 20;
        let a = Address::from_ptr(0x1234_5678 as *const u8);
        let s = RefSet::EMPTY.add_addr(shift, a);
        assert!(!s.is_empty());
        assert!(RefSet::UNIV.is_super(s));
        assert!(!s.is_super(RefSet::UNIV));
        assert!(s.is_super(RefSet::EMPTY));
        assert_eq!(s.union(RefSet::UNIV), RefSet::UNIV);
        assert!(RefSet::UNIV.is_univ());
        assert_eq!(RefSet::from_bits(s.bits()), s);
        assert_eq!(s.inter(RefSet::UNIV), s);
    }

    #[test]
    fn test_access_set() {
        let sm = AccessSet::EMPTY.union(AccessSet::WRITE);
        assert!(sm.contains(AccessSet::WRITE));
        assert!(!sm.contains(AccessSet::READ));
        assert!(sm.union(AccessSet::READ).contains(AccessSet::RW));
        assert!(sm.minus(AccessSet::WRITE).is_empty());
    }
}
