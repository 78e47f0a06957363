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

//! The segment class registry.
//!
//! A class is an immutable record of operation slots with single
//! inheritance: a subclass starts as a copy of its parent's record and
//! overrides the slots it specializes. A subclass method reaches its
//! parent's implementation ("next method") by calling the parent's slot
//! directly; there is no hidden dispatch. Slots that make no sense for a
//! class point at not-reached stubs, so calling one is a programming
//! error, not silent misbehaviour.

use std::fmt;
use std::mem;

use buf::Buffer;
use common::RankSet;
use common::Raw;
use common::RefSet;
use common::Sig;
use common::TraceSet;
use common::SIG_SEG_CLASS;
use pool::Pool;
use seg::seg_triv_describe;
use seg::seg_triv_finish;
use seg::seg_triv_init;
use seg::Seg;
use utils::Address;
use utils::ByteSize;
use utils::Word;

#[derive(Clone, Copy)]
pub struct SegClass {
    /// short identifier, for diagnostics
    pub name: &'static str,
    /// bytes of control storage a segment of this class occupies; at
    /// least the size of the generic segment
    pub size: ByteSize,
    pub parent: Option<&'static SegClass>,
    pub init: fn(Raw<Seg>, Raw<Pool>, Address, ByteSize),
    pub finish: fn(Raw<Seg>),
    pub set_grey: fn(Raw<Seg>, TraceSet),
    pub set_white: fn(Raw<Seg>, TraceSet),
    pub set_rank_set: fn(Raw<Seg>, RankSet),
    pub set_rank_summary: fn(Raw<Seg>, RankSet, RefSet),
    pub summary: fn(Raw<Seg>) -> RefSet,
    pub set_summary: fn(Raw<Seg>, RefSet),
    pub buffer: fn(Raw<Seg>) -> Option<Raw<Buffer>>,
    pub set_buffer: fn(Raw<Seg>, Option<Raw<Buffer>>),
    pub p: fn(Raw<Seg>) -> Word,
    pub set_p: fn(Raw<Seg>, Word),
    pub describe: fn(Raw<Seg>, &mut dyn fmt::Write) -> fmt::Result,
    pub sig: Sig,
}

impl SegClass {
    pub fn check(&self) -> bool {
        if self.sig != SIG_SEG_CLASS {
            return false;
        }
        if self.name.is_empty() {
            return false;
        }
        if self.size < mem::size_of::<Seg>() {
            return false;
        }
        match self.parent {
            Some(parent) => self.size >= parent.size,
            None => true,
        }
    }

    /// copies this class's record as the starting point of a subclass;
    /// the caller then overrides the slots it specializes
    pub fn subclass(&'static self, name: &'static str, size: ByteSize) -> SegClass {
        assert!(self.check());
        assert!(size >= self.size);
        let mut class = *self;
        class.name = name;
        class.size = size;
        class.parent = Some(self);
        class
    }

    /// is `ancestor` this class or on its parent chain? Classes are
    /// compared by identity: each class record has exactly one address.
    pub fn is_subclass_of(&self, ancestor: &SegClass) -> bool {
        let mut cur = self;
        loop {
            if cur as *const SegClass == ancestor as *const SegClass {
                return true;
            }
            match cur.parent {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }
}

lazy_static! {
    /// The most basic segment class: colour and shield bookkeeping only.
    /// All reference-oriented slots are not-reached; clients subclass it
    /// when they want segments the collector never scans.
    pub static ref SEG_CLASS: SegClass = SegClass {
        name: "SEG",
        size: mem::size_of::<Seg>(),
        parent: None,
        init: seg_triv_init,
        finish: seg_triv_finish,
        set_grey: seg_no_set_grey,
        set_white: seg_no_set_white,
        set_rank_set: seg_no_set_rank_set,
        set_rank_summary: seg_no_set_rank_summary,
        summary: seg_no_summary,
        set_summary: seg_no_set_summary,
        buffer: seg_no_buffer,
        set_buffer: seg_no_set_buffer,
        p: seg_no_p,
        set_p: seg_no_set_p,
        describe: seg_triv_describe,
        sig: SIG_SEG_CLASS,
    };
}

fn not_reached(seg: Raw<Seg>, op: &str) -> ! {
    panic!(
        "segment class {} does not implement {}",
        seg.class().name,
        op
    );
}

fn seg_no_set_grey(seg: Raw<Seg>, _grey: TraceSet) {
    assert!(seg.check());
    not_reached(seg, "set_grey");
}

fn seg_no_set_white(seg: Raw<Seg>, _white: TraceSet) {
    assert!(seg.check());
    not_reached(seg, "set_white");
}

fn seg_no_set_rank_set(seg: Raw<Seg>, _rank_set: RankSet) {
    assert!(seg.check());
    not_reached(seg, "set_rank_set");
}

fn seg_no_set_rank_summary(seg: Raw<Seg>, _rank_set: RankSet, _summary: RefSet) {
    assert!(seg.check());
    not_reached(seg, "set_rank_and_summary");
}

fn seg_no_summary(seg: Raw<Seg>) -> RefSet {
    assert!(seg.check());
    not_reached(seg, "summary");
}

fn seg_no_set_summary(seg: Raw<Seg>, _summary: RefSet) {
    assert!(seg.check());
    not_reached(seg, "set_summary");
}

fn seg_no_buffer(seg: Raw<Seg>) -> Option<Raw<Buffer>> {
    assert!(seg.check());
    not_reached(seg, "buffer");
}

fn seg_no_set_buffer(seg: Raw<Seg>, _buffer: Option<Raw<Buffer>>) {
    assert!(seg.check());
    not_reached(seg, "set_buffer");
}

fn seg_no_p(seg: Raw<Seg>) -> Word {
    assert!(seg.check());
    not_reached(seg, "p");
}

fn seg_no_set_p(seg: Raw<Seg>, _p: Word) {
    assert!(seg.check());
    not_reached(seg, "set_p");
}
