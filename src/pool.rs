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

//! The pool header the segment layer hangs its per-pool state on. Real
//! allocation policy lives in pool implementations above this crate; here
//! a pool is an owner identity, a serial, and the ring its segments thread
//! themselves onto.

use std::mem;

use arena::Arena;
use common::Raw;
use common::Sig;
use common::SIG_INVALID;
use common::SIG_POOL;
use error::Res;
use utils::RingNode;

#[repr(C)]
pub struct Pool {
    sig: Sig,
    arena: Raw<Arena>,
    serial: u64,
    pub(crate) seg_ring: RingNode,
}

impl Pool {
    pub fn create(mut arena: Raw<Arena>) -> Res<Raw<Pool>> {
        let addr = arena.control_alloc(mem::size_of::<Pool>())?;
        let mut pool: Raw<Pool> = unsafe { Raw::from_addr(addr) };
        pool.sig = SIG_POOL;
        pool.arena = arena;
        pool.serial = arena.next_pool_serial();
        pool.seg_ring.init();
        trace!("PoolCreate: serial={}", pool.serial);
        Ok(pool)
    }

    pub fn destroy(mut pool: Raw<Pool>) {
        assert!(pool.check());
        assert!(
            pool.seg_ring.is_single(),
            "pool destroyed while it still owns segments"
        );
        trace!("PoolDestroy: serial={}", pool.serial);
        pool.seg_ring.finish();
        pool.sig = SIG_INVALID;
        let mut arena = pool.arena;
        arena.control_free(pool.addr(), mem::size_of::<Pool>());
    }

    #[inline(always)]
    pub fn arena(&self) -> Raw<Arena> {
        self.arena
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// how many segments the pool currently owns
    pub fn seg_count(&self) -> usize {
        self.seg_ring.count()
    }

    pub fn check(&self) -> bool {
        self.sig == SIG_POOL && self.seg_ring.check()
    }
}
