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

//! Allocation buffers. The buffer machinery proper (reserve/commit, trip
//! handling) belongs to the pools; the segment layer only needs an owned,
//! checkable handle it can park on a GC segment.

use std::mem;

use common::Raw;
use common::Sig;
use common::SIG_BUFFER;
use common::SIG_INVALID;
use error::Res;
use pool::Pool;

#[repr(C)]
pub struct Buffer {
    sig: Sig,
    pool: Raw<Pool>,
}

impl Buffer {
    pub fn create(pool: Raw<Pool>) -> Res<Raw<Buffer>> {
        assert!(pool.check());
        let mut arena = pool.arena();
        let addr = arena.control_alloc(mem::size_of::<Buffer>())?;
        let mut buffer: Raw<Buffer> = unsafe { Raw::from_addr(addr) };
        buffer.sig = SIG_BUFFER;
        buffer.pool = pool;
        Ok(buffer)
    }

    pub fn destroy(mut buffer: Raw<Buffer>) {
        assert!(buffer.check());
        buffer.sig = SIG_INVALID;
        let mut arena = buffer.pool.arena();
        arena.control_free(buffer.addr(), mem::size_of::<Buffer>());
    }

    pub fn pool(&self) -> Raw<Pool> {
        self.pool
    }

    pub fn check(&self) -> bool {
        self.sig == SIG_BUFFER
    }
}
