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

use thiserror::Error;

/// The recoverable failures of the allocation path. Invariant violations
/// are never reported this way; those are assertions and abort.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// the arena has no address range of the requested size, or the
    /// request would dip into the reservoir without a permit
    #[error("out of address space")]
    OutOfMemory,
    /// satisfying the request would push committed memory past the
    /// arena's commit limit
    #[error("commit limit exceeded")]
    CommitLimit,
    /// a non-memory resource ran out
    #[error("out of resources")]
    ResourceLimit,
}

pub type Res<T> = Result<T, AllocError>;
