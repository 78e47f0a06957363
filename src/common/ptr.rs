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

use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;

use utils::Address;

/// A non-owning handle to a structure that lives in memory this crate
/// manages by hand (control storage, the tract table, the arena header).
/// The referent must outlive every Raw that points at it; lifetimes are
/// maintained by the alloc/free discipline of the owning module, not by
/// the borrow checker.
#[repr(C)]
pub struct Raw<T> {
    inner: *mut T,
}

impl<T> Raw<T> {
    pub unsafe fn from_ptr(ptr: *mut T) -> Raw<T> {
        debug_assert!(!ptr.is_null());
        Raw { inner: ptr }
    }

    pub unsafe fn from_addr(addr: Address) -> Raw<T> {
        debug_assert!(!addr.is_zero());
        Raw {
            inner: addr.to_ptr_mut(),
        }
    }

    pub fn addr(&self) -> Address {
        Address::from_mut_ptr(self.inner)
    }

    pub fn as_ptr(&self) -> *mut T {
        self.inner
    }
}

impl<T> Clone for Raw<T> {
    fn clone(&self) -> Self {
        Raw { inner: self.inner }
    }
}

impl<T> Copy for Raw<T> {}

impl<T> PartialEq for Raw<T> {
    fn eq(&self, other: &Raw<T>) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for Raw<T> {}

impl<T> Deref for Raw<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.inner }
    }
}

impl<T> DerefMut for Raw<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.inner }
    }
}

impl<T> fmt::Debug for Raw<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "Raw({:#x})", self.inner as usize)
    }
}
