// Copyright (c) 2024 Contributors to the Eclipse Foundation
//
// See the NOTICE file(s) distributed with this work for additional
// information regarding copyright ownership.
//
// This program and the accompanying materials are made available under the
// terms of the Apache Software License 2.0 which is available at
// https://www.apache.org/licenses/LICENSE-2.0, or the MIT license
// which is available at https://opensource.org/licenses/MIT.
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The data-slot array for one event: a
//! contiguous, POD-compatible array of `T` backed by POSIX shared
//! memory, indexed by the same slot index as its [`crate::control::ControlArray`].
//! Reading or writing a slot is only safe while holding the matching
//! reference/writing right on the control word - this type trusts its
//! caller (`EventDataControl`) to enforce that, the same way the
//! control word trusts its caller to single-thread writes into a slot
//! it just allocated.

use mw_com_cal::shared_memory::{SharedMemory, SharedMemoryCreateError, SharedMemoryOpenError};
use std::marker::PhantomData;
use std::mem::size_of;

/// Owns the shared-memory mapping backing `slot_count` slots of `T`.
/// `T` must be `Copy` (no owning pointers / no `Drop`) to satisfy the
/// "POD-compatible" requirement on slot payloads.
#[derive(Debug)]
pub struct EventDataStorage<T: Copy> {
    shm: SharedMemory,
    slot_count: usize,
    _marker: PhantomData<T>,
}

impl<T: Copy> EventDataStorage<T> {
    pub fn create(name: &str, slot_count: usize) -> Result<Self, SharedMemoryCreateError> {
        let shm = SharedMemory::create(name, slot_count * size_of::<T>())?;
        Ok(Self {
            shm,
            slot_count,
            _marker: PhantomData,
        })
    }

    pub fn open(name: &str, slot_count: usize) -> Result<Self, SharedMemoryOpenError> {
        let shm = SharedMemory::open(name, slot_count * size_of::<T>())?;
        Ok(Self {
            shm,
            slot_count,
            _marker: PhantomData,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn slot_ptr(&self, index: usize) -> *mut T {
        assert!(index < self.slot_count, "slot index {index} out of bounds");
        (self.shm.base() as *mut T).wrapping_add(index)
    }

    /// Writes `value` into `index`. Caller must hold the `InWriting`
    /// right on the matching control word - concurrent writers to the
    /// same slot are a contract violation the control word already
    /// prevents from arising.
    ///
    /// # Safety
    /// The caller must have exclusive write access to this slot (i.e.
    /// the matching control word is in `InWriting` state, owned by this
    /// caller).
    pub unsafe fn write_slot(&self, index: usize, value: T) {
        self.slot_ptr(index).write(value);
    }

    /// Reads the current value of `index`. Caller must hold a live
    /// reference (refcount) on the matching control word, guaranteeing
    /// the slot is not concurrently being written.
    ///
    /// # Safety
    /// The caller must hold a live reference on the matching control
    /// word for the duration of the returned value's use.
    pub unsafe fn read_slot(&self, index: usize) -> T {
        self.slot_ptr(index).read()
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_testing::unique_test_base_dir;

    fn unique_name(tag: &str) -> String {
        let _ = unique_test_base_dir();
        format!("mw_com_evtdata_{tag}_{:?}", std::thread::current().id())
    }

    #[test]
    fn write_then_read_round_trips() {
        let name = unique_name("roundtrip");
        let storage = EventDataStorage::<u32>::create(&name, 4).unwrap();
        unsafe {
            storage.write_slot(2, 42);
            assert_eq!(storage.read_slot(2), 42);
        }
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&name);
    }

    #[test]
    fn create_and_open_share_the_same_bytes() {
        let name = unique_name("shared");
        let creator = EventDataStorage::<u64>::create(&name, 2).unwrap();
        unsafe {
            creator.write_slot(0, 0xDEAD_BEEF);
        }
        let opener = EventDataStorage::<u64>::open(&name, 2).unwrap();
        unsafe {
            assert_eq!(opener.read_slot(0), 0xDEAD_BEEF);
        }
        drop(creator);
        drop(opener);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&name);
    }
}
