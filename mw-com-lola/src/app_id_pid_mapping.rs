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

//! Fixed-capacity application-id/PID registry in shared memory:
//! `RegisterPid` is lock-free, CAS-based, with a bounded retry count,
//! so a misbehaving or
//! contended peer can never hang a registering process.

use mw_com_bb::lock_free::atomic_cas::{AtomicU32Cas, PlatformAtomicU32Cas};
use mw_com_cal::shared_memory::{SharedMemory, SharedMemoryCreateError, SharedMemoryOpenError};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

pub const MAX_REGISTER_RETRIES: u32 = 50;

const STATUS_UNUSED: u32 = 0;
const STATUS_UPDATING: u32 = 1;
const STATUS_USED: u32 = 2;

#[derive(Debug)]
pub enum RegisterPidError {
    NoCapacity,
    RetriesExhausted,
}

#[repr(C)]
struct Entry {
    status: AtomicU32,
    application_id: AtomicU32,
    pid: AtomicI32,
}

/// Array of at most `capacity` `{status, application_id, pid}` entries.
/// Mutations are routed through an injectable
/// [`AtomicU32Cas`] so bounded-retry behavior is testable without
/// relying on genuine contention.
pub struct ApplicationIdPidMapping<C: AtomicU32Cas = PlatformAtomicU32Cas> {
    shm: SharedMemory,
    capacity: usize,
    cas: C,
}

impl ApplicationIdPidMapping<PlatformAtomicU32Cas> {
    pub fn create(name: &str, capacity: usize) -> Result<Self, SharedMemoryCreateError> {
        Self::create_with_cas(name, capacity, PlatformAtomicU32Cas)
    }

    pub fn open(name: &str, capacity: usize) -> Result<Self, SharedMemoryOpenError> {
        Self::open_with_cas(name, capacity, PlatformAtomicU32Cas)
    }
}

impl<C: AtomicU32Cas> ApplicationIdPidMapping<C> {
    pub fn create_with_cas(name: &str, capacity: usize, cas: C) -> Result<Self, SharedMemoryCreateError> {
        let shm = SharedMemory::create(name, capacity * std::mem::size_of::<Entry>())?;
        Ok(Self { shm, capacity, cas })
    }

    pub fn open_with_cas(name: &str, capacity: usize, cas: C) -> Result<Self, SharedMemoryOpenError> {
        let shm = SharedMemory::open(name, capacity * std::mem::size_of::<Entry>())?;
        Ok(Self { shm, capacity, cas })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn entry(&self, index: usize) -> &Entry {
        assert!(index < self.capacity);
        unsafe { &*(self.shm.base() as *const Entry).wrapping_add(index) }
    }

    /// `RegisterPid(application_id, pid)`: if an entry for
    /// `application_id` exists, overwrites its pid; otherwise claims any
    /// `Unused` entry. Returns the previously-stored pid when an
    /// existing entry was overwritten. Bounded at
    /// [`MAX_REGISTER_RETRIES`] CAS attempts per entry considered.
    pub fn register_pid(&self, application_id: u32, pid: i32) -> Result<Option<i32>, RegisterPidError> {
        if self.capacity == 0 {
            return Err(RegisterPidError::NoCapacity);
        }

        for index in 0..self.capacity {
            let entry = self.entry(index);
            if entry.status.load(Ordering::Acquire) == STATUS_USED
                && entry.application_id.load(Ordering::Acquire) == application_id
            {
                let previous_pid = entry.pid.load(Ordering::Acquire);
                self.transition(entry, STATUS_USED, STATUS_UPDATING)?;
                entry.pid.store(pid, Ordering::Release);
                self.transition(entry, STATUS_UPDATING, STATUS_USED)?;
                return Ok(Some(previous_pid));
            }
        }

        for index in 0..self.capacity {
            let entry = self.entry(index);
            if self.try_transition(entry, STATUS_UNUSED, STATUS_UPDATING) {
                entry.application_id.store(application_id, Ordering::Release);
                entry.pid.store(pid, Ordering::Release);
                self.transition(entry, STATUS_UPDATING, STATUS_USED)?;
                return Ok(None);
            }
        }

        Err(RegisterPidError::NoCapacity)
    }

    fn try_transition(&self, entry: &Entry, from: u32, to: u32) -> bool {
        self.cas.compare_exchange(&entry.status, from, to).is_ok()
    }

    fn transition(&self, entry: &Entry, from: u32, to: u32) -> Result<(), RegisterPidError> {
        for _ in 0..MAX_REGISTER_RETRIES {
            if self.try_transition(entry, from, to) {
                return Ok(());
            }
        }
        Err(RegisterPidError::RetriesExhausted)
    }

    /// Unconditionally marks `index` unused, used by crash recovery
    /// once its `TransactionLog`s have been replayed.
    pub fn clear(&self, index: usize) {
        let entry = self.entry(index);
        entry.status.store(STATUS_UNUSED, Ordering::Release);
    }

    /// Iterates all `Used` entries whose `pid` no longer exists under
    /// `/proc`.
    pub fn stale_entries(&self) -> Vec<(usize, u32, i32)> {
        let mut stale = Vec::new();
        for index in 0..self.capacity {
            let entry = self.entry(index);
            if entry.status.load(Ordering::Acquire) == STATUS_USED {
                let pid = entry.pid.load(Ordering::Acquire);
                if !is_pid_alive(pid) {
                    stale.push((index, entry.application_id.load(Ordering::Acquire), pid));
                }
            }
        }
        stale
    }
}

/// Whether `/proc/{pid}` exists - the recovery trigger for a dead
/// peer. Always `true` for pids this process cannot see under `/proc`
/// on non-Linux platforms; callers there must rely on the explicit
/// lock-based detection path instead.
pub fn is_pid_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
