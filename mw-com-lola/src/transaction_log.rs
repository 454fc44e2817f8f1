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

//! A per-subscription, fixed-capacity, write-ahead log of refcount
//! deltas: record the intent before mutating the control word, clear
//! it after success. A recovery pass replays the inverse of every row
//! still marked active when the owning subscriber is found dead.

use mw_com_cal::shared_memory::{SharedMemory, SharedMemoryCreateError, SharedMemoryOpenError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    fn inverse(self) -> Self {
        match self {
            Delta::Increment => Delta::Decrement,
            Delta::Decrement => Delta::Increment,
        }
    }
}

const ROW_FREE: u8 = 0;
const ROW_ACTIVE: u8 = 1;

/// One row's mutable state: `active` is the write-ahead marker,
/// `slot_index`/`delta` are only meaningful while `active`.
#[repr(C)]
struct Row {
    active: AtomicU8,
    delta_is_decrement: AtomicU8,
    slot_index: std::sync::atomic::AtomicU32,
}

/// Fixed-capacity array of [`Row`]s backed by shared memory.
#[derive(Debug)]
pub struct TransactionLog {
    shm: SharedMemory,
    capacity: usize,
}

#[derive(Debug)]
pub enum RecordIntentError {
    LogFull,
}

impl TransactionLog {
    pub fn create(name: &str, capacity: usize) -> Result<Self, SharedMemoryCreateError> {
        let shm = SharedMemory::create(name, capacity * std::mem::size_of::<Row>())?;
        Ok(Self { shm, capacity })
    }

    pub fn open(name: &str, capacity: usize) -> Result<Self, SharedMemoryOpenError> {
        let shm = SharedMemory::open(name, capacity * std::mem::size_of::<Row>())?;
        Ok(Self { shm, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn row(&self, index: usize) -> &Row {
        assert!(index < self.capacity);
        unsafe { &*(self.shm.base() as *const Row).wrapping_add(index) }
    }

    /// Claims a free row and records the intent to apply `delta` to
    /// `slot_index`, before the caller mutates the control word. Takes
    /// `self` by `Arc` so the returned handle can outlive any particular
    /// borrow scope (it is carried inside `SamplePtr`/`SampleAllocateePtr`).
    pub fn record_intent(self: &Arc<Self>, slot_index: u32, delta: Delta) -> Result<TransactionHandle, RecordIntentError> {
        for i in 0..self.capacity {
            let row = self.row(i);
            if row
                .active
                .compare_exchange(ROW_FREE, ROW_ACTIVE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                row.slot_index.store(slot_index, Ordering::Release);
                row.delta_is_decrement
                    .store((delta == Delta::Decrement) as u8, Ordering::Release);
                return Ok(TransactionHandle {
                    log: self.clone(),
                    row_index: i,
                });
            }
        }
        Err(RecordIntentError::LogFull)
    }

    /// Every row still marked active - used by crash recovery to replay
    /// the inverse of each intent whose owner died before clearing it.
    pub fn outstanding_entries(&self) -> Vec<(u32, Delta)> {
        let mut entries = Vec::new();
        for i in 0..self.capacity {
            let row = self.row(i);
            if row.active.load(Ordering::Acquire) == ROW_ACTIVE {
                let slot_index = row.slot_index.load(Ordering::Acquire);
                let delta = if row.delta_is_decrement.load(Ordering::Acquire) != 0 {
                    Delta::Decrement
                } else {
                    Delta::Increment
                };
                entries.push((slot_index, delta));
            }
        }
        entries
    }

    /// Clears every active row, marking this log's owner as fully
    /// recovered.
    pub fn clear_all(&self) {
        for i in 0..self.capacity {
            self.row(i).active.store(ROW_FREE, Ordering::Release);
        }
    }
}

/// A single claimed, still-active row. Dropping it (or calling
/// [`TransactionHandle::clear`] explicitly) marks the intent as
/// fulfilled.
pub struct TransactionHandle {
    log: Arc<TransactionLog>,
    row_index: usize,
}

impl TransactionHandle {
    pub fn clear(self) {
        // runs via Drop
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        self.log.row(self.row_index).active.store(ROW_FREE, Ordering::Release);
    }
}

/// Returns the inverse of `delta`, used by recovery to undo it.
pub fn inverse(delta: Delta) -> Delta {
    delta.inverse()
}
