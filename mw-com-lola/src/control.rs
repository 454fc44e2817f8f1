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

//! The control-word array for one event: the producer/consumer contract
//! (`Allocate`/`Send` and the selection policy for `GetNewSamples`), plus
//! the QM/ASIL-B composite control and one-way `qm_disconnect` flag.

use mw_com_bb::elementary::flag_owner::FlagOwner;
use mw_com_bb::lock_free::control_word::{ControlWord, SlotState, Timestamp, MAX_TIMESTAMP, NEVER_WRITTEN};
use mw_com_cal::shared_memory::{SharedMemory, SharedMemoryCreateError, SharedMemoryOpenError};
use mw_com_log::{debug, fatal_panic};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SafetyPartition {
    Qm,
    AsilB,
}

#[derive(Debug)]
pub enum AllocateError {
    /// No slot satisfies the selection policy in the required partition(s).
    SampleAllocationFailure,
}

#[derive(Debug)]
pub enum SendError {
    /// The handle's slot was not in `InWriting` - a contract violation.
    NotInWriting,
    /// The event's 48-bit timestamp counter has wrapped; sending on this
    /// event is halted for the remainder of the process.
    TimestampExhausted,
}

/// A single array of [`ControlWord`]s, backed by shared memory, indexed
/// identically to the matching [`crate::event_data_storage::EventDataStorage`].
#[derive(Debug)]
pub struct ControlArray {
    shm: SharedMemory,
    len: usize,
}

impl ControlArray {
    pub fn create(name: &str, len: usize) -> Result<Self, SharedMemoryCreateError> {
        // shm_open + ftruncate zero-fills the region, and an all-zero
        // ControlWord already decodes as `Unused` - no explicit
        // initialization pass is required.
        let shm = SharedMemory::create(name, len * std::mem::size_of::<ControlWord>())?;
        Ok(Self { shm, len })
    }

    pub fn open(name: &str, len: usize) -> Result<Self, SharedMemoryOpenError> {
        let shm = SharedMemory::open(name, len * std::mem::size_of::<ControlWord>())?;
        Ok(Self { shm, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn control(&self, index: usize) -> &ControlWord {
        assert!(index < self.len, "control word index {index} out of bounds");
        unsafe { &*(self.shm.base() as *const ControlWord).wrapping_add(index) }
    }

    pub fn invalidate_all(&self) {
        for i in 0..self.len {
            self.control(i).invalidate();
        }
    }
}

/// Candidate slot states gathered for the allocation policy: oldest
/// slot with refcount==0 and not currently in_writing, preferring the
/// slot with the smallest timestamp.
fn eligible_for_allocation(state: SlotState) -> Option<Timestamp> {
    match state {
        SlotState::Unused => Some(NEVER_WRITTEN),
        SlotState::Ready { timestamp, refcount: 0 } => Some(timestamp),
        _ => None,
    }
}

/// Scans `array` for the allocation candidate ordering (ascending
/// timestamp, `Unused` sorts as timestamp 0 i.e. first) and attempts
/// `try_allocate` on each in turn until one succeeds. Returns the
/// successfully allocated index.
fn try_allocate_in(array: &ControlArray) -> Option<usize> {
    let mut candidates: Vec<(Timestamp, usize)> = (0..array.len())
        .filter_map(|i| eligible_for_allocation(array.control(i).state()).map(|ts| (ts, i)))
        .collect();
    candidates.sort_by_key(|&(ts, _)| ts);

    for (_, index) in candidates {
        if array.control(index).try_allocate() {
            return Some(index);
        }
    }
    None
}

/// The control plane for one event: one ASIL-B array, and optionally a
/// second QM array over the same data slots. A QM-only event has no
/// ASIL-B array; the ASIL-B field is
/// always present and treated as the primary partition when composite.
#[derive(Debug)]
pub struct EventDataControl {
    primary: ControlArray,
    qm: Option<ControlArray>,
    qm_disconnect: FlagOwner,
    next_timestamp: AtomicU64,
}

impl EventDataControl {
    /// A QM-only event: one control array, no composite partition.
    pub fn new_qm_only(primary: ControlArray) -> Self {
        Self {
            primary,
            qm: None,
            qm_disconnect: FlagOwner::new(false),
            next_timestamp: AtomicU64::new(NEVER_WRITTEN),
        }
    }

    /// An ASIL-B event also serving QM consumers via a composite control
    /// array over the same data slots.
    pub fn new_composite(asil_b: ControlArray, qm: ControlArray) -> Self {
        Self {
            primary: asil_b,
            qm: Some(qm),
            qm_disconnect: FlagOwner::new(false),
            next_timestamp: AtomicU64::new(NEVER_WRITTEN),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.primary.len()
    }

    pub fn is_qm_disconnected(&self) -> bool {
        self.qm_disconnect.is_set()
    }

    fn control_for(&self, partition: SafetyPartition) -> Option<&ControlArray> {
        match partition {
            SafetyPartition::AsilB => Some(&self.primary),
            SafetyPartition::Qm => {
                if self.qm_disconnect.is_set() {
                    None
                } else {
                    self.qm.as_ref().or(Some(&self.primary))
                }
            }
        }
    }

    /// Producer `Allocate`. For a composite event the chosen
    /// slot must be eligible in *both* partitions; if no slot satisfies
    /// both, QM is permanently disconnected and allocation retries
    /// against the ASIL-B partition alone.
    pub fn allocate(&self) -> Result<usize, AllocateError> {
        let Some(qm) = self.qm.as_ref() else {
            return try_allocate_in(&self.primary).ok_or(AllocateError::SampleAllocationFailure);
        };

        if self.qm_disconnect.is_set() {
            return try_allocate_in(&self.primary).ok_or(AllocateError::SampleAllocationFailure);
        }

        // composite: find a slot allocatable in both partitions.
        if let Some(index) = try_allocate_in(&self.primary) {
            if qm.control(index).try_allocate() {
                return Ok(index);
            }
            // QM could not accept the slot ASIL-B just claimed: the
            // ASIL-B claim stands (it already committed), QM is
            // permanently disconnected from here on.
            debug!(
                from "EventDataControl::allocate()",
                "QM partition could not accept slot {}; disconnecting QM consumers.", index
            );
            self.qm_disconnect.set();
            return Ok(index);
        }

        Err(AllocateError::SampleAllocationFailure)
    }

    /// Producer `Send`. Assigns the next monotonic
    /// timestamp and transitions the slot to `Ready` in every still
    /// connected partition.
    pub fn send(&self, index: usize) -> Result<Timestamp, SendError> {
        let timestamp = self.next_timestamp.fetch_add(1, Ordering::AcqRel) + 1;
        if timestamp > MAX_TIMESTAMP {
            fatal_panic!(
                "event timestamp counter wrapped past {} bits; halting sends on this event",
                48
            );
        }

        if !self.primary.control(index).send(timestamp) {
            return Err(SendError::NotInWriting);
        }
        if let Some(qm) = &self.qm {
            if !self.qm_disconnect.is_set() {
                // best-effort: QM's copy of this slot was only claimed
                // when allocate() succeeded for both partitions, so this
                // send must also succeed, except if QM was disconnected
                // concurrently - in which case there is nothing to do.
                let _ = qm.control(index).send(timestamp);
            }
        }
        Ok(timestamp)
    }

    /// Producer drops an allocatee handle without `Send`.
    pub fn abandon(&self, index: usize) {
        self.primary.control(index).abandon_writing();
        if let Some(qm) = &self.qm {
            qm.control(index).abandon_writing();
        }
    }

    /// Consumer reference attempt for `GetNewSamples`:
    /// `timestamp > last_seen_timestamp`, `invalid == 0`, refcount
    /// incremented via CAS.
    pub fn try_reference_newer_than(
        &self,
        partition: SafetyPartition,
        index: usize,
        last_seen_timestamp: Timestamp,
    ) -> Option<(Timestamp, u16)> {
        let array = self.control_for(partition)?;
        array.control(index).try_reference_if(|ts| ts > last_seen_timestamp)
    }

    pub fn release(&self, partition: SafetyPartition, index: usize) {
        if let Some(array) = self.control_for(partition) {
            array.control(index).release();
        }
    }

    pub fn state(&self, partition: SafetyPartition, index: usize) -> Option<SlotState> {
        self.control_for(partition).map(|array| array.control(index).state())
    }

    /// Storage teardown during `StopOfferService`:
    /// invalidates every slot control word in every connected partition.
    pub fn invalidate_all(&self) {
        self.primary.invalidate_all();
        if let Some(qm) = &self.qm {
            qm.invalidate_all();
        }
    }
}
