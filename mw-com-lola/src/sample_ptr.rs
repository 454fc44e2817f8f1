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

//! Move-only RAII handles to shared-memory slots. Both release their
//! slot-level resource on drop without requiring the caller to remember
//! to do so.

use crate::control::{EventDataControl, SafetyPartition};
use crate::event_data_storage::EventDataStorage;
use crate::reference_tracker::SampleReferenceGuard;
use crate::subscription::Subscription;
use crate::transaction_log::TransactionHandle;
use std::sync::Arc;

/// Consumer-side handle: owns one `SampleReferenceTracker` unit and one
/// control-word refcount. Dropping it releases both. Must never outlive
/// the subscription that produced
/// it - enforced by construction, since it is only ever handed to a
/// `GetNewSamples` callback by the subscription itself.
pub struct SamplePtr<T: Copy> {
    storage: Arc<EventDataStorage<T>>,
    control: Arc<EventDataControl>,
    partition: SafetyPartition,
    index: usize,
    owning_subscription: Option<Arc<Subscription>>,
    _tracker_guard: SampleReferenceGuard,
    _tx_handle: Option<TransactionHandle>,
}

impl<T: Copy> SamplePtr<T> {
    pub(crate) fn new(
        storage: Arc<EventDataStorage<T>>,
        control: Arc<EventDataControl>,
        partition: SafetyPartition,
        index: usize,
        tracker_guard: SampleReferenceGuard,
        tx_handle: Option<TransactionHandle>,
    ) -> Self {
        Self::with_subscription(storage, control, partition, index, tracker_guard, tx_handle, None)
    }

    /// Like [`SamplePtr::new`], additionally registering this handle
    /// with `owning_subscription` so `Unsubscribe`'s bounded wait sees
    /// it as outstanding until dropped.
    pub(crate) fn with_subscription(
        storage: Arc<EventDataStorage<T>>,
        control: Arc<EventDataControl>,
        partition: SafetyPartition,
        index: usize,
        tracker_guard: SampleReferenceGuard,
        tx_handle: Option<TransactionHandle>,
        owning_subscription: Option<Arc<Subscription>>,
    ) -> Self {
        if let Some(subscription) = &owning_subscription {
            subscription.note_sample_acquired();
        }
        Self {
            storage,
            control,
            partition,
            index,
            owning_subscription,
            _tracker_guard: tracker_guard,
            _tx_handle: tx_handle,
        }
    }

    /// Reads the slot's current payload. Safe because the live refcount
    /// this handle holds guarantees the producer cannot be concurrently
    /// writing it.
    pub fn get(&self) -> T {
        unsafe { self.storage.read_slot(self.index) }
    }

    pub fn slot_index(&self) -> usize {
        self.index
    }
}

impl<T: Copy> Drop for SamplePtr<T> {
    fn drop(&mut self) {
        self.control.release(self.partition, self.index);
        if let Some(subscription) = &self.owning_subscription {
            subscription.note_sample_released();
        }
    }
}

/// Producer-side handle: references a slot in `InWriting` state.
/// Dropping it without calling
/// [`crate::skeleton_event::Producer::send`] releases the slot back to
/// `Unused` without bumping the timestamp.
pub struct SampleAllocateePtr<T: Copy> {
    storage: Arc<EventDataStorage<T>>,
    control: Arc<EventDataControl>,
    index: usize,
    sent: bool,
}

impl<T: Copy> SampleAllocateePtr<T> {
    pub(crate) fn new(storage: Arc<EventDataStorage<T>>, control: Arc<EventDataControl>, index: usize) -> Self {
        Self {
            storage,
            control,
            index,
            sent: false,
        }
    }

    /// Writes `value` into the slot this handle owns.
    pub fn write(&self, value: T) {
        unsafe { self.storage.write_slot(self.index, value) };
    }

    pub fn slot_index(&self) -> usize {
        self.index
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }
}

impl<T: Copy> Drop for SampleAllocateePtr<T> {
    fn drop(&mut self) {
        if !self.sent {
            self.control.abandon(self.index);
        }
    }
}
