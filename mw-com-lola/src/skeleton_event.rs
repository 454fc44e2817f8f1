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

//! Producer-side binding for one event: ties an [`EventDataControl`] and a matching
//! [`EventDataStorage<T>`] together into `Allocate`/`Send`.

use crate::control::{AllocateError, EventDataControl, SendError};
use crate::event_data_storage::EventDataStorage;
use crate::sample_ptr::SampleAllocateePtr;
use std::sync::Arc;

#[derive(Debug)]
pub enum SendValueError {
    Allocate(AllocateError),
    Send(SendError),
}

/// The producer half of one event's binding. Cheap to clone (both
/// fields are `Arc`s) - every `SkeletonEvent<T>` created from the same
/// offer shares one `Producer`.
#[derive(Clone)]
pub struct Producer<T: Copy> {
    storage: Arc<EventDataStorage<T>>,
    control: Arc<EventDataControl>,
}

impl<T: Copy> Producer<T> {
    pub fn new(storage: Arc<EventDataStorage<T>>, control: Arc<EventDataControl>) -> Self {
        Self { storage, control }
    }

    /// `Allocate()`: claims a slot per the allocation
    /// policy and returns an owning handle to it in `in_writing` state.
    pub fn allocate(&self) -> Result<SampleAllocateePtr<T>, AllocateError> {
        let index = self.control.allocate()?;
        Ok(SampleAllocateePtr::new(self.storage.clone(), self.control.clone(), index))
    }

    /// `Send(handle)`: assigns the next monotonic timestamp
    /// and makes the slot visible to consumers. Consumes `handle`.
    pub fn send(&self, mut handle: SampleAllocateePtr<T>) -> Result<(), SendError> {
        self.control.send(handle.slot_index())?;
        handle.mark_sent();
        Ok(())
    }

    /// `Send(value)`: shorthand for `Allocate` + write +
    /// `Send`.
    pub fn send_value(&self, value: T) -> Result<(), SendValueError> {
        let handle = self.allocate().map_err(SendValueError::Allocate)?;
        handle.write(value);
        self.send(handle).map_err(SendValueError::Send)
    }

    /// `StopOfferService` step 2: invalidates every slot control word so
    /// a consumer mid-`GetNewSamples` against the torn-down region fails
    /// cleanly instead of reading stale state.
    pub fn invalidate_all(&self) {
        self.control.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlArray, SafetyPartition};
    use mw_com_cal::shared_memory::SharedMemory;

    fn unique_name(tag: &str) -> String {
        format!("mw_com_skel_{tag}_{:?}", std::thread::current().id())
    }

    #[test]
    fn send_value_makes_the_payload_visible_to_a_reference() {
        let data_name = unique_name("data");
        let ctrl_name = unique_name("ctrl");
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 2).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 2).unwrap()));
        let producer = Producer::new(storage, control.clone());

        producer.send_value(42).unwrap();

        let reference = control.try_reference_newer_than(SafetyPartition::AsilB, 0, 0);
        assert!(reference.is_some());

        let _ = SharedMemory::unlink(&data_name);
        let _ = SharedMemory::unlink(&ctrl_name);
    }

    #[test]
    fn send_of_handle_consumes_it_and_bumps_the_timestamp() {
        let data_name = unique_name("data2");
        let ctrl_name = unique_name("ctrl2");
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 1).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 1).unwrap()));
        let producer = Producer::new(storage, control.clone());

        let handle = producer.allocate().unwrap();
        handle.write(7);
        producer.send(handle).unwrap();

        let reference = control
            .try_reference_newer_than(SafetyPartition::AsilB, 0, 0)
            .unwrap();
        assert!(reference.0 > 0);

        let _ = SharedMemory::unlink(&data_name);
        let _ = SharedMemory::unlink(&ctrl_name);
    }

    #[test]
    fn allocate_failure_surfaces_through_send_value() {
        let data_name = unique_name("data3");
        let ctrl_name = unique_name("ctrl3");
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 1).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 1).unwrap()));
        let producer = Producer::new(storage, control);

        let _first = producer.allocate().unwrap();
        assert!(matches!(producer.send_value(1), Err(SendValueError::Allocate(_))));

        let _ = SharedMemory::unlink(&data_name);
        let _ = SharedMemory::unlink(&ctrl_name);
    }
}
