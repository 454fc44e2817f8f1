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

//! The binding-agnostic producer-side façade: `SkeletonEvent<T>`,
//! `SkeletonField<T>`, and `SkeletonBase`, which composes them into one
//! `OfferService`/`StopOfferService` sequence.

use crate::error::ComError;
use mw_com_cal::discovery_directory::DiscoveryDirectory;
use mw_com_log::fatal_panic;
use mw_com_lola::sample_ptr::SampleAllocateePtr;
use mw_com_lola::service_instance::OfferedServiceInstance;
use mw_com_lola::skeleton_event::Producer;
use std::sync::{Arc, Mutex};

/// A child element of a [`SkeletonBase`]: one event or field. Every
/// child is consulted during `PrepareOffer`/`PrepareStopOffer`.
pub trait SkeletonChild: Send + Sync {
    fn prepare_offer(&self) -> Result<(), ComError>;
    fn prepare_stop_offer(&self);
    fn is_bound(&self) -> bool;
}

/// The producer side of one event. `T` is bound lazily via
/// [`SkeletonEvent::bind`] so the façade type can be constructed before
/// the concrete binding (shared memory regions, in this family's case)
/// exists.
pub struct SkeletonEvent<T: Copy + Send + Sync + 'static> {
    producer: Mutex<Option<Producer<T>>>,
}

impl<T: Copy + Send + Sync + 'static> Default for SkeletonEvent<T> {
    fn default() -> Self {
        Self { producer: Mutex::new(None) }
    }
}

impl<T: Copy + Send + Sync + 'static> SkeletonEvent<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, producer: Producer<T>) {
        *self.producer.lock().unwrap_or_else(|e| fatal_panic!("skeleton event mutex poisoned: {}", e)) = Some(producer);
    }

    fn producer(&self) -> Result<Producer<T>, ComError> {
        self.producer
            .lock()
            .unwrap_or_else(|e| fatal_panic!("skeleton event mutex poisoned: {}", e))
            .clone()
            .ok_or(ComError::BindingFailure)
    }

    pub fn allocate(&self) -> Result<SampleAllocateePtr<T>, ComError> {
        Ok(self.producer()?.allocate()?)
    }

    pub fn send(&self, handle: SampleAllocateePtr<T>) -> Result<(), ComError> {
        Ok(self.producer()?.send(handle)?)
    }

    pub fn send_value(&self, value: T) -> Result<(), ComError> {
        Ok(self.producer()?.send_value(value)?)
    }
}

impl<T: Copy + Send + Sync + 'static> SkeletonChild for SkeletonEvent<T> {
    fn prepare_offer(&self) -> Result<(), ComError> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(ComError::BindingFailure)
        }
    }

    fn prepare_stop_offer(&self) {
        if let Ok(producer) = self.producer() {
            producer.invalidate_all();
        }
    }

    fn is_bound(&self) -> bool {
        self.producer.lock().unwrap_or_else(|e| fatal_panic!("skeleton event mutex poisoned: {}", e)).is_some()
    }
}

/// A field: an event plus a persistently held current value.
/// `PrepareOffer` fails with [`ComError::FieldValueIsNotValid`],
/// without touching the binding, if no initial value has been set.
pub struct SkeletonField<T: Copy + Send + Sync + 'static> {
    event: SkeletonEvent<T>,
    value: Mutex<Option<T>>,
}

impl<T: Copy + Send + Sync + 'static> Default for SkeletonField<T> {
    fn default() -> Self {
        Self { event: SkeletonEvent::new(), value: Mutex::new(None) }
    }
}

impl<T: Copy + Send + Sync + 'static> SkeletonField<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, producer: Producer<T>) {
        self.event.bind(producer);
    }

    pub fn set(&self, value: T) {
        *self.value.lock().unwrap_or_else(|e| fatal_panic!("skeleton field mutex poisoned: {}", e)) = Some(value);
    }

    pub fn get(&self) -> Option<T> {
        *self.value.lock().unwrap_or_else(|e| fatal_panic!("skeleton field mutex poisoned: {}", e))
    }

    /// Sends the currently held value, the way a setter-triggered field
    /// update reaches subscribers.
    pub fn update(&self) -> Result<(), ComError> {
        let value = self.get().ok_or(ComError::FieldValueIsNotValid)?;
        self.event.send_value(value)
    }
}

impl<T: Copy + Send + Sync + 'static> SkeletonChild for SkeletonField<T> {
    fn prepare_offer(&self) -> Result<(), ComError> {
        if self.get().is_none() {
            return Err(ComError::FieldValueIsNotValid);
        }
        self.event.prepare_offer()
    }

    fn prepare_stop_offer(&self) {
        self.event.prepare_stop_offer();
    }

    fn is_bound(&self) -> bool {
        self.event.is_bound()
    }
}

/// Owns the service's binding handle (the discovery directory and its
/// offer lifetime) and the named table of child events/fields.
/// Re-registering a name that is already taken is fatal, mirroring
/// [`crate::proxy::ProxyBase`]'s invariant.
pub struct SkeletonBase {
    discovery: DiscoveryDirectory,
    instance_specifier: String,
    offer: Mutex<Option<OfferedServiceInstance>>,
    children: Mutex<Vec<(String, Arc<dyn SkeletonChild>)>>,
}

impl SkeletonBase {
    pub fn new(discovery: DiscoveryDirectory, instance_specifier: impl Into<String>) -> Self {
        Self {
            discovery,
            instance_specifier: instance_specifier.into(),
            offer: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn register_child(&self, name: impl Into<String>, child: Arc<dyn SkeletonChild>) {
        let name = name.into();
        let mut children = self.children.lock().unwrap_or_else(|e| fatal_panic!("skeleton children mutex poisoned: {}", e));
        if children.iter().any(|(existing, _)| *existing == name) {
            fatal_panic!("duplicate child registration for element \"{}\"", name);
        }
        children.push((name, child));
    }

    /// `AreBindingsValid()`: the skeleton's own binding is non-null
    /// (there is a discovery directory to offer into) and every
    /// registered child has a non-null binding.
    pub fn are_bindings_valid(&self) -> bool {
        self.children
            .lock()
            .unwrap_or_else(|e| fatal_panic!("skeleton children mutex poisoned: {}", e))
            .iter()
            .all(|(_, child)| child.is_bound())
    }

    pub fn is_offered(&self) -> bool {
        self.offer.lock().unwrap_or_else(|e| fatal_panic!("skeleton offer mutex poisoned: {}", e)).is_some()
    }

    /// `OfferService`. Children are checked before the instance is
    /// published to discovery, so a field with no initial value never
    /// becomes visible to a consumer.
    pub fn offer(&self) -> Result<(), ComError> {
        let mut offer_slot = self.offer.lock().unwrap_or_else(|e| fatal_panic!("skeleton offer mutex poisoned: {}", e));
        if offer_slot.is_some() {
            return Ok(());
        }

        let children = self.children.lock().unwrap_or_else(|e| fatal_panic!("skeleton children mutex poisoned: {}", e));
        for (_, child) in children.iter() {
            child.prepare_offer()?;
        }
        drop(children);

        let offered = OfferedServiceInstance::offer(&self.discovery, &self.instance_specifier)?;
        *offer_slot = Some(offered);
        Ok(())
    }

    /// `StopOfferService`, the mirror of [`SkeletonBase::offer`]. A
    /// no-op if not currently offered.
    pub fn stop_offer(&self) {
        let mut offer_slot = self.offer.lock().unwrap_or_else(|e| fatal_panic!("skeleton offer mutex poisoned: {}", e));
        if offer_slot.is_none() {
            return;
        }

        let children = self.children.lock().unwrap_or_else(|e| fatal_panic!("skeleton children mutex poisoned: {}", e));
        for (_, child) in children.iter() {
            child.prepare_stop_offer();
        }
        drop(children);

        *offer_slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_lola::control::{ControlArray, EventDataControl};
    use mw_com_lola::event_data_storage::EventDataStorage;
    use mw_com_testing::unique_test_base_dir;

    fn unique_name(tag: &str) -> String {
        format!("mw_com_skeleton_facade_{tag}_{:?}", std::thread::current().id())
    }

    fn producer_for(tag: &str) -> (Producer<u32>, String, String) {
        let data_name = unique_name(&format!("{tag}_data"));
        let ctrl_name = unique_name(&format!("{tag}_ctrl"));
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 2).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 2).unwrap()));
        (Producer::new(storage, control), data_name, ctrl_name)
    }

    #[test]
    fn unbound_event_reports_binding_failure() {
        let event: SkeletonEvent<u32> = SkeletonEvent::new();
        assert!(matches!(event.send_value(1), Err(ComError::BindingFailure)));
    }

    #[test]
    fn bound_event_sends_successfully() {
        let (producer, data_name, ctrl_name) = producer_for("bound");
        let event: SkeletonEvent<u32> = SkeletonEvent::new();
        event.bind(producer);
        assert!(event.send_value(7).is_ok());

        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&data_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&ctrl_name);
    }

    #[test]
    fn field_with_no_initial_value_fails_prepare_offer() {
        let field: SkeletonField<u32> = SkeletonField::new();
        assert!(matches!(field.prepare_offer(), Err(ComError::FieldValueIsNotValid)));
    }

    #[test]
    fn field_with_initial_value_and_bound_event_prepares_offer() {
        let (producer, data_name, ctrl_name) = producer_for("field");
        let field: SkeletonField<u32> = SkeletonField::new();
        field.bind(producer);
        field.set(42);
        assert!(field.prepare_offer().is_ok());

        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&data_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&ctrl_name);
    }

    #[test]
    #[should_panic(expected = "duplicate child registration")]
    fn duplicate_child_registration_is_fatal() {
        let base = SkeletonBase::new(
            DiscoveryDirectory::open_or_create(&unique_test_base_dir().path().join("discovery")).unwrap(),
            "abc/Instance1",
        );
        let event: Arc<SkeletonEvent<u32>> = Arc::new(SkeletonEvent::new());
        base.register_child("event1", event.clone());
        base.register_child("event1", event);
    }

    #[test]
    fn offer_fails_when_a_child_is_unbound_and_publishes_nothing() {
        let base_dir = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base_dir.path().join("discovery")).unwrap();
        let base = SkeletonBase::new(discovery.clone(), "abc/Instance2");
        let event: Arc<SkeletonEvent<u32>> = Arc::new(SkeletonEvent::new());
        base.register_child("event1", event);

        assert!(matches!(base.offer(), Err(ComError::BindingFailure)));
        assert!(mw_com_lola::service_instance::find_service(&discovery, "abc/Instance2").is_empty());
    }

    #[test]
    fn offer_then_stop_offer_is_idempotent() {
        let base_dir = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base_dir.path().join("discovery")).unwrap();
        let base = SkeletonBase::new(discovery.clone(), "abc/Instance3");

        assert!(base.offer().is_ok());
        assert!(mw_com_lola::service_instance::find_service(&discovery, "abc/Instance3").len() == 1);

        base.stop_offer();
        base.stop_offer();
        assert!(mw_com_lola::service_instance::find_service(&discovery, "abc/Instance3").is_empty());
    }

    #[test]
    fn stop_offer_invalidates_every_slot_so_stale_reads_fail_cleanly() {
        use mw_com_bb::lock_free::control_word::SlotState;
        use mw_com_lola::control::SafetyPartition;

        let base_dir = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base_dir.path().join("discovery")).unwrap();
        let base = SkeletonBase::new(discovery, "abc/Instance4");

        let (producer, data_name, ctrl_name) = producer_for("invalidate");
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::open(&ctrl_name, 2).unwrap()));
        let event: Arc<SkeletonEvent<u32>> = Arc::new(SkeletonEvent::new());
        event.bind(producer);
        base.register_child("event1", event.clone());

        base.offer().unwrap();
        event.send_value(9).unwrap();
        assert!(matches!(control.state(SafetyPartition::AsilB, 0), Some(SlotState::Ready { .. })));

        base.stop_offer();
        assert_eq!(control.state(SafetyPartition::AsilB, 0), Some(SlotState::Invalid));

        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&data_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&ctrl_name);
    }
}
