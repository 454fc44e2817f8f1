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

//! The binding-agnostic consumer-side façade: `ProxyEvent<T>`,
//! `ProxyBase`, and `GenericProxy<N>`, the type-erased proxy that
//! exposes events by name with samples delivered as raw byte regions.

use crate::error::ComError;
use mw_com_log::fatal_panic;
use mw_com_lola::proxy_event::Consumer;
use mw_com_lola::sample_ptr::SamplePtr;
use mw_com_lola::subscription::SubscriptionState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A child element of a [`ProxyBase`]: one event.
pub trait ProxyChild: Send + Sync {
    fn is_bound(&self) -> bool;
}

/// The consumer side of one event: `Subscribe`,
/// `Unsubscribe`, `GetNewSamples`, `GetNumNewSamplesAvailable`,
/// `GetFreeSampleCount`, `GetSubscriptionState`, `SetReceiveHandler`,
/// `UnsetReceiveHandler`. Every operation forwards to the bound
/// [`Consumer<T>`] and maps its error type into [`ComError`].
pub struct ProxyEvent<T: Copy + Send + Sync + 'static> {
    consumer: Consumer<T>,
}

impl<T: Copy + Send + Sync + 'static> ProxyEvent<T> {
    pub fn new(consumer: Consumer<T>) -> Self {
        Self { consumer }
    }

    pub fn subscribe(&self, max_samples: u16) -> Result<(), ComError> {
        Ok(self.consumer.subscribe(max_samples)?)
    }

    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }

    pub fn get_subscription_state(&self) -> SubscriptionState {
        self.consumer.get_subscription_state()
    }

    pub fn get_free_sample_count(&self) -> u32 {
        self.consumer.get_free_sample_count()
    }

    pub fn get_num_new_samples_available(&self) -> u32 {
        self.consumer.get_num_new_samples_available()
    }

    pub fn set_receive_handler(&self, handler: impl FnMut() + Send + 'static) {
        self.consumer.set_receive_handler(handler);
    }

    pub fn unset_receive_handler(&self) {
        self.consumer.unset_receive_handler();
    }

    pub fn get_new_samples(&self, callback: impl FnMut(SamplePtr<T>), max: u32) -> Result<u32, ComError> {
        Ok(self.consumer.get_new_samples(callback, max)?)
    }
}

impl<T: Copy + Send + Sync + 'static> ProxyChild for ProxyEvent<T> {
    fn is_bound(&self) -> bool {
        true
    }
}

/// Owns the named table of child event proxies.
/// Re-registering a name that is already taken is fatal, mirroring
/// [`crate::skeleton::SkeletonBase`]'s invariant.
pub struct ProxyBase {
    instance_specifier: String,
    children: Mutex<Vec<(String, Arc<dyn ProxyChild>)>>,
}

impl ProxyBase {
    pub fn new(instance_specifier: impl Into<String>) -> Self {
        Self {
            instance_specifier: instance_specifier.into(),
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn instance_specifier(&self) -> &str {
        &self.instance_specifier
    }

    pub fn register_child(&self, name: impl Into<String>, child: Arc<dyn ProxyChild>) {
        let name = name.into();
        let mut children = self.children.lock().unwrap_or_else(|e| fatal_panic!("proxy children mutex poisoned: {}", e));
        if children.iter().any(|(existing, _)| *existing == name) {
            fatal_panic!("duplicate child registration for element \"{}\"", name);
        }
        children.push((name, child));
    }

    /// `AreBindingsValid()`: every registered child has a
    /// non-null binding.
    pub fn are_bindings_valid(&self) -> bool {
        self.children
            .lock()
            .unwrap_or_else(|e| fatal_panic!("proxy children mutex poisoned: {}", e))
            .iter()
            .all(|(_, child)| child.is_bound())
    }
}

/// A type-erased proxy: events looked up by
/// name, samples delivered as raw `N`-byte regions rather than a typed
/// payload. Used when the concrete element type is not known at
/// compile time (e.g. a generic diagnostic tool).
pub struct GenericProxy<const N: usize> {
    instance_specifier: String,
    events: Mutex<HashMap<String, Consumer<[u8; N]>>>,
}

impl<const N: usize> GenericProxy<N> {
    pub fn new(instance_specifier: impl Into<String>) -> Self {
        Self {
            instance_specifier: instance_specifier.into(),
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn instance_specifier(&self) -> &str {
        &self.instance_specifier
    }

    /// Registers a byte-region consumer under `name`. Fatal on a
    /// duplicate name, matching every other child table in the façade.
    pub fn register_event(&self, name: impl Into<String>, consumer: Consumer<[u8; N]>) {
        let name = name.into();
        let mut events = self.events.lock().unwrap_or_else(|e| fatal_panic!("generic proxy mutex poisoned: {}", e));
        if events.contains_key(&name) {
            fatal_panic!("duplicate child registration for element \"{}\"", name);
        }
        events.insert(name, consumer);
    }

    fn event(&self, name: &str) -> Result<std::sync::MutexGuard<'_, HashMap<String, Consumer<[u8; N]>>>, ComError> {
        let events = self.events.lock().unwrap_or_else(|e| fatal_panic!("generic proxy mutex poisoned: {}", e));
        if events.contains_key(name) {
            Ok(events)
        } else {
            Err(ComError::InvalidHandle)
        }
    }

    pub fn subscribe(&self, name: &str, max_samples: u16) -> Result<(), ComError> {
        let events = self.event(name)?;
        Ok(events[name].subscribe(max_samples)?)
    }

    pub fn unsubscribe(&self, name: &str) -> Result<(), ComError> {
        let events = self.event(name)?;
        events[name].unsubscribe();
        Ok(())
    }

    /// Delivers up to `max` byte-region samples for the named event,
    /// newest first, via `callback`.
    pub fn get_new_samples(&self, name: &str, mut callback: impl FnMut(&[u8]), max: u32) -> Result<u32, ComError> {
        let events = self.event(name)?;
        Ok(events[name].get_new_samples(|sample| callback(sample.get().as_slice()), max)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_lola::control::{ControlArray, EventDataControl, SafetyPartition};
    use mw_com_lola::event_data_storage::EventDataStorage;
    use mw_com_lola::skeleton_event::Producer;
    use mw_com_lola::subscription::Subscription;
    use mw_com_lola::transaction_log::TransactionLog;

    fn unique_name(tag: &str) -> String {
        format!("mw_com_proxy_facade_{tag}_{:?}", std::thread::current().id())
    }

    #[test]
    fn typed_proxy_event_round_trips_through_the_facade() {
        let data_name = unique_name("typed_data");
        let ctrl_name = unique_name("typed_ctrl");
        let log_name = unique_name("typed_log");
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 1).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 1).unwrap()));
        let log = Arc::new(TransactionLog::create(&log_name, 1).unwrap());
        let subscription = Arc::new(Subscription::new(log));
        subscription.subscribe(1).unwrap();
        subscription.mark_subscribed();

        let producer = Producer::new(storage.clone(), control.clone());
        let consumer = mw_com_lola::proxy_event::Consumer::new(storage, control, SafetyPartition::AsilB, subscription);
        let proxy_event = ProxyEvent::new(consumer);

        producer.send_value(99).unwrap();
        let mut observed = None;
        proxy_event.get_new_samples(|sample| observed = Some(sample.get()), 1).unwrap();
        assert_eq!(observed, Some(99));

        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&data_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&ctrl_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&log_name);
    }

    #[test]
    #[should_panic(expected = "duplicate child registration")]
    fn duplicate_proxy_child_registration_is_fatal() {
        let base = ProxyBase::new("abc/Instance1");
        let data_name = unique_name("dup_data");
        let ctrl_name = unique_name("dup_ctrl");
        let log_name = unique_name("dup_log");
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, 1).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, 1).unwrap()));
        let log = Arc::new(TransactionLog::create(&log_name, 1).unwrap());
        let subscription = Arc::new(Subscription::new(log));
        let consumer = mw_com_lola::proxy_event::Consumer::new(storage, control, SafetyPartition::AsilB, subscription);
        let event: Arc<ProxyEvent<u32>> = Arc::new(ProxyEvent::new(consumer));

        base.register_child("event1", event.clone());
        base.register_child("event1", event);

        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&data_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&ctrl_name);
        let _ = mw_com_cal::shared_memory::SharedMemory::unlink(&log_name);
    }

    #[test]
    fn generic_proxy_reports_invalid_handle_for_an_unknown_event_name() {
        let proxy: GenericProxy<8> = GenericProxy::new("abc/Instance2");
        assert!(matches!(proxy.subscribe("unknown", 1), Err(ComError::InvalidHandle)));
    }
}
