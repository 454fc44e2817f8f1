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

//! Consumer-side binding for one event: ties a [`Subscription`] to the event's
//! [`EventDataControl`]/[`EventDataStorage<T>`] pair and implements
//! `GetNewSamples`'s newest-first scan.

use crate::control::{EventDataControl, SafetyPartition};
use crate::event_data_storage::EventDataStorage;
use crate::sample_ptr::SamplePtr;
use crate::subscription::{SubscribeError, Subscription, SubscriptionState};
use crate::transaction_log::Delta;
use mw_com_bb::lock_free::control_word::{SlotState, Timestamp, NEVER_WRITTEN};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub enum GetNewSamplesError {
    NotSubscribed,
}

/// The consumer half of one event's binding, for one proxy instance.
/// Owns the `last_seen_timestamp` watermark that makes `GetNewSamples`
/// resumable across calls.
pub struct Consumer<T: Copy> {
    storage: Arc<EventDataStorage<T>>,
    control: Arc<EventDataControl>,
    partition: SafetyPartition,
    subscription: Arc<Subscription>,
    last_seen_timestamp: AtomicU64,
}

impl<T: Copy> Consumer<T> {
    pub fn new(
        storage: Arc<EventDataStorage<T>>,
        control: Arc<EventDataControl>,
        partition: SafetyPartition,
        subscription: Arc<Subscription>,
    ) -> Self {
        Self {
            storage,
            control,
            partition,
            subscription,
            last_seen_timestamp: AtomicU64::new(NEVER_WRITTEN),
        }
    }

    pub fn subscribe(&self, max_samples: u16) -> Result<(), SubscribeError> {
        self.subscription.subscribe(max_samples)?;
        Ok(())
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }

    pub fn get_subscription_state(&self) -> SubscriptionState {
        self.subscription.state()
    }

    pub fn get_free_sample_count(&self) -> u32 {
        self.subscription.tracker().get_num_available_samples()
    }

    /// `GetNumNewSamplesAvailable()`: count of `Ready` slots
    /// strictly newer than the current watermark.
    pub fn get_num_new_samples_available(&self) -> u32 {
        let last_seen = self.last_seen_timestamp.load(Ordering::Acquire);
        (0..self.control.slot_count())
            .filter(|&i| matches!(self.control.state(self.partition, i), Some(SlotState::Ready { timestamp, .. }) if timestamp > last_seen))
            .count() as u32
    }

    pub fn set_receive_handler(&self, handler: impl FnMut() + Send + 'static) {
        self.subscription.set_receive_handler(handler);
    }

    pub fn unset_receive_handler(&self) {
        self.subscription.unset_receive_handler();
    }

    /// `GetNewSamples(callback, max)`: delivers up to `max`
    /// samples newest-to-oldest, advances `last_seen_timestamp` to the
    /// newest timestamp *observed* this call (whether or not it was
    /// delivered), and stops early once the subscription's
    /// `SampleReferenceTracker` runs out of capacity.
    pub fn get_new_samples(&self, mut callback: impl FnMut(SamplePtr<T>), max: u32) -> Result<u32, GetNewSamplesError> {
        if self.subscription.state() != SubscriptionState::Subscribed {
            return Err(GetNewSamplesError::NotSubscribed);
        }
        if max == 0 {
            return Ok(0);
        }

        let last_seen = self.last_seen_timestamp.load(Ordering::Acquire);
        let mut candidates: Vec<(Timestamp, usize)> = (0..self.control.slot_count())
            .filter_map(|i| match self.control.state(self.partition, i) {
                Some(SlotState::Ready { timestamp, .. }) if timestamp > last_seen => Some((timestamp, i)),
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let newest_observed = candidates.first().map(|&(ts, _)| ts).unwrap_or(last_seen);

        let mut delivered = 0u32;
        for (_, index) in candidates {
            if delivered >= max {
                break;
            }
            let Some(guard) = self.subscription.tracker().try_acquire() else {
                break;
            };
            if self.control.try_reference_newer_than(self.partition, index, last_seen).is_none() {
                continue;
            }

            let tx_handle = self
                .subscription
                .transaction_log()
                .record_intent(index as u32, Delta::Increment)
                .ok();

            let sample = SamplePtr::with_subscription(
                self.storage.clone(),
                self.control.clone(),
                self.partition,
                index,
                guard,
                tx_handle,
                Some(self.subscription.clone()),
            );
            callback(sample);
            delivered += 1;
        }

        self.last_seen_timestamp.store(newest_observed, Ordering::Release);
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlArray;
    use crate::skeleton_event::Producer;
    use crate::transaction_log::TransactionLog;
    use mw_com_cal::shared_memory::SharedMemory;

    fn unique_name(tag: &str) -> String {
        format!("mw_com_proxy_{tag}_{:?}", std::thread::current().id())
    }

    fn build(tag: &str, slots: usize) -> (Producer<u32>, Consumer<u32>, String, String, String) {
        let data_name = unique_name(&format!("{tag}_data"));
        let ctrl_name = unique_name(&format!("{tag}_ctrl"));
        let log_name = unique_name(&format!("{tag}_log"));
        let storage = Arc::new(EventDataStorage::<u32>::create(&data_name, slots).unwrap());
        let control = Arc::new(EventDataControl::new_qm_only(ControlArray::create(&ctrl_name, slots).unwrap()));
        let log = Arc::new(TransactionLog::create(&log_name, slots).unwrap());
        let subscription = Arc::new(Subscription::new(log));
        subscription.subscribe(slots as u16).unwrap();
        subscription.mark_subscribed();

        let producer = Producer::new(storage.clone(), control.clone());
        let consumer = Consumer::new(storage, control, SafetyPartition::AsilB, subscription);
        (producer, consumer, data_name, ctrl_name, log_name)
    }

    fn cleanup(data_name: &str, ctrl_name: &str, log_name: &str) {
        let _ = SharedMemory::unlink(data_name);
        let _ = SharedMemory::unlink(ctrl_name);
        let _ = SharedMemory::unlink(log_name);
    }

    #[test]
    fn single_event_round_trip_delivers_the_sent_payload() {
        let (producer, consumer, data_name, ctrl_name, log_name) = build("roundtrip", 1);

        producer.send_value(42).unwrap();

        let mut observed = None;
        let delivered = consumer
            .get_new_samples(
                |sample| {
                    observed = Some(sample.get());
                },
                1,
            )
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(observed, Some(42));
        assert_eq!(consumer.get_num_new_samples_available(), 0);

        cleanup(&data_name, &ctrl_name, &log_name);
    }

    #[test]
    fn get_new_samples_with_max_zero_invokes_nothing() {
        let (producer, consumer, data_name, ctrl_name, log_name) = build("maxzero", 1);
        producer.send_value(1).unwrap();

        let mut calls = 0;
        let delivered = consumer.get_new_samples(|_| calls += 1, 0).unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(calls, 0);

        cleanup(&data_name, &ctrl_name, &log_name);
    }

    #[test]
    fn samples_are_delivered_newest_first() {
        let (producer, consumer, data_name, ctrl_name, log_name) = build("ordering", 3);
        producer.send_value(1).unwrap();
        producer.send_value(2).unwrap();
        producer.send_value(3).unwrap();

        let mut observed = Vec::new();
        consumer.get_new_samples(|sample| observed.push(sample.get()), 3).unwrap();

        assert_eq!(observed, vec![3, 2, 1]);
        cleanup(&data_name, &ctrl_name, &log_name);
    }

    #[test]
    fn not_subscribed_consumer_reports_an_error() {
        let (producer, consumer, data_name, ctrl_name, log_name) = build("unsub", 1);
        producer.send_value(1).unwrap();
        consumer.unsubscribe();

        assert!(matches!(
            consumer.get_new_samples(|_| {}, 1),
            Err(GetNewSamplesError::NotSubscribed)
        ));

        cleanup(&data_name, &ctrl_name, &log_name);
    }
}
