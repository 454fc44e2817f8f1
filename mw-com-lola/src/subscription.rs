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

//! Per-proxy, per-event subscription state. The locking discipline here
//! is a deliberately tested property: `Unsubscribe` must not hold the
//! subscription mutex while waiting on the receive-handler write-lock,
//! and `GetSubscriptionState` must never acquire any other lock while
//! holding the subscription mutex. Concretely, every method below takes
//! the subscription mutex only for the duration of reading or writing
//! `state`, and drops it before doing anything that can block.

use crate::reference_tracker::SampleReferenceTracker;
use crate::transaction_log::TransactionLog;
use mw_com_log::fatal_panic;
use mw_com_testing::watchdog::Watchdog;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SubscriptionState {
    NotSubscribed,
    SubscriptionPending,
    Subscribed,
}

#[derive(Debug)]
pub enum SubscribeError {
    /// `Subscribe` is only valid from `NotSubscribed`.
    AlreadySubscribed,
}

type ReceiveHandlerFn = Box<dyn FnMut() + Send>;

/// Per-proxy-event subscription: state machine, sample budget, and the
/// receive-handler registration that `GetNewSamples` drives when new
/// data arrives.
pub struct Subscription {
    state: Mutex<SubscriptionState>,
    max_samples: Mutex<u16>,
    tracker: Mutex<SampleReferenceTracker>,
    transaction_log: Arc<TransactionLog>,
    receive_handler: Mutex<Option<ReceiveHandlerFn>>,
    handler_unset_during_call: AtomicBool,
    live_sample_count: AtomicUsize,
}

impl Subscription {
    pub fn new(transaction_log: Arc<TransactionLog>) -> Self {
        Self {
            state: Mutex::new(SubscriptionState::NotSubscribed),
            max_samples: Mutex::new(0),
            tracker: Mutex::new(SampleReferenceTracker::new(0)),
            transaction_log,
            receive_handler: Mutex::new(None),
            handler_unset_during_call: AtomicBool::new(false),
            live_sample_count: AtomicUsize::new(0),
        }
    }

    pub fn transaction_log(&self) -> &Arc<TransactionLog> {
        &self.transaction_log
    }

    /// The tracker backing the current (or most recent) subscription.
    /// Cheap to call: [`SampleReferenceTracker`] is itself
    /// `Arc`-backed, so this returns a clone sharing the same counter.
    pub fn tracker(&self) -> SampleReferenceTracker {
        self.tracker
            .lock()
            .unwrap_or_else(|e| fatal_panic!("tracker lock poisoned: {}", e))
            .clone()
    }

    /// `GetSubscriptionState`: observation only, no other
    /// lock may be held while this runs, so it is always safe to call
    /// from inside a receive handler.
    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap_or_else(|e| fatal_panic!("subscription mutex poisoned: {}", e))
    }

    /// `Subscribe(max_samples)`: only valid from `NotSubscribed`. Enters
    /// `SubscriptionPending`; callers transition to `Subscribed` via
    /// [`Subscription::mark_subscribed`] once discovery confirms an
    /// offerer.
    pub fn subscribe(&self, max_samples: u16) -> Result<SampleReferenceTracker, SubscribeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| fatal_panic!("subscription mutex poisoned: {}", e));
        if *state != SubscriptionState::NotSubscribed {
            return Err(SubscribeError::AlreadySubscribed);
        }
        *state = SubscriptionState::SubscriptionPending;

        let new_tracker = SampleReferenceTracker::new(max_samples);
        *self.max_samples.lock().unwrap_or_else(|e| fatal_panic!("max_samples lock poisoned: {}", e)) = max_samples;
        *self.tracker.lock().unwrap_or_else(|e| fatal_panic!("tracker lock poisoned: {}", e)) = new_tracker.clone();

        Ok(new_tracker)
    }

    pub fn mark_subscribed(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| fatal_panic!("subscription mutex poisoned: {}", e));
        if *state == SubscriptionState::SubscriptionPending {
            *state = SubscriptionState::Subscribed;
        }
    }

    /// `Unsubscribe`: valid from any state; enters `NotSubscribed`
    /// immediately, then waits (bounded) for all outstanding
    /// `SamplePtr`s to drop. The subscription mutex is released before
    /// this wait starts, so a concurrently-running receive handler that
    /// calls `GetSubscriptionState` never deadlocks against it. Safe to
    /// call reentrantly from inside the currently-running receive
    /// handler: clearing the handler here never
    /// blocks on `invoke_receive_handler`'s own lock, since that method
    /// releases the lock before calling the handler.
    pub fn unsubscribe(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| fatal_panic!("subscription mutex poisoned: {}", e));
            *state = SubscriptionState::NotSubscribed;
        }

        self.clear_receive_handler();

        let watchdog = Watchdog::default();
        while self.live_sample_count.load(Ordering::Acquire) > 0 {
            watchdog.check("waiting for outstanding SamplePtrs to drop during Unsubscribe");
            std::thread::yield_now();
        }
    }

    pub fn set_receive_handler(&self, handler: impl FnMut() + Send + 'static) {
        let mut slot = self.receive_handler.lock().unwrap_or_else(|e| fatal_panic!("receive handler lock poisoned: {}", e));
        *slot = Some(Box::new(handler));
    }

    /// `UnsetReceiveHandler`. Safe to call from inside the handler's own
    /// execution: marks the in-flight call (if any) so it is not
    /// restored once it returns.
    pub fn unset_receive_handler(&self) {
        self.clear_receive_handler();
    }

    fn clear_receive_handler(&self) {
        let mut slot = self.receive_handler.lock().unwrap_or_else(|e| fatal_panic!("receive handler lock poisoned: {}", e));
        *slot = None;
        self.handler_unset_during_call.store(true, Ordering::Release);
    }

    /// Invokes the currently-registered receive handler, if any. The
    /// handler closure is removed from its slot before being called and
    /// the lock is dropped, so `Unsubscribe`/`UnsetReceiveHandler` called
    /// reentrantly from inside the handler never contend for a lock this
    /// method still holds. The
    /// handler is restored afterward unless it unregistered itself
    /// during the call.
    pub fn invoke_receive_handler(&self) {
        let taken = {
            let mut slot = self.receive_handler.lock().unwrap_or_else(|e| fatal_panic!("receive handler lock poisoned: {}", e));
            slot.take()
        };
        let Some(mut handler) = taken else {
            return;
        };

        self.handler_unset_during_call.store(false, Ordering::Release);
        handler();

        if !self.handler_unset_during_call.swap(false, Ordering::AcqRel) {
            let mut slot = self.receive_handler.lock().unwrap_or_else(|e| fatal_panic!("receive handler lock poisoned: {}", e));
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
    }

    pub(crate) fn note_sample_acquired(&self) {
        self.live_sample_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_sample_released(&self) {
        self.live_sample_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn max_samples(&self) -> u16 {
        *self.max_samples.lock().unwrap_or_else(|e| fatal_panic!("max_samples lock poisoned: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_cal::shared_memory::SharedMemory;

    fn unique_name(tag: &str) -> String {
        format!("mw_com_sub_{tag}_{:?}", std::thread::current().id())
    }

    #[test]
    fn subscribe_from_not_subscribed_enters_pending() {
        let name = unique_name("log");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Subscription::new(log);
        assert_eq!(subscription.state(), SubscriptionState::NotSubscribed);
        subscription.subscribe(1).unwrap();
        assert_eq!(subscription.state(), SubscriptionState::SubscriptionPending);
        let _ = SharedMemory::unlink(&name);
    }

    #[test]
    fn subscribe_twice_is_a_contract_violation() {
        let name = unique_name("log2");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Subscription::new(log);
        subscription.subscribe(1).unwrap();
        subscription.mark_subscribed();
        assert!(matches!(subscription.subscribe(1), Err(SubscribeError::AlreadySubscribed)));
        let _ = SharedMemory::unlink(&name);
    }

    #[test]
    fn unsubscribe_on_not_subscribed_is_a_no_op() {
        let name = unique_name("log3");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Subscription::new(log);
        subscription.unsubscribe();
        assert_eq!(subscription.state(), SubscriptionState::NotSubscribed);
        let _ = SharedMemory::unlink(&name);
    }

    #[test]
    fn receive_handler_can_call_get_subscription_state_without_deadlock() {
        let name = unique_name("log4");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Arc::new(Subscription::new(log));
        subscription.subscribe(1).unwrap();
        subscription.mark_subscribed();

        let observed = Arc::new(Mutex::new(None));
        let observed_clone = observed.clone();
        let sub_clone = subscription.clone();
        subscription.set_receive_handler(move || {
            *observed_clone.lock().unwrap() = Some(sub_clone.state());
        });

        subscription.invoke_receive_handler();
        assert_eq!(*observed.lock().unwrap(), Some(SubscriptionState::Subscribed));
        let _ = SharedMemory::unlink(&name);
    }

    #[test]
    fn handler_calling_unsubscribe_on_itself_does_not_deadlock() {
        let name = unique_name("log5");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Arc::new(Subscription::new(log));
        subscription.subscribe(1).unwrap();
        subscription.mark_subscribed();

        let sub_clone = subscription.clone();
        subscription.set_receive_handler(move || {
            let _ = sub_clone.state();
            let _ = sub_clone.tracker().get_num_available_samples();
            sub_clone.unset_receive_handler();
            sub_clone.unsubscribe();
        });

        subscription.invoke_receive_handler();
        assert_eq!(subscription.state(), SubscriptionState::NotSubscribed);
        let _ = SharedMemory::unlink(&name);
    }

    #[test]
    fn unset_immediately_after_set_never_delivers_to_the_handler() {
        let name = unique_name("log6");
        let log = Arc::new(TransactionLog::create(&name, 4).unwrap());
        let subscription = Subscription::new(log);
        subscription.subscribe(1).unwrap();
        subscription.mark_subscribed();

        let called = Arc::new(Mutex::new(false));
        let called_clone = called.clone();
        subscription.set_receive_handler(move || {
            *called_clone.lock().unwrap() = true;
        });
        subscription.unset_receive_handler();

        subscription.invoke_receive_handler();
        assert!(!*called.lock().unwrap());
        let _ = SharedMemory::unlink(&name);
    }
}
