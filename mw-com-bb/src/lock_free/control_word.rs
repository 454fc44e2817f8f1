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

//! The 64-bit control word governing one slot's lifecycle:
//! `{refcount: u14, timestamp: u48, invalid: 1 bit, in_writing: 1 bit}`,
//! mutated only through single-word CAS. All transitions in this
//! state-machine table are exposed as one method each so callers never
//! hand-roll the bit layout.

use std::sync::atomic::{AtomicU64, Ordering};

pub const MAX_REFCOUNT: u16 = (1 << 14) - 1;
const REFCOUNT_BITS: u32 = 14;
const TIMESTAMP_BITS: u32 = 48;
const REFCOUNT_MASK: u64 = (1 << REFCOUNT_BITS) - 1;
const TIMESTAMP_MASK: u64 = ((1u64 << TIMESTAMP_BITS) - 1) << REFCOUNT_BITS;
const IN_WRITING_BIT: u64 = 1 << (REFCOUNT_BITS + TIMESTAMP_BITS);
const INVALID_BIT: u64 = 1 << (REFCOUNT_BITS + TIMESTAMP_BITS + 1);

/// 48-bit monotonic timestamp. `0` is reserved for "never written".
pub type Timestamp = u64;
pub const NEVER_WRITTEN: Timestamp = 0;
pub const MAX_TIMESTAMP: Timestamp = (1 << TIMESTAMP_BITS) - 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SlotState {
    Invalid,
    Unused,
    InWriting,
    Ready { timestamp: Timestamp, refcount: u16 },
}

fn decode(raw: u64) -> SlotState {
    if raw & INVALID_BIT != 0 {
        return SlotState::Invalid;
    }
    if raw & IN_WRITING_BIT != 0 {
        return SlotState::InWriting;
    }
    let timestamp = (raw & TIMESTAMP_MASK) >> REFCOUNT_BITS;
    let refcount = (raw & REFCOUNT_MASK) as u16;
    if timestamp == NEVER_WRITTEN && refcount == 0 {
        SlotState::Unused
    } else {
        SlotState::Ready {
            timestamp,
            refcount,
        }
    }
}

fn encode_ready(timestamp: Timestamp, refcount: u16) -> u64 {
    debug_assert!(timestamp <= MAX_TIMESTAMP);
    debug_assert!(refcount as u64 <= REFCOUNT_MASK);
    (timestamp << REFCOUNT_BITS) | refcount as u64
}

/// The control word for a single data slot. Lives in shared memory as a
/// plain `AtomicU64`; every mutation below is a single CAS, matching the
/// "Exactly one writer may transition a slot into `in_writing`" and
/// "consistent `(timestamp, payload)` pair" invariants.
#[repr(transparent)]
#[derive(Debug)]
pub struct ControlWord(AtomicU64);

impl ControlWord {
    pub const fn new_unused() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn state(&self) -> SlotState {
        decode(self.0.load(Ordering::Acquire))
    }

    /// `Unused / Ready(_, 0) -> InWriting` (producer `Allocate`).
    /// Returns `true` on success; on failure the slot was not
    /// eligible (already referenced, already being written, or invalid).
    pub fn try_allocate(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match decode(current) {
                SlotState::Unused | SlotState::Ready { refcount: 0, .. } => {
                    match self.0.compare_exchange_weak(
                        current,
                        IN_WRITING_BIT,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return true,
                        Err(observed) => current = observed,
                    }
                }
                _ => return false,
            }
        }
    }

    /// `InWriting -> Ready(timestamp, 0)` (producer `Send`).
    /// Returns `false` if the slot was not in `InWriting` (a contract
    /// violation the caller should treat as fatal).
    pub fn send(&self, timestamp: Timestamp) -> bool {
        self.0
            .compare_exchange(
                IN_WRITING_BIT,
                encode_ready(timestamp, 0),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `InWriting -> Unused` (producer drops the allocatee handle without
    /// calling `Send`).
    pub fn abandon_writing(&self) -> bool {
        self.0
            .compare_exchange(IN_WRITING_BIT, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Ready(T, k) -> Ready(T, k+1)` iff `k < MAX_REFCOUNT` (consumer
    /// reference). Returns the observed `(timestamp,
    /// refcount)` on success so the caller can apply its selection
    /// predicate (`timestamp > last_seen_timestamp`, `invalid == 0`)
    /// atomically with the increment.
    pub fn try_reference_if<F>(&self, predicate: F) -> Option<(Timestamp, u16)>
    where
        F: Fn(Timestamp) -> bool,
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match decode(current) {
                SlotState::Ready {
                    timestamp,
                    refcount,
                } if predicate(timestamp) && refcount < MAX_REFCOUNT => {
                    let new = encode_ready(timestamp, refcount + 1);
                    match self.0.compare_exchange_weak(
                        current,
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Some((timestamp, refcount + 1)),
                        Err(observed) => current = observed,
                    }
                }
                _ => return None,
            }
        }
    }

    /// `Ready(T, k>=1) -> Ready(T, k-1)` (consumer release).
    /// Panics (contract violation) if the refcount was already
    /// zero, matching the invariant `refcount_i(t) == Σ active
    /// SamplePtrs`.
    pub fn release(&self) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match decode(current) {
                SlotState::Ready {
                    timestamp,
                    refcount,
                } if refcount >= 1 => {
                    let new = encode_ready(timestamp, refcount - 1);
                    match self.0.compare_exchange_weak(
                        current,
                        new,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(observed) => current = observed,
                    }
                }
                other => {
                    mw_com_log::fatal_panic!(
                        "attempted to release a control word reference in state {:?} with refcount 0",
                        other
                    );
                }
            }
        }
    }

    /// `any -> Invalid` (storage teardown).
    pub fn invalidate(&self) {
        self.0.store(INVALID_BIT, Ordering::Release);
    }

    /// Forces an arbitrary `Ready` state. Used by crash-recovery replay
    /// and by tests seeding a pre-existing reference.
    pub fn force_ready(&self, timestamp: Timestamp, refcount: u16) {
        self.0
            .store(encode_ready(timestamp, refcount), Ordering::Release);
    }
}

impl Default for ControlWord {
    fn default() -> Self {
        Self::new_unused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unused() {
        let cw = ControlWord::new_unused();
        assert_eq!(cw.state(), SlotState::Unused);
    }

    #[test]
    fn allocate_send_round_trip() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert_eq!(cw.state(), SlotState::InWriting);
        // a second allocate must fail: only one writer at a time
        assert!(!cw.try_allocate());
        assert!(cw.send(42));
        assert_eq!(
            cw.state(),
            SlotState::Ready {
                timestamp: 42,
                refcount: 0
            }
        );
    }

    #[test]
    fn abandon_returns_to_unused() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert!(cw.abandon_writing());
        assert_eq!(cw.state(), SlotState::Unused);
    }

    #[test]
    fn reference_then_release_preserves_timestamp() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert!(cw.send(7));
        let result = cw.try_reference_if(|ts| ts > 0);
        assert_eq!(result, Some((7, 1)));
        assert_eq!(
            cw.state(),
            SlotState::Ready {
                timestamp: 7,
                refcount: 1
            }
        );
        cw.release();
        assert_eq!(
            cw.state(),
            SlotState::Ready {
                timestamp: 7,
                refcount: 0
            }
        );
    }

    #[test]
    fn reference_respects_predicate() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert!(cw.send(7));
        // predicate says "only newer than 7" - must reject
        assert_eq!(cw.try_reference_if(|ts| ts > 7), None);
    }

    #[test]
    fn cannot_allocate_a_referenced_slot() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert!(cw.send(1));
        assert!(cw.try_reference_if(|_| true).is_some());
        assert!(!cw.try_allocate());
    }

    #[test]
    fn invalidate_is_terminal() {
        let cw = ControlWord::new_unused();
        cw.invalidate();
        assert_eq!(cw.state(), SlotState::Invalid);
        assert!(!cw.try_allocate());
    }

    #[test]
    #[should_panic]
    fn releasing_a_zero_refcount_is_fatal() {
        let cw = ControlWord::new_unused();
        assert!(cw.try_allocate());
        assert!(cw.send(1));
        cw.release();
    }
}
