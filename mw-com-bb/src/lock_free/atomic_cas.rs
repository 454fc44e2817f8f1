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

//! A thin, injectable "atomic compare-exchange on u32" abstraction.
//! [`PlatformAtomicU32Cas`] is the default, backed by the real
//! `AtomicU32` intrinsic; the registry test suite swaps in
//! [`ForcedFailureCas`] to verify the bounded-retry
//! behavior of `RegisterPid` without relying on genuine contention.

use std::sync::atomic::{AtomicU32, Ordering};

/// Routable compare-exchange operation on a `u32` control word.
pub trait AtomicU32Cas {
    fn compare_exchange(&self, cell: &AtomicU32, current: u32, new: u32) -> Result<u32, u32>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformAtomicU32Cas;

impl AtomicU32Cas for PlatformAtomicU32Cas {
    fn compare_exchange(&self, cell: &AtomicU32, current: u32, new: u32) -> Result<u32, u32> {
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// Test double that fails the first `failures_remaining` compare-exchange
/// attempts unconditionally, regardless of whether the underlying CAS
/// would otherwise have succeeded, so bounded-retry logic can be exercised
/// deterministically.
#[derive(Debug)]
pub struct ForcedFailureCas {
    failures_remaining: std::sync::atomic::AtomicU32,
}

impl ForcedFailureCas {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_remaining: std::sync::atomic::AtomicU32::new(failures),
        }
    }
}

impl AtomicU32Cas for ForcedFailureCas {
    fn compare_exchange(&self, cell: &AtomicU32, current: u32, new: u32) -> Result<u32, u32> {
        if self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .is_ok()
        {
            return Err(cell.load(Ordering::Acquire));
        }
        cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}
