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

//! Bounds how many sample references a single subscription may hold
//! concurrently: an atomic counter that each live
//! [`crate::sample_ptr::SamplePtr`] holds one unit of.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    available: AtomicU32,
}

/// Per-subscription budget of `max_samples` concurrently-held
/// `SamplePtr`s.
#[derive(Debug, Clone)]
pub struct SampleReferenceTracker {
    inner: Arc<Inner>,
}

impl SampleReferenceTracker {
    pub fn new(max_samples: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                available: AtomicU32::new(max_samples as u32),
            }),
        }
    }

    pub fn get_num_available_samples(&self) -> u32 {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Attempts to reserve a single unit; returns a guard that releases
    /// it on drop. Returns `None` if the tracker has no remaining
    /// capacity.
    pub fn try_acquire(&self) -> Option<SampleReferenceGuard> {
        let mut current = self.inner.available.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.inner.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(SampleReferenceGuard {
                        inner: self.inner.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }
}

/// One reserved unit of a [`SampleReferenceTracker`]'s capacity. Releases
/// it back on drop.
#[derive(Debug)]
pub struct SampleReferenceGuard {
    inner: Arc<Inner>,
}

impl Drop for SampleReferenceGuard {
    fn drop(&mut self) {
        self.inner.available.fetch_add(1, Ordering::AcqRel);
    }
}
