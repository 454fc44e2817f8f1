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

//! A flag with a single logical owner, used for the façade's "offered"
//! state and the data plane's one-way `qm_disconnect` latch.
//! Modeled on `score::mw::com::impl::FlagOwner`: moving a `FlagOwner`
//! clears the moved-from instance so only the new owner observes it set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A thread-safe, one-way-settable flag. Cloning shares the same
/// underlying flag (used when the data plane and the façade both need to
/// observe `qm_disconnect`/"offered" without coordinating ownership).
#[derive(Debug, Clone)]
pub struct FlagOwner {
    flag: Arc<AtomicBool>,
}

impl FlagOwner {
    pub fn new(initial_value: bool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(initial_value)),
        }
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for FlagOwner {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_cleared_by_default() {
        let flag = FlagOwner::default();
        assert!(!flag.is_set());
    }

    #[test]
    fn set_and_clear_round_trip() {
        let flag = FlagOwner::new(false);
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn clone_shares_the_same_flag() {
        let flag = FlagOwner::new(false);
        let shared = flag.clone();
        flag.set();
        assert!(shared.is_set());
    }
}
