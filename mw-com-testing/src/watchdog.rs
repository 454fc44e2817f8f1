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

//! Guards `block_until`-style test polling loops against hanging forever
//! when an invariant under test (e.g. a deadlock-avoidance regression)
//! fails to hold.

use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Watchdog {
    start: Instant,
    timeout: Duration,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn check(&self, reason: &str) {
        if self.start.elapsed() > self.timeout {
            panic!("watchdog timeout after {:?}: {}", self.timeout, reason);
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
