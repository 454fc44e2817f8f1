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

#[macro_export(local_inner_macros)]
macro_rules! assert_that {
    ($lhs:expr, eq $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval == rval) {
            core::panic!(
                "assertion failed: expr: {} == {};  value: {:?} == {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval
            );
        }
    }};
    ($lhs:expr, ne $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval != rval) {
            core::panic!(
                "assertion failed: expr: {} != {};  value: {:?} != {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval
            );
        }
    }};
    ($lhs:expr, lt $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval < rval) {
            core::panic!("assertion failed: expr: {} < {};  value: {:?} < {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval);
        }
    }};
    ($lhs:expr, le $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval <= rval) {
            core::panic!("assertion failed: expr: {} <= {};  value: {:?} <= {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval);
        }
    }};
    ($lhs:expr, gt $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval > rval) {
            core::panic!("assertion failed: expr: {} > {};  value: {:?} > {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval);
        }
    }};
    ($lhs:expr, ge $rhs:expr) => {{
        let lval = &$lhs;
        let rval = &$rhs;
        if !(lval >= rval) {
            core::panic!("assertion failed: expr: {} >= {};  value: {:?} >= {:?}",
                core::stringify!($lhs), core::stringify!($rhs), lval, rval);
        }
    }};
    ($lhs:expr, is_ok) => {{
        if !$lhs.is_ok() {
            core::panic!("assertion failed: {}.is_ok()", core::stringify!($lhs));
        }
    }};
    ($lhs:expr, is_err) => {{
        if !$lhs.is_err() {
            core::panic!("assertion failed: {}.is_err()", core::stringify!($lhs));
        }
    }};
    ($lhs:expr, is_some) => {{
        if !$lhs.is_some() {
            core::panic!("assertion failed: {}.is_some()", core::stringify!($lhs));
        }
    }};
    ($lhs:expr, is_none) => {{
        if !$lhs.is_none() {
            core::panic!("assertion failed: {}.is_none()", core::stringify!($lhs));
        }
    }};
    ($lhs:expr, len $rhs:expr) => {{
        let lval = $lhs.len();
        if lval != $rhs {
            core::panic!("assertion failed: {}.len() == {};  value: {} == {}",
                core::stringify!($lhs), $rhs, lval, $rhs);
        }
    }};
    ($call:expr, block_until $rhs:expr) => {{
        let watchdog = $crate::watchdog::Watchdog::new();
        while $call() != $rhs {
            std::thread::yield_now();
            std::thread::sleep(core::time::Duration::from_millis(10));
            watchdog.check(core::concat!(
                "waiting for ", core::stringify!($call), " to equal ", core::stringify!($rhs)
            ));
        }
    }};
}
