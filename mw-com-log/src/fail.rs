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

//! Combines error handling with logging: every transient/platform error
//! is logged at `debug` as it is converted into a `Result::Err`.

#[macro_export(local_inner_macros)]
macro_rules! fail {
    (from $origin:expr, with $error_value:expr, $($message:expr),*) => {
        {
            debug!(from $origin, $($message),*);
            return Err($error_value);
        }
    };
    (from $origin:expr, when $call:expr, with $error_value:expr, $($message:expr),*) => {
        {
            let result = $call;
            match result {
                Err(_) => {
                    debug!(from $origin, $($message),*);
                    return Err($error_value);
                }
                Ok(v) => v,
            }
        }
    };
    (from $origin:expr, when $call:expr, $($message:expr),*) => {
        {
            let result = $call;
            match result {
                Err(e) => {
                    debug!(from $origin, $($message),*);
                    return Err(e.into());
                }
                Ok(v) => v,
            }
        }
    };
}
