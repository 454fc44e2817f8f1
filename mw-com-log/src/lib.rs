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

//! The logging facade for `mw-com`. Five [`LogLevel`]s, a swappable
//! [`Logger`] backend, and the [`fail!`] / [`fatal_panic!`] macros that tie
//! error propagation to logging the way the rest of the crate family
//! expects.

mod fail;
mod log;
pub mod logger;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

/// A pluggable log sink. Exactly one implementation is active per process.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: LogLevel, origin: std::fmt::Arguments, message: std::fmt::Arguments);
}

static ACTIVE_LOGGER: OnceLock<Box<dyn Logger>> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Installs the process-wide logger. First call wins, matching
/// [`crate::fail`]'s "errors are process-global" stance; later calls are
/// ignored rather than panicking, since tests may call this more than once.
pub fn set_logger(logger: impl Logger) {
    let _ = ACTIVE_LOGGER.set(Box::new(logger));
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Trace,
        1 => LogLevel::Debug,
        2 => LogLevel::Info,
        3 => LogLevel::Warn,
        4 => LogLevel::Error,
        _ => LogLevel::Fatal,
    }
}

#[doc(hidden)]
pub fn __internal_print_log_msg(
    level: LogLevel,
    origin: std::fmt::Arguments,
    message: std::fmt::Arguments,
) {
    if level < get_log_level() {
        return;
    }
    ACTIVE_LOGGER
        .get_or_init(|| Box::new(logger::console::ConsoleLogger))
        .log(level, origin, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_level_is_info() {
        assert!(get_log_level() >= LogLevel::Info);
    }
}
