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

//! Process monitoring via holding an advisory file lock. If the
//! monitored process crashes, the kernel releases the lock and a peer
//! detects it; on a clean shutdown the file itself is removed.
//!
//! - [`ProcessGuard`]: held by the monitored process for as long as it is
//!   alive.
//! - [`ProcessMonitor`]: used by a peer to read the current [`ProcessState`].
//! - [`ProcessCleaner`]: acquired by exactly one peer to reclaim the
//!   stale resources of a dead process; a second peer racing for the
//!   same cleanup observes [`ProcessCleanerCreateError::OwnedByAnotherProcess`].

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessState {
    Alive,
    Dead,
    DoesNotExist,
}

#[derive(Debug)]
pub enum ProcessGuardCreateError {
    AlreadyExists,
    InsufficientPermissions,
    InternalError,
}

#[derive(Debug)]
pub enum ProcessMonitorCreateError {
    InternalError,
}

#[derive(Debug)]
pub enum ProcessMonitorStateError {
    InternalError,
}

#[derive(Debug)]
pub enum ProcessCleanerCreateError {
    ProcessIsStillAlive,
    OwnedByAnotherProcess,
    DoesNotExist,
    InternalError,
}

/// Held by the monitored process. Its existence plus an exclusive
/// `flock` on its path is what makes the process observable as
/// [`ProcessState::Alive`].
#[derive(Debug)]
pub struct ProcessGuard {
    _file: File,
    path: PathBuf,
}

impl ProcessGuard {
    pub fn new(path: &Path) -> Result<Self, ProcessGuardCreateError> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .mode(0o640)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => ProcessGuardCreateError::AlreadyExists,
                io::ErrorKind::PermissionDenied => ProcessGuardCreateError::InsufficientPermissions,
                _ => ProcessGuardCreateError::InternalError,
            })?;

        let locked = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if locked != 0 {
            let _ = std::fs::remove_file(path);
            return Err(ProcessGuardCreateError::InternalError);
        }

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Used by a peer to inspect a monitored process's state without
/// participating in cleanup.
#[derive(Debug)]
pub struct ProcessMonitor {
    path: PathBuf,
}

impl ProcessMonitor {
    pub fn new(path: &Path) -> Result<Self, ProcessMonitorCreateError> {
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn state(&self) -> Result<ProcessState, ProcessMonitorStateError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Ok(ProcessState::DoesNotExist),
        };

        let locked = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if locked == 0 {
            // we just took the lock - the owner is gone. Release immediately,
            // we are only observing, not cleaning up.
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
            Ok(ProcessState::Dead)
        } else {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => Ok(ProcessState::Alive),
                _ => Err(ProcessMonitorStateError::InternalError),
            }
        }
    }
}

/// Acquired by the single peer responsible for reclaiming a dead
/// process's resources. Removes the process-state file when dropped.
#[derive(Debug)]
pub struct ProcessCleaner {
    file: File,
    path: PathBuf,
}

impl ProcessCleaner {
    pub fn new(path: &Path) -> Result<Self, ProcessCleanerCreateError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProcessCleanerCreateError::DoesNotExist,
            _ => ProcessCleanerCreateError::InternalError,
        })?;

        let locked = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if locked != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => ProcessCleanerCreateError::ProcessIsStillAlive,
                _ => ProcessCleanerCreateError::InternalError,
            });
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Gives up cleanup without removing the resource, e.g. because the
    /// caller discovered another peer is already further along.
    pub fn abandon(self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

impl Drop for ProcessCleaner {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_testing::unique_test_base_dir;

    #[test]
    fn alive_guard_is_observed_as_alive() {
        let dir = unique_test_base_dir();
        let path = dir.path().join("app.state");
        let guard = ProcessGuard::new(&path).unwrap();
        let monitor = ProcessMonitor::new(&path).unwrap();
        assert_eq!(monitor.state().unwrap(), ProcessState::Alive);
        drop(guard);
    }

    #[test]
    fn missing_file_is_does_not_exist() {
        let dir = unique_test_base_dir();
        let path = dir.path().join("app.state");
        let monitor = ProcessMonitor::new(&path).unwrap();
        assert_eq!(monitor.state().unwrap(), ProcessState::DoesNotExist);
    }

    #[test]
    fn crashed_process_is_observed_as_dead_and_can_be_cleaned() {
        let dir = unique_test_base_dir();
        let path = dir.path().join("app.state");
        let guard = ProcessGuard::new(&path).unwrap();
        // simulate a crash: drop the underlying file descriptor without
        // running ProcessGuard's Drop (which would remove the file).
        std::mem::forget(guard);

        let monitor = ProcessMonitor::new(&path).unwrap();
        assert_eq!(monitor.state().unwrap(), ProcessState::Dead);

        let cleaner = ProcessCleaner::new(&path).unwrap();
        drop(cleaner);
        assert_eq!(monitor.state().unwrap(), ProcessState::DoesNotExist);
    }

    #[test]
    fn second_cleaner_is_rejected_while_first_holds_it() {
        let dir = unique_test_base_dir();
        let path = dir.path().join("app.state");
        let guard = ProcessGuard::new(&path).unwrap();
        std::mem::forget(guard);

        let first = ProcessCleaner::new(&path).unwrap();
        let second = ProcessCleaner::new(&path);
        assert!(matches!(
            second,
            Err(ProcessCleanerCreateError::OwnedByAnotherProcess)
        ));
        drop(first);
    }
}
