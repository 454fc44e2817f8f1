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

//! One OS-level file per service instance, gated by an advisory
//! `flock(2)` in `{shared, exclusive}` mode. Absence of a lock, or the
//! ability to take it exclusively, signifies "no live peer". Recursion
//! is not permitted - a process must not hold two [`LockFile`] handles
//! on the same path at once.

use mw_com_log::fail;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub enum LockFileCreateError {
    InsufficientPermissions,
    DirectoryDoesNotExist,
    InternalError,
}

#[derive(Debug)]
pub enum LockAcquireError {
    WouldBlock,
    Interrupted,
    InternalError,
}

/// An open file handle with an advisory `flock` currently held on it.
/// Dropping it releases the lock (and, for files this instance created,
/// leaves the file behind for peers to still observe via `does_exist` -
/// removal is a separate, explicit step taken during stop-offer).
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockFile {
    /// Opens (creating if necessary) the file at `path` and blocks until
    /// `mode` can be acquired.
    pub fn create_and_lock(path: &Path, mode: LockMode) -> Result<Self, LockFileCreateError> {
        let origin = "LockFile::create_and_lock()";
        let file = fail!(from origin, when OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(path)
                .map_err(map_open_error),
            with LockFileCreateError::InternalError,
            "Unable to create or open lock file \"{}\".", path.display());

        fail!(from origin, when flock_blocking(&file, mode),
            with LockFileCreateError::InternalError,
            "Unable to acquire {:?} lock on \"{}\".", mode, path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
        })
    }

    /// Attempts to acquire `mode` on `path` without creating it and
    /// without blocking. Used for "no live peer" probes.
    pub fn try_lock_existing(path: &Path, mode: LockMode) -> Result<Self, LockAcquireError> {
        let origin = "LockFile::try_lock_existing()";
        let file = fail!(from origin, when File::open(path).map_err(|_| ()),
            with LockAcquireError::InternalError,
            "Unable to open existing lock file \"{}\".", path.display());

        flock_nonblocking(&file, mode)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
        })
    }

    pub fn does_exist(path: &Path) -> bool {
        path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Removes the underlying file. The lock held by `self` (and any
    /// other open handle) remains valid for processes that opened it
    /// before the unlink - this mirrors POSIX unlink-while-open
    /// semantics and is why liveness probes re-open the path rather than
    /// reusing a cached `File`.
    pub fn remove(self) -> io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

fn map_open_error(e: io::Error) -> io::Error {
    e
}

fn flock_blocking(file: &File, mode: LockMode) -> Result<(), io::Error> {
    let operation = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn flock_nonblocking(file: &File, mode: LockMode) -> Result<(), LockAcquireError> {
    let operation = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    } | libc::LOCK_NB;
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EWOULDBLOCK) => Err(LockAcquireError::WouldBlock),
        Some(libc::EINTR) => Err(LockAcquireError::Interrupted),
        _ => Err(LockAcquireError::InternalError),
    }
}
