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

//! A POSIX shared-memory region: one process creates it with a fixed
//! size, others open it. The size is fixed at creation time - there is
//! no resizing.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

#[derive(Debug)]
pub enum SharedMemoryCreateError {
    AlreadyExists,
    InsufficientPermissions,
    InternalError,
}

#[derive(Debug)]
pub enum SharedMemoryOpenError {
    DoesNotExist,
    InternalError,
}

/// An owned mapping of a POSIX shared-memory object. The mapping is
/// unmapped and the file descriptor closed on drop; the underlying
/// `/dev/shm` object is only unlinked by [`SharedMemory::unlink`], since
/// other processes may still hold mappings.
#[derive(Debug)]
pub struct SharedMemory {
    name: String,
    fd: RawFd,
    base: NonNull<u8>,
    size: usize,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Creates a new shared-memory object of exactly `size` bytes.
    /// Fails with [`SharedMemoryCreateError::AlreadyExists`] if the name
    /// is already taken - first-creator-wins.
    pub fn create(name: &str, size: usize) -> Result<Self, SharedMemoryCreateError> {
        let origin = "SharedMemory::create()";
        let c_name = shm_c_name(name);

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o640,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EEXIST) => SharedMemoryCreateError::AlreadyExists,
                Some(libc::EACCES) => SharedMemoryCreateError::InsufficientPermissions,
                _ => SharedMemoryCreateError::InternalError,
            });
        }

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(SharedMemoryCreateError::InternalError);
        }

        let base = match map(fd, size) {
            Ok(base) => base,
            Err(_) => {
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(SharedMemoryCreateError::InternalError);
            }
        };

        mw_com_log::debug!(from origin, "Created shared memory \"{}\" with {} bytes.", name, size);

        Ok(Self {
            name: name.to_string(),
            fd,
            base,
            size,
        })
    }

    /// Opens an existing shared-memory object. `size` must match the
    /// region's actual size (callers read it from the region's header
    /// after a first, smaller mapping, or already know it from
    /// discovery metadata).
    pub fn open(name: &str, size: usize) -> Result<Self, SharedMemoryOpenError> {
        let c_name = shm_c_name(name);

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOENT) => SharedMemoryOpenError::DoesNotExist,
                _ => SharedMemoryOpenError::InternalError,
            });
        }

        let base = map(fd, size).map_err(|_| {
            unsafe {
                libc::close(fd);
            }
            SharedMemoryOpenError::InternalError
        })?;

        Ok(Self {
            name: name.to_string(),
            fd,
            base,
            size,
        })
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the name from `/dev/shm` so no new opener can find it.
    /// Existing mappings (including `self`'s) remain valid until
    /// unmapped, matching POSIX unlink-while-mapped semantics.
    pub fn unlink(name: &str) -> Result<(), SharedMemoryOpenError> {
        let c_name = shm_c_name(name);
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(SharedMemoryOpenError::DoesNotExist)
        }
    }

    pub fn does_exist(name: &str) -> bool {
        let c_name = shm_c_name(name);
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            unsafe {
                libc::close(fd);
            }
            true
        } else {
            false
        }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
    }
}

fn shm_c_name(name: &str) -> CString {
    let prefixed = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(prefixed).expect("shared memory names must not contain an interior NUL byte")
}

fn map(fd: RawFd, size: usize) -> Result<NonNull<u8>, io::Error> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(NonNull::new(ptr as *mut u8).expect("mmap returned a null pointer on success"))
}
