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

//! Service lifecycle & discovery: `OfferService`,
//! `StopOfferService`, `FindService`, `StartFindService`. One lock file
//! per instance in the discovery directory doubles as both the
//! "offered" publication and the liveness signal: a shared flock held
//! on it means "alive offer"; the ability to take it exclusively means
//! "no live peer".

use mw_com_cal::discovery_directory::DiscoveryDirectory;
use mw_com_cal::lock_file::{LockAcquireError, LockFile, LockMode};
use mw_com_cal::shared_memory::{SharedMemory, SharedMemoryCreateError};
use mw_com_log::{debug, info};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const SERVICE_DATA_STORAGE_VERSION: u32 = 1;

#[derive(Debug)]
pub enum OfferServiceError {
    AlreadyOfferedHere,
    HeaderVersionMismatch { expected: u32, found: u32 },
    InternalError,
}

#[repr(C)]
struct Header {
    version: AtomicU32,
}

/// The `ServiceDataStorage` region header: created by the
/// first offerer, validated by every subsequent one.
struct ServiceDataStorageHeader {
    shm: SharedMemory,
}

impl ServiceDataStorageHeader {
    fn header(&self) -> &Header {
        unsafe { &*(self.shm.base() as *const Header) }
    }

    /// Creates the header if this is the first offer, or opens and
    /// validates it otherwise. Returns
    /// whether this call created it.
    fn create_or_open(name: &str) -> Result<(Self, bool), OfferServiceError> {
        match SharedMemory::create(name, std::mem::size_of::<Header>()) {
            Ok(shm) => {
                let storage = Self { shm };
                storage.header().version.store(SERVICE_DATA_STORAGE_VERSION, Ordering::Release);
                Ok((storage, true))
            }
            Err(SharedMemoryCreateError::AlreadyExists) => {
                let shm = SharedMemory::open(name, std::mem::size_of::<Header>())
                    .map_err(|_| OfferServiceError::InternalError)?;
                let storage = Self { shm };
                let found = storage.header().version.load(Ordering::Acquire);
                if found != SERVICE_DATA_STORAGE_VERSION {
                    return Err(OfferServiceError::HeaderVersionMismatch {
                        expected: SERVICE_DATA_STORAGE_VERSION,
                        found,
                    });
                }
                Ok((storage, false))
            }
            Err(_) => Err(OfferServiceError::InternalError),
        }
    }
}

/// A currently-offered service instance. Dropping it runs
/// `StopOfferService`'s mirror sequence.
pub struct OfferedServiceInstance {
    instance_specifier: String,
    shared_lock: Option<LockFile>,
    _header: ServiceDataStorageHeader,
}

impl OfferedServiceInstance {
    /// `OfferService(instance_id)`. `instance_id` here is
    /// the fully-resolved instance specifier string used as the
    /// discovery directory key and shared-memory region name.
    pub fn offer(discovery: &DiscoveryDirectory, instance_specifier: &str) -> Result<Self, OfferServiceError> {
        let origin = "OfferedServiceInstance::offer()";
        let lock_path = discovery.entry_path(instance_specifier);

        // Step 1: exclusive flock, fail if another process holds it.
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|_| OfferServiceError::InternalError)?;
        let exclusive = match LockFile::try_lock_existing(&lock_path, LockMode::Exclusive) {
            Ok(lock) => lock,
            Err(LockAcquireError::WouldBlock) => return Err(OfferServiceError::AlreadyOfferedHere),
            Err(_) => return Err(OfferServiceError::InternalError),
        };

        // Step 2: create-or-open the ServiceDataStorage header.
        let region_name = format!("svc_{}", sanitize(instance_specifier));
        let (header, created) = ServiceDataStorageHeader::create_or_open(&region_name)?;
        info!(
            from origin,
            "Offered instance \"{}\" ({}).",
            instance_specifier,
            if created { "created storage" } else { "joined existing storage" }
        );

        // Step 3: release exclusive, retain a shared flock for the
        // offer's lifetime so peers can detect "alive" via a failed
        // exclusive attempt.
        drop(exclusive);
        let shared = LockFile::create_and_lock(&lock_path, LockMode::Shared).map_err(|_| OfferServiceError::InternalError)?;

        Ok(Self {
            instance_specifier: instance_specifier.to_string(),
            shared_lock: Some(shared),
            _header: header,
        })
    }

    pub fn instance_specifier(&self) -> &str {
        &self.instance_specifier
    }

    /// `StopOfferService`. Idempotent: a second call is a no-op.
    pub fn stop_offer(&mut self) {
        if let Some(lock) = self.shared_lock.take() {
            let path = lock.path().to_path_buf();
            drop(lock);
            let _ = std::fs::remove_file(&path);
            debug!(
                from "OfferedServiceInstance::stop_offer()",
                "Stopped offering instance \"{}\".", self.instance_specifier
            );
        }
    }
}

impl Drop for OfferedServiceInstance {
    fn drop(&mut self) {
        self.stop_offer();
    }
}

fn sanitize(instance_specifier: &str) -> String {
    instance_specifier.replace('/', "_")
}

/// `FindService(instance_specifier)`: a snapshot of
/// instance specifiers currently offered, matching `prefix`. An entry
/// is alive only if its lock cannot be taken exclusively (someone holds
/// a shared lock on it); a leftover file from a crashed offerer with no
/// live holder is excluded.
pub fn find_service(discovery: &DiscoveryDirectory, prefix: &str) -> Vec<String> {
    let Ok(entries) = discovery.list_entries() else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter(|sanitized| sanitized.starts_with(&sanitize(prefix)))
        .filter(|sanitized| is_alive(discovery, sanitized))
        .collect()
}

fn is_alive(discovery: &DiscoveryDirectory, sanitized_name: &str) -> bool {
    let path = discovery.root().join(sanitized_name);
    matches!(
        LockFile::try_lock_existing(&path, LockMode::Exclusive),
        Err(LockAcquireError::WouldBlock)
    )
}

/// `StartFindService(handler, specifier)`: polls the
/// discovery directory periodically (no inotify dependency; periodic
/// exclusive-flock probes are one of two valid detection mechanisms
/// here) and invokes `handler`
/// whenever the matching set changes. Invocations for one handle are
/// serialized by construction: they all run on the same background
/// thread.
pub struct FindServiceHandle {
    stop: Arc<std::sync::atomic::AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl FindServiceHandle {
    pub fn start(
        discovery: DiscoveryDirectory,
        prefix: String,
        mut handler: impl FnMut(Vec<String>) + Send + 'static,
        poll_interval: Duration,
    ) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_clone = stop.clone();

        let join_handle = std::thread::spawn(move || {
            let mut last_seen: Vec<String> = Vec::new();
            while !stop_clone.load(Ordering::Acquire) {
                let current = find_service(&discovery, &prefix);
                if current != last_seen {
                    handler(current.clone());
                    last_seen = current;
                }
                std::thread::sleep(poll_interval);
            }
        });

        Self {
            stop,
            join_handle: Some(join_handle),
        }
    }
}

impl Drop for FindServiceHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_testing::unique_test_base_dir;

    #[test]
    fn offer_then_find_service_sees_the_instance() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();
        let offer = OfferedServiceInstance::offer(&discovery, "abc/Instance1").unwrap();

        let found = find_service(&discovery, "abc/Instance1");
        assert_eq!(found, vec!["abc_Instance1".to_string()]);

        drop(offer);
    }

    #[test]
    fn second_offer_of_the_same_instance_fails() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();
        let _first = OfferedServiceInstance::offer(&discovery, "abc/Instance2").unwrap();

        let second = OfferedServiceInstance::offer(&discovery, "abc/Instance2");
        assert!(matches!(second, Err(OfferServiceError::AlreadyOfferedHere)));
    }

    #[test]
    fn stop_offer_is_idempotent_and_removes_the_instance_from_find_service() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();
        let mut offer = OfferedServiceInstance::offer(&discovery, "abc/Instance3").unwrap();

        offer.stop_offer();
        offer.stop_offer(); // idempotent

        assert!(find_service(&discovery, "abc/Instance3").is_empty());
    }

    #[test]
    fn concurrent_offers_of_distinct_instances_all_succeed() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let discovery = discovery.clone();
                std::thread::spawn(move || {
                    OfferedServiceInstance::offer(&discovery, &format!("svc/Instance{i}")).unwrap()
                })
            })
            .collect();

        let offers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for i in 0..3 {
            let found = find_service(&discovery, &format!("svc/Instance{i}"));
            assert_eq!(found.len(), 1);
        }
        drop(offers);
    }
}
