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

//! The discovery directory is a single well-known directory holding one
//! marker file per offered service instance. `OfferService` creates the
//! marker; `StopOfferService` removes it; `FindService` lists the
//! directory and filters by instance specifier.

use mw_com_log::fail;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location for the discovery directory when the environment
/// does not override it via `MW_COM_DISCOVERY_DIR`.
pub const DEFAULT_DISCOVERY_DIR: &str = "/tmp/mw_com_discovery";

#[derive(Debug)]
pub enum DiscoveryDirectoryCreateError {
    InsufficientPermissions,
    InternalError,
}

#[derive(Debug)]
pub enum DiscoveryEntryError {
    AlreadyExists,
    InternalError,
}

/// A handle to the discovery directory, rooted at `path`. Does not lock
/// anything itself - entries within it are the `lock_file`/`process_state`
/// primitives, keyed by service instance.
#[derive(Debug, Clone)]
pub struct DiscoveryDirectory {
    root: PathBuf,
}

impl DiscoveryDirectory {
    /// Opens the discovery directory at `root`, creating it (and any
    /// missing parents) if it does not yet exist.
    pub fn open_or_create(root: &Path) -> Result<Self, DiscoveryDirectoryCreateError> {
        let origin = "DiscoveryDirectory::open_or_create()";
        fail!(from origin, when fs::create_dir_all(root).map_err(map_create_error),
            with DiscoveryDirectoryCreateError::InternalError,
            "Unable to create discovery directory \"{}\".", root.display());

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the marker entry for `instance_specifier`. Callers take a
    /// lock on this path (via [`crate::lock_file::LockFile`]) to signal
    /// that the instance is offered.
    pub fn entry_path(&self, instance_specifier: &str) -> PathBuf {
        self.root.join(sanitize(instance_specifier))
    }

    /// Lists the instance specifiers currently present in the directory.
    /// A present entry only means "was offered at some point" - callers
    /// must still probe the lock for staleness to decide whether the
    /// offering process is still alive.
    pub fn list_entries(&self) -> Result<Vec<String>, DiscoveryEntryError> {
        let origin = "DiscoveryDirectory::list_entries()";
        let read_dir = fail!(from origin, when fs::read_dir(&self.root).map_err(|_| ()),
            with DiscoveryEntryError::InternalError,
            "Unable to read discovery directory \"{}\".", self.root.display());

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry =
                fail!(from origin, when dir_entry.map_err(|_| ()),
                    with DiscoveryEntryError::InternalError,
                    "Unable to read a directory entry in \"{}\".", self.root.display());
            if let Some(name) = dir_entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }
        Ok(entries)
    }

    pub fn contains(&self, instance_specifier: &str) -> bool {
        self.entry_path(instance_specifier).exists()
    }
}

fn map_create_error(e: io::Error) -> io::Error {
    e
}

/// Instance specifiers may contain path separators (e.g.
/// `"abc/PortPrefix"`); these are not valid as single directory entry
/// names, so `/` is replaced with `_` and must not be used as a
/// constituent character of an instance specifier otherwise.
fn sanitize(instance_specifier: &str) -> String {
    instance_specifier.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mw_com_testing::unique_test_base_dir;

    #[test]
    fn entries_are_empty_in_a_fresh_directory() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();
        assert!(discovery.list_entries().unwrap().is_empty());
    }

    #[test]
    fn created_entries_are_listed_and_found() {
        let base = unique_test_base_dir();
        let discovery = DiscoveryDirectory::open_or_create(&base.path().join("discovery")).unwrap();

        let path = discovery.entry_path("abc/MyInstance");
        fs::write(&path, b"").unwrap();

        assert!(discovery.contains("abc/MyInstance"));
        let entries = discovery.list_entries().unwrap();
        assert_eq!(entries, vec!["abc_MyInstance".to_string()]);
    }

    #[test]
    fn open_or_create_is_idempotent() {
        let base = unique_test_base_dir();
        let root = base.path().join("discovery");
        let _first = DiscoveryDirectory::open_or_create(&root).unwrap();
        let second = DiscoveryDirectory::open_or_create(&root);
        assert!(second.is_ok());
    }
}
