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

//! Resolves which configuration file to load and turns it into a
//! [`Configuration`]. A malformed or missing manifest, or a
//! `serializationVersion` mismatch, is a configuration error: fatal.

use crate::config::{
    Configuration, ServiceIdentifierType, ServiceInstanceDeployment, ServiceTypeDeployment,
    SERIALIZATION_VERSION,
};
use mw_com_log::fatal_panic;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DEFAULT_MANIFEST_PATH: &str = "./etc/mw_com_config.json";
const MANIFEST_FLAG_LONG: &str = "--service_instance_manifest";
const MANIFEST_FLAG_SHORT: &str = "-service_instance_manifest";

/// Which manifest file a process should load its [`Configuration`] from.
#[derive(Debug, Clone)]
pub struct RuntimeConfiguration {
    manifest_path: PathBuf,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self::from_path(DEFAULT_MANIFEST_PATH)
    }
}

impl RuntimeConfiguration {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { manifest_path: path.into() }
    }

    /// Parses `--service_instance_manifest <path>` (or its deprecated
    /// `-service_instance_manifest` alias) out of `args`, falling back to
    /// the default path if neither flag is present.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Self {
        let args: Vec<String> = args.into_iter().collect();
        let manifest = args
            .iter()
            .position(|arg| arg == MANIFEST_FLAG_LONG || arg == MANIFEST_FLAG_SHORT)
            .and_then(|index| args.get(index + 1));
        match manifest {
            Some(path) => Self::from_path(path.clone()),
            None => Self::default(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Reads and parses the manifest into a [`Configuration`]. Missing
    /// file, malformed JSON, or a `serializationVersion` mismatch is a
    /// configuration error: fatal.
    pub fn load(&self) -> Configuration {
        let contents = std::fs::read_to_string(&self.manifest_path).unwrap_or_else(|e| {
            fatal_panic!("could not read configuration manifest {:?}: {}", self.manifest_path, e)
        });
        let document: ConfigurationDocument = serde_json::from_str(&contents)
            .unwrap_or_else(|e| fatal_panic!("malformed configuration manifest {:?}: {}", self.manifest_path, e));

        if document.serialization_version != SERIALIZATION_VERSION {
            fatal_panic!(
                "configuration manifest {:?} has serializationVersion {}, expected {}",
                self.manifest_path,
                document.serialization_version,
                SERIALIZATION_VERSION
            );
        }

        let mut configuration = Configuration::new();
        for instance in document.service_instance_deployment {
            let type_entry = document
                .service_type_deployment
                .iter()
                .find(|entry| entry.id == instance.service)
                .unwrap_or_else(|| {
                    fatal_panic!("no serviceTypeDeployment entry matches service {:?}", instance.service)
                });
            configuration.register(
                instance.service.clone(),
                type_entry.deployment.clone(),
                instance.instance_specifier.clone(),
                instance,
            );
        }
        configuration
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceTypeEntry {
    #[serde(flatten)]
    id: ServiceIdentifierType,
    #[serde(flatten)]
    deployment: ServiceTypeDeployment,
}

#[derive(Debug, Deserialize)]
struct ConfigurationDocument {
    #[serde(rename = "serializationVersion")]
    serialization_version: u32,
    #[serde(rename = "serviceInstanceDeployment")]
    service_instance_deployment: Vec<ServiceInstanceDeployment>,
    #[serde(rename = "serviceTypeDeployment")]
    service_type_deployment: Vec<ServiceTypeEntry>,
}

/// Process-wide runtime configuration, set at most once: first call
/// wins, later calls are no-ops.
static RUNTIME: OnceLock<RuntimeConfiguration> = OnceLock::new();

/// `InitializeRuntime(argc, argv)`. A later call after the runtime is
/// already initialized is a no-op.
pub fn initialize_runtime_from_args<I: IntoIterator<Item = String>>(args: I) {
    let _ = RUNTIME.set(RuntimeConfiguration::from_args(args));
}

/// `InitializeRuntime(RuntimeConfiguration)`.
pub fn initialize_runtime(configuration: RuntimeConfiguration) {
    let _ = RUNTIME.set(configuration);
}

/// Returns the active [`RuntimeConfiguration`], initializing it from
/// the default manifest path if no explicit `InitializeRuntime` call
/// has happened yet.
pub fn runtime_configuration() -> &'static RuntimeConfiguration {
    RUNTIME.get_or_init(RuntimeConfiguration::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_manifest_path_is_the_documented_default() {
        let runtime = RuntimeConfiguration::default();
        assert_eq!(runtime.manifest_path(), Path::new(DEFAULT_MANIFEST_PATH));
    }

    #[test]
    fn long_flag_overrides_the_default_manifest_path() {
        let args = vec!["prog".to_string(), "--service_instance_manifest".to_string(), "/tmp/custom.json".to_string()];
        let runtime = RuntimeConfiguration::from_args(args);
        assert_eq!(runtime.manifest_path(), Path::new("/tmp/custom.json"));
    }

    #[test]
    fn deprecated_short_flag_is_also_recognized() {
        let args = vec!["prog".to_string(), "-service_instance_manifest".to_string(), "/tmp/custom2.json".to_string()];
        let runtime = RuntimeConfiguration::from_args(args);
        assert_eq!(runtime.manifest_path(), Path::new("/tmp/custom2.json"));
    }

    #[test]
    fn absent_flag_falls_back_to_the_default_path() {
        let args = vec!["prog".to_string()];
        let runtime = RuntimeConfiguration::from_args(args);
        assert_eq!(runtime.manifest_path(), Path::new(DEFAULT_MANIFEST_PATH));
    }

    #[test]
    #[should_panic(expected = "could not read configuration manifest")]
    fn missing_manifest_file_is_fatal() {
        RuntimeConfiguration::from_path("/nonexistent/path/mw_com_config.json").load();
    }

    #[test]
    #[should_panic(expected = "malformed configuration manifest")]
    fn malformed_manifest_json_is_fatal() {
        let dir = mw_com_testing::unique_test_base_dir();
        let path = dir.path().join("mw_com_config.json");
        std::fs::write(&path, "not json").unwrap();
        RuntimeConfiguration::from_path(path).load();
    }

    #[test]
    #[should_panic(expected = "serializationVersion")]
    fn serialization_version_mismatch_is_fatal() {
        let dir = mw_com_testing::unique_test_base_dir();
        let path = dir.path().join("mw_com_config.json");
        std::fs::write(
            &path,
            r#"{"serializationVersion": 999, "serviceInstanceDeployment": [], "serviceTypeDeployment": []}"#,
        )
        .unwrap();
        RuntimeConfiguration::from_path(path).load();
    }
}
