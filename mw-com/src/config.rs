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

//! The typed, versioned, JSON-serializable deployment data model. Field
//! names are chosen to match the configuration file's bit-exact JSON
//! keys (`numberOfSampleSlots`, `maxSubscribers`, ...); every nested
//! deployment object carries its own `serializationVersion`, validated
//! on load, since a mismatch is a fatal configuration error.

use mw_com_log::fatal_panic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every versioned deployment object currently understood. Deserializing
/// any other value is a fatal configuration error.
pub const SERIALIZATION_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceVersionType {
    #[serde(rename = "majorVersion")]
    pub major_version: u32,
    #[serde(rename = "minorVersion")]
    pub minor_version: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentifierType {
    #[serde(rename = "serviceType")]
    pub type_name: String,
    pub version: ServiceVersionType,
}

/// A path-like identifier, constrained to ASCII alphanumerics, `_`, and
/// `/`.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceSpecifier(String);

#[derive(Debug)]
pub enum InstanceSpecifierError {
    InvalidCharacter(char),
}

impl InstanceSpecifier {
    pub fn new(path: &str) -> Result<Self, InstanceSpecifierError> {
        if let Some(c) = path
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '/'))
        {
            return Err(InstanceSpecifierError::InvalidCharacter(c));
        }
        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct LolaEventInstanceDeployment {
    #[serde(rename = "numberOfSampleSlots", skip_serializing_if = "Option::is_none", default)]
    pub number_of_sample_slots: Option<u16>,
    #[serde(rename = "maxSubscribers", skip_serializing_if = "Option::is_none", default)]
    pub max_subscribers: Option<u16>,
    #[serde(rename = "maxConcurrentAllocations", skip_serializing_if = "Option::is_none", default)]
    pub max_concurrent_allocations: Option<u8>,
    #[serde(rename = "enforceMaxSamples")]
    pub enforce_max_samples: bool,
    #[serde(rename = "numberOfIpcTracingSlots")]
    pub number_of_tracing_slots: u8,
}

impl LolaEventInstanceDeployment {
    /// Validates the invariant `number_of_sample_slots +
    /// number_of_tracing_slots <= u16::MAX`, and rejects
    /// `number_of_sample_slots` unset while `number_of_tracing_slots >
    /// 0`, since that leaves tracing with no sized region to occupy.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.number_of_sample_slots {
            Some(slots) => {
                if (slots as u32) + (self.number_of_tracing_slots as u32) > u16::MAX as u32 {
                    return Err("number_of_sample_slots + number_of_tracing_slots exceeds u16::MAX");
                }
            }
            None if self.number_of_tracing_slots > 0 => {
                return Err("number_of_tracing_slots > 0 requires number_of_sample_slots to be set");
            }
            None => {}
        }
        Ok(())
    }
}

/// A field is an event plus a persistent last value (spec Glossary
/// "Field"); its deployment shares the event deployment's shape.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct LolaFieldInstanceDeployment {
    #[serde(flatten)]
    pub event: LolaEventInstanceDeployment,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityType {
    Qm,
    AsilB,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LolaServiceInstanceDeployment {
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none", default)]
    pub instance_id: Option<u16>,
    #[serde(rename = "sharedMemorySize", skip_serializing_if = "Option::is_none", default)]
    pub shared_memory_size: Option<usize>,
    pub events: BTreeMap<String, LolaEventInstanceDeployment>,
    pub fields: BTreeMap<String, LolaFieldInstanceDeployment>,
    #[serde(rename = "strict")]
    pub strict_permissions: bool,
    #[serde(rename = "allowedConsumer", default)]
    pub allowed_consumer: BTreeMap<QualityType, Vec<u32>>,
    #[serde(rename = "allowedProvider", default)]
    pub allowed_provider: BTreeMap<QualityType, Vec<u32>>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct LolaServiceTypeDeployment {
    pub service_id: u16,
    pub events: BTreeMap<String, u16>,
    pub fields: BTreeMap<String, u16>,
    pub methods: BTreeMap<String, u16>,
}

/// Every cross-process handle carries this discriminant:
/// `0 = Lola, 1 = SomeIp, 2 = Blank`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ServiceInstanceBindingInfo {
    Lola(LolaServiceInstanceDeployment),
    SomeIp,
    Blank,
}

impl Serialize for ServiceInstanceBindingInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ServiceInstanceBindingInfo", 2)?;
        match self {
            ServiceInstanceBindingInfo::Lola(deployment) => {
                state.serialize_field("bindingInfoIndex", &0u8)?;
                state.serialize_field("bindingInfo", deployment)?;
            }
            ServiceInstanceBindingInfo::SomeIp => {
                state.serialize_field("bindingInfoIndex", &1u8)?;
                state.serialize_field("bindingInfo", &())?;
            }
            ServiceInstanceBindingInfo::Blank => {
                state.serialize_field("bindingInfoIndex", &2u8)?;
                state.serialize_field("bindingInfo", &())?;
            }
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ServiceInstanceBindingInfo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "bindingInfoIndex")]
            index: u8,
            #[serde(rename = "bindingInfo", default)]
            payload: serde_json::Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        match raw.index {
            0 => {
                let deployment = serde_json::from_value(raw.payload).map_err(serde::de::Error::custom)?;
                Ok(ServiceInstanceBindingInfo::Lola(deployment))
            }
            1 => Ok(ServiceInstanceBindingInfo::SomeIp),
            2 => Ok(ServiceInstanceBindingInfo::Blank),
            other => Err(serde::de::Error::custom(format!("unrecognized bindingInfoIndex {other}"))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ServiceTypeBindingInfo {
    Lola(LolaServiceTypeDeployment),
    Blank,
}

impl Serialize for ServiceTypeBindingInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ServiceTypeBindingInfo", 2)?;
        match self {
            ServiceTypeBindingInfo::Lola(deployment) => {
                state.serialize_field("bindingInfoIndex", &0u8)?;
                state.serialize_field("bindingInfo", deployment)?;
            }
            ServiceTypeBindingInfo::Blank => {
                state.serialize_field("bindingInfoIndex", &2u8)?;
                state.serialize_field("bindingInfo", &())?;
            }
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ServiceTypeBindingInfo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "bindingInfoIndex")]
            index: u8,
            #[serde(rename = "bindingInfo", default)]
            payload: serde_json::Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        match raw.index {
            0 => {
                let deployment = serde_json::from_value(raw.payload).map_err(serde::de::Error::custom)?;
                Ok(ServiceTypeBindingInfo::Lola(deployment))
            }
            2 => Ok(ServiceTypeBindingInfo::Blank),
            other => Err(serde::de::Error::custom(format!("unrecognized bindingInfoIndex {other}"))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceDeployment {
    pub service: ServiceIdentifierType,
    #[serde(flatten)]
    pub binding_info: ServiceInstanceBindingInfo,
    pub quality_type: QualityType,
    pub instance_specifier: InstanceSpecifier,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceTypeDeployment {
    #[serde(flatten)]
    pub binding_info: ServiceTypeBindingInfo,
}

/// Opaque handle into a [`Configuration`]'s insertion-stable tables.
/// Indices, not pointers, so the handle survives a `Configuration`
/// move.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    instance_index: usize,
    type_index: usize,
}

/// `(service_type -> ServiceTypeDeployment)` and `(instance_specifier ->
/// ServiceInstanceDeployment)`, stored as insertion-stable vectors so
/// `InstanceIdentifier` indices remain valid for the configuration's
/// lifetime.
#[derive(Debug, Default)]
pub struct Configuration {
    service_types: Vec<(ServiceIdentifierType, ServiceTypeDeployment)>,
    service_instances: Vec<(InstanceSpecifier, ServiceInstanceDeployment)>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fatal if `instance_id` collides with one already registered for
    /// the same service type.
    pub fn register(&mut self, service_type: ServiceIdentifierType, service_type_deployment: ServiceTypeDeployment, instance_specifier: InstanceSpecifier, instance_deployment: ServiceInstanceDeployment) -> InstanceIdentifier {
        if let Some(new_id) = instance_id_of(&instance_deployment) {
            let collision = self.service_instances.iter().any(|(_, existing)| {
                instance_id_of(existing) == Some(new_id) && same_service_type(existing, &instance_deployment)
            });
            if collision {
                fatal_panic!("duplicate instance_id {} for the same service type", new_id);
            }
        }

        let type_index = match self.service_types.iter().position(|(id, _)| *id == service_type) {
            Some(index) => index,
            None => {
                self.service_types.push((service_type, service_type_deployment));
                self.service_types.len() - 1
            }
        };
        self.service_instances.push((instance_specifier, instance_deployment));
        let instance_index = self.service_instances.len() - 1;

        InstanceIdentifier { instance_index, type_index }
    }

    pub fn resolve(&self, id: InstanceIdentifier) -> (&ServiceInstanceDeployment, &ServiceTypeDeployment) {
        (&self.service_instances[id.instance_index].1, &self.service_types[id.type_index].1)
    }

    /// `InstanceSpecifier -> Set<InstanceIdentifier>`: every registered
    /// instance whose specifier matches.
    pub fn resolve_specifier(&self, specifier: &InstanceSpecifier) -> Vec<InstanceIdentifier> {
        self.service_instances
            .iter()
            .enumerate()
            .filter(|(_, (existing, _))| existing == specifier)
            .map(|(instance_index, (_, deployment))| {
                let type_index = self
                    .service_types
                    .iter()
                    .position(|(id, _)| *id == deployment.service)
                    .unwrap_or(0);
                InstanceIdentifier { instance_index, type_index }
            })
            .collect()
    }
}

fn instance_id_of(deployment: &ServiceInstanceDeployment) -> Option<u16> {
    match &deployment.binding_info {
        ServiceInstanceBindingInfo::Lola(lola) => lola.instance_id,
        _ => None,
    }
}

fn same_service_type(a: &ServiceInstanceDeployment, b: &ServiceInstanceDeployment) -> bool {
    a.service == b.service
}
