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

//! Resolves a [`Configuration`]/[`InstanceIdentifier`]/element-name triple
//! into the [`ElementFqId`] that names its shared-memory regions, and
//! constructs the concrete LoLa [`Producer<T>`]/[`Consumer<T>`] a
//! [`crate::skeleton::SkeletonEvent`]/[`crate::proxy::ProxyEvent`] binds to.
//! This is the layer `SkeletonEvent::bind`/`ProxyEvent::new` otherwise leave
//! to a hand-wired caller.

use crate::config::{
    Configuration, InstanceIdentifier, LolaEventInstanceDeployment, QualityType, ServiceInstanceBindingInfo,
    ServiceTypeBindingInfo,
};
use crate::error::ComError;
use mw_com_lola::control::{ControlArray, EventDataControl, SafetyPartition};
use mw_com_lola::element_fq_id::{ElementFqId, ElementKind};
use mw_com_lola::event_data_storage::EventDataStorage;
use mw_com_lola::proxy_event::Consumer;
use mw_com_lola::skeleton_event::Producer;
use mw_com_lola::subscription::Subscription;
use mw_com_lola::transaction_log::TransactionLog;
use mw_com_cal::shared_memory::{SharedMemoryCreateError, SharedMemoryOpenError};
use std::sync::Arc;

/// Resolves `(fq_id, event deployment, quality)` for `element_name` of
/// `kind` on the instance `id` names, per `config`. Mirrors the
/// `LolaServiceTypeDeployment.events`/`.fields` id-map lookup plus
/// `LolaServiceInstanceDeployment.instance_id` composition used to build
/// an `ElementFqId` from deployment data.
fn resolve_element(
    config: &Configuration,
    id: InstanceIdentifier,
    element_name: &str,
    kind: ElementKind,
) -> Result<(ElementFqId, LolaEventInstanceDeployment, QualityType), ComError> {
    let (instance_deployment, type_deployment) = config.resolve(id);

    let instance = match &instance_deployment.binding_info {
        ServiceInstanceBindingInfo::Lola(instance) => instance,
        _ => return Err(ComError::InvalidBindingInformation),
    };
    let service_type = match &type_deployment.binding_info {
        ServiceTypeBindingInfo::Lola(service_type) => service_type,
        _ => return Err(ComError::InvalidBindingInformation),
    };

    let element_id = *(match kind {
        ElementKind::Event => service_type.events.get(element_name),
        ElementKind::Field => service_type.fields.get(element_name),
        _ => None,
    })
    .ok_or(ComError::InvalidConfiguration)?;

    let event_deployment = match kind {
        ElementKind::Event => instance.events.get(element_name).copied(),
        ElementKind::Field => instance.fields.get(element_name).map(|field| field.event),
        _ => None,
    }
    .ok_or(ComError::InvalidConfiguration)?;
    event_deployment.validate().map_err(|_| ComError::InvalidConfiguration)?;

    let instance_id = instance.instance_id.ok_or(ComError::InvalidConfiguration)?;
    let fq_id = ElementFqId::new(service_type.service_id, element_id, instance_id, kind);

    Ok((fq_id, event_deployment, instance_deployment.quality_type))
}

fn create_or_open_storage<T: Copy>(name: &str, slots: usize) -> Result<EventDataStorage<T>, ComError> {
    match EventDataStorage::<T>::create(name, slots) {
        Ok(storage) => Ok(storage),
        Err(SharedMemoryCreateError::AlreadyExists) => {
            EventDataStorage::<T>::open(name, slots).map_err(|_| ComError::CommunicationLinkError)
        }
        Err(_) => Err(ComError::CommunicationLinkError),
    }
}

fn create_or_open_control_array(name: &str, slots: usize) -> Result<ControlArray, ComError> {
    match ControlArray::create(name, slots) {
        Ok(array) => Ok(array),
        Err(SharedMemoryCreateError::AlreadyExists) => ControlArray::open(name, slots).map_err(|_| ComError::CommunicationLinkError),
        Err(_) => Err(ComError::CommunicationLinkError),
    }
}

fn create_or_open_transaction_log(name: &str, capacity: usize) -> Result<TransactionLog, ComError> {
    match TransactionLog::create(name, capacity) {
        Ok(log) => Ok(log),
        Err(SharedMemoryCreateError::AlreadyExists) => {
            TransactionLog::open(name, capacity).map_err(|_| ComError::CommunicationLinkError)
        }
        Err(_) => Err(ComError::CommunicationLinkError),
    }
}

fn create_or_open_control(stem: &str, slots: usize, quality: QualityType) -> Result<EventDataControl, ComError> {
    match quality {
        QualityType::Qm => {
            let array = create_or_open_control_array(&format!("{stem}_ctrl"), slots)?;
            Ok(EventDataControl::new_qm_only(array))
        }
        QualityType::AsilB => {
            let asil_b = create_or_open_control_array(&format!("{stem}_ctrl_asilb"), slots)?;
            let qm = create_or_open_control_array(&format!("{stem}_ctrl_qm"), slots)?;
            Ok(EventDataControl::new_composite(asil_b, qm))
        }
    }
}

fn open_control(stem: &str, slots: usize, quality: QualityType) -> Result<EventDataControl, ComError> {
    match quality {
        QualityType::Qm => {
            let array = ControlArray::open(&format!("{stem}_ctrl"), slots).map_err(|_| ComError::ServiceNotAvailable)?;
            Ok(EventDataControl::new_qm_only(array))
        }
        QualityType::AsilB => {
            let asil_b =
                ControlArray::open(&format!("{stem}_ctrl_asilb"), slots).map_err(|_| ComError::ServiceNotAvailable)?;
            let qm = ControlArray::open(&format!("{stem}_ctrl_qm"), slots).map_err(|_| ComError::ServiceNotAvailable)?;
            Ok(EventDataControl::new_composite(asil_b, qm))
        }
    }
}

fn build_producer<T: Copy>(
    fq_id: ElementFqId,
    deployment: LolaEventInstanceDeployment,
    quality: QualityType,
) -> Result<Producer<T>, ComError> {
    let slots = deployment.number_of_sample_slots.ok_or(ComError::InvalidConfiguration)? as usize;
    let stem = fq_id.region_stem();

    let storage = Arc::new(create_or_open_storage::<T>(&format!("{stem}_data"), slots)?);
    let control = Arc::new(create_or_open_control(&stem, slots, quality)?);
    Ok(Producer::new(storage, control))
}

fn build_consumer<T: Copy>(
    fq_id: ElementFqId,
    deployment: LolaEventInstanceDeployment,
    quality: QualityType,
    max_samples: u16,
) -> Result<Consumer<T>, ComError> {
    let slots = deployment.number_of_sample_slots.ok_or(ComError::InvalidConfiguration)? as usize;
    let stem = fq_id.region_stem();

    let storage = Arc::new(
        EventDataStorage::<T>::open(&format!("{stem}_data"), slots).map_err(|_: SharedMemoryOpenError| ComError::ServiceNotAvailable)?,
    );
    let control = Arc::new(open_control(&stem, slots, quality)?);
    let transaction_log = Arc::new(create_or_open_transaction_log(&format!("{stem}_txlog"), max_samples as usize)?);
    let subscription = Arc::new(Subscription::new(transaction_log));
    let partition = match quality {
        QualityType::Qm => SafetyPartition::Qm,
        QualityType::AsilB => SafetyPartition::AsilB,
    };

    Ok(Consumer::new(storage, control, partition, subscription))
}

/// Builds the producer binding for event `event_name` on the instance
/// `id` resolves to, creating its shared-memory regions (or attaching
/// to them if a sibling skeleton already created them first).
pub fn create_skeleton_event<T: Copy>(config: &Configuration, id: InstanceIdentifier, event_name: &str) -> Result<Producer<T>, ComError> {
    let (fq_id, deployment, quality) = resolve_element(config, id, event_name, ElementKind::Event)?;
    build_producer(fq_id, deployment, quality)
}

/// Builds the producer binding for field `field_name` on the instance
/// `id` resolves to.
pub fn create_skeleton_field<T: Copy>(config: &Configuration, id: InstanceIdentifier, field_name: &str) -> Result<Producer<T>, ComError> {
    let (fq_id, deployment, quality) = resolve_element(config, id, field_name, ElementKind::Field)?;
    build_producer(fq_id, deployment, quality)
}

/// Builds the consumer binding for event `event_name` on the instance
/// `id` resolves to, attaching to the skeleton's already-created
/// shared-memory regions and registering a fresh per-subscription
/// `TransactionLog`.
pub fn create_proxy_event<T: Copy>(
    config: &Configuration,
    id: InstanceIdentifier,
    event_name: &str,
    max_samples: u16,
) -> Result<Consumer<T>, ComError> {
    let (fq_id, deployment, quality) = resolve_element(config, id, event_name, ElementKind::Event)?;
    build_consumer(fq_id, deployment, quality, max_samples)
}

/// Builds the consumer binding for field `field_name` on the instance
/// `id` resolves to.
pub fn create_proxy_field<T: Copy>(
    config: &Configuration,
    id: InstanceIdentifier,
    field_name: &str,
    max_samples: u16,
) -> Result<Consumer<T>, ComError> {
    let (fq_id, deployment, quality) = resolve_element(config, id, field_name, ElementKind::Field)?;
    build_consumer(fq_id, deployment, quality, max_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        InstanceSpecifier, LolaServiceInstanceDeployment, LolaServiceTypeDeployment, ServiceIdentifierType,
        ServiceInstanceDeployment, ServiceTypeDeployment, ServiceVersionType,
    };
    use mw_com_cal::shared_memory::SharedMemory;
    use std::collections::BTreeMap;

    fn unique(tag: &str) -> String {
        format!("mw_com_bindfac_{tag}_{:?}", std::thread::current().id())
    }

    fn service_type(tag: &str) -> ServiceIdentifierType {
        ServiceIdentifierType {
            type_name: format!("Service_{tag}"),
            version: ServiceVersionType { major_version: 1, minor_version: 0 },
        }
    }

    fn sample_event_deployment() -> LolaEventInstanceDeployment {
        LolaEventInstanceDeployment {
            number_of_sample_slots: Some(2),
            max_subscribers: Some(4),
            max_concurrent_allocations: Some(1),
            enforce_max_samples: false,
            number_of_tracing_slots: 0,
        }
    }

    fn register_instance(
        config: &mut Configuration,
        tag: &str,
        instance_id: u16,
        quality: QualityType,
        event_name: &str,
        event_service_id: u16,
        event_element_id: u16,
    ) -> InstanceIdentifier {
        let service = service_type(tag);
        let mut type_events = BTreeMap::new();
        type_events.insert(event_name.to_string(), event_element_id);

        let mut instance_events = BTreeMap::new();
        instance_events.insert(event_name.to_string(), sample_event_deployment());

        config.register(
            service.clone(),
            ServiceTypeDeployment {
                binding_info: ServiceTypeBindingInfo::Lola(LolaServiceTypeDeployment {
                    service_id: event_service_id,
                    events: type_events,
                    fields: BTreeMap::new(),
                    methods: BTreeMap::new(),
                }),
            },
            InstanceSpecifier::new(&unique(tag)).unwrap(),
            ServiceInstanceDeployment {
                service: service.clone(),
                binding_info: ServiceInstanceBindingInfo::Lola(LolaServiceInstanceDeployment {
                    instance_id: Some(instance_id),
                    shared_memory_size: Some(4096),
                    events: instance_events,
                    fields: BTreeMap::new(),
                    strict_permissions: true,
                    allowed_consumer: BTreeMap::new(),
                    allowed_provider: BTreeMap::new(),
                }),
                quality_type: quality,
                instance_specifier: InstanceSpecifier::new(&unique(tag)).unwrap(),
            },
        )
    }

    fn unlink_event_regions(stem: &str, quality: QualityType) {
        let _ = SharedMemory::unlink(&format!("{stem}_data"));
        let _ = SharedMemory::unlink(&format!("{stem}_txlog"));
        match quality {
            QualityType::Qm => {
                let _ = SharedMemory::unlink(&format!("{stem}_ctrl"));
            }
            QualityType::AsilB => {
                let _ = SharedMemory::unlink(&format!("{stem}_ctrl_asilb"));
                let _ = SharedMemory::unlink(&format!("{stem}_ctrl_qm"));
            }
        }
    }

    #[test]
    fn skeleton_then_proxy_round_trip_through_the_resolved_configuration() {
        use mw_com_lola::subscription::SubscriptionState;

        let mut config = Configuration::new();
        let id = register_instance(&mut config, "roundtrip", 11, QualityType::Qm, "counter", 5, 2);

        let producer: Producer<u32> = create_skeleton_event(&config, id, "counter").unwrap();
        let consumer: Consumer<u32> = create_proxy_event(&config, id, "counter", 2).unwrap();
        consumer.subscribe(2).unwrap();
        assert_eq!(consumer.get_subscription_state(), SubscriptionState::SubscriptionPending);

        producer.send_value(42).unwrap();
        assert_eq!(consumer.get_num_new_samples_available(), 1);

        let fq_id = ElementFqId::new(5, 2, 11, ElementKind::Event);
        unlink_event_regions(&fq_id.region_stem(), QualityType::Qm);
    }

    #[test]
    fn unknown_event_name_is_an_invalid_configuration() {
        let mut config = Configuration::new();
        let id = register_instance(&mut config, "unknown", 12, QualityType::Qm, "counter", 6, 3);

        let result: Result<Producer<u32>, ComError> = create_skeleton_event(&config, id, "not_counter");
        assert!(matches!(result, Err(ComError::InvalidConfiguration)));

        let fq_id = ElementFqId::new(6, 3, 12, ElementKind::Event);
        unlink_event_regions(&fq_id.region_stem(), QualityType::Qm);
    }

    #[test]
    fn some_ip_binding_information_is_rejected() {
        let mut config = Configuration::new();
        let service = service_type("someip");
        let id = config.register(
            service.clone(),
            ServiceTypeDeployment { binding_info: ServiceTypeBindingInfo::Blank },
            InstanceSpecifier::new(&unique("someip")).unwrap(),
            ServiceInstanceDeployment {
                service,
                binding_info: ServiceInstanceBindingInfo::SomeIp,
                quality_type: QualityType::Qm,
                instance_specifier: InstanceSpecifier::new(&unique("someip")).unwrap(),
            },
        );

        let result: Result<Producer<u32>, ComError> = create_skeleton_event(&config, id, "counter");
        assert!(matches!(result, Err(ComError::InvalidBindingInformation)));
    }

    #[test]
    fn asil_b_instance_builds_a_composite_control_both_sides_can_use() {
        let mut config = Configuration::new();
        let id = register_instance(&mut config, "composite", 13, QualityType::AsilB, "counter", 7, 4);

        let producer: Producer<u32> = create_skeleton_event(&config, id, "counter").unwrap();
        let consumer: Consumer<u32> = create_proxy_event(&config, id, "counter", 2).unwrap();

        producer.send_value(1).unwrap();
        assert_eq!(consumer.get_num_new_samples_available(), 1);

        let fq_id = ElementFqId::new(7, 4, 13, ElementKind::Event);
        unlink_event_regions(&fq_id.region_stem(), QualityType::AsilB);
    }
}
