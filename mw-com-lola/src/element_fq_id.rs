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

//! Uniquely identifies a service element across a node.

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Event,
    Field,
    Method,
    Invalid,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ElementFqId {
    pub service_id: u16,
    pub element_id: u16,
    pub instance_id: u16,
    pub element_kind: ElementKind,
}

impl ElementFqId {
    pub fn new(service_id: u16, element_id: u16, instance_id: u16, element_kind: ElementKind) -> Self {
        Self {
            service_id,
            element_id,
            instance_id,
            element_kind,
        }
    }

    /// A slash-free rendering suitable as a shared-memory region name
    /// stem (`shm_c_name` does not reject interior slashes, but the
    /// rest of this family avoids them for portability). Distinct from
    /// [`Display`](std::fmt::Display), which is for diagnostics only.
    pub fn region_stem(&self) -> String {
        let kind = match self.element_kind {
            ElementKind::Event => "event",
            ElementKind::Field => "field",
            ElementKind::Method => "method",
            ElementKind::Invalid => "invalid",
        };
        format!("svc{}_inst{}_{}{}", self.service_id, self.instance_id, kind, self.element_id)
    }
}

impl std::fmt::Display for ElementFqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/service_{}/instance_{}/element_{}",
            self.element_kind, self.service_id, self.instance_id, self.element_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tuples_compare_equal() {
        let a = ElementFqId::new(1, 2, 3, ElementKind::Event);
        let b = ElementFqId::new(1, 2, 3, ElementKind::Event);
        assert_eq!(a, b);
    }

    #[test]
    fn differing_kind_is_distinct() {
        let a = ElementFqId::new(1, 2, 3, ElementKind::Event);
        let b = ElementFqId::new(1, 2, 3, ElementKind::Field);
        assert_ne!(a, b);
    }

    #[test]
    fn region_stem_contains_no_slashes() {
        let id = ElementFqId::new(1, 2, 3, ElementKind::Event);
        assert!(!id.region_stem().contains('/'));
    }

    #[test]
    fn region_stem_is_distinct_per_element_id() {
        let a = ElementFqId::new(1, 2, 3, ElementKind::Event);
        let b = ElementFqId::new(1, 9, 3, ElementKind::Event);
        assert_ne!(a.region_stem(), b.region_stem());
    }
}
