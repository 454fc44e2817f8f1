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

//! The unified façade error surface. Every binding-level error
//! (`AllocateError`, `SendError`, `SubscribeError`, `OfferServiceError`,
//! ...) converts into one of these variants via `From`, so a caller
//! working purely against the façade only ever matches on `ComError`.

use mw_com_lola::control::{AllocateError, SendError};
use mw_com_lola::proxy_event::GetNewSamplesError;
use mw_com_lola::service_instance::OfferServiceError;
use mw_com_lola::skeleton_event::SendValueError;
use mw_com_lola::subscription::SubscribeError;
use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComError {
    SampleAllocationFailure,
    BindingFailure,
    InvalidConfiguration,
    InvalidInstanceIdentifierString,
    InvalidBindingInformation,
    InvalidHandle,
    ServiceNotAvailable,
    ServiceNotOffered,
    CommunicationLinkError,
    FieldValueIsNotValid,
    CouldNotExecute,
    MethodNotExisting,
}

impl fmt::Display for ComError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComError::SampleAllocationFailure => "kSampleAllocationFailure",
            ComError::BindingFailure => "kBindingFailure",
            ComError::InvalidConfiguration => "kInvalidConfiguration",
            ComError::InvalidInstanceIdentifierString => "kInvalidInstanceIdentifierString",
            ComError::InvalidBindingInformation => "kInvalidBindingInformation",
            ComError::InvalidHandle => "kInvalidHandle",
            ComError::ServiceNotAvailable => "kServiceNotAvailable",
            ComError::ServiceNotOffered => "kServiceNotOffered",
            ComError::CommunicationLinkError => "kCommunicationLinkError",
            ComError::FieldValueIsNotValid => "kFieldValueIsNotValid",
            ComError::CouldNotExecute => "kCouldNotExecute",
            ComError::MethodNotExisting => "kMethodNotExisting",
        };
        f.write_str(name)
    }
}

impl From<AllocateError> for ComError {
    fn from(_: AllocateError) -> Self {
        ComError::SampleAllocationFailure
    }
}

impl From<SendError> for ComError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::NotInWriting => ComError::CouldNotExecute,
            SendError::TimestampExhausted => ComError::CommunicationLinkError,
        }
    }
}

impl From<SendValueError> for ComError {
    fn from(e: SendValueError) -> Self {
        match e {
            SendValueError::Allocate(inner) => inner.into(),
            SendValueError::Send(inner) => inner.into(),
        }
    }
}

impl From<SubscribeError> for ComError {
    fn from(_: SubscribeError) -> Self {
        ComError::CouldNotExecute
    }
}

impl From<GetNewSamplesError> for ComError {
    fn from(_: GetNewSamplesError) -> Self {
        ComError::ServiceNotOffered
    }
}

impl From<OfferServiceError> for ComError {
    fn from(e: OfferServiceError) -> Self {
        match e {
            OfferServiceError::AlreadyOfferedHere => ComError::BindingFailure,
            OfferServiceError::HeaderVersionMismatch { .. } => ComError::InvalidConfiguration,
            OfferServiceError::InternalError => ComError::CommunicationLinkError,
        }
    }
}
