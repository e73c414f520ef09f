//! Messages exchanged with the storage subsystem, the notifier, recipients
//! and the session agent.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::{
    request::{FeatureRequestType, RequestState},
    urn::FeatureUrn,
};

/// Where the storage subsystem put a file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredFileLocation {
    pub storage: String,
    pub url: String,
}

/// One item of a storage success or error batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestResultInfo {
    pub group_id: String,
    pub checksum: String,
    pub result_file: Option<StoredFileLocation>,
    /// Owners attached to the stored file; for copies these are feature urns.
    pub request_owners: Vec<String>,
    pub error_cause: Option<String>,
}

impl RequestResultInfo {
    pub fn success(
        group_id: impl Into<String>,
        checksum: impl Into<String>,
        storage: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            checksum: checksum.into(),
            result_file: Some(StoredFileLocation {
                storage: storage.into(),
                url: url.into(),
            }),
            request_owners: Vec::new(),
            error_cause: None,
        }
    }

    pub fn error(
        group_id: impl Into<String>,
        checksum: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            checksum: checksum.into(),
            result_file: None,
            request_owners: Vec::new(),
            error_cause: Some(cause.into()),
        }
    }

    pub fn with_owners(
        mut self,
        owners: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.request_owners = owners.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum NotificationState {
    Success,
    Error,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Recipient {
    pub label: String,
    pub ack_required: bool,
    pub blocking: bool,
    pub status: NotificationState,
}

impl Recipient {
    pub fn new(label: impl Into<String>, ack_required: bool, blocking: bool) -> Self {
        Self {
            label: label.into(),
            ack_required,
            blocking,
            status: NotificationState::Success,
        }
    }
}

/// Outcome of a notification as reported by the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotifierEvent {
    pub request_id: String,
    pub request_owner: String,
    pub state: NotificationState,
    pub recipients: Vec<Recipient>,
    pub timestamp: DateTime<Utc>,
}

impl NotifierEvent {
    pub fn new(
        request_id: impl Into<String>,
        request_owner: impl Into<String>,
        state: NotificationState,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request_owner: request_owner.into(),
            state,
            recipients,
            timestamp: Utc::now(),
        }
    }
}

/// Acknowledgment sent back by a recipient.
///
/// The urn is kept as raw text: recipients are external and may send garbage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DisseminationAckEvent {
    pub urn: String,
    pub recipient_label: String,
}

/// Published whenever a request changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureRequestEvent {
    pub request_id: String,
    pub request_owner: String,
    pub request_type: FeatureRequestType,
    pub provider_id: Option<String>,
    pub urn: Option<FeatureUrn>,
    pub state: RequestState,
    pub errors: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl FeatureRequestEvent {
    pub fn from_request(
        request: &crate::request::FeatureRequest,
        state: RequestState,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            request_owner: request.request_owner.clone(),
            request_type: request.request_type(),
            provider_id: request.provider_id.clone(),
            urn: request.urn.clone(),
            state,
            errors: request.errors.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum StepPropertyEventType {
    Inc,
    Dec,
    Value,
}

/// Session counter update sent to the session agent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepPropertyEvent {
    pub step_id: String,
    pub source: String,
    pub session: String,
    pub property: String,
    pub value: i64,
    pub event_type: StepPropertyEventType,
}

impl StepPropertyEvent {
    /// Contribution of this event to a running total.
    pub fn signed_value(&self) -> i64 {
        match self.event_type {
            StepPropertyEventType::Inc => self.value,
            StepPropertyEventType::Dec => -self.value,
            StepPropertyEventType::Value => 0,
        }
    }
}
