//! Feature request sum type: a common header plus one payload arm per kind.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::{ModelError, Result},
    feature::{FeatureEntity, FeatureFile},
    ids::FeatureRequestId,
    urn::FeatureUrn,
};

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $(
                #[cfg_attr(feature = "serde", serde(rename = $text))]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ModelError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Discriminant of [`FeatureRequestPayload`].
    FeatureRequestType, "request type" {
        Creation => "CREATION",
        Update => "UPDATE",
        Deletion => "DELETION",
        Copy => "COPY",
        Notification => "NOTIFICATION",
        SaveMetadata => "SAVE_METADATA",
    }
}

string_enum! {
    /// Coarse lifecycle state of a request.
    RequestState, "request state" {
        Granted => "GRANTED",
        Success => "SUCCESS",
        Error => "ERROR",
        Denied => "DENIED",
    }
}

string_enum! {
    /// Fine-grained progress marker within a request's lifecycle.
    FeatureRequestStep, "request step" {
        LocalDelayed => "LOCAL_DELAYED",
        LocalScheduled => "LOCAL_SCHEDULED",
        LocalError => "LOCAL_ERROR",
        LocalToBeNotified => "LOCAL_TO_BE_NOTIFIED",
        RemoteStorageRequested => "REMOTE_STORAGE_REQUESTED",
        RemoteStorageDeletionRequested => "REMOTE_STORAGE_DELETION_REQUESTED",
        RemoteStorageError => "REMOTE_STORAGE_ERROR",
        RemoteNotificationRequested => "REMOTE_NOTIFICATION_REQUESTED",
        RemoteNotificationError => "REMOTE_NOTIFICATION_ERROR",
        RemoteNotificationSuccess => "REMOTE_NOTIFICATION_SUCCESS",
        WaitingBlockingDissemination => "WAITING_BLOCKING_DISSEMINATION",
    }
}

string_enum! {
    PriorityLevel, "priority" {
        Low => "LOW",
        Normal => "NORMAL",
        High => "HIGH",
    }
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::Normal
    }
}

/// Kind-specific part of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum FeatureRequestPayload {
    /// Files of the feature to create once storage confirms them.
    Creation { files: Vec<FeatureFile> },
    /// Replacement files pushed by the update.
    Update { files: Vec<FeatureFile> },
    Deletion { already_deleted: bool },
    Copy { storage: String, checksum: String },
    Notification,
    SaveMetadata,
}

impl FeatureRequestPayload {
    pub fn request_type(&self) -> FeatureRequestType {
        match self {
            FeatureRequestPayload::Creation { .. } => FeatureRequestType::Creation,
            FeatureRequestPayload::Update { .. } => FeatureRequestType::Update,
            FeatureRequestPayload::Deletion { .. } => FeatureRequestType::Deletion,
            FeatureRequestPayload::Copy { .. } => FeatureRequestType::Copy,
            FeatureRequestPayload::Notification => {
                FeatureRequestType::Notification
            }
            FeatureRequestPayload::SaveMetadata => {
                FeatureRequestType::SaveMetadata
            }
        }
    }
}

/// A pending or terminal request against one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureRequest {
    pub id: FeatureRequestId,
    /// Correlation key for notifier callbacks.
    pub request_id: String,
    pub request_owner: String,
    /// Correlation key for storage callbacks.
    pub group_id: Option<String>,
    pub urn: Option<FeatureUrn>,
    pub provider_id: Option<String>,
    pub session_owner: String,
    pub session: String,
    pub registration_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub priority: PriorityLevel,
    pub state: RequestState,
    pub step: FeatureRequestStep,
    pub errors: BTreeSet<String>,
    /// Snapshot handed to the notification step.
    pub to_notify: Option<FeatureEntity>,
    pub payload: FeatureRequestPayload,
}

impl FeatureRequest {
    pub fn new(
        request_id: impl Into<String>,
        request_owner: impl Into<String>,
        session_owner: impl Into<String>,
        session: impl Into<String>,
        payload: FeatureRequestPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FeatureRequestId::new(),
            request_id: request_id.into(),
            request_owner: request_owner.into(),
            group_id: None,
            urn: None,
            provider_id: None,
            session_owner: session_owner.into(),
            session: session.into(),
            registration_date: now,
            last_update: now,
            priority: PriorityLevel::default(),
            state: RequestState::Granted,
            step: FeatureRequestStep::LocalDelayed,
            errors: BTreeSet::new(),
            to_notify: None,
            payload,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_urn(mut self, urn: FeatureUrn) -> Self {
        self.urn = Some(urn);
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_step(mut self, step: FeatureRequestStep) -> Self {
        self.step = step;
        self
    }

    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = state;
        self
    }

    pub fn request_type(&self) -> FeatureRequestType {
        self.payload.request_type()
    }
}
