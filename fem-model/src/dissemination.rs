use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::{ModelError, Result},
    ids::DisseminationIntentId,
    urn::FeatureUrn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum DisseminationUpdateType {
    /// The feature was sent to the recipient.
    Put,
    /// The recipient acknowledged reception.
    Ack,
}

impl DisseminationUpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisseminationUpdateType::Put => "PUT",
            DisseminationUpdateType::Ack => "ACK",
        }
    }
}

impl fmt::Display for DisseminationUpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisseminationUpdateType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PUT" => Ok(DisseminationUpdateType::Put),
            "ACK" => Ok(DisseminationUpdateType::Ack),
            other => Err(ModelError::UnknownVariant {
                kind: "dissemination update type",
                value: other.to_string(),
            }),
        }
    }
}

/// Queued PUT or ACK awaiting batched application to a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureUpdateDisseminationRequest {
    pub id: DisseminationIntentId,
    pub urn: FeatureUrn,
    pub recipient_label: String,
    pub update_type: DisseminationUpdateType,
    /// Meaningful for PUT only.
    pub ack_required: bool,
    /// Meaningful for PUT only.
    pub blocking: bool,
    pub creation_date: DateTime<Utc>,
}

impl FeatureUpdateDisseminationRequest {
    pub fn put(
        urn: FeatureUrn,
        recipient_label: impl Into<String>,
        ack_required: bool,
        blocking: bool,
    ) -> Self {
        Self {
            id: DisseminationIntentId::new(),
            urn,
            recipient_label: recipient_label.into(),
            update_type: DisseminationUpdateType::Put,
            ack_required,
            blocking,
            creation_date: Utc::now(),
        }
    }

    pub fn ack(urn: FeatureUrn, recipient_label: impl Into<String>) -> Self {
        Self {
            id: DisseminationIntentId::new(),
            urn,
            recipient_label: recipient_label.into(),
            update_type: DisseminationUpdateType::Ack,
            ack_required: false,
            blocking: false,
            creation_date: Utc::now(),
        }
    }

    pub fn is_put(&self) -> bool {
        self.update_type == DisseminationUpdateType::Put
    }
}
