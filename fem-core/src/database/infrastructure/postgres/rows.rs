use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use fem_model::{
    DisseminationIntentId, FeatureDisseminationInfo, FeatureEntity,
    FeatureFile, FeatureRequest, FeatureRequestId, FeatureRequestPayload,
    FeatureUpdateDisseminationRequest, FeatureUrn,
};

use crate::error::{FemError, Result};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeatureRequestRow {
    pub id: Uuid,
    pub request_type: String,
    pub request_id: String,
    pub request_owner: String,
    pub group_id: Option<String>,
    pub urn: Option<String>,
    pub provider_id: Option<String>,
    pub session_owner: String,
    pub session: String,
    pub registration_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub priority: String,
    pub state: String,
    pub step: String,
    pub errors: Vec<String>,
    pub to_notify: Option<serde_json::Value>,
    pub payload: serde_json::Value,
}

impl TryFrom<FeatureRequestRow> for FeatureRequest {
    type Error = FemError;

    fn try_from(row: FeatureRequestRow) -> Result<Self> {
        let payload: FeatureRequestPayload =
            serde_json::from_value(row.payload)?;
        if payload.request_type().as_str() != row.request_type {
            return Err(FemError::Internal(format!(
                "request {} stored as {} but payload is {}",
                row.id,
                row.request_type,
                payload.request_type()
            )));
        }
        let to_notify = row
            .to_notify
            .map(serde_json::from_value::<FeatureEntity>)
            .transpose()?;

        Ok(FeatureRequest {
            id: FeatureRequestId(row.id),
            request_id: row.request_id,
            request_owner: row.request_owner,
            group_id: row.group_id,
            urn: row.urn.map(|u| u.parse::<FeatureUrn>()).transpose()?,
            provider_id: row.provider_id,
            session_owner: row.session_owner,
            session: row.session,
            registration_date: row.registration_date,
            last_update: row.last_update,
            priority: row.priority.parse()?,
            state: row.state.parse()?,
            step: row.step.parse()?,
            errors: row.errors.into_iter().collect::<BTreeSet<_>>(),
            to_notify,
            payload,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeatureRow {
    pub urn: String,
    pub provider_id: String,
    pub session_owner: String,
    pub session: String,
    pub files: serde_json::Value,
    pub dissemination_info: serde_json::Value,
    pub dissemination_pending: bool,
    pub creation_date: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl TryFrom<FeatureRow> for FeatureEntity {
    type Error = FemError;

    fn try_from(row: FeatureRow) -> Result<Self> {
        let files: Vec<FeatureFile> = serde_json::from_value(row.files)?;
        let dissemination_info: BTreeMap<String, FeatureDisseminationInfo> =
            serde_json::from_value(row.dissemination_info)?;
        Ok(FeatureEntity {
            urn: row.urn.parse()?,
            provider_id: row.provider_id,
            session_owner: row.session_owner,
            session: row.session,
            files,
            dissemination_info,
            dissemination_pending: row.dissemination_pending,
            creation_date: row.creation_date,
            last_update: row.last_update,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DisseminationIntentRow {
    pub id: Uuid,
    pub urn: String,
    pub recipient_label: String,
    pub update_type: String,
    pub ack_required: bool,
    pub blocking: bool,
    pub creation_date: DateTime<Utc>,
}

impl TryFrom<DisseminationIntentRow> for FeatureUpdateDisseminationRequest {
    type Error = FemError;

    fn try_from(row: DisseminationIntentRow) -> Result<Self> {
        Ok(FeatureUpdateDisseminationRequest {
            id: DisseminationIntentId(row.id),
            urn: row.urn.parse()?,
            recipient_label: row.recipient_label,
            update_type: row.update_type.parse()?,
            ack_required: row.ack_required,
            blocking: row.blocking,
            creation_date: row.creation_date,
        })
    }
}
