//! Selection, sorting and paging of request listings.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::{ModelError, Result},
    ids::FeatureRequestId,
    request::{FeatureRequest, FeatureRequestStep, RequestState},
};

/// Filters shared by listing, deletion, retry, abort and info counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RequestSelection {
    pub ids: Option<Vec<FeatureRequestId>>,
    pub state: Option<RequestState>,
    pub step: Option<FeatureRequestStep>,
    pub source: Option<String>,
    pub session: Option<String>,
    pub provider_id: Option<String>,
    pub registered_after: Option<DateTime<Utc>>,
    pub registered_before: Option<DateTime<Utc>>,
    pub last_update_before: Option<DateTime<Utc>>,
}

impl RequestSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_ids(mut self, ids: Vec<FeatureRequestId>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Header-level match. `provider_id` falls back to the feature's value
    /// when the request does not carry one.
    pub fn matches(
        &self,
        request: &FeatureRequest,
        feature_provider_id: Option<&str>,
    ) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&request.id)
        {
            return false;
        }
        if self.state.is_some_and(|s| s != request.state) {
            return false;
        }
        if self.step.is_some_and(|s| s != request.step) {
            return false;
        }
        if let Some(source) = &self.source
            && *source != request.session_owner
        {
            return false;
        }
        if let Some(session) = &self.session
            && *session != request.session
        {
            return false;
        }
        if let Some(provider_id) = &self.provider_id {
            let actual =
                request.provider_id.as_deref().or(feature_provider_id);
            if actual != Some(provider_id.as_str()) {
                return false;
            }
        }
        if self
            .registered_after
            .is_some_and(|after| request.registration_date < after)
        {
            return false;
        }
        if self
            .registered_before
            .is_some_and(|before| request.registration_date > before)
        {
            return false;
        }
        if self
            .last_update_before
            .is_some_and(|before| request.last_update >= before)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sortable fields as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestSortField {
    ProviderId,
    Source,
    Session,
    #[default]
    RegistrationDate,
    LastUpdate,
    State,
    Step,
}

impl RequestSortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestSortField::ProviderId => "providerId",
            RequestSortField::Source => "source",
            RequestSortField::Session => "session",
            RequestSortField::RegistrationDate => "registrationDate",
            RequestSortField::LastUpdate => "lastUpdate",
            RequestSortField::State => "state",
            RequestSortField::Step => "step",
        }
    }
}

impl fmt::Display for RequestSortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestSortField {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "providerId" => Ok(RequestSortField::ProviderId),
            "source" => Ok(RequestSortField::Source),
            "session" => Ok(RequestSortField::Session),
            "registrationDate" => Ok(RequestSortField::RegistrationDate),
            "lastUpdate" => Ok(RequestSortField::LastUpdate),
            "state" => Ok(RequestSortField::State),
            "step" => Ok(RequestSortField::Step),
            other => Err(ModelError::UnknownVariant {
                kind: "sort field",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestSort {
    pub field: RequestSortField,
    pub direction: SortDirection,
}

impl RequestSort {
    pub fn new(field: RequestSortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: u32, offset: u64) -> Self {
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: u64,
}
