use async_trait::async_trait;

use fem_model::{
    FeatureEntity, FeatureRequest, FeatureRequestId, FeatureRequestStep,
    FeatureRequestType, FeatureUrn, Page, PageResult, RequestSelection,
    RequestSort, RequestState, TenantId,
};

use crate::error::Result;

/// Keyed state transition applied to a set of requests.
///
/// Only the listed columns are written so concurrent correlators never
/// overwrite each other's changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestStateUpdate {
    pub ids: Vec<FeatureRequestId>,
    pub state: RequestState,
    pub step: FeatureRequestStep,
    /// Cause appended to the requests' error set.
    pub error: Option<String>,
    /// Drop previously recorded causes (retry).
    pub clear_errors: bool,
}

impl RequestStateUpdate {
    pub fn new(
        ids: Vec<FeatureRequestId>,
        state: RequestState,
        step: FeatureRequestStep,
    ) -> Self {
        Self {
            ids,
            state,
            step,
            error: None,
            clear_errors: false,
        }
    }

    pub fn with_error(mut self, cause: impl Into<String>) -> Self {
        self.error = Some(cause.into());
        self
    }

    pub fn clearing_errors(mut self) -> Self {
        self.clear_errors = true;
        self
    }
}

#[async_trait]
pub trait FeatureRequestRepository: Send + Sync {
    async fn insert_requests(
        &self,
        tenant: &TenantId,
        requests: Vec<FeatureRequest>,
    ) -> Result<()>;

    async fn find_by_ids(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<Vec<FeatureRequest>>;

    /// Requests of the given types correlated to storage callbacks.
    async fn find_by_group_ids(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        group_ids: &[String],
    ) -> Result<Vec<FeatureRequest>>;

    /// Requests correlated to notifier callbacks.
    async fn find_by_request_ids(
        &self,
        tenant: &TenantId,
        request_ids: &[String],
    ) -> Result<Vec<FeatureRequest>>;

    async fn update_state_and_step(
        &self,
        tenant: &TenantId,
        update: RequestStateUpdate,
    ) -> Result<u64>;

    /// Park a request for the notification step with the feature snapshot.
    async fn mark_to_notify(
        &self,
        tenant: &TenantId,
        id: FeatureRequestId,
        snapshot: Option<FeatureEntity>,
    ) -> Result<()>;

    /// Move requests of the given types on the given urns from one step to
    /// another. Returns the number of rows moved.
    async fn move_step_for_urns(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        urns: &[FeatureUrn],
        from: FeatureRequestStep,
        to: FeatureRequestStep,
    ) -> Result<u64>;

    async fn delete_requests(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<u64>;

    /// Swap one request for another in a single atomic step.
    async fn replace_request(
        &self,
        tenant: &TenantId,
        old: FeatureRequestId,
        new: FeatureRequest,
    ) -> Result<()>;

    async fn list_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
        sort: RequestSort,
        page: Page,
    ) -> Result<PageResult<FeatureRequest>>;

    async fn count_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<u64>;
}
