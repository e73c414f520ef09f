use std::{collections::HashSet, fmt, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use fem_model::{
    DisseminationAckEvent, FeatureRequest, FeatureRequestEvent,
    FeatureRequestId, FeatureRequestStep, FeatureRequestType, FeatureUrn,
    NotifierEvent, Page, PageResult, RequestResultInfo, RequestSelection,
    RequestSort, RequestState, TenantId,
};

use super::{
    FemStores, NotifierCallbackCorrelator, StorageCallbackCorrelator,
    publish_request_events,
};
use crate::{
    config::FemConfig,
    database::ports::{
        FeatureRepository, FeatureRequestRepository, RequestStateUpdate,
    },
    dissemination::DisseminationRequestProcessor,
    error::Result,
    events::RequestEventPublisher,
};

/// Cause recorded on every aborted request.
pub const ABORT_CAUSE: &str = "Request has been aborted.";

/// Outcome of a bulk operation on a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestHandledResponse {
    pub total: u64,
    pub handled: u64,
    pub message: Option<String>,
}

impl RequestHandledResponse {
    fn new(total: u64, handled: u64, operation: &str) -> Self {
        let message = (total != handled).then(|| {
            format!(
                "{operation}: {handled} of {total} selected requests handled, \
                 the remaining ones changed or exceeded the page limit"
            )
        });
        Self {
            total,
            handled,
            message,
        }
    }

    fn rejected(message: String) -> Self {
        Self {
            total: 0,
            handled: 0,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestsInfo {
    pub nb_errors: u64,
}

/// Steps an abort moves GRANTED requests out of, per request type.
fn abortable_steps(
    request_type: FeatureRequestType,
) -> &'static [(FeatureRequestStep, FeatureRequestStep)] {
    use FeatureRequestStep as S;
    match request_type {
        FeatureRequestType::Notification => {
            &[(S::RemoteNotificationRequested, S::RemoteNotificationError)]
        }
        FeatureRequestType::Creation => &[
            (S::RemoteStorageRequested, S::RemoteStorageError),
            (S::RemoteNotificationRequested, S::RemoteNotificationError),
        ],
        FeatureRequestType::Update => &[
            (S::RemoteStorageRequested, S::RemoteStorageError),
            (S::RemoteNotificationRequested, S::RemoteNotificationError),
            (S::RemoteStorageDeletionRequested, S::RemoteStorageError),
        ],
        FeatureRequestType::Deletion => &[
            (S::RemoteNotificationRequested, S::RemoteNotificationError),
            (S::RemoteStorageDeletionRequested, S::RemoteStorageError),
            (S::WaitingBlockingDissemination, S::LocalError),
        ],
        FeatureRequestType::Copy | FeatureRequestType::SaveMetadata => &[],
    }
}

/// Narrow `selection` to one state. `None` when the caller asked for
/// another state, so nothing can match.
fn restrict_state(
    selection: &RequestSelection,
    state: RequestState,
) -> Option<RequestSelection> {
    match selection.state {
        Some(requested) if requested != state => None,
        _ => Some(selection.clone().with_state(state)),
    }
}

/// Operator and callback entry points over the feature requests of every
/// type.
#[derive(Clone)]
pub struct FeatureRequestService {
    requests: Arc<dyn FeatureRequestRepository>,
    features: Arc<dyn FeatureRepository>,
    events: Arc<dyn RequestEventPublisher>,
    storage: StorageCallbackCorrelator,
    notifier: NotifierCallbackCorrelator,
    processor: DisseminationRequestProcessor,
    config: FemConfig,
}

impl fmt::Debug for FeatureRequestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRequestService")
            .field("notification", &self.config.notification)
            .field("abort", &self.config.abort)
            .finish()
    }
}

impl FeatureRequestService {
    pub fn new(stores: &FemStores, config: FemConfig) -> Self {
        let processor = DisseminationRequestProcessor::new(
            stores.intents.clone(),
            stores.features.clone(),
            stores.session_agent.clone(),
            config.dissemination.page_size,
        );
        let storage = StorageCallbackCorrelator::new(
            stores.requests.clone(),
            stores.features.clone(),
            stores.request_events.clone(),
            config.notification,
        );
        let notifier = NotifierCallbackCorrelator::new(
            stores.requests.clone(),
            processor.clone(),
            stores.request_events.clone(),
        );
        Self {
            requests: stores.requests.clone(),
            features: stores.features.clone(),
            events: stores.request_events.clone(),
            storage,
            notifier,
            processor,
            config,
        }
    }

    pub fn processor(&self) -> &DisseminationRequestProcessor {
        &self.processor
    }

    /// Persist new requests and announce them as GRANTED.
    pub async fn register_requests(
        &self,
        tenant: &TenantId,
        requests: Vec<FeatureRequest>,
    ) -> Result<usize> {
        if requests.is_empty() {
            return Ok(0);
        }
        let events: Vec<FeatureRequestEvent> = requests
            .iter()
            .map(|r| FeatureRequestEvent::from_request(r, RequestState::Granted))
            .collect();
        let registered = requests.len();
        self.requests.insert_requests(tenant, requests).await?;
        publish_request_events(self.events.as_ref(), tenant, events).await;
        Ok(registered)
    }

    pub async fn find_all(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
        sort: RequestSort,
        page: Page,
    ) -> Result<PageResult<FeatureRequest>> {
        self.requests
            .list_requests(tenant, request_type, selection, sort, page)
            .await
    }

    /// Number of requests in ERROR for the selection.
    pub async fn get_info(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<RequestsInfo> {
        let nb_errors = match restrict_state(selection, RequestState::Error) {
            Some(errors) => {
                self.requests
                    .count_requests(tenant, request_type, &errors)
                    .await?
            }
            None => 0,
        };
        Ok(RequestsInfo { nb_errors })
    }

    /// Keyed state transition, used by the processing steps that hand
    /// requests to storage or the notifier.
    pub async fn update_request_state_and_step(
        &self,
        tenant: &TenantId,
        ids: Vec<FeatureRequestId>,
        state: RequestState,
        step: FeatureRequestStep,
    ) -> Result<u64> {
        self.requests
            .update_state_and_step(tenant, RequestStateUpdate::new(ids, state, step))
            .await
    }

    /// Walk the selection page by page from the first page, applying `op` to
    /// each page. `op` must move the handled requests out of the selection.
    async fn for_each_page<F, Fut>(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
        mut op: F,
    ) -> Result<u64>
    where
        F: FnMut(Vec<FeatureRequest>) -> Fut,
        Fut: std::future::Future<Output = Result<u64>>,
    {
        let page = Page::new(
            u32::try_from(self.config.abort.page_size).unwrap_or(u32::MAX),
            0,
        );
        let mut handled = 0;
        for _ in 0..self.config.abort.max_page_loop {
            let batch = self
                .requests
                .list_requests(
                    tenant,
                    request_type,
                    selection,
                    RequestSort::default(),
                    page,
                )
                .await?;
            if batch.items.is_empty() {
                break;
            }
            let moved = op(batch.items).await?;
            handled += moved;
            if moved == 0 {
                break;
            }
        }
        Ok(handled)
    }

    /// Delete the ERROR requests of the selection.
    pub async fn delete(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<RequestHandledResponse> {
        let Some(errors) = restrict_state(selection, RequestState::Error) else {
            return Ok(RequestHandledResponse::new(0, 0, "delete"));
        };
        let total = self
            .requests
            .count_requests(tenant, request_type, &errors)
            .await?;
        let requests = &self.requests;
        let handled = self
            .for_each_page(tenant, request_type, &errors, |batch| async move {
                let ids: Vec<FeatureRequestId> = batch.iter().map(|r| r.id).collect();
                requests.delete_requests(tenant, &ids).await
            })
            .await?;
        info!(%tenant, %request_type, total, handled, "requests deleted");
        Ok(RequestHandledResponse::new(total, handled, "delete"))
    }

    /// Put the ERROR requests of the selection back to GRANTED /
    /// LOCAL_DELAYED, clearing their causes.
    pub async fn retry(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<RequestHandledResponse> {
        let Some(errors) = restrict_state(selection, RequestState::Error) else {
            return Ok(RequestHandledResponse::new(0, 0, "retry"));
        };
        let total = self
            .requests
            .count_requests(tenant, request_type, &errors)
            .await?;
        let requests = &self.requests;
        let handled = self
            .for_each_page(tenant, request_type, &errors, |batch| async move {
                let update = RequestStateUpdate::new(
                    batch.iter().map(|r| r.id).collect(),
                    RequestState::Granted,
                    FeatureRequestStep::LocalDelayed,
                )
                .clearing_errors();
                requests.update_state_and_step(tenant, update).await
            })
            .await?;
        info!(%tenant, %request_type, total, handled, "requests retried");
        Ok(RequestHandledResponse::new(total, handled, "retry"))
    }

    /// Force GRANTED requests stuck at a remote step into ERROR.
    pub async fn abort(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<RequestHandledResponse> {
        let steps = abortable_steps(request_type);
        if steps.is_empty() {
            warn!(%tenant, %request_type, "abort is not supported for this request type");
            return Ok(RequestHandledResponse::rejected(format!(
                "Abort is not supported for {request_type} requests"
            )));
        }
        let Some(granted) = restrict_state(selection, RequestState::Granted) else {
            return Ok(RequestHandledResponse::new(0, 0, "abort"));
        };

        let idle_since = Utc::now() - self.config.abort.min_age();
        let mut base = granted;
        base.last_update_before = Some(match base.last_update_before {
            Some(before) => before.min(idle_since),
            None => idle_since,
        });

        let mut total = 0;
        let mut handled = 0;
        for &(from, to) in steps {
            if base.step.is_some_and(|step| step != from) {
                continue;
            }
            let mut at_step = base.clone();
            at_step.step = Some(from);

            total += self
                .requests
                .count_requests(tenant, request_type, &at_step)
                .await?;
            let requests = &self.requests;
            handled += self
                .for_each_page(tenant, request_type, &at_step, |batch| async move {
                    let update = RequestStateUpdate::new(
                        batch.iter().map(|r| r.id).collect(),
                        RequestState::Error,
                        to,
                    )
                    .with_error(ABORT_CAUSE);
                    requests.update_state_and_step(tenant, update).await
                })
                .await?;
        }

        info!(%tenant, %request_type, total, handled, "requests aborted");
        Ok(RequestHandledResponse::new(total, handled, "abort"))
    }

    /// Park GRANTED UPDATE and DELETION requests behind their feature's
    /// pending blocking dissemination.
    pub async fn hold_blocked_requests(&self, tenant: &TenantId) -> Result<u64> {
        let types = [FeatureRequestType::Update, FeatureRequestType::Deletion];
        let delayed = RequestSelection {
            state: Some(RequestState::Granted),
            step: Some(FeatureRequestStep::LocalDelayed),
            ..RequestSelection::default()
        };

        let mut urns: HashSet<FeatureUrn> = HashSet::new();
        for request_type in types {
            let mut offset = 0;
            loop {
                let page = self
                    .requests
                    .list_requests(
                        tenant,
                        request_type,
                        &delayed,
                        RequestSort::default(),
                        Page::new(
                            u32::try_from(self.config.abort.page_size)
                                .unwrap_or(u32::MAX),
                            offset,
                        ),
                    )
                    .await?;
                if page.items.is_empty() {
                    break;
                }
                offset += page.items.len() as u64;
                urns.extend(page.items.into_iter().filter_map(|r| r.urn));
                if offset >= page.total {
                    break;
                }
            }
        }
        if urns.is_empty() {
            return Ok(0);
        }

        let urns: Vec<FeatureUrn> = urns.into_iter().collect();
        let blocked: Vec<FeatureUrn> = self
            .features
            .find_by_urns(tenant, &urns)
            .await?
            .into_iter()
            .filter(|f| f.has_blocking_dissemination_pending())
            .map(|f| f.urn)
            .collect();
        if blocked.is_empty() {
            return Ok(0);
        }

        let held = self
            .requests
            .move_step_for_urns(
                tenant,
                &types,
                &blocked,
                FeatureRequestStep::LocalDelayed,
                FeatureRequestStep::WaitingBlockingDissemination,
            )
            .await?;
        info!(%tenant, features = blocked.len(), held, "requests held behind blocking dissemination");
        Ok(held)
    }

    pub async fn handle_storage_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_storage_success(tenant, results).await
    }

    pub async fn handle_storage_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_storage_error(tenant, results).await
    }

    pub async fn handle_deletion_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_deletion_success(tenant, results).await
    }

    pub async fn handle_deletion_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_deletion_error(tenant, results).await
    }

    pub async fn handle_copy_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_copy_success(tenant, results).await
    }

    pub async fn handle_copy_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.storage.handle_copy_error(tenant, results).await
    }

    pub async fn on_notifier_success(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        self.notifier.on_request_success(tenant, events).await
    }

    pub async fn on_notifier_error(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        self.notifier.on_request_error(tenant, events).await
    }

    pub async fn on_notifier_denied(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        self.notifier.on_request_denied(tenant, events).await
    }

    pub async fn save_ack_requests(
        &self,
        tenant: &TenantId,
        events: &[DisseminationAckEvent],
    ) -> Result<usize> {
        self.processor.save_ack_requests(tenant, events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_table_covers_storage_and_notification_types_only() {
        assert!(abortable_steps(FeatureRequestType::Copy).is_empty());
        assert!(abortable_steps(FeatureRequestType::SaveMetadata).is_empty());
        assert_eq!(abortable_steps(FeatureRequestType::Notification).len(), 1);
        assert!(abortable_steps(FeatureRequestType::Deletion).contains(&(
            FeatureRequestStep::WaitingBlockingDissemination,
            FeatureRequestStep::LocalError,
        )));
    }

    #[test]
    fn state_restriction_rejects_conflicting_state() {
        let selection = RequestSelection::all().with_state(RequestState::Granted);
        assert!(restrict_state(&selection, RequestState::Error).is_none());

        let narrowed =
            restrict_state(&RequestSelection::all(), RequestState::Error).unwrap();
        assert_eq!(narrowed.state, Some(RequestState::Error));
    }

    #[test]
    fn response_message_only_when_counts_differ() {
        assert!(RequestHandledResponse::new(3, 3, "retry").message.is_none());
        assert!(RequestHandledResponse::new(3, 1, "retry").message.is_some());
    }
}
