use std::{collections::HashSet, fmt, sync::Arc};

use tracing::{debug, info, warn};

use fem_model::{
    FeatureRequest, FeatureRequestEvent, FeatureRequestId, FeatureRequestStep,
    FeatureRequestType, NotificationState, NotifierEvent, RequestState,
    TenantId,
};

use super::publish_request_events;
use crate::{
    database::ports::{FeatureRequestRepository, RequestStateUpdate},
    dissemination::DisseminationRequestProcessor,
    error::Result,
    events::RequestEventPublisher,
};

/// Correlates notifier callbacks to requests by request id and turns
/// successful notifications into dissemination PUT intents.
#[derive(Clone)]
pub struct NotifierCallbackCorrelator {
    requests: Arc<dyn FeatureRequestRepository>,
    processor: DisseminationRequestProcessor,
    events: Arc<dyn RequestEventPublisher>,
}

impl fmt::Debug for NotifierCallbackCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierCallbackCorrelator")
            .field("processor", &self.processor)
            .finish()
    }
}

impl NotifierCallbackCorrelator {
    pub fn new(
        requests: Arc<dyn FeatureRequestRepository>,
        processor: DisseminationRequestProcessor,
        events: Arc<dyn RequestEventPublisher>,
    ) -> Self {
        Self {
            requests,
            processor,
            events,
        }
    }

    async fn correlate(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<Vec<FeatureRequest>> {
        let request_ids: Vec<String> = events
            .iter()
            .map(|e| e.request_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if request_ids.is_empty() {
            return Ok(Vec::new());
        }
        let requests = self
            .requests
            .find_by_request_ids(tenant, &request_ids)
            .await?;

        let matched: HashSet<&str> =
            requests.iter().map(|r| r.request_id.as_str()).collect();
        for request_id in request_ids.iter().filter(|id| !matched.contains(id.as_str())) {
            warn!(%tenant, request_id = %request_id, "notifier event matches no request, dropped");
        }
        Ok(requests)
    }

    /// Record one PUT intent per recipient, then complete the notified
    /// requests.
    pub async fn on_request_success(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        let requests = self.correlate(tenant, events).await?;
        if requests.is_empty() {
            return Ok(0);
        }
        let queued = self
            .processor
            .save_put_requests(tenant, events, &requests)
            .await?;
        let handled = self.handle_notification_success(tenant, &requests).await?;
        info!(%tenant, events = events.len(), handled, intents = queued, "notifier success handled");
        Ok(handled)
    }

    pub async fn on_request_error(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        self.fail_requests(tenant, events).await
    }

    pub async fn on_request_denied(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        self.fail_requests(tenant, events).await
    }

    /// Terminal bookkeeping of notified requests. CREATION, COPY and
    /// NOTIFICATION requests are deleted; the others are kept as SUCCESS.
    pub async fn handle_notification_success(
        &self,
        tenant: &TenantId,
        requests: &[FeatureRequest],
    ) -> Result<usize> {
        let (to_delete, to_keep): (Vec<&FeatureRequest>, Vec<&FeatureRequest>) =
            requests.iter().partition(|r| {
                matches!(
                    r.request_type(),
                    FeatureRequestType::Creation
                        | FeatureRequestType::Copy
                        | FeatureRequestType::Notification
                )
            });

        if !to_delete.is_empty() {
            let ids: Vec<FeatureRequestId> = to_delete.iter().map(|r| r.id).collect();
            self.requests.delete_requests(tenant, &ids).await?;
        }
        if !to_keep.is_empty() {
            let ids = to_keep.iter().map(|r| r.id).collect();
            self.requests
                .update_state_and_step(
                    tenant,
                    RequestStateUpdate::new(
                        ids,
                        RequestState::Success,
                        FeatureRequestStep::RemoteNotificationSuccess,
                    ),
                )
                .await?;
        }

        let events = requests
            .iter()
            .map(|r| FeatureRequestEvent::from_request(r, RequestState::Success))
            .collect();
        publish_request_events(self.events.as_ref(), tenant, events).await;
        Ok(requests.len())
    }

    async fn fail_requests(
        &self,
        tenant: &TenantId,
        events: &[NotifierEvent],
    ) -> Result<usize> {
        let requests = self.correlate(tenant, events).await?;

        let mut handled = 0;
        let mut published = Vec::new();
        for request in requests {
            if request.state != RequestState::Granted {
                debug!(
                    %tenant,
                    request_id = %request.request_id,
                    state = %request.state,
                    "notifier error for a settled request, ignored"
                );
                continue;
            }
            let state = events
                .iter()
                .find(|e| e.request_id == request.request_id)
                .map(|e| e.state)
                .unwrap_or(NotificationState::Error);
            let cause = match state {
                NotificationState::Denied => "Notification denied by notifier",
                _ => "Notification failed",
            };
            let update = RequestStateUpdate::new(
                vec![request.id],
                RequestState::Error,
                FeatureRequestStep::RemoteNotificationError,
            )
            .with_error(cause);

            match self.requests.update_state_and_step(tenant, update).await {
                Ok(_) => {
                    handled += 1;
                    let mut event =
                        FeatureRequestEvent::from_request(&request, RequestState::Error);
                    event.errors.insert(cause.to_string());
                    published.push(event);
                }
                Err(err) => warn!(
                    %tenant,
                    request_id = %request.request_id,
                    "notification error could not be recorded: {err}"
                ),
            }
        }

        publish_request_events(self.events.as_ref(), tenant, published).await;
        info!(%tenant, events = events.len(), handled, "notifier errors recorded");
        Ok(handled)
    }
}
