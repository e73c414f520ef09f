//! Request lifecycle services: callback correlation and the operator façade.

pub mod notifier_callbacks;
pub mod request_service;
pub mod storage_callbacks;

use std::{fmt, sync::Arc};

use tracing::warn;

use fem_model::{FeatureRequestEvent, TenantId};

use crate::{
    database::ports::{
        DisseminationIntentRepository, FeatureRepository,
        FeatureRequestRepository, TenantLease,
    },
    events::{RequestEventPublisher, SessionAgentClient},
};

pub use notifier_callbacks::NotifierCallbackCorrelator;
pub use request_service::{
    FeatureRequestService, RequestHandledResponse, RequestsInfo,
};
pub use storage_callbacks::StorageCallbackCorrelator;

/// Every port the services need, wired to one backend.
#[derive(Clone)]
pub struct FemStores {
    pub requests: Arc<dyn FeatureRequestRepository>,
    pub features: Arc<dyn FeatureRepository>,
    pub intents: Arc<dyn DisseminationIntentRepository>,
    pub lease: Arc<dyn TenantLease>,
    pub request_events: Arc<dyn RequestEventPublisher>,
    pub session_agent: Arc<dyn SessionAgentClient>,
}

impl fmt::Debug for FemStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FemStores").finish_non_exhaustive()
    }
}

/// Request events are informational; a failed publication never undoes
/// the state change it describes.
pub(crate) async fn publish_request_events(
    publisher: &dyn RequestEventPublisher,
    tenant: &TenantId,
    events: Vec<FeatureRequestEvent>,
) {
    if events.is_empty() {
        return;
    }
    let count = events.len();
    if let Err(err) = publisher.publish_request_events(tenant, events).await {
        warn!(%tenant, count, "failed to publish request events: {err}");
    }
}
