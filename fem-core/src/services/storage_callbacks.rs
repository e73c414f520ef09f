use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use fem_model::{
    FeatureEntity, FeatureFile, FeatureRequest, FeatureRequestEvent,
    FeatureRequestPayload, FeatureRequestStep, FeatureRequestType, FeatureUrn,
    RequestResultInfo, RequestState, TenantId,
};

use super::publish_request_events;
use crate::{
    config::NotificationConfig,
    database::ports::{
        FeatureRepository, FeatureRequestRepository, RequestStateUpdate,
    },
    error::{FemError, Result},
    events::RequestEventPublisher,
};

/// Owner recorded on COPY requests created from storage copy results.
pub const COPY_REQUEST_OWNER: &str = "fem-storage-copy";

const DEFAULT_STORAGE_ERROR: &str = "Remote storage reported an error";

/// Correlates storage callbacks (store, delete, copy) to the requests that
/// triggered them, by group id.
#[derive(Clone)]
pub struct StorageCallbackCorrelator {
    requests: Arc<dyn FeatureRequestRepository>,
    features: Arc<dyn FeatureRepository>,
    events: Arc<dyn RequestEventPublisher>,
    notification: NotificationConfig,
}

impl fmt::Debug for StorageCallbackCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCallbackCorrelator")
            .field("notification", &self.notification)
            .finish()
    }
}

/// Results indexed by group id, in a stable order.
fn group_results(
    results: &[RequestResultInfo],
) -> BTreeMap<&str, Vec<&RequestResultInfo>> {
    let mut groups: BTreeMap<&str, Vec<&RequestResultInfo>> = BTreeMap::new();
    for result in results {
        groups.entry(result.group_id.as_str()).or_default().push(result);
    }
    groups
}

fn merge_files(target: &mut Vec<FeatureFile>, incoming: &[FeatureFile]) {
    for file in incoming {
        match target.iter_mut().find(|f| f.checksum == file.checksum) {
            Some(existing) => existing.filename = file.filename.clone(),
            None => target.push(file.clone()),
        }
    }
}

fn apply_results(
    feature: &mut FeatureEntity,
    results: &[&RequestResultInfo],
) -> bool {
    let mut changed = false;
    for result in results {
        if let Some(stored) = &result.result_file {
            changed |= feature.update_file_locations(
                &result.checksum,
                &stored.storage,
                &stored.url,
            );
        }
    }
    changed
}

impl StorageCallbackCorrelator {
    pub fn new(
        requests: Arc<dyn FeatureRequestRepository>,
        features: Arc<dyn FeatureRepository>,
        events: Arc<dyn RequestEventPublisher>,
        notification: NotificationConfig,
    ) -> Self {
        Self {
            requests,
            features,
            events,
            notification,
        }
    }

    /// Resolve requests of `types` for the batch's group ids and log the
    /// group ids nothing matched.
    async fn correlate(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        groups: &BTreeMap<&str, Vec<&RequestResultInfo>>,
    ) -> Result<Vec<FeatureRequest>> {
        let group_ids: Vec<String> =
            groups.keys().map(|g| (*g).to_string()).collect();
        let requests = self
            .requests
            .find_by_group_ids(tenant, types, &group_ids)
            .await?;

        let matched: HashSet<&str> = requests
            .iter()
            .filter_map(|r| r.group_id.as_deref())
            .collect();
        for group_id in groups.keys().filter(|g| !matched.contains(**g)) {
            warn!(%tenant, group_id = %group_id, "storage result matches no request, dropped");
        }
        Ok(requests)
    }

    /// Storage confirmed the files of CREATION and UPDATE requests.
    pub async fn handle_storage_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        let groups = group_results(results);
        let requests = self
            .correlate(
                tenant,
                &[FeatureRequestType::Creation, FeatureRequestType::Update],
                &groups,
            )
            .await?;

        let mut handled = 0;
        let mut events = Vec::new();
        for request in requests {
            let group = request
                .group_id
                .as_deref()
                .and_then(|g| groups.get(g))
                .cloned()
                .unwrap_or_default();
            let outcome = match request.request_type() {
                FeatureRequestType::Creation => {
                    self.complete_creation(tenant, &request, &group).await
                }
                _ => self.complete_update(tenant, &request, &group).await,
            };
            match outcome {
                Ok(event) => {
                    handled += 1;
                    events.extend(event);
                }
                Err(err) => warn!(
                    %tenant,
                    request_id = %request.request_id,
                    "storage success could not be applied: {err}"
                ),
            }
        }

        publish_request_events(self.events.as_ref(), tenant, events).await;
        info!(%tenant, results = results.len(), handled, "storage success handled");
        Ok(handled)
    }

    async fn load_feature(
        &self,
        tenant: &TenantId,
        urn: &FeatureUrn,
    ) -> Result<Option<FeatureEntity>> {
        Ok(self
            .features
            .find_by_urns(tenant, std::slice::from_ref(urn))
            .await?
            .into_iter()
            .next())
    }

    async fn complete_creation(
        &self,
        tenant: &TenantId,
        request: &FeatureRequest,
        results: &[&RequestResultInfo],
    ) -> Result<Option<FeatureRequestEvent>> {
        let urn = request.urn.clone().ok_or_else(|| {
            FemError::InvalidInput(format!(
                "creation request {} has no urn",
                request.request_id
            ))
        })?;

        match self.load_feature(tenant, &urn).await? {
            Some(mut feature) => {
                if apply_results(&mut feature, results) {
                    self.features
                        .update_files(tenant, &urn, &feature.files)
                        .await?;
                }
            }
            None => {
                let files = match &request.payload {
                    FeatureRequestPayload::Creation { files } => files.clone(),
                    _ => Vec::new(),
                };
                let mut feature = FeatureEntity::new(
                    urn.clone(),
                    request.provider_id.clone().unwrap_or_default(),
                    request.session_owner.clone(),
                    request.session.clone(),
                    files,
                );
                apply_results(&mut feature, results);
                self.features.insert_feature(tenant, &feature).await?;
                debug!(%tenant, %urn, "feature created");
            }
        }

        if self.notification.active {
            let mut notification = FeatureRequest::new(
                request.request_id.clone(),
                request.request_owner.clone(),
                request.session_owner.clone(),
                request.session.clone(),
                FeatureRequestPayload::Notification,
            )
            .with_urn(urn.clone())
            .with_step(FeatureRequestStep::LocalToBeNotified);
            notification.provider_id = request.provider_id.clone();
            notification.priority = request.priority;
            notification.to_notify = self.load_feature(tenant, &urn).await?;

            self.requests
                .replace_request(tenant, request.id, notification)
                .await?;
            Ok(None)
        } else {
            self.requests.delete_requests(tenant, &[request.id]).await?;
            Ok(Some(FeatureRequestEvent::from_request(
                request,
                RequestState::Success,
            )))
        }
    }

    async fn complete_update(
        &self,
        tenant: &TenantId,
        request: &FeatureRequest,
        results: &[&RequestResultInfo],
    ) -> Result<Option<FeatureRequestEvent>> {
        let urn = request.urn.clone().ok_or_else(|| {
            FemError::InvalidInput(format!(
                "update request {} has no urn",
                request.request_id
            ))
        })?;
        let Some(mut feature) = self.load_feature(tenant, &urn).await? else {
            let cause = format!("Feature {urn} no longer exists");
            let update = RequestStateUpdate::new(
                vec![request.id],
                RequestState::Error,
                FeatureRequestStep::RemoteStorageError,
            )
            .with_error(cause.clone());
            self.requests.update_state_and_step(tenant, update).await?;
            let mut event =
                FeatureRequestEvent::from_request(request, RequestState::Error);
            event.errors.insert(cause);
            return Ok(Some(event));
        };

        if let FeatureRequestPayload::Update { files } = &request.payload {
            merge_files(&mut feature.files, files);
        }
        apply_results(&mut feature, results);
        self.features
            .update_files(tenant, &urn, &feature.files)
            .await?;

        if self.notification.active {
            self.requests
                .mark_to_notify(tenant, request.id, Some(feature))
                .await?;
            Ok(None)
        } else {
            self.requests.delete_requests(tenant, &[request.id]).await?;
            Ok(Some(FeatureRequestEvent::from_request(
                request,
                RequestState::Success,
            )))
        }
    }

    /// Storage failed for CREATION or UPDATE requests. The features are left
    /// untouched.
    pub async fn handle_storage_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.fail_requests(
            tenant,
            &[FeatureRequestType::Creation, FeatureRequestType::Update],
            results,
        )
        .await
    }

    /// Storage removed the files of DELETION requests.
    pub async fn handle_deletion_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        let groups = group_results(results);
        let requests = self
            .correlate(tenant, &[FeatureRequestType::Deletion], &groups)
            .await?;

        let mut handled = 0;
        let mut events = Vec::new();
        for request in requests {
            match self.complete_deletion(tenant, &request).await {
                Ok(event) => {
                    handled += 1;
                    events.extend(event);
                }
                Err(err) => warn!(
                    %tenant,
                    request_id = %request.request_id,
                    "deletion success could not be applied: {err}"
                ),
            }
        }

        publish_request_events(self.events.as_ref(), tenant, events).await;
        info!(%tenant, results = results.len(), handled, "storage deletion handled");
        Ok(handled)
    }

    async fn complete_deletion(
        &self,
        tenant: &TenantId,
        request: &FeatureRequest,
    ) -> Result<Option<FeatureRequestEvent>> {
        let snapshot = match &request.urn {
            Some(urn) => {
                let feature = self.load_feature(tenant, urn).await?;
                self.features
                    .delete_by_urns(tenant, std::slice::from_ref(urn))
                    .await?;
                feature
            }
            None => None,
        };

        if self.notification.active {
            self.requests
                .mark_to_notify(tenant, request.id, snapshot)
                .await?;
            Ok(None)
        } else {
            self.requests.delete_requests(tenant, &[request.id]).await?;
            Ok(Some(FeatureRequestEvent::from_request(
                request,
                RequestState::Success,
            )))
        }
    }

    pub async fn handle_deletion_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.fail_requests(tenant, &[FeatureRequestType::Deletion], results)
            .await
    }

    /// Register one COPY request per owner urn of each successful copy whose
    /// feature exists.
    pub async fn handle_copy_success(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        let mut targets: Vec<(FeatureUrn, &RequestResultInfo)> = Vec::new();
        for result in results {
            if result.result_file.is_none() {
                warn!(%tenant, group_id = %result.group_id, "copy result without location, skipped");
                continue;
            }
            for owner in &result.request_owners {
                match owner.parse::<FeatureUrn>() {
                    Ok(urn) => targets.push((urn, result)),
                    Err(err) => warn!(
                        %tenant,
                        group_id = %result.group_id,
                        owner = %owner,
                        "copy owner is not a feature urn: {err}"
                    ),
                }
            }
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let urns: Vec<FeatureUrn> = targets.iter().map(|(u, _)| u.clone()).collect();
        let features: HashMap<FeatureUrn, FeatureEntity> = self
            .features
            .find_by_urns(tenant, &urns)
            .await?
            .into_iter()
            .map(|f| (f.urn.clone(), f))
            .collect();

        let mut copies = Vec::new();
        for (urn, result) in targets {
            let (Some(feature), Some(stored)) =
                (features.get(&urn), result.result_file.as_ref())
            else {
                warn!(%tenant, %urn, "copy target feature does not exist, skipped");
                continue;
            };
            let request = FeatureRequest::new(
                Uuid::now_v7().to_string(),
                COPY_REQUEST_OWNER,
                feature.session_owner.clone(),
                feature.session.clone(),
                FeatureRequestPayload::Copy {
                    storage: stored.storage.clone(),
                    checksum: result.checksum.clone(),
                },
            )
            .with_urn(urn)
            .with_provider_id(feature.provider_id.clone());
            copies.push(request);
        }

        let registered = copies.len();
        if registered > 0 {
            self.requests.insert_requests(tenant, copies).await?;
        }
        info!(%tenant, registered, "copy requests registered");
        Ok(registered)
    }

    pub async fn handle_copy_error(
        &self,
        tenant: &TenantId,
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        self.fail_requests(tenant, &[FeatureRequestType::Copy], results)
            .await
    }

    /// Move every request correlated to an error result to
    /// ERROR / REMOTE_STORAGE_ERROR with the reported cause.
    async fn fail_requests(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        results: &[RequestResultInfo],
    ) -> Result<usize> {
        let groups = group_results(results);
        let requests = self.correlate(tenant, types, &groups).await?;

        let mut handled = 0;
        let mut events = Vec::new();
        for request in requests {
            let cause = request
                .group_id
                .as_deref()
                .and_then(|g| groups.get(g))
                .and_then(|group| {
                    group.iter().find_map(|r| r.error_cause.clone())
                })
                .unwrap_or_else(|| DEFAULT_STORAGE_ERROR.to_string());
            let update = RequestStateUpdate::new(
                vec![request.id],
                RequestState::Error,
                FeatureRequestStep::RemoteStorageError,
            )
            .with_error(cause.clone());

            match self.requests.update_state_and_step(tenant, update).await {
                Ok(_) => {
                    handled += 1;
                    let mut event = FeatureRequestEvent::from_request(
                        &request,
                        RequestState::Error,
                    );
                    event.errors.insert(cause);
                    events.push(event);
                }
                Err(err) => warn!(
                    %tenant,
                    request_id = %request.request_id,
                    "storage error could not be recorded: {err}"
                ),
            }
        }

        publish_request_events(self.events.as_ref(), tenant, events).await;
        info!(%tenant, results = results.len(), handled, "storage errors recorded");
        Ok(handled)
    }
}
