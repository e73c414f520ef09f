//! In-memory adapters. One mutex guards all tables of all tenants so that a
//! dissemination page is applied atomically, as the Postgres adapter does
//! with a transaction.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use fem_model::{
    DisseminationIntentId, FeatureEntity, FeatureFile, FeatureRequest,
    FeatureRequestId, FeatureRequestStep, FeatureRequestType,
    FeatureUpdateDisseminationRequest, FeatureUrn, Page, PageResult,
    RequestSelection, RequestSort, RequestSortField, SortDirection, TenantId,
};

use crate::{
    database::ports::{
        AppliedPage, DisseminationIntentRepository, FeatureRepository,
        FeatureRequestRepository, LeaseToken, PagePlanner, RequestStateUpdate,
        TenantLease,
    },
    error::Result,
    events::RecordingEventSink,
    services::FemStores,
};

#[derive(Debug, Default)]
struct TenantTables {
    requests: BTreeMap<FeatureRequestId, FeatureRequest>,
    features: HashMap<FeatureUrn, FeatureEntity>,
    intents: BTreeMap<DisseminationIntentId, FeatureUpdateDisseminationRequest>,
}

impl TenantTables {
    fn feature_provider_id(&self, request: &FeatureRequest) -> Option<&str> {
        request
            .urn
            .as_ref()
            .and_then(|urn| self.features.get(urn))
            .map(|feature| feature.provider_id.as_str())
    }

    fn selected(
        &self,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Vec<&FeatureRequest> {
        self.requests
            .values()
            .filter(|r| r.request_type() == request_type)
            .filter(|r| selection.matches(r, self.feature_provider_id(r)))
            .collect()
    }

    fn compare(
        &self,
        a: &FeatureRequest,
        b: &FeatureRequest,
        field: RequestSortField,
    ) -> Ordering {
        match field {
            RequestSortField::ProviderId => {
                let pa = a.provider_id.as_deref().or(self.feature_provider_id(a));
                let pb = b.provider_id.as_deref().or(self.feature_provider_id(b));
                pa.cmp(&pb)
            }
            RequestSortField::Source => a.session_owner.cmp(&b.session_owner),
            RequestSortField::Session => a.session.cmp(&b.session),
            RequestSortField::RegistrationDate => {
                a.registration_date.cmp(&b.registration_date)
            }
            RequestSortField::LastUpdate => a.last_update.cmp(&b.last_update),
            RequestSortField::State => a.state.as_str().cmp(b.state.as_str()),
            RequestSortField::Step => a.step.as_str().cmp(b.step.as_str()),
        }
    }

    fn release_waiting(&mut self, urns: &[FeatureUrn], now: DateTime<Utc>) -> u64 {
        let mut moved = 0;
        for request in self.requests.values_mut() {
            let on_urn = request.urn.as_ref().is_some_and(|u| urns.contains(u));
            if on_urn
                && request.step == FeatureRequestStep::WaitingBlockingDissemination
            {
                request.step = FeatureRequestStep::LocalDelayed;
                request.last_update = now;
                moved += 1;
            }
        }
        moved
    }
}

/// Request, feature and intent tables for any number of tenants.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFemStore {
    tables: Arc<Mutex<HashMap<TenantId, TenantTables>>>,
}

impl InMemoryFemStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_tenant<R>(
        &self,
        tenant: &TenantId,
        f: impl FnOnce(&mut TenantTables) -> R,
    ) -> R {
        let mut guard = self.tables.lock().await;
        let tables = guard.entry(tenant.clone()).or_default();
        f(tables)
    }

    /// Every request of a tenant, any type. Test helper.
    pub async fn all_requests(&self, tenant: &TenantId) -> Vec<FeatureRequest> {
        self.with_tenant(tenant, |t| t.requests.values().cloned().collect())
            .await
    }

    /// Pending intents in queue order. Test helper.
    pub async fn pending_intents(
        &self,
        tenant: &TenantId,
    ) -> Vec<FeatureUpdateDisseminationRequest> {
        self.with_tenant(tenant, |t| t.intents.values().cloned().collect())
            .await
    }
}

#[async_trait]
impl FeatureRequestRepository for InMemoryFemStore {
    async fn insert_requests(
        &self,
        tenant: &TenantId,
        requests: Vec<FeatureRequest>,
    ) -> Result<()> {
        self.with_tenant(tenant, |t| {
            for request in requests {
                t.requests.insert(request.id, request);
            }
        })
        .await;
        Ok(())
    }

    async fn find_by_ids(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<Vec<FeatureRequest>> {
        Ok(self
            .with_tenant(tenant, |t| {
                ids.iter().filter_map(|id| t.requests.get(id).cloned()).collect()
            })
            .await)
    }

    async fn find_by_group_ids(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        group_ids: &[String],
    ) -> Result<Vec<FeatureRequest>> {
        Ok(self
            .with_tenant(tenant, |t| {
                t.requests
                    .values()
                    .filter(|r| types.contains(&r.request_type()))
                    .filter(|r| {
                        r.group_id.as_ref().is_some_and(|g| group_ids.contains(g))
                    })
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn find_by_request_ids(
        &self,
        tenant: &TenantId,
        request_ids: &[String],
    ) -> Result<Vec<FeatureRequest>> {
        Ok(self
            .with_tenant(tenant, |t| {
                t.requests
                    .values()
                    .filter(|r| request_ids.contains(&r.request_id))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn update_state_and_step(
        &self,
        tenant: &TenantId,
        update: RequestStateUpdate,
    ) -> Result<u64> {
        let now = Utc::now();
        Ok(self
            .with_tenant(tenant, |t| {
                let mut updated = 0;
                for id in &update.ids {
                    let Some(request) = t.requests.get_mut(id) else {
                        continue;
                    };
                    request.state = update.state;
                    request.step = update.step;
                    if update.clear_errors {
                        request.errors.clear();
                    }
                    if let Some(cause) = &update.error {
                        request.errors.insert(cause.clone());
                    }
                    request.last_update = now;
                    updated += 1;
                }
                updated
            })
            .await)
    }

    async fn mark_to_notify(
        &self,
        tenant: &TenantId,
        id: FeatureRequestId,
        snapshot: Option<FeatureEntity>,
    ) -> Result<()> {
        let now = Utc::now();
        self.with_tenant(tenant, |t| {
            if let Some(request) = t.requests.get_mut(&id) {
                request.step = FeatureRequestStep::LocalToBeNotified;
                request.to_notify = snapshot;
                request.last_update = now;
            }
        })
        .await;
        Ok(())
    }

    async fn move_step_for_urns(
        &self,
        tenant: &TenantId,
        types: &[FeatureRequestType],
        urns: &[FeatureUrn],
        from: FeatureRequestStep,
        to: FeatureRequestStep,
    ) -> Result<u64> {
        let now = Utc::now();
        Ok(self
            .with_tenant(tenant, |t| {
                let mut moved = 0;
                for request in t.requests.values_mut() {
                    let on_urn =
                        request.urn.as_ref().is_some_and(|u| urns.contains(u));
                    if on_urn
                        && request.step == from
                        && types.contains(&request.request_type())
                    {
                        request.step = to;
                        request.last_update = now;
                        moved += 1;
                    }
                }
                moved
            })
            .await)
    }

    async fn delete_requests(
        &self,
        tenant: &TenantId,
        ids: &[FeatureRequestId],
    ) -> Result<u64> {
        Ok(self
            .with_tenant(tenant, |t| {
                ids.iter().filter(|id| t.requests.remove(*id).is_some()).count()
                    as u64
            })
            .await)
    }

    async fn replace_request(
        &self,
        tenant: &TenantId,
        old: FeatureRequestId,
        new: FeatureRequest,
    ) -> Result<()> {
        self.with_tenant(tenant, |t| {
            t.requests.remove(&old);
            t.requests.insert(new.id, new);
        })
        .await;
        Ok(())
    }

    async fn list_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
        sort: RequestSort,
        page: Page,
    ) -> Result<PageResult<FeatureRequest>> {
        Ok(self
            .with_tenant(tenant, |t| {
                let mut matching = t.selected(request_type, selection);
                matching.sort_by(|a, b| {
                    let ordering = t
                        .compare(a, b, sort.field)
                        .then_with(|| a.id.cmp(&b.id));
                    match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                });
                let total = matching.len() as u64;
                let items = matching
                    .into_iter()
                    .skip(page.offset as usize)
                    .take(page.limit as usize)
                    .cloned()
                    .collect();
                PageResult { items, total }
            })
            .await)
    }

    async fn count_requests(
        &self,
        tenant: &TenantId,
        request_type: FeatureRequestType,
        selection: &RequestSelection,
    ) -> Result<u64> {
        Ok(self
            .with_tenant(tenant, |t| {
                t.selected(request_type, selection).len() as u64
            })
            .await)
    }
}

#[async_trait]
impl FeatureRepository for InMemoryFemStore {
    async fn find_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<Vec<FeatureEntity>> {
        Ok(self
            .with_tenant(tenant, |t| {
                urns.iter().filter_map(|u| t.features.get(u).cloned()).collect()
            })
            .await)
    }

    async fn insert_feature(
        &self,
        tenant: &TenantId,
        feature: &FeatureEntity,
    ) -> Result<bool> {
        Ok(self
            .with_tenant(tenant, |t| {
                if t.features.contains_key(&feature.urn) {
                    false
                } else {
                    t.features.insert(feature.urn.clone(), feature.clone());
                    true
                }
            })
            .await)
    }

    async fn update_files(
        &self,
        tenant: &TenantId,
        urn: &FeatureUrn,
        files: &[FeatureFile],
    ) -> Result<()> {
        let now = Utc::now();
        self.with_tenant(tenant, |t| {
            if let Some(feature) = t.features.get_mut(urn) {
                feature.files = files.to_vec();
                feature.last_update = now;
            }
        })
        .await;
        Ok(())
    }

    async fn delete_by_urns(
        &self,
        tenant: &TenantId,
        urns: &[FeatureUrn],
    ) -> Result<u64> {
        Ok(self
            .with_tenant(tenant, |t| {
                urns.iter().filter(|u| t.features.remove(*u).is_some()).count()
                    as u64
            })
            .await)
    }

    async fn count_features(&self, tenant: &TenantId) -> Result<u64> {
        Ok(self
            .with_tenant(tenant, |t| t.features.len() as u64)
            .await)
    }
}

#[async_trait]
impl DisseminationIntentRepository for InMemoryFemStore {
    async fn save_intents(
        &self,
        tenant: &TenantId,
        intents: Vec<FeatureUpdateDisseminationRequest>,
    ) -> Result<()> {
        self.with_tenant(tenant, |t| {
            for intent in intents {
                t.intents.insert(intent.id, intent);
            }
        })
        .await;
        Ok(())
    }

    async fn count_intents(&self, tenant: &TenantId) -> Result<u64> {
        Ok(self.with_tenant(tenant, |t| t.intents.len() as u64).await)
    }

    async fn apply_page(
        &self,
        tenant: &TenantId,
        created_before: DateTime<Utc>,
        limit: usize,
        planner: &dyn PagePlanner,
    ) -> Result<Option<AppliedPage>> {
        let now = Utc::now();
        Ok(self
            .with_tenant(tenant, |t| {
                let intents: Vec<FeatureUpdateDisseminationRequest> = t
                    .intents
                    .values()
                    .filter(|i| i.creation_date <= created_before)
                    .take(limit)
                    .cloned()
                    .collect();
                if intents.is_empty() {
                    return None;
                }

                let mut features: Vec<FeatureEntity> = Vec::new();
                for intent in &intents {
                    if features.iter().any(|f| f.urn == intent.urn) {
                        continue;
                    }
                    if let Some(feature) = t.features.get(&intent.urn) {
                        features.push(feature.clone());
                    }
                }

                let plan = planner.plan(&intents, features, now);

                for changed in &plan.features {
                    if let Some(stored) = t.features.get_mut(&changed.urn) {
                        stored.dissemination_info =
                            changed.dissemination_info.clone();
                        stored.dissemination_pending =
                            changed.dissemination_pending;
                        stored.last_update = changed.last_update;
                    }
                }
                let requests_unblocked =
                    t.release_waiting(&plan.unblock_urns, now);
                for intent in &intents {
                    t.intents.remove(&intent.id);
                }

                Some(AppliedPage {
                    plan,
                    intents_consumed: intents.len() as u64,
                    requests_unblocked,
                })
            })
            .await)
    }
}

/// Process-local lease table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTenantLease {
    leases: Arc<Mutex<HashMap<(TenantId, String), LeaseToken>>>,
}

impl InMemoryTenantLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantLease for InMemoryTenantLease {
    async fn acquire(
        &self,
        tenant: &TenantId,
        name: &str,
        owner: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<LeaseToken>> {
        let mut guard = self.leases.lock().await;
        let key = (tenant.clone(), name.to_string());
        if let Some(current) = guard.get(&key)
            && !current.is_expired(Utc::now())
        {
            return Ok(None);
        }
        let token = LeaseToken::new(tenant.clone(), name, owner, ttl);
        guard.insert(key, token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &LeaseToken) -> Result<()> {
        let mut guard = self.leases.lock().await;
        let key = (token.tenant.clone(), token.name.clone());
        if guard
            .get(&key)
            .is_some_and(|current| current.lease_id == token.lease_id)
        {
            guard.remove(&key);
        }
        Ok(())
    }
}

/// Wire every port to the in-memory adapters, recording outbound events in
/// `sink`.
pub fn memory_stores(store: &InMemoryFemStore, sink: &RecordingEventSink) -> FemStores {
    FemStores {
        requests: Arc::new(store.clone()),
        features: Arc::new(store.clone()),
        intents: Arc::new(store.clone()),
        lease: Arc::new(InMemoryTenantLease::new()),
        request_events: Arc::new(sink.clone()),
        session_agent: Arc::new(sink.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_is_exclusive_until_released_or_expired() {
        let lease = InMemoryTenantLease::new();
        let tenant = TenantId::new("t");
        let ttl = chrono::Duration::seconds(30);

        let first = lease.acquire(&tenant, "drain", "a", ttl).await.unwrap();
        assert!(first.is_some());
        assert!(lease.acquire(&tenant, "drain", "b", ttl).await.unwrap().is_none());

        let other_tenant = TenantId::new("u");
        assert!(lease.acquire(&other_tenant, "drain", "b", ttl).await.unwrap().is_some());

        lease.release(&first.unwrap()).await.unwrap();
        assert!(lease.acquire(&tenant, "drain", "b", ttl).await.unwrap().is_some());

        let expired = chrono::Duration::seconds(-1);
        let lease = InMemoryTenantLease::new();
        lease.acquire(&tenant, "drain", "a", expired).await.unwrap();
        assert!(lease.acquire(&tenant, "drain", "b", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn releasing_a_stolen_lease_keeps_the_new_holder() {
        let lease = InMemoryTenantLease::new();
        let tenant = TenantId::new("t");
        let stale = lease
            .acquire(&tenant, "drain", "a", chrono::Duration::seconds(-1))
            .await
            .unwrap()
            .unwrap();
        let fresh = lease
            .acquire(&tenant, "drain", "b", chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(fresh.is_some());

        lease.release(&stale).await.unwrap();
        assert!(
            lease
                .acquire(&tenant, "drain", "c", chrono::Duration::seconds(30))
                .await
                .unwrap()
                .is_none()
        );
    }
}
