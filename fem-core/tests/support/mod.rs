//! Shared fixtures for the in-memory scenario tests.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use fem_core::{
    DrainReport, FemConfig, FeatureRequestService, RecordingEventSink,
    database::{
        infrastructure::memory::{InMemoryFemStore, memory_stores},
        ports::{DisseminationIntentRepository, FeatureRepository},
    },
};
use fem_model::{
    FeatureEntity, FeatureFile, FeatureRequest, FeatureRequestPayload,
    FeatureRequestStep, FeatureUpdateDisseminationRequest, FeatureUrn,
    TenantId, UrnEntityType,
};

pub const SOURCE: &str = "source-1";
pub const SESSION: &str = "session-1";
pub const OWNER: &str = "owner-1";

pub struct Harness {
    pub tenant: TenantId,
    pub store: InMemoryFemStore,
    pub sink: RecordingEventSink,
    pub service: FeatureRequestService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FemConfig::default())
    }

    pub fn with_config(config: FemConfig) -> Self {
        let store = InMemoryFemStore::new();
        let sink = RecordingEventSink::new();
        let service = FeatureRequestService::new(&memory_stores(&store, &sink), config);
        Self {
            tenant: TenantId::new("project1"),
            store,
            sink,
            service,
        }
    }

    pub fn urn(&self, provider_id: &str) -> FeatureUrn {
        FeatureUrn::pseudo_random(UrnEntityType::Data, self.tenant.as_str(), provider_id, 1)
            .expect("valid urn")
    }

    pub fn file(checksum: &str) -> FeatureFile {
        FeatureFile::new(checksum, format!("{checksum}.dat"), format!("file:///in/{checksum}"))
    }

    pub async fn seed_feature(&self, provider_id: &str) -> FeatureEntity {
        let feature = FeatureEntity::new(
            self.urn(provider_id),
            provider_id,
            SOURCE,
            SESSION,
            vec![Self::file("c1")],
        );
        self.store
            .insert_feature(&self.tenant, &feature)
            .await
            .expect("insert feature");
        feature
    }

    pub async fn feature(&self, urn: &FeatureUrn) -> Option<FeatureEntity> {
        self.store
            .find_by_urns(&self.tenant, std::slice::from_ref(urn))
            .await
            .expect("find feature")
            .into_iter()
            .next()
    }

    pub fn creation(&self, request_id: &str, group_id: &str, provider_id: &str) -> FeatureRequest {
        FeatureRequest::new(
            request_id,
            OWNER,
            SOURCE,
            SESSION,
            FeatureRequestPayload::Creation {
                files: vec![Self::file("c1")],
            },
        )
        .with_group_id(group_id)
        .with_urn(self.urn(provider_id))
        .with_provider_id(provider_id)
        .with_step(FeatureRequestStep::RemoteStorageRequested)
    }

    pub fn request(
        &self,
        request_id: &str,
        payload: FeatureRequestPayload,
        urn: FeatureUrn,
        step: FeatureRequestStep,
    ) -> FeatureRequest {
        FeatureRequest::new(request_id, OWNER, SOURCE, SESSION, payload)
            .with_urn(urn)
            .with_step(step)
    }

    /// Same request, last touched `hours` ago.
    pub fn idle(mut request: FeatureRequest, hours: i64) -> FeatureRequest {
        request.last_update = Utc::now() - Duration::hours(hours);
        request
    }

    pub async fn register(&self, requests: Vec<FeatureRequest>) {
        self.service
            .register_requests(&self.tenant, requests)
            .await
            .expect("register requests");
    }

    pub async fn queue(&self, intents: Vec<FeatureUpdateDisseminationRequest>) {
        self.store
            .save_intents(&self.tenant, intents)
            .await
            .expect("queue intents");
    }

    pub async fn drain(&self) -> DrainReport {
        self.service
            .processor()
            .handle_requests(&self.tenant)
            .await
            .expect("drain")
    }

    pub async fn request_by_id(&self, request_id: &str) -> Option<FeatureRequest> {
        self.store
            .all_requests(&self.tenant)
            .await
            .into_iter()
            .find(|r| r.request_id == request_id)
    }
}
