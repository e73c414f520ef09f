#[path = "support/mod.rs"]
mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fem_core::{
    DISSEMINATION_STEP, DisseminationConfig, DisseminationRequestProcessor,
    DisseminationScheduler, FemError,
    database::{
        infrastructure::memory::{InMemoryFemStore, InMemoryTenantLease},
        ports::{
            AppliedPage, DisseminationIntentRepository, FeatureRepository,
            PagePlanner, TenantLease,
        },
    },
};
use fem_model::{
    FeatureEntity, FeatureUpdateDisseminationRequest as Intent, FeatureUrn,
    TenantId, UrnEntityType,
};
use support::Harness;
use tokio_util::sync::CancellationToken;

fn scheduler(h: &Harness, lease: &InMemoryTenantLease, config: DisseminationConfig) -> DisseminationScheduler {
    DisseminationScheduler::new(
        h.service.processor().clone(),
        Arc::new(lease.clone()),
        vec![h.tenant.clone()],
        config,
    )
}

#[tokio::test]
async fn busy_lease_skips_the_tenant() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.queue(vec![Intent::put(feature.urn.clone(), "R1", true, false)]).await;

    let lease = InMemoryTenantLease::new();
    let other = lease
        .acquire(&h.tenant, DISSEMINATION_STEP, "other-node", chrono::Duration::seconds(60))
        .await
        .expect("acquire")
        .expect("free lease");
    let scheduler = scheduler(&h, &lease, DisseminationConfig::default());

    assert!(scheduler.drain_tenant(&h.tenant).await.expect("drain").is_none());
    assert_eq!(h.store.count_intents(&h.tenant).await.expect("count"), 1);

    lease.release(&other).await.expect("release");
    let report = scheduler
        .drain_tenant(&h.tenant)
        .await
        .expect("drain")
        .expect("lease acquired");
    assert_eq!(report.intents_consumed, 1);
    assert_eq!(h.store.count_intents(&h.tenant).await.expect("count"), 0);

    // Released after the drain.
    assert!(
        lease
            .acquire(&h.tenant, DISSEMINATION_STEP, "other-node", chrono::Duration::seconds(60))
            .await
            .expect("acquire")
            .is_some()
    );
}

#[tokio::test]
async fn small_pages_drain_the_whole_queue() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.queue(
        (0..5)
            .map(|i| Intent::put(feature.urn.clone(), format!("R{i}"), true, false))
            .collect(),
    )
    .await;

    let lease = InMemoryTenantLease::new();
    let config = DisseminationConfig {
        page_size: 2,
        ..DisseminationConfig::default()
    };
    let processor = fem_core::DisseminationRequestProcessor::new(
        Arc::new(h.store.clone()),
        Arc::new(h.store.clone()),
        Arc::new(h.sink.clone()),
        config.page_size,
    );
    let scheduler = DisseminationScheduler::new(
        processor,
        Arc::new(lease),
        vec![h.tenant.clone()],
        config,
    );

    let report = scheduler
        .drain_tenant(&h.tenant)
        .await
        .expect("drain")
        .expect("lease acquired");
    assert_eq!(report.pages, 3);
    assert_eq!(report.intents_applied, 5);
    let stored = h.feature(&feature.urn).await.expect("feature");
    assert_eq!(stored.dissemination_info.len(), 5);
}

#[tokio::test]
async fn spawned_scheduler_drains_until_cancelled() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.queue(vec![Intent::put(feature.urn.clone(), "R1", false, false)]).await;

    let lease = InMemoryTenantLease::new();
    let config = DisseminationConfig {
        initial_delay_ms: 0,
        drain_delay_ms: 10,
        ..DisseminationConfig::default()
    };
    let shutdown = CancellationToken::new();
    let handle = scheduler(&h, &lease, config).spawn(shutdown.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.count_intents(&h.tenant).await.expect("count") > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue drained in time");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stopped")
        .expect("scheduler task");
    assert!(h.feature(&feature.urn).await.expect("feature").dissemination("R1").is_some());
}

/// Intent store whose page writes always fail for one tenant.
struct BrokenTenantIntents {
    inner: InMemoryFemStore,
    broken: TenantId,
}

#[async_trait]
impl DisseminationIntentRepository for BrokenTenantIntents {
    async fn save_intents(
        &self,
        tenant: &TenantId,
        intents: Vec<Intent>,
    ) -> fem_core::Result<()> {
        self.inner.save_intents(tenant, intents).await
    }

    async fn count_intents(&self, tenant: &TenantId) -> fem_core::Result<u64> {
        self.inner.count_intents(tenant).await
    }

    async fn apply_page(
        &self,
        tenant: &TenantId,
        created_before: DateTime<Utc>,
        limit: usize,
        planner: &dyn PagePlanner,
    ) -> fem_core::Result<Option<AppliedPage>> {
        if *tenant == self.broken {
            return Err(FemError::Internal("page write rejected".into()));
        }
        self.inner
            .apply_page(tenant, created_before, limit, planner)
            .await
    }
}

#[tokio::test]
async fn failed_page_keeps_intents_and_tick_moves_to_next_tenant() {
    let h = Harness::new();
    let broken_feature = h.seed_feature("p1").await;
    h.queue(vec![Intent::put(broken_feature.urn.clone(), "R1", true, true)]).await;

    let healthy = TenantId::new("project2");
    let urn = FeatureUrn::pseudo_random(UrnEntityType::Data, healthy.as_str(), "p2", 1)
        .expect("urn");
    let healthy_feature = FeatureEntity::new(
        urn.clone(),
        "p2",
        support::SOURCE,
        support::SESSION,
        vec![Harness::file("c1")],
    );
    h.store
        .insert_feature(&healthy, &healthy_feature)
        .await
        .expect("insert feature");
    h.store
        .save_intents(&healthy, vec![Intent::put(urn.clone(), "R1", false, false)])
        .await
        .expect("queue");

    let config = DisseminationConfig::default();
    let processor = DisseminationRequestProcessor::new(
        Arc::new(BrokenTenantIntents {
            inner: h.store.clone(),
            broken: h.tenant.clone(),
        }),
        Arc::new(h.store.clone()),
        Arc::new(h.sink.clone()),
        config.page_size,
    );
    let lease = InMemoryTenantLease::new();
    let scheduler = DisseminationScheduler::new(
        processor,
        Arc::new(lease.clone()),
        vec![h.tenant.clone(), healthy.clone()],
        config,
    );

    assert!(scheduler.drain_tenant(&h.tenant).await.is_err());
    scheduler.tick().await;

    assert_eq!(h.store.count_intents(&h.tenant).await.expect("count"), 1);
    let unchanged = h.feature(&broken_feature.urn).await.expect("feature");
    assert_eq!(unchanged, broken_feature);

    assert_eq!(h.store.count_intents(&healthy).await.expect("count"), 0);
    let drained = h
        .store
        .find_by_urns(&healthy, &[urn])
        .await
        .expect("find")
        .pop()
        .expect("feature");
    assert!(drained.dissemination("R1").is_some());

    // The failed drain gave its lease back.
    assert!(
        lease
            .acquire(&h.tenant, DISSEMINATION_STEP, "other-node", chrono::Duration::seconds(60))
            .await
            .expect("acquire")
            .is_some()
    );
}
