#![cfg(feature = "database")]
//! Postgres adapter behaviour. Needs `DATABASE_URL` pointing at a server the
//! test harness may create databases on.

use fem_core::{
    DISSEMINATION_STEP, FemConfig, FeatureRequestService,
    database::{infrastructure::postgres::postgres_stores, ports::*},
};
use fem_model::{
    FeatureRequestStep, FeatureRequestType, FeatureUpdateDisseminationRequest,
    FeatureUrn, NotificationState, NotifierEvent, Recipient,
    RequestResultInfo, RequestSelection, TenantId, UrnEntityType,
    FeatureRequest, FeatureRequestPayload, FeatureFile,
};
use sqlx::PgPool;

fn creation(tenant: &TenantId, request_id: &str, group_id: &str) -> FeatureRequest {
    let urn = FeatureUrn::pseudo_random(UrnEntityType::Data, tenant.as_str(), request_id, 1)
        .expect("urn");
    FeatureRequest::new(
        request_id,
        "owner",
        "source",
        "session",
        FeatureRequestPayload::Creation {
            files: vec![FeatureFile::new("c1", "c1.dat", "file:///in/c1")],
        },
    )
    .with_group_id(group_id)
    .with_urn(urn)
    .with_provider_id(request_id)
    .with_step(FeatureRequestStep::RemoteStorageRequested)
}

#[sqlx::test(migrator = "fem_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn creation_flow_round_trips_through_postgres(pool: PgPool) {
    let stores = postgres_stores(pool.clone());
    let service = FeatureRequestService::new(&stores, FemConfig::default());
    let tenant = TenantId::new("project1");
    let request = creation(&tenant, "req-1", "G1");
    let urn = request.urn.clone().expect("urn");

    service
        .register_requests(&tenant, vec![request])
        .await
        .expect("register");
    service
        .handle_storage_success(
            &tenant,
            &[RequestResultInfo::success("G1", "c1", "s3", "s3://bucket/c1")],
        )
        .await
        .expect("storage success");

    let creations = stores
        .requests
        .count_requests(&tenant, FeatureRequestType::Creation, &RequestSelection::all())
        .await
        .expect("count");
    assert_eq!(creations, 0);
    assert_eq!(stores.features.count_features(&tenant).await.expect("count"), 1);

    let event = NotifierEvent::new(
        "req-1",
        "owner",
        NotificationState::Success,
        vec![Recipient::new("R1", true, true), Recipient::new("R2", false, false)],
    );
    service
        .on_notifier_success(&tenant, &[event])
        .await
        .expect("notifier success");
    assert_eq!(stores.intents.count_intents(&tenant).await.expect("count"), 2);

    let report = service
        .processor()
        .handle_requests(&tenant)
        .await
        .expect("drain");
    assert_eq!(report.intents_consumed, 2);

    let feature = stores
        .features
        .find_by_urns(&tenant, std::slice::from_ref(&urn))
        .await
        .expect("find")
        .pop()
        .expect("feature");
    assert!(feature.dissemination_pending);
    assert!(feature.dissemination("R2").expect("R2").ack_date.is_some());

    let outbox: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fem_outbox WHERE tenant = $1")
        .bind(tenant.as_str())
        .fetch_one(&pool)
        .await
        .expect("outbox count");
    assert!(outbox > 0);
}

#[sqlx::test(migrator = "fem_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn replace_request_swaps_rows_atomically(pool: PgPool) {
    let stores = postgres_stores(pool);
    let tenant = TenantId::new("project1");
    let request = creation(&tenant, "req-1", "G1");
    let old_id = request.id;
    let urn = request.urn.clone().expect("urn");
    stores
        .requests
        .insert_requests(&tenant, vec![request])
        .await
        .expect("insert");

    let notification = FeatureRequest::new(
        "req-1",
        "owner",
        "source",
        "session",
        FeatureRequestPayload::Notification,
    )
    .with_urn(urn)
    .with_step(FeatureRequestStep::LocalToBeNotified);
    let new_id = notification.id;
    stores
        .requests
        .replace_request(&tenant, old_id, notification)
        .await
        .expect("replace");

    let found = stores
        .requests
        .find_by_request_ids(&tenant, &["req-1".to_string()])
        .await
        .expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, new_id);
    assert_eq!(found[0].request_type(), FeatureRequestType::Notification);
}

#[sqlx::test(migrator = "fem_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn blocking_ack_releases_waiting_requests(pool: PgPool) {
    let stores = postgres_stores(pool);
    let service = FeatureRequestService::new(&stores, FemConfig::default());
    let tenant = TenantId::new("project1");

    let request = creation(&tenant, "req-1", "G1");
    let urn = request.urn.clone().expect("urn");
    service
        .register_requests(&tenant, vec![request])
        .await
        .expect("register");
    service
        .handle_storage_success(
            &tenant,
            &[RequestResultInfo::success("G1", "c1", "s3", "s3://bucket/c1")],
        )
        .await
        .expect("storage success");
    stores
        .intents
        .save_intents(
            &tenant,
            vec![FeatureUpdateDisseminationRequest::put(urn.clone(), "R1", true, true)],
        )
        .await
        .expect("queue");
    service.processor().handle_requests(&tenant).await.expect("drain");

    let update = FeatureRequest::new(
        "upd-1",
        "owner",
        "source",
        "session",
        FeatureRequestPayload::Update { files: Vec::new() },
    )
    .with_urn(urn.clone());
    service
        .register_requests(&tenant, vec![update])
        .await
        .expect("register update");
    assert_eq!(service.hold_blocked_requests(&tenant).await.expect("hold"), 1);

    stores
        .intents
        .save_intents(
            &tenant,
            vec![FeatureUpdateDisseminationRequest::ack(urn.clone(), "R1")],
        )
        .await
        .expect("queue ack");
    let report = service.processor().handle_requests(&tenant).await.expect("drain");
    assert_eq!(report.requests_unblocked, 1);

    let updates = stores
        .requests
        .find_by_request_ids(&tenant, &["upd-1".to_string()])
        .await
        .expect("find");
    assert_eq!(updates[0].step, FeatureRequestStep::LocalDelayed);
}

#[sqlx::test(migrator = "fem_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn lease_is_exclusive_per_tenant(pool: PgPool) {
    let stores = postgres_stores(pool);
    let tenant = TenantId::new("project1");
    let ttl = chrono::Duration::seconds(60);

    let first = stores
        .lease
        .acquire(&tenant, DISSEMINATION_STEP, "node-a", ttl)
        .await
        .expect("acquire")
        .expect("free lease");
    assert!(
        stores
            .lease
            .acquire(&tenant, DISSEMINATION_STEP, "node-b", ttl)
            .await
            .expect("acquire")
            .is_none()
    );

    stores.lease.release(&first).await.expect("release");
    assert!(
        stores
            .lease
            .acquire(&tenant, DISSEMINATION_STEP, "node-b", ttl)
            .await
            .expect("acquire")
            .is_some()
    );
}
