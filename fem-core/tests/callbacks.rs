#[path = "support/mod.rs"]
mod support;

use fem_core::{
    FemConfig, NotificationConfig,
    database::ports::{FeatureRepository, FeatureRequestRepository},
};
use fem_model::{
    FeatureRequestPayload, FeatureRequestStep, FeatureRequestType,
    NotificationState, NotifierEvent, Recipient, RequestResultInfo,
    RequestSelection, RequestState,
};
use support::{Harness, OWNER};

fn without_notification() -> FemConfig {
    FemConfig {
        notification: NotificationConfig { active: false },
        ..FemConfig::default()
    }
}

#[tokio::test]
async fn unknown_group_id_changes_nothing() {
    let h = Harness::new();
    h.register(vec![h.creation("req-1", "G1", "p1")]).await;
    let before = h.store.all_requests(&h.tenant).await;
    let events_before = h.sink.request_events().await.len();

    let handled = h
        .service
        .handle_storage_success(
            &h.tenant,
            &[RequestResultInfo::success("unknown", "c1", "s3", "s3://x")],
        )
        .await
        .expect("storage success");

    assert_eq!(handled, 0);
    assert_eq!(h.store.all_requests(&h.tenant).await, before);
    assert_eq!(h.store.count_features(&h.tenant).await.expect("count"), 0);
    assert_eq!(h.sink.request_events().await.len(), events_before);
}

#[tokio::test]
async fn unknown_request_id_changes_nothing() {
    let h = Harness::new();
    let event = NotifierEvent::new(
        "missing",
        OWNER,
        NotificationState::Success,
        vec![Recipient::new("R1", true, true)],
    );
    let handled = h
        .service
        .on_notifier_success(&h.tenant, &[event])
        .await
        .expect("notifier success");

    assert_eq!(handled, 0);
    assert!(h.store.pending_intents(&h.tenant).await.is_empty());
}

#[tokio::test]
async fn creation_without_notification_completes_directly() {
    let h = Harness::with_config(without_notification());
    h.register(vec![h.creation("req-1", "G1", "p1")]).await;

    h.service
        .handle_storage_success(
            &h.tenant,
            &[RequestResultInfo::success("G1", "c1", "s3", "s3://bucket/c1")],
        )
        .await
        .expect("storage success");

    assert!(h.store.all_requests(&h.tenant).await.is_empty());
    assert_eq!(h.store.count_features(&h.tenant).await.expect("count"), 1);
    let successes = h.sink.request_events_in(RequestState::Success).await;
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].request_type, FeatureRequestType::Creation);
}

#[tokio::test]
async fn replayed_storage_success_keeps_a_single_notification() {
    let h = Harness::new();
    h.register(vec![h.creation("req-1", "G1", "p1")]).await;
    let success = [RequestResultInfo::success("G1", "c1", "s3", "s3://bucket/c1")];

    for _ in 0..2 {
        h.service
            .handle_storage_success(&h.tenant, &success)
            .await
            .expect("storage success");
    }

    let carrying: Vec<_> = h
        .store
        .all_requests(&h.tenant)
        .await
        .into_iter()
        .filter(|r| r.request_id == "req-1")
        .collect();
    assert_eq!(carrying.len(), 1);
    assert_eq!(carrying[0].request_type(), FeatureRequestType::Notification);
    assert_eq!(carrying[0].step, FeatureRequestStep::LocalToBeNotified);
    assert_eq!(h.store.count_features(&h.tenant).await.expect("count"), 1);
}

#[tokio::test]
async fn storage_error_marks_request_and_leaves_features_alone() {
    let h = Harness::new();
    h.register(vec![h.creation("req-1", "G1", "p1")]).await;

    let handled = h
        .service
        .handle_storage_error(
            &h.tenant,
            &[RequestResultInfo::error("G1", "c1", "disk full")],
        )
        .await
        .expect("storage error");
    assert_eq!(handled, 1);

    let request = h.request_by_id("req-1").await.expect("request kept");
    assert_eq!(request.state, RequestState::Error);
    assert_eq!(request.step, FeatureRequestStep::RemoteStorageError);
    assert!(request.errors.contains("disk full"));
    assert_eq!(h.store.count_features(&h.tenant).await.expect("count"), 0);

    let errors = h.sink.request_events_in(RequestState::Error).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].errors.contains("disk full"));
}

#[tokio::test]
async fn update_success_refreshes_locations_and_waits_for_notification() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    let update = h
        .request(
            "upd-1",
            FeatureRequestPayload::Update {
                files: vec![Harness::file("c2")],
            },
            feature.urn.clone(),
            FeatureRequestStep::RemoteStorageRequested,
        )
        .with_group_id("G2");
    h.register(vec![update]).await;

    h.service
        .handle_storage_success(
            &h.tenant,
            &[RequestResultInfo::success("G2", "c2", "s3", "s3://bucket/c2")],
        )
        .await
        .expect("storage success");

    let stored = h.feature(&feature.urn).await.expect("feature");
    assert_eq!(stored.files.len(), 2);
    let c2 = stored.files.iter().find(|f| f.checksum == "c2").expect("c2");
    assert_eq!(c2.locations[0].storage.as_deref(), Some("s3"));

    let request = h.request_by_id("upd-1").await.expect("request kept");
    assert_eq!(request.step, FeatureRequestStep::LocalToBeNotified);
    let snapshot = request.to_notify.expect("snapshot");
    assert_eq!(snapshot.files.len(), 2);
}

#[tokio::test]
async fn deletion_success_removes_feature_and_keeps_snapshot() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    let deletion = h
        .request(
            "del-1",
            FeatureRequestPayload::Deletion {
                already_deleted: false,
            },
            feature.urn.clone(),
            FeatureRequestStep::RemoteStorageDeletionRequested,
        )
        .with_group_id("G3");
    h.register(vec![deletion]).await;

    let handled = h
        .service
        .handle_deletion_success(
            &h.tenant,
            &[RequestResultInfo::success("G3", "c1", "s3", "s3://bucket/c1")],
        )
        .await
        .expect("deletion success");
    assert_eq!(handled, 1);

    assert!(h.feature(&feature.urn).await.is_none());
    let request = h.request_by_id("del-1").await.expect("request kept");
    assert_eq!(request.step, FeatureRequestStep::LocalToBeNotified);
    assert_eq!(request.to_notify.map(|f| f.urn), Some(feature.urn));
}

#[tokio::test]
async fn deletion_error_marks_request() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    let deletion = h
        .request(
            "del-1",
            FeatureRequestPayload::Deletion {
                already_deleted: false,
            },
            feature.urn.clone(),
            FeatureRequestStep::RemoteStorageDeletionRequested,
        )
        .with_group_id("G3");
    h.register(vec![deletion]).await;

    h.service
        .handle_deletion_error(&h.tenant, &[RequestResultInfo::error("G3", "c1", "gone")])
        .await
        .expect("deletion error");

    let request = h.request_by_id("del-1").await.expect("request kept");
    assert_eq!(request.state, RequestState::Error);
    assert_eq!(request.step, FeatureRequestStep::RemoteStorageError);
    assert!(h.feature(&feature.urn).await.is_some());
}

#[tokio::test]
async fn notified_update_is_kept_as_success() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.register(vec![h.request(
        "upd-1",
        FeatureRequestPayload::Update { files: Vec::new() },
        feature.urn.clone(),
        FeatureRequestStep::RemoteNotificationRequested,
    )])
    .await;

    let event = NotifierEvent::new(
        "upd-1",
        OWNER,
        NotificationState::Success,
        vec![Recipient::new("R1", false, false)],
    );
    h.service
        .on_notifier_success(&h.tenant, &[event])
        .await
        .expect("notifier success");

    let request = h.request_by_id("upd-1").await.expect("request kept");
    assert_eq!(request.state, RequestState::Success);
    assert_eq!(request.step, FeatureRequestStep::RemoteNotificationSuccess);
    assert_eq!(h.store.pending_intents(&h.tenant).await.len(), 1);
}

#[tokio::test]
async fn notifier_error_and_denial_mark_requests() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.register(vec![
        h.request(
            "n-1",
            FeatureRequestPayload::Notification,
            feature.urn.clone(),
            FeatureRequestStep::RemoteNotificationRequested,
        ),
        h.request(
            "n-2",
            FeatureRequestPayload::Notification,
            feature.urn.clone(),
            FeatureRequestStep::RemoteNotificationRequested,
        ),
    ])
    .await;

    let failed = NotifierEvent::new("n-1", OWNER, NotificationState::Error, Vec::new());
    let denied = NotifierEvent::new("n-2", OWNER, NotificationState::Denied, Vec::new());
    assert_eq!(
        h.service.on_notifier_error(&h.tenant, &[failed]).await.expect("error"),
        1
    );
    assert_eq!(
        h.service.on_notifier_denied(&h.tenant, &[denied]).await.expect("denied"),
        1
    );

    for request_id in ["n-1", "n-2"] {
        let request = h.request_by_id(request_id).await.expect("request kept");
        assert_eq!(request.state, RequestState::Error);
        assert_eq!(request.step, FeatureRequestStep::RemoteNotificationError);
        assert_eq!(request.errors.len(), 1);
    }
    assert!(h.store.pending_intents(&h.tenant).await.is_empty());
}

#[tokio::test]
async fn late_notifier_error_leaves_settled_update_alone() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    h.register(vec![h.request(
        "upd-1",
        FeatureRequestPayload::Update { files: Vec::new() },
        feature.urn.clone(),
        FeatureRequestStep::RemoteNotificationRequested,
    )])
    .await;

    let success = NotifierEvent::new(
        "upd-1",
        OWNER,
        NotificationState::Success,
        vec![Recipient::new("R1", false, false)],
    );
    h.service
        .on_notifier_success(&h.tenant, &[success])
        .await
        .expect("notifier success");

    let late = NotifierEvent::new("upd-1", OWNER, NotificationState::Error, Vec::new());
    let handled = h
        .service
        .on_notifier_error(&h.tenant, &[late])
        .await
        .expect("notifier error");
    assert_eq!(handled, 0);

    let request = h.request_by_id("upd-1").await.expect("request kept");
    assert_eq!(request.state, RequestState::Success);
    assert_eq!(request.step, FeatureRequestStep::RemoteNotificationSuccess);
    assert!(request.errors.is_empty());
    assert!(h.sink.request_events_in(RequestState::Error).await.is_empty());
}

#[tokio::test]
async fn copy_success_registers_one_request_per_known_owner() {
    let h = Harness::new();
    let known = h.seed_feature("p1").await;
    let missing = h.urn("never-created");

    let result = RequestResultInfo::success("G4", "c1", "archive", "tape://c1").with_owners([
        known.urn.to_string(),
        "not-an-urn".to_string(),
        missing.to_string(),
    ]);
    let registered = h
        .service
        .handle_copy_success(&h.tenant, &[result])
        .await
        .expect("copy success");
    assert_eq!(registered, 1);

    let copies = h
        .store
        .list_requests(
            &h.tenant,
            FeatureRequestType::Copy,
            &RequestSelection::all(),
            Default::default(),
            Default::default(),
        )
        .await
        .expect("list copies");
    assert_eq!(copies.total, 1);
    let copy = &copies.items[0];
    assert_eq!(copy.urn.as_ref(), Some(&known.urn));
    assert_eq!(copy.state, RequestState::Granted);
    assert_eq!(copy.step, FeatureRequestStep::LocalDelayed);
    assert_eq!(
        copy.payload,
        FeatureRequestPayload::Copy {
            storage: "archive".to_string(),
            checksum: "c1".to_string(),
        }
    );
}

#[tokio::test]
async fn copy_error_marks_matching_copy_requests() {
    let h = Harness::new();
    let feature = h.seed_feature("p1").await;
    let copy = h
        .request(
            "copy-1",
            FeatureRequestPayload::Copy {
                storage: "archive".to_string(),
                checksum: "c1".to_string(),
            },
            feature.urn.clone(),
            FeatureRequestStep::RemoteStorageRequested,
        )
        .with_group_id("G5");
    h.register(vec![copy]).await;

    h.service
        .handle_copy_error(&h.tenant, &[RequestResultInfo::error("G5", "c1", "copy failed")])
        .await
        .expect("copy error");

    let request = h.request_by_id("copy-1").await.expect("request kept");
    assert_eq!(request.state, RequestState::Error);
    assert_eq!(request.step, FeatureRequestStep::RemoteStorageError);
    assert!(request.errors.contains("copy failed"));
}
