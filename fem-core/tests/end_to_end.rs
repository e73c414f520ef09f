#[path = "support/mod.rs"]
mod support;

use fem_core::database::ports::{
    DisseminationIntentRepository, FeatureRepository, FeatureRequestRepository,
};
use fem_model::{
    FeatureRequestType, NotificationState, NotifierEvent, Recipient,
    RequestResultInfo, RequestSelection, RequestState,
};
use support::{Harness, OWNER, SESSION, SOURCE};

#[tokio::test]
async fn creation_is_stored_notified_and_disseminated() {
    let h = Harness::new();
    let creation = h.creation("req-1", "G1", "provider-1");
    let urn = creation.urn.clone().expect("urn");
    h.register(vec![creation]).await;

    let handled = h
        .service
        .handle_storage_success(
            &h.tenant,
            &[RequestResultInfo::success("G1", "c1", "s3", "s3://bucket/c1")],
        )
        .await
        .expect("storage success");
    assert_eq!(handled, 1);

    let creations = h
        .store
        .count_requests(&h.tenant, FeatureRequestType::Creation, &RequestSelection::all())
        .await
        .expect("count creations");
    assert_eq!(creations, 0);
    assert_eq!(h.store.count_features(&h.tenant).await.expect("count"), 1);

    let feature = h.feature(&urn).await.expect("feature created");
    let locations = &feature.files[0].locations;
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].storage.as_deref(), Some("s3"));
    assert_eq!(locations[0].url, "s3://bucket/c1");

    let waiting = h.request_by_id("req-1").await.expect("notification request");
    assert_eq!(waiting.request_type(), FeatureRequestType::Notification);
    assert_eq!(waiting.urn.as_ref(), Some(&urn));
    assert!(waiting.to_notify.is_some());

    let event = NotifierEvent::new(
        "req-1",
        OWNER,
        NotificationState::Success,
        vec![Recipient::new("R1", true, false), Recipient::new("R2", false, false)],
    );
    let notified = h
        .service
        .on_notifier_success(&h.tenant, &[event])
        .await
        .expect("notifier success");
    assert_eq!(notified, 1);
    assert_eq!(h.store.count_intents(&h.tenant).await.expect("count"), 2);
    assert!(h.request_by_id("req-1").await.is_none());

    let report = h.drain().await;
    assert_eq!(report.intents_consumed, 2);
    assert_eq!(report.intents_applied, 2);
    assert_eq!(h.store.count_intents(&h.tenant).await.expect("count"), 0);

    let feature = h.feature(&urn).await.expect("feature");
    assert_eq!(feature.dissemination_info.len(), 2);
    assert!(feature.dissemination("R1").expect("R1").ack_date.is_none());
    assert!(feature.dissemination("R2").expect("R2").ack_date.is_some());
    assert!(feature.dissemination_pending);

    assert_eq!(h.sink.session_total(SOURCE, SESSION, "R1.running").await, 1);
    assert_eq!(h.sink.session_total(SOURCE, SESSION, "R2.done").await, 1);
    assert_eq!(h.sink.session_total(SOURCE, SESSION, "R2.running").await, 0);

    let successes = h.sink.request_events_in(RequestState::Success).await;
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].request_id, "req-1");
}
