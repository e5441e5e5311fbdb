//! Dispatcher behaviour against the in-memory store and recording sender.

use std::sync::Arc;

use techconf_notifier::delivery::LogOnlySender;
use techconf_notifier::mock::{MockEmailSender, MockNotificationStore, StoreOperation};
use techconf_notifier::{DeliveryError, DispatchError, NotificationDispatcher};

// ============================================================
// Helpers
// ============================================================

fn seeded_store(attendees: &[(&str, &str, &str)]) -> MockNotificationStore {
    let store = MockNotificationStore::new();
    store.add_notification(1, "Welcome", "Hi");
    for (email, first, last) in attendees {
        store.add_attendee(email, first, last);
    }
    store
}

fn dispatcher(store: &MockNotificationStore, sender: &MockEmailSender) -> NotificationDispatcher {
    NotificationDispatcher::new(Arc::new(store.clone()), Arc::new(sender.clone()))
}

const THREE: &[(&str, &str, &str)] = &[
    ("a@x.com", "A", "One"),
    ("b@x.com", "B", "Two"),
    ("c@x.com", "C", "Three"),
];

// ============================================================
// Successful dispatch
// ============================================================

#[tokio::test]
async fn test_each_attendee_gets_personalized_email() {
    let store = seeded_store(THREE);
    let sender = MockEmailSender::new();

    dispatcher(&store, &sender).dispatch(1).await.unwrap();

    let sent = sender.sent();
    assert_eq!(sent.len(), 3);
    for (email, (to, first, last)) in sent.iter().zip(THREE) {
        assert_eq!(email.to, *to);
        assert_eq!(email.subject, "Hi");
        assert!(email.text_body.contains(first));
        assert!(email.text_body.contains(last));
        assert!(email.text_body.ends_with("Welcome"));
    }
}

#[tokio::test]
async fn test_status_and_completed_date_written() {
    let store = seeded_store(THREE);
    let sender = MockEmailSender::new();

    let report = dispatcher(&store, &sender).dispatch(1).await.unwrap();

    let row = store.notification(1).unwrap();
    assert_eq!(row.status.as_deref(), Some("Notified 3 attendees"));
    assert_eq!(row.completed_date, Some(report.completed_date));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_zero_attendees() {
    let store = seeded_store(&[]);
    let sender = MockEmailSender::new();

    let report = dispatcher(&store, &sender).dispatch(1).await.unwrap();

    assert_eq!(sender.attempts(), 0);
    assert_eq!(report.status, "Notified 0 attendees");
    let row = store.notification(1).unwrap();
    assert_eq!(row.status.as_deref(), Some("Notified 0 attendees"));
    assert!(row.completed_date.is_some());
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_redelivery_resends_and_overwrites() {
    let store = seeded_store(&[("a@x.com", "A", "One"), ("b@x.com", "B", "Two")]);
    let sender = MockEmailSender::new();
    let dispatcher = dispatcher(&store, &sender);

    dispatcher.dispatch(1).await.unwrap();
    dispatcher.dispatch(1).await.unwrap();

    assert_eq!(sender.sent().len(), 4);
    let row = store.notification(1).unwrap();
    assert_eq!(row.status.as_deref(), Some("Notified 2 attendees"));
    assert_eq!(store.sessions_opened(), 2);
    assert_eq!(store.open_sessions(), 0);
}

// ============================================================
// Failure paths
// ============================================================

#[tokio::test]
async fn test_unknown_notification_not_updated() {
    let store = seeded_store(THREE);
    let sender = MockEmailSender::new();

    let err = dispatcher(&store, &sender).dispatch(42).await.unwrap_err();

    assert!(matches!(err, DispatchError::NotFound(42)));
    assert_eq!(sender.attempts(), 0);
    assert!(store.notification(1).unwrap().status.is_none());
    assert_eq!(store.commits(), 0);
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_failed_send_stops_batch_and_skips_update() {
    let store = seeded_store(THREE);
    let sender = MockEmailSender::new();
    sender.fail_for("b@x.com");

    let err = dispatcher(&store, &sender).dispatch(1).await.unwrap_err();

    match err {
        DispatchError::Delivery {
            recipient,
            delivered,
            total,
            source,
        } => {
            assert_eq!(recipient, "b@x.com");
            assert_eq!(delivered, 1);
            assert_eq!(total, 3);
            assert!(matches!(source, DeliveryError::Rejected { status: 500, .. }));
        }
        other => panic!("expected Delivery error, got {:?}", other),
    }

    // a@ was sent, b@ was attempted, c@ never reached
    assert_eq!(sender.attempts(), 2);
    assert_eq!(sender.sent().len(), 1);
    assert_eq!(sender.sent()[0].to, "a@x.com");

    let row = store.notification(1).unwrap();
    assert!(row.status.is_none());
    assert!(row.completed_date.is_none());
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_begin_failure_is_datastore_error() {
    let store = seeded_store(THREE);
    store.fail_on(StoreOperation::Begin);
    let sender = MockEmailSender::new();

    let err = dispatcher(&store, &sender).dispatch(1).await.unwrap_err();

    assert!(matches!(err, DispatchError::Datastore(_)));
    assert_eq!(sender.attempts(), 0);
    assert_eq!(store.sessions_opened(), 0);
}

#[tokio::test]
async fn test_attendee_query_failure_sends_nothing() {
    let store = seeded_store(THREE);
    store.fail_on(StoreOperation::FetchAttendees);
    let sender = MockEmailSender::new();

    let err = dispatcher(&store, &sender).dispatch(1).await.unwrap_err();

    assert!(matches!(err, DispatchError::Datastore(_)));
    assert_eq!(sender.attempts(), 0);
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_update_failure_after_sends() {
    let store = seeded_store(THREE);
    store.fail_on(StoreOperation::MarkCompleted);
    let sender = MockEmailSender::new();

    let err = dispatcher(&store, &sender).dispatch(1).await.unwrap_err();

    assert!(matches!(err, DispatchError::Datastore(_)));
    assert_eq!(sender.sent().len(), 3);
    assert!(store.notification(1).unwrap().status.is_none());
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_commit_failure_leaves_row_untouched() {
    let store = seeded_store(THREE);
    store.fail_on(StoreOperation::Commit);
    let sender = MockEmailSender::new();

    let err = dispatcher(&store, &sender).dispatch(1).await.unwrap_err();

    assert!(matches!(err, DispatchError::Datastore(_)));
    assert!(store.notification(1).unwrap().status.is_none());
    assert_eq!(store.commits(), 0);
    assert_eq!(store.open_sessions(), 0);
}

// ============================================================
// Log-only delivery
// ============================================================

#[tokio::test]
async fn test_log_only_mode_completes_with_unaddressable_attendee() {
    let store = seeded_store(&[
        ("a@x.com", "A", "One"),
        ("legacy-import", "L", "Import"),
        ("c@x.com", "C", "Three"),
    ]);
    let sender = LogOnlySender::new("info@techconf.com".to_string());
    let dispatcher = NotificationDispatcher::new(Arc::new(store.clone()), Arc::new(sender));

    let report = dispatcher.dispatch(1).await.unwrap();

    assert_eq!(report.attendees_notified, 3);
    assert_eq!(
        store.notification(1).unwrap().status.as_deref(),
        Some("Notified 3 attendees")
    );
    assert_eq!(store.open_sessions(), 0);
}
