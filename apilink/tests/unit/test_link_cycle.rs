//! Fetch, transform and dial sync through the link manager

use apilink::dial::PhaseOutcome;
use apilink::errors::LinkError;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::support::{DialCall, FakeServer, Harness, LinkSpec};

const GREEN_RED: &str = "\"0\" = [0, 255, 0]\n\"50\" = [255, 0, 0]";

#[tokio::test]
async fn test_cycle_pushes_transformed_value_and_backlight() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 42}}));

    let spec = LinkSpec {
        modifiers: "{ function = \"offset\", amount = 8 }",
        backlight: GREEN_RED,
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let now = Utc::now();
    let report = harness.manager.run_if_due(&id, now).await.unwrap().unwrap();
    assert_eq!(report.final_value, 50);
    assert_eq!(report.sync.value, PhaseOutcome::Applied);
    assert_eq!(report.sync.backlight, PhaseOutcome::Applied);
    assert_eq!(report.sync.image, PhaseOutcome::Skipped);
    assert_eq!(report.next_due_time, now + Duration::seconds(60));

    assert_eq!(
        server.dial_calls(),
        vec![
            DialCall::Value { uid: "DIAL1".into(), value: 50 },
            DialCall::Backlight { uid: "DIAL1".into(), rgb: (255, 0, 0) },
        ]
    );

    let status = harness.manager.status(&id).await.unwrap();
    assert_eq!(status.committed_percent, Some(50));
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_unchanged_value_makes_no_dial_calls() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 42}}));

    let spec = LinkSpec {
        backlight: GREEN_RED,
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let now = Utc::now();
    harness.manager.run_if_due(&id, now).await.unwrap().unwrap();
    assert_eq!(server.take_dial_calls().len(), 2);

    let later = now + Duration::seconds(60);
    let report = harness.manager.run_if_due(&id, later).await.unwrap().unwrap();
    assert_eq!(report.sync.requests(), 0);
    assert!(server.dial_calls().is_empty());
    assert_eq!(server.source_hits("load"), 2);
}

#[tokio::test]
async fn test_link_not_due_is_not_run() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 10}}));

    let id = harness
        .manager
        .create("Load", &LinkSpec::new("Load", "load", "DIAL1").render(&server))
        .await
        .unwrap();

    let now = Utc::now();
    harness.manager.run_if_due(&id, now).await.unwrap().unwrap();
    assert!(harness
        .manager
        .run_if_due(&id, now + Duration::seconds(30))
        .await
        .is_none());
    assert_eq!(server.source_hits("load"), 1);
}

#[tokio::test]
async fn test_backlight_failure_keeps_value_and_skips_image() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 70}}));
    server.set_statuses(200, 500, 201);
    harness.write_image("face.png", b"\x89PNG fake");

    let spec = LinkSpec {
        backlight: GREEN_RED,
        image: Some("face.png"),
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let now = Utc::now();
    let err = harness.manager.run_if_due(&id, now).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::DialUpdate(_)), "{:?}", err);
    assert_eq!(
        server.take_dial_calls(),
        vec![
            DialCall::Value { uid: "DIAL1".into(), value: 70 },
            DialCall::Backlight { uid: "DIAL1".into(), rgb: (255, 0, 0) },
        ]
    );

    let status = harness.manager.status(&id).await.unwrap();
    assert_eq!(status.committed_percent, Some(70));
    assert!(status.pending_image_upload);
    assert_eq!(status.consecutive_failures, 1);
    // failed cycles do not advance the schedule
    assert!(status.next_due_time.is_none());

    // Retried on the next tick: the value is committed so only the image goes out
    server.set_statuses(200, 201, 201);
    let report = harness.manager.run_if_due(&id, now).await.unwrap().unwrap();
    assert_eq!(report.sync.value, PhaseOutcome::Skipped);
    assert_eq!(report.sync.backlight, PhaseOutcome::Skipped);
    assert_eq!(report.sync.image, PhaseOutcome::Applied);
    assert_eq!(
        server.dial_calls(),
        vec![DialCall::Image { uid: "DIAL1".into(), has_file: true }]
    );
    assert!(!harness.manager.status(&id).await.unwrap().pending_image_upload);
}

#[tokio::test]
async fn test_value_rejected_stops_before_backlight() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 5}}));
    server.set_statuses(201, 201, 201);

    let spec = LinkSpec {
        backlight: GREEN_RED,
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let err = harness.manager.run_if_due(&id, Utc::now()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::DialUpdate(_)));
    assert_eq!(server.dial_calls().len(), 1);
    assert_eq!(harness.manager.status(&id).await.unwrap().committed_percent, None);
}

#[tokio::test]
async fn test_fetch_failure_leaves_schedule_and_dial_alone() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source_raw("load", 503, "unavailable", std::time::Duration::ZERO);

    let id = harness
        .manager
        .create("Load", &LinkSpec::new("Load", "load", "DIAL1").render(&server))
        .await
        .unwrap();

    let err = harness.manager.run_if_due(&id, Utc::now()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Fetch(_)), "{:?}", err);
    assert!(server.dial_calls().is_empty());

    let status = harness.manager.status(&id).await.unwrap();
    assert!(status.next_due_time.is_none());
    assert_eq!(status.consecutive_failures, 1);

    // still due, and retried without backoff
    let err = harness.manager.run_if_due(&id, Utc::now()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Fetch(_)));
    assert_eq!(harness.manager.status(&id).await.unwrap().consecutive_failures, 2);
}

#[tokio::test]
async fn test_bad_json_and_missing_field() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source_raw("broken", 200, "<html>", std::time::Duration::ZERO);
    server.set_source("other", json!({"data": {"temperature": 3}}));

    let broken = harness
        .manager
        .create("Broken", &LinkSpec::new("Broken", "broken", "DIAL1").render(&server))
        .await
        .unwrap();
    let other = harness
        .manager
        .create("Other", &LinkSpec::new("Other", "other", "DIAL2").render(&server))
        .await
        .unwrap();

    let err = harness.manager.run_if_due(&broken, Utc::now()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::JsonParse(_)), "{:?}", err);

    let err = harness.manager.run_if_due(&other, Utc::now()).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::FieldNotFound(_)), "{:?}", err);
    assert!(server.dial_calls().is_empty());
}

#[tokio::test]
async fn test_missing_image_is_not_retried() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 20}}));

    let spec = LinkSpec {
        image: Some("nowhere.png"),
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let now = Utc::now();
    let err = harness.manager.run_if_due(&id, now).await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::ImageMissing(_)), "{:?}", err);
    assert!(!harness.manager.status(&id).await.unwrap().pending_image_upload);

    // the next attempt succeeds without touching the dial
    let report = harness.manager.run_if_due(&id, now).await.unwrap().unwrap();
    assert_eq!(report.sync.requests(), 0);
    assert_eq!(
        server.dial_calls(),
        vec![DialCall::Value { uid: "DIAL1".into(), value: 20 }]
    );
}

#[tokio::test]
async fn test_unknown_transform_stops_chain() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": "10"}}));

    let spec = LinkSpec {
        modifiers: "{ function = \"offset\", amount = 150 }, { function = \"square\" }, { function = \"offset\", amount = -120 }",
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let report = harness.manager.run_if_due(&id, Utc::now()).await.unwrap().unwrap();
    assert_eq!(report.final_value, 100);
    assert_eq!(report.stopped_at.as_deref(), Some("square"));
}

#[tokio::test]
async fn test_step_without_function_stops_chain() {
    let server = FakeServer::start().await;
    let harness = Harness::new().await;
    server.set_source("load", json!({"data": {"level": 10}}));

    let spec = LinkSpec {
        modifiers: "{ function = \"offset\", amount = 30 }, { amount = 5 }, { function = \"invert\" }",
        ..LinkSpec::new("Load", "load", "DIAL1")
    };
    let id = harness.manager.create("Load", &spec.render(&server)).await.unwrap();

    let report = harness.manager.run_if_due(&id, Utc::now()).await.unwrap().unwrap();
    assert_eq!(report.final_value, 40);
    assert_eq!(report.stopped_at.as_deref(), Some(""));
}
