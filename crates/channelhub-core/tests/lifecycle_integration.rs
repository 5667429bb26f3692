//! Integration lifecycle: connect, finalize, disconnect, enable and delete.

mod common;

use channelhub_core::error::CoreError;
use channelhub_core::storage::IntegrationStore;
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_finalize_resolves_page_and_clears_pending() {
    let h = harness();
    let mut req = connect_request("user-7", "good-1", 3600);
    req.in_between_steps = true;
    let i1 = h.engine.integrations.connect_or_update(req).await.unwrap();
    assert!(i1.in_between_steps);

    let done = h
        .engine
        .integrations
        .finalize_connection(
            ORG,
            &i1.id,
            PROVIDER,
            &json!({ "id": "42", "name": "Page", "access_token": "T", "username": "u" }),
        )
        .await
        .unwrap();

    assert_eq!(done.id, i1.id);
    assert!(!done.in_between_steps);
    assert_eq!(done.internal_id, "42");
    assert_eq!(done.token, "T");
    assert_eq!(done.name, "Page");
    assert_eq!(done.profile.as_deref(), Some("u"));
}

#[tokio::test]
async fn test_finalize_twice_is_invalid_state() {
    let h = harness();
    let mut req = connect_request("user-7", "good-1", 3600);
    req.in_between_steps = true;
    let i1 = h.engine.integrations.connect_or_update(req).await.unwrap();
    let callback = json!({ "id": "42", "name": "Page", "access_token": "T" });

    h.engine
        .integrations
        .finalize_connection(ORG, &i1.id, PROVIDER, &callback)
        .await
        .unwrap();
    let err = h
        .engine
        .integrations
        .finalize_connection(ORG, &i1.id, PROVIDER, &callback)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_concurrent_finalize_lands_once() {
    let h = harness();
    let mut req = connect_request("user-7", "good-1", 3600);
    req.in_between_steps = true;
    let i1 = h.engine.integrations.connect_or_update(req).await.unwrap();
    let first = json!({ "id": "42", "name": "Page", "access_token": "T" });
    let second = json!({ "id": "43", "name": "Other", "access_token": "U" });

    // Both pass the pending check before either writes.
    let (a, b) = tokio::join!(
        h.engine
            .integrations
            .finalize_connection(ORG, &i1.id, PROVIDER, &first),
        h.engine
            .integrations
            .finalize_connection(ORG, &i1.id, PROVIDER, &second),
    );

    assert_eq!(a.unwrap().internal_id, "42");
    assert!(matches!(b.unwrap_err(), CoreError::InvalidState(_)));
    let kept = h.reload(&i1.id).await;
    assert_eq!(kept.internal_id, "42");
    assert_eq!(kept.token, "T");
}

#[tokio::test]
async fn test_finalize_takes_over_deleted_identity() {
    let h = harness();
    let old = h.connect("42", "good-old", 3600).await;
    h.engine.integrations.delete(ORG, &old.id).await.unwrap();

    let mut req = connect_request("user-7", "good-1", 3600);
    req.in_between_steps = true;
    let pending = h.engine.integrations.connect_or_update(req).await.unwrap();

    let done = h
        .engine
        .integrations
        .finalize_connection(
            ORG,
            &pending.id,
            PROVIDER,
            &json!({ "id": "42", "name": "Page", "access_token": "T" }),
        )
        .await
        .unwrap();
    assert_eq!(done.internal_id, "42");

    // A later reconnect of the same page lands on the finalized integration.
    let again = h.connect("42", "good-2", 3600).await;
    assert_eq!(again.id, pending.id);
    assert_eq!(h.engine.integrations.list(ORG).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconnect_updates_instead_of_duplicating() {
    let h = harness();
    let first = h.connect("page-1", "good-1", 3600).await;
    let second = h.connect("page-1", "good-2", 7200).await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.refresh_token.as_deref(), Some("good-2"));
    assert_eq!(h.engine.integrations.list(ORG).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconnect_revives_deleted_integration() {
    let h = harness();
    let first = h.connect("page-1", "good-1", 3600).await;
    h.engine.integrations.delete(ORG, &first.id).await.unwrap();
    assert!(h.engine.integrations.list(ORG).await.unwrap().is_empty());

    let revived = h.connect("page-1", "good-2", 3600).await;
    assert_eq!(revived.id, first.id);
    assert!(revived.deleted_at.is_none());
}

#[tokio::test]
async fn test_disconnect_clears_credentials_and_notifies() {
    let h = harness();
    let i = h.connect("page-1", "good-1", 3600).await;

    h.engine.integrations.disconnect(ORG, &i.id).await.unwrap();

    let stored = h.reload(&i.id).await;
    assert_eq!(stored.token, "");
    assert!(stored.refresh_token.is_none());
    assert!(stored.refresh_needed);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Could not refresh your fake channel");
    assert!(sent[0].body.ends_with("http://localhost:4200/launches"));
}

#[tokio::test]
async fn test_enable_rejects_at_limit_and_accepts_below() {
    let h = harness();
    let a = h.connect("a", "good-a", 3600).await;
    let b = h.connect("b", "good-b", 3600).await;
    let c = h.connect("c", "good-c", 3600).await;
    h.engine.integrations.disable(ORG, &c.id).await.unwrap();

    // Two enabled, limit two: rejected.
    let err = h.engine.integrations.enable(ORG, 2, &c.id).await.unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded { limit: 2 }));
    assert!(err.to_string().contains('2'));
    assert!(h.reload(&c.id).await.disabled);

    // Two enabled, limit three: accepted.
    h.engine.integrations.enable(ORG, 3, &c.id).await.unwrap();
    assert!(!h.reload(&c.id).await.disabled);
    assert!(!h.reload(&a.id).await.disabled);
    assert!(!h.reload(&b.id).await.disabled);
}

#[tokio::test]
async fn test_mark_refresh_needed_and_rename() {
    let h = harness();
    let i = h.connect("page-1", "good-1", 3600).await;

    h.engine
        .integrations
        .mark_refresh_needed(ORG, &i.id)
        .await
        .unwrap();
    h.engine
        .integrations
        .update_name_and_picture(ORG, &i.id, "Renamed", Some("https://cdn.example.com/new.png"))
        .await
        .unwrap();

    let stored = h.reload(&i.id).await;
    assert!(stored.refresh_needed);
    assert_eq!(stored.name, "Renamed");
    assert_eq!(stored.picture.as_deref(), Some("https://cdn.example.com/new.png"));
}

#[tokio::test]
async fn test_deleted_integration_is_hidden_from_store_reads() {
    let h = harness();
    let i = h.connect("page-1", "good-1", 3600).await;
    h.engine.integrations.delete(ORG, &i.id).await.unwrap();

    assert!(h.store.get_integration(ORG, &i.id).await.unwrap().is_none());
    assert!(matches!(
        h.engine.integrations.get(ORG, &i.id).await,
        Err(CoreError::NotFound { .. })
    ));
}
