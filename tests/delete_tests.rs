//! Integration tests for deleting resources

mod common;

use axum::http::StatusCode;
use common::*;
use docrest::prelude::*;

#[tokio::test]
async fn test_delete() {
    let db = TestDatabase::new();
    let id = seed(&db, "pages", Page::new("foo")).await;
    let keep = seed(&db, "pages", Page::new("bar")).await;
    let server = serve(pages_endpoint(&db));

    let response = server.delete(&format!("/api/pages/{id}")).await;
    response.assert_status_ok();
    response.assert_text("OK");

    let stored = db.documents("pages");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["_id"], keep.to_hex());
    assert!(db.documents("pages_deleted").is_empty());

    server
        .get(&format!("/api/pages/{id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_missing_resource() {
    let db = TestDatabase::new();
    let server = serve(pages_endpoint(&db));

    let response = server.delete(&format!("/api/pages/{}", ObjectId::new())).await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_soft_delete_archives() {
    let db = TestDatabase::new();
    let id = seed(&db, "pages", Page { int_value: 9, ..Page::new("foo") }).await;
    let server = serve(pages_endpoint(&db).soft_delete(true));

    server.delete(&format!("/api/pages/{id}")).await.assert_status_ok();

    assert!(db.documents("pages").is_empty());
    let archived = db.documents("pages_deleted");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0]["_id"], id.to_hex());
    assert_eq!(archived[0]["intValue"], 9);
}

#[tokio::test]
async fn test_failed_archive_still_deletes() {
    let db = TestDatabase::new();
    db.fail_archive();
    let id = seed(&db, "pages", Page::new("foo")).await;
    let server = serve(pages_endpoint(&db).soft_delete(true));

    server.delete(&format!("/api/pages/{id}")).await.assert_status_ok();
    assert!(db.documents("pages").is_empty());
    assert!(db.documents("pages_deleted").is_empty());
}

#[tokio::test]
async fn test_post_retrieve_can_block_delete() {
    let db = TestDatabase::new();
    let id = seed(&db, "pages", Page::new("pinned")).await;
    let server = serve(pages_endpoint(&db).post_retrieve(
        Operation::Delete,
        |_: &RequestContext, _: Operation, page: &mut Page| -> HookResult {
            if page.content == "pinned" {
                Err(HookError::new("pinned pages stay", 423))
            } else {
                Ok(())
            }
        },
    ));

    let response = server.delete(&format!("/api/pages/{id}")).await;
    response.assert_status(StatusCode::LOCKED);
    assert_eq!(db.documents("pages").len(), 1);
}

#[tokio::test]
async fn test_delete_lost_connection() {
    let db = TestDatabase::new();
    let id = seed(&db, "pages", Page::new("foo")).await;
    db.fail_all("connection reset by peer");
    let server = serve(pages_endpoint(&db));

    let response = server.delete(&format!("/api/pages/{id}")).await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_json(&json!({"error": "lost database connection"}));
}
