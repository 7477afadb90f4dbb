mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::*;
use nfe_intake_rust::api::{self, AppState};
use nfe_intake_rust::db::FailPoint;
use nfe_intake_rust::models::RawInvoice;
use nfe_intake_rust::{BatchCoordinator, MemoryStore, RetryPolicy};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app(store: &MemoryStore) -> Router {
    let lifecycle = engine(store);
    let state = AppState {
        batches: Arc::new(BatchCoordinator::new(lifecycle.clone(), 2)),
        lifecycle,
        retry: RetryPolicy::none(),
    };
    api::router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_invoice(app: &Router, raw: &RawInvoice) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/invoices",
        Some(serde_json::to_value(raw).unwrap()),
    )
    .await
}

#[tokio::test]
async fn ingest_returns_created_with_envelope() {
    let store = MemoryStore::new();
    seed(&store, "RAC-15", "Ração Cão Adulto 15kg", "10.00", "20.00").await;
    let app = app(&store);

    let raw = invoice(1, vec![line("RACAO CAO ADULTO 15KG", "4", "12.00")]);
    let (status, body) = post_invoice(&app, &raw).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("1 auto-linked"));
    assert_eq!(body["data"]["access_key"], access_key(1));
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn malformed_invoice_lists_every_field() {
    let app = app(&MemoryStore::new());
    let mut raw = invoice(1, vec![line("Areia", "1", "10.00")]);
    raw.access_key = Some("123".into());
    raw.items[0].quantity = None;

    let (status, body) = post_invoice(&app, &raw).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    let fields: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"access_key"));
    assert!(fields.contains(&"items[1].quantity"));
}

#[tokio::test]
async fn duplicate_access_key_is_unprocessable() {
    let app = app(&MemoryStore::new());
    let raw = invoice(5, vec![line("Areia", "1", "10.00")]);
    assert_eq!(post_invoice(&app, &raw).await.0, StatusCode::CREATED);

    let (status, body) = post_invoice(&app, &raw).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains(&access_key(5)));
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let app = app(&MemoryStore::new());
    let (status, body) = send(&app, Method::GET, "/api/invoices/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn commit_without_linked_items_is_a_conflict() {
    let app = app(&MemoryStore::new());
    let (_, created) = post_invoice(&app, &invoice(1, vec![line("Brinquedo Corda", "1", "5.00")])).await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, Method::POST, &format!("/api/invoices/{}/commit", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn failed_commit_transaction_is_unavailable() {
    let store = MemoryStore::new();
    seed(&store, "RAC-15", "Ração Cão Adulto 15kg", "10.00", "20.00").await;
    let app = app(&store);
    let (_, created) = post_invoice(&app, &invoice(1, vec![line("RACAO CAO ADULTO 15KG", "4", "12.00")])).await;
    let id = created["data"]["id"].as_i64().unwrap();

    store.fail_at(FailPoint::CreatePayable).await;
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/invoices/{}/commit", id),
        Some(serde_json::json!({ "overrides": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);

    let (_, current) = send(&app, Method::GET, &format!("/api/invoices/{}", id), None).await;
    assert_eq!(current["data"]["invoice"]["status"], "pending");
}

#[tokio::test]
async fn list_filters_by_access_key() {
    let app = app(&MemoryStore::new());
    post_invoice(&app, &invoice(1, vec![line("Areia", "1", "10.00")])).await;
    post_invoice(&app, &invoice(2, vec![line("Areia", "1", "10.00")])).await;

    let (status, all) = send(&app, Method::GET, "/api/invoices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let uri = format!("/api/invoices?access_key={}", access_key(2));
    let (_, found) = send(&app, Method::GET, &uri, None).await;
    let found = found["data"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["access_key"], access_key(2));

    let uri = format!("/api/invoices?access_key={}", access_key(3));
    let (_, missing) = send(&app, Method::GET, &uri, None).await;
    assert!(missing["data"].as_array().unwrap().is_empty());
}
