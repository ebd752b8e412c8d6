//! HTTP transport tests against a local axum server.
//!
//! Run with: cargo test --features http

#![cfg(feature = "http")]

use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use resource_sync::remote::{HttpApi, Method, RemoteApi};
use resource_sync::{Error, Filters, ResourceId, SyncConfig, SyncService};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

async fn list_shops(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    Json(json!({
        "data": [{ "_id": format!("s{}", page), "city": params.get("city") }],
        "currentPage": page,
        "totalPages": 2,
        "total": 2
    }))
}

async fn create_shop() -> impl IntoResponse {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "message": ["name is required"] })),
    )
}

async fn missing_shop() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Shop not found" })),
    )
}

async fn verify_otp(Json(body): Json<Value>) -> impl IntoResponse {
    if body["otp"] == "1234" {
        (
            StatusCode::OK,
            [(header::SET_COOKIE, "session=abc; Path=/")],
            Json(json!({ "success": true })),
        )
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Invalid code" })),
        )
            .into_response()
    }
}

async fn profile(headers: HeaderMap) -> impl IntoResponse {
    let signed_in = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains("session=abc"));
    if signed_in {
        Json(json!({ "data": { "_id": "u1", "name": "Ada" } })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({}))
}

async fn serve() -> String {
    let app = Router::new()
        .route("/api/shops", get(list_shops).post(create_shop))
        .route("/api/shops/missing", get(missing_shop))
        .route("/api/shops/s1", delete(|| async { StatusCode::NO_CONTENT }))
        .route("/api/auth/verify-otp", post(verify_otp))
        .route("/api/auth/profile", get(profile))
        .route("/api/slow", get(slow));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

async fn sync() -> SyncService<HttpApi> {
    let base = serve().await;
    let api = HttpApi::new(&base, Duration::from_secs(5)).unwrap();
    SyncService::new(api, SyncConfig::default()).unwrap()
}

#[tokio::test]
async fn test_list_pages_over_http() {
    let sync = sync().await;
    let shops = sync.shops();
    let filters = Filters::new().with("city", "Ibadan");

    let page = shops.load_page(&filters, 1).await.unwrap();
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.items[0].get("city"), Some(&json!("Ibadan")));

    shops.fetch_next(&filters).await.unwrap().expect("page 2");
    let collection = shops.collection(&filters).unwrap();
    assert!(!collection.has_next_page());
    assert!(collection.find(&ResourceId::new("s2")).is_some());
}

#[tokio::test]
async fn test_error_statuses_are_classified() {
    let sync = sync().await;

    let err = sync.shops().create(json!({})).await.unwrap_err();
    assert_eq!(
        err,
        Error::Validation {
            status: 422,
            message: "name is required".to_string()
        }
    );

    let err = sync
        .shops()
        .item(&ResourceId::new("missing"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotFound("Shop not found".to_string()));
}

#[tokio::test]
async fn test_empty_body_is_null() {
    let sync = sync().await;
    let value = sync.shops().delete(&ResourceId::new("s1")).await.unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn test_session_cookie_is_kept() {
    let sync = sync().await;
    let auth = sync.auth();

    assert_eq!(auth.profile().await.unwrap(), None);

    let err = auth.verify_otp("+2348000000000", "0000").await.unwrap_err();
    assert_eq!(err.user_message(), "Invalid code");

    auth.verify_otp("+2348000000000", "1234").await.unwrap();
    let user = auth.profile().await.unwrap().expect("signed in");
    assert_eq!(user.get("name"), Some(&json!("Ada")));
}

#[tokio::test]
async fn test_request_timeout_is_network_error() {
    let base = serve().await;
    let api = HttpApi::new(&base, Duration::from_millis(200)).unwrap();

    let err = api.get("/slow", &[]).await.unwrap_err();
    assert!(err.is_network(), "unexpected error: {:?}", err);

    let err = api.send(Method::Post, "/nowhere", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotFound(_) | Error::Validation { status: 405, .. }
    ));
}
