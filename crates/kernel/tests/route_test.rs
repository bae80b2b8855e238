#![allow(clippy::unwrap_used, clippy::expect_used)]
//! HTTP surface: health and the job runner endpoint.

mod common;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};

use common::{TestApp, response_json};
use vellum_kernel::jobs::{Dispatch, DispatchClaims, PROCESS_PATH};
use vellum_kernel::plugin::CLEAN_EXPIRED_TOKENS;

fn dispatch_request(token: Option<&str>, body: &Value) -> Request<Body> {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri(PROCESS_PATH)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    request
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn sign_dispatch(app: &TestApp, jti: &str, lifetime: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    app.state
        .jwt()
        .sign(&DispatchClaims {
            jti: jti.to_string(),
            iat: now,
            exp: now + lifetime,
        })
        .unwrap()
}

fn sweep_dispatch(jti: &str) -> Value {
    serde_json::to_value(Dispatch {
        jti: jti.to_string(),
        name: CLEAN_EXPIRED_TOKENS.to_string(),
        args: Vec::new(),
    })
    .unwrap()
}

#[tokio::test]
async fn health_reports_store_and_cache() {
    let app = TestApp::new().await;
    let response = app
        .request(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body, json!({"status": "healthy", "store": true, "cache": false}));
}

#[tokio::test]
async fn dispatch_without_token_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app
        .request(dispatch_request(None, &sweep_dispatch("d-1")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response_json(response).await["error"].is_string());
}

#[tokio::test]
async fn signed_dispatch_runs_once() {
    let app = TestApp::new().await;
    let token = sign_dispatch(&app, "d-2", 60);

    let response = app
        .request(dispatch_request(Some(&token), &sweep_dispatch("d-2")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["job"], json!(CLEAN_EXPIRED_TOKENS));
    assert_eq!(body["output"], json!({"removed": 0}));

    let replay = app
        .request(dispatch_request(Some(&token), &sweep_dispatch("d-2")))
        .await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_dispatch_tokens_are_rejected() {
    let app = TestApp::new().await;

    let expired = sign_dispatch(&app, "d-3", -10);
    let response = app
        .request(dispatch_request(Some(&expired), &sweep_dispatch("d-3")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let other = sign_dispatch(&app, "d-4", 60);
    let response = app
        .request(dispatch_request(Some(&other), &sweep_dispatch("d-5")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_jobs_are_bad_requests() {
    let app = TestApp::new().await;
    let token = sign_dispatch(&app, "d-6", 60);
    let body = json!({"jti": "d-6", "name": "no-such-job", "args": []});

    let response = app.request(dispatch_request(Some(&token), &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
