#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Login, install and session token lifecycle.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{TestApp, test_config};
use vellum_kernel::AppState;
use vellum_kernel::auth::LoginError;
use vellum_kernel::cache::CacheLayer;
use vellum_kernel::query::Filter;
use vellum_test_utils::{assert, test_user};

const PASSWORD: &str = "correct horse battery";

async fn app_with_user() -> (TestApp, String) {
    let app = TestApp::new().await;
    let user = app.create_user("reader@example.test", PASSWORD).await;
    let id = user["id"].as_str().unwrap().to_string();
    (app, id)
}

#[tokio::test]
async fn passwords_are_hashed_and_never_returned() {
    let (app, _) = app_with_user().await;
    let user = app
        .state
        .query("users")
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert::lacks_field(&user, "password");
    assert::field_eq(&user, "is_active", &json!(true));
    assert::field_eq(&user, "is_admin", &json!(false));
}

#[tokio::test]
async fn short_passwords_are_rejected() {
    let app = TestApp::new().await;
    let err = app
        .state
        .query("users")
        .unwrap()
        .create(test_user("short").input())
        .await
        .unwrap_err();
    assert!(err.field_errors().unwrap().contains("password"));
}

#[tokio::test]
async fn login_opens_a_verifiable_session() {
    let (app, user_id) = app_with_user().await;
    let session = app
        .state
        .auth()
        .login(" Reader@Example.test ", PASSWORD)
        .await
        .unwrap();
    assert_eq!(session.user_id, user_id);

    let verification = app.state.tokens().verify(&session.token).await;
    assert!(verification.is_valid);
    let user = verification.user.unwrap();
    assert_eq!(user["id"], json!(user_id));
    assert!(!user.contains_key("password"));
    assert_eq!(verification.token_data.unwrap().exp, session.expires_at);

    assert!(app.state.auth().logout(&session.token).await.unwrap());
    assert!(!app.state.tokens().verify(&session.token).await.is_valid);
    assert!(!app.state.auth().logout(&session.token).await.unwrap());
}

#[tokio::test]
async fn failed_logins_look_the_same() {
    let (app, _) = app_with_user().await;
    let auth = app.state.auth();
    let before = app.state.auth_stats().password_checks();

    let wrong_password = auth
        .login("reader@example.test", "not the password")
        .await
        .unwrap_err();
    assert!(matches!(wrong_password, LoginError::IncorrectCredentials));

    let unknown_email = auth
        .login("nobody@example.test", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(unknown_email, LoginError::IncorrectCredentials));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());

    // Unknown emails still pay for a hash check.
    assert_eq!(app.state.auth_stats().password_checks(), before + 2);
}

#[tokio::test]
async fn inactive_users_cannot_log_in() {
    let app = TestApp::new().await;
    let user = test_user(PASSWORD).inactive();
    app.state
        .query("users")
        .unwrap()
        .create(user.input())
        .await
        .unwrap();

    let err = app.state.auth().login(&user.email, PASSWORD).await.unwrap_err();
    assert!(matches!(err, LoginError::IncorrectCredentials));
}

#[tokio::test]
async fn install_only_runs_once() {
    let app = TestApp::new().await;
    let session = app
        .state
        .auth()
        .install("admin@example.test", PASSWORD)
        .await
        .unwrap();

    let verification = app.state.tokens().verify(&session.token).await;
    assert_eq!(verification.user.unwrap()["is_admin"], json!(true));

    let err = app
        .state
        .auth()
        .install("second@example.test", PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::AlreadyInstalled));
}

#[tokio::test]
async fn renewing_replaces_the_token() {
    let (app, user_id) = app_with_user().await;
    let tokens = app.state.tokens();
    let old = tokens.issue(&user_id, Duration::from_secs(600)).await.unwrap();

    let renewed = tokens.renew(&old.token).await.unwrap().unwrap();
    assert_ne!(renewed.token, old.token);
    assert_eq!(renewed.claims.user_id, user_id);
    assert!(tokens.verify(&renewed.token).await.is_valid);
    assert!(!tokens.verify(&old.token).await.is_valid);

    assert!(tokens.renew(&old.token).await.unwrap().is_none());
    assert!(tokens.renew("not-a-token").await.unwrap().is_none());
}

#[tokio::test]
async fn tampered_and_foreign_tokens_fail() {
    let (app, user_id) = app_with_user().await;
    let tokens = app.state.tokens();

    let issued = tokens.issue(&user_id, Duration::from_secs(600)).await.unwrap();
    let mut tampered = issued.token.clone();
    tampered.push('x');
    assert!(!tokens.verify(&tampered).await.is_valid);

    // Signed but never stored.
    let unstored = tokens.generate(&user_id, Duration::from_secs(600)).unwrap();
    assert!(!tokens.verify(&unstored.token).await.is_valid);
}

#[tokio::test]
async fn deactivating_a_user_invalidates_sessions() {
    let (app, user_id) = app_with_user().await;
    let session = app
        .state
        .auth()
        .login("reader@example.test", PASSWORD)
        .await
        .unwrap();

    app.state
        .query("users")
        .unwrap()
        .where_eq("id", user_id.as_str())
        .update(common::record(json!({"is_active": false})))
        .await
        .unwrap();

    assert!(!app.state.tokens().verify(&session.token).await.is_valid);
}

#[tokio::test]
async fn user_tokens_can_be_revoked_except_one() {
    let (app, user_id) = app_with_user().await;
    let tokens = app.state.tokens();
    let keep = tokens.issue(&user_id, Duration::from_secs(600)).await.unwrap();
    let drop_a = tokens.issue(&user_id, Duration::from_secs(600)).await.unwrap();
    let drop_b = tokens.issue(&user_id, Duration::from_secs(600)).await.unwrap();

    let removed = tokens
        .remove_user_tokens(&user_id, Some(&keep.token))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(tokens.verify(&keep.token).await.is_valid);
    assert!(!tokens.verify(&drop_a.token).await.is_valid);
    assert!(!tokens.verify(&drop_b.token).await.is_valid);
}

#[tokio::test]
async fn expired_tokens_are_swept() {
    let app = TestApp::from_builder(
        AppState::builder(test_config())
            .cache(CacheLayer::memory())
            .plugin(common::BlogPlugin),
    )
    .await;
    let user = app.create_user("sweep@example.test", PASSWORD).await;
    let user_id = user["id"].as_str().unwrap();
    let tokens = app.state.tokens();

    let expired = tokens.issue(user_id, Duration::ZERO).await.unwrap();
    let live = tokens.issue(user_id, Duration::from_secs(600)).await.unwrap();

    assert_eq!(tokens.sweep_expired().await.unwrap(), 1);
    assert!(!tokens.verify(&expired.token).await.is_valid);
    assert!(tokens.verify(&live.token).await.is_valid);
    assert_eq!(tokens.sweep_expired().await.unwrap(), 0);
}
