#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every test builds its own in-memory [`TestApp`] from the REAL kernel
//! state and routes, with a small blog plugin registered on top of the core
//! plugin.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use vellum_kernel::collection::{CollectionDefinition, CollectionField, UniqueScope};
use vellum_kernel::plugin::{Plugin, Registrar};
use vellum_kernel::store::Record;
use vellum_kernel::{AppState, AppStateBuilder, Config, routes};

/// Collections used across the integration tests.
pub struct BlogPlugin;

impl Plugin for BlogPlugin {
    fn name(&self) -> &str {
        "blog"
    }

    fn register(&self, registrar: &mut Registrar) {
        registrar.collection(
            CollectionDefinition::new("posts")
                .translatable()
                .field(CollectionField::new("title", "text").required())
                .field(CollectionField::new("slug", "slug").unique(UniqueScope::PerLanguage))
                .field(CollectionField::new("body", "rich-text"))
                .field(CollectionField::new("views", "number"))
                .field(CollectionField::new("published", "switch"))
                .field(
                    CollectionField::new("author", "relation")
                        .options(json!({"collection": "users"})),
                )
                .field(
                    CollectionField::new("category", "select")
                        .options(json!({"choices": ["news", "tech"]})),
                )
                .search(["title", "body"]),
        );

        registrar.collection(
            CollectionDefinition::new("pages")
                .public_pages()
                .field(CollectionField::new("title", "text").required()),
        );

        registrar.collection(
            CollectionDefinition::new("settings")
                .single()
                .field(CollectionField::new("site_name", "text")),
        );
    }
}

/// Configuration for tests: English and French, small drain limit.
pub fn test_config() -> Config {
    Config {
        languages: vec!["en".to_string(), "fr".to_string()],
        job_drain_limit: 50,
        ..Config::default()
    }
}

/// Test application wrapper using the REAL kernel routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Core and blog plugins on an in-memory store.
    pub async fn new() -> Self {
        Self::from_builder(AppState::builder(test_config()).plugin(BlogPlugin)).await
    }

    /// Build from a customised builder and migrate.
    pub async fn from_builder(builder: AppStateBuilder) -> Self {
        let state = builder.build();
        state.migrate(true).await.expect("migration failed");
        let router = routes::app(state.clone());
        Self { router, state }
    }

    /// Send a request through the router.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a user and return the stored record (without password).
    pub async fn create_user(&self, email: &str, password: &str) -> Record {
        self.state
            .query("users")
            .unwrap()
            .create(record(json!({ "email": email, "password": password })))
            .await
            .unwrap()
    }

    /// Create a post in the default language.
    pub async fn create_post(&self, title: &str, slug: &str) -> Record {
        self.state
            .query("posts")
            .unwrap()
            .create(record(json!({ "title": title, "slug": slug })))
            .await
            .unwrap()
    }
}

/// Build a record from a JSON object literal.
pub fn record(value: Value) -> Record {
    vellum_test_utils::record(value)
}

/// The `id` of a record as a string.
pub fn id_of(record: &Record) -> String {
    record["id"].as_str().unwrap().to_string()
}

/// Read a response body as JSON.
pub async fn response_json(response: Response) -> Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
