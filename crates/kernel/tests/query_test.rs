#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query builder tests: reads, filters, projections, pagination, search,
//! translations and mutations against the in-memory store.

mod common;

use serde_json::{Value, json};

use common::{TestApp, id_of, record};
use vellum_kernel::query::{Filter, MutationError, QueryError};
use vellum_kernel::store::SortDirection;

async fn seed_posts(app: &TestApp) {
    let posts = app.state.query("posts").unwrap();
    posts
        .create_many(vec![
            record(json!({"title": "Alpha", "slug": "alpha", "views": 5, "category": "news"})),
            record(json!({"title": "Beta", "slug": "beta", "views": 15, "category": "tech"})),
            record(json!({"title": "Gamma", "slug": "gamma", "views": 25, "published": true})),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn created_record_round_trips() {
    let app = TestApp::new().await;
    let created = app
        .state
        .query("posts")
        .unwrap()
        .create(record(json!({
            "title": "Hello",
            "slug": "hello",
            "views": 3,
            "category": "news",
        })))
        .await
        .unwrap();

    let id = id_of(&created);
    let fetched = app
        .state
        .query("posts")
        .unwrap()
        .where_eq("id", id.as_str())
        .first()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fetched["title"], json!("Hello"));
    assert_eq!(fetched["slug"], json!("hello"));
    assert_eq!(fetched["views"], json!(3));
    assert_eq!(fetched["category"], json!("news"));
    assert_eq!(fetched["published"], json!(false));
    assert_eq!(fetched["language"], json!("en"));
    assert_eq!(fetched["translations"], json!(id));
    assert!(fetched["created_at"].as_i64().unwrap() > 0);
    assert!(fetched.get("__keywords").is_none());
}

#[tokio::test]
async fn cloned_queries_do_not_share_conditions() {
    let app = TestApp::new().await;
    let base = app.state.query("posts").unwrap().where_gt("views", 1);
    let narrowed = base.clone().where_eq("slug", "alpha").where_null("body");

    assert_eq!(base.conditions().len(), 1);
    assert_eq!(narrowed.conditions().len(), 3);
}

#[tokio::test]
async fn count_is_stable_without_writes() {
    let app = TestApp::new().await;
    seed_posts(&app).await;
    let query = app.state.query("posts").unwrap().where_gte("views", 10);

    let first = query.clone().count().await.unwrap();
    let second = query.count().await.unwrap();
    assert_eq!(first, 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn filters_combine() {
    let app = TestApp::new().await;
    seed_posts(&app).await;
    let posts = || app.state.query("posts").unwrap();

    let titles = |records: Vec<vellum_kernel::store::Record>| -> Vec<String> {
        records
            .iter()
            .map(|r| r["title"].as_str().unwrap().to_string())
            .collect()
    };

    let between = posts()
        .where_between("views", 10, 30)
        .order_by("views", SortDirection::Asc)
        .all()
        .await
        .unwrap();
    assert_eq!(titles(between), vec!["Beta", "Gamma"]);

    let listed = posts()
        .where_in("slug", ["alpha", "gamma"])
        .order_by("slug", SortDirection::Desc)
        .all()
        .await
        .unwrap();
    assert_eq!(titles(listed), vec!["Gamma", "Alpha"]);

    let either = posts()
        .where_any(|g| g.where_eq("category", "news").where_eq("published", true))
        .order_by("title", SortDirection::Asc)
        .all()
        .await
        .unwrap();
    assert_eq!(titles(either), vec!["Alpha", "Gamma"]);

    let excluded = posts()
        .where_none(|g| g.where_eq("slug", "beta"))
        .count()
        .await
        .unwrap();
    assert_eq!(excluded, 2);

    assert_eq!(posts().where_ilike("title", "%AMM%").count().await.unwrap(), 1);
    assert_eq!(posts().where_null("category").count().await.unwrap(), 1);
    // Not-equal never matches NULLs.
    assert_eq!(posts().where_not("category", "news").count().await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_fields_fail_the_query() {
    let app = TestApp::new().await;
    let err = app
        .state
        .query("posts")
        .unwrap()
        .where_eq("nope", 1)
        .all()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { field, .. } if field == "nope"));

    let err = app
        .state
        .query("posts")
        .unwrap()
        .order_by("missing", SortDirection::Asc)
        .count()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { .. }));

    assert!(matches!(
        app.state.query("ghosts"),
        Err(QueryError::UnknownCollection(_))
    ));
}

#[tokio::test]
async fn projections_pick_columns() {
    let app = TestApp::new().await;
    seed_posts(&app).await;

    let selected = app
        .state
        .query("posts")
        .unwrap()
        .select(["id", "title"])
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(selected.len(), 2);
    assert!(selected.contains_key("title"));

    let deselected = app
        .state
        .query("posts")
        .unwrap()
        .select(["title"])
        .deselect(["body", "views"])
        .first()
        .await
        .unwrap()
        .unwrap();
    assert!(deselected.contains_key("title"));
    assert!(deselected.contains_key("slug"));
    assert!(!deselected.contains_key("views"));
    assert!(!deselected.contains_key("body"));
}

#[tokio::test]
async fn group_by_returns_distinct_values() {
    let app = TestApp::new().await;
    seed_posts(&app).await;
    app.create_post("Delta", "delta").await;

    let groups = app
        .state
        .query("posts")
        .unwrap()
        .group_by(["language"])
        .all()
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["language"], json!("en"));
}

#[tokio::test]
async fn paginate_reports_pages() {
    let app = TestApp::new().await;
    seed_posts(&app).await;

    let page = app
        .state
        .query("posts")
        .unwrap()
        .order_by("views", SortDirection::Asc)
        .paginate(2, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0]["title"], json!("Gamma"));

    let empty = app
        .state
        .query("settings")
        .unwrap()
        .paginate(1, 10)
        .await
        .unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.last_page, 1);

    let err = app
        .state
        .query("posts")
        .unwrap()
        .paginate(0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn search_matches_keywords() {
    let app = TestApp::new().await;
    let posts = app.state.query("posts").unwrap();
    posts
        .create_many(vec![
            record(json!({"title": "Rust tips", "slug": "rust", "body": "<p>Borrow <b>checker</b></p>"})),
            record(json!({"title": "Gardening", "slug": "garden", "body": "<p>Tomatoes</p>"})),
        ])
        .await
        .unwrap();

    let found = app
        .state
        .query("posts")
        .unwrap()
        .search("CHECKER")
        .all()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["slug"], json!("rust"));

    // Wildcards in the term are literal.
    assert_eq!(
        app.state
            .query("posts")
            .unwrap()
            .search("%")
            .count()
            .await
            .unwrap(),
        0
    );

    let err = app
        .state
        .query("settings")
        .unwrap()
        .search("x")
        .all()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn keywords_follow_updates() {
    let app = TestApp::new().await;
    let post = app.create_post("Old title", "post").await;

    app.state
        .query("posts")
        .unwrap()
        .where_eq("id", id_of(&post))
        .update(record(json!({"title": "Brand new"})))
        .await
        .unwrap();

    let posts = || app.state.query("posts").unwrap();
    assert_eq!(posts().search("brand").count().await.unwrap(), 1);
    assert_eq!(posts().search("old").count().await.unwrap(), 0);
}

#[tokio::test]
async fn translations_share_a_group() {
    let app = TestApp::new().await;
    let english = app.create_post("Hello", "hello").await;
    let group = english["translations"].clone();

    let french = app
        .state
        .query("posts")
        .unwrap()
        .language("fr")
        .create(record(json!({
            "title": "Bonjour",
            "slug": "hello",
            "translations": group,
        })))
        .await
        .unwrap();
    assert_eq!(french["language"], json!("fr"));
    assert_eq!(french["translations"], group);

    let in_french = app
        .state
        .query("posts")
        .unwrap()
        .language("fr")
        .all()
        .await
        .unwrap();
    assert_eq!(in_french.len(), 1);
    assert_eq!(in_french[0]["title"], json!("Bonjour"));

    let group_members = app
        .state
        .query("posts")
        .unwrap()
        .translations_of(id_of(&french))
        .count()
        .await
        .unwrap();
    assert_eq!(group_members, 2);

    let err = app
        .state
        .query("posts")
        .unwrap()
        .language("fr")
        .create(record(json!({"title": "Salut", "translations": group})))
        .await
        .unwrap_err();
    assert!(err.field_errors().unwrap().get("language").is_some());

    let err = app
        .state
        .query("posts")
        .unwrap()
        .language("de")
        .create(record(json!({"title": "Hallo"})))
        .await
        .unwrap_err();
    assert!(err.field_errors().unwrap().get("language").is_some());

    let err = app
        .state
        .query("posts")
        .unwrap()
        .create(record(json!({"title": "Orphan", "translations": "missing"})))
        .await
        .unwrap_err();
    assert!(err.field_errors().unwrap().get("translations").is_some());
}

#[tokio::test]
async fn translations_of_requires_translatable_collection() {
    let app = TestApp::new().await;
    let err = app
        .state
        .query("settings")
        .unwrap()
        .translations_of("x")
        .all()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)));
}

#[tokio::test]
async fn relations_populate() {
    let app = TestApp::new().await;
    let user = app.create_user("author@example.test", "correct horse").await;
    app.state
        .query("posts")
        .unwrap()
        .create(record(json!({"title": "By author", "author": id_of(&user)})))
        .await
        .unwrap();

    let raw = app.state.query("posts").unwrap().first().await.unwrap().unwrap();
    assert_eq!(raw["author"], json!(id_of(&user)));

    let populated = app
        .state
        .query("posts")
        .unwrap()
        .populate()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(populated["author"]["email"], json!("author@example.test"));
    assert!(populated["author"].get("password").is_none());
}

#[tokio::test]
async fn update_returns_changed_records() {
    let app = TestApp::new().await;
    seed_posts(&app).await;

    let before = app
        .state
        .query("posts")
        .unwrap()
        .where_eq("slug", "alpha")
        .first()
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let updated = app
        .state
        .query("posts")
        .unwrap()
        .where_lt("views", 20)
        .update(record(json!({"published": "yes"})))
        .await
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().all(|r| r["published"] == json!(true)));

    let alpha = updated.iter().find(|r| r["slug"] == json!("alpha")).unwrap();
    assert!(alpha["updated_at"].as_i64().unwrap() > before["updated_at"].as_i64().unwrap());
    assert_eq!(alpha["created_at"], before["created_at"]);

    let none = app
        .state
        .query("posts")
        .unwrap()
        .where_eq("slug", "nothing")
        .update(record(json!({"views": 1})))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn delete_removes_matching_records() {
    let app = TestApp::new().await;
    seed_posts(&app).await;

    let deleted = app
        .state
        .query("posts")
        .unwrap()
        .where_gt("views", 10)
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(app.state.query("posts").unwrap().count().await.unwrap(), 1);
    assert_eq!(
        app.state
            .query("posts")
            .unwrap()
            .where_eq("slug", "zzz")
            .delete()
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn single_collections_hold_one_record() {
    let app = TestApp::new().await;
    let settings = || app.state.query("settings").unwrap();

    settings()
        .create(record(json!({"site_name": "Vellum"})))
        .await
        .unwrap();
    let err = settings()
        .create(record(json!({"site_name": "Again"})))
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Rejected(_)));
    assert_eq!(settings().count().await.unwrap(), 1);
}

#[tokio::test]
async fn exists_reflects_matches() {
    let app = TestApp::new().await;
    seed_posts(&app).await;
    let posts = || app.state.query("posts").unwrap();
    assert!(posts().where_eq("slug", "beta").exists().await.unwrap());
    assert!(!posts().where_eq("slug", "omega").exists().await.unwrap());
    assert_eq!(
        posts()
            .order_by("views", SortDirection::Desc)
            .offset(1)
            .limit(1)
            .first()
            .await
            .unwrap()
            .unwrap()["views"],
        Value::from(15)
    );
}
