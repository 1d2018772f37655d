use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tower::ServiceExt;

use palaver::{config::Config, store, sweeper, AppState};

async fn test_app() -> (Router, SqlitePool) {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    store::init_schema(&db_pool).await.unwrap();

    let app = palaver::app(AppState {
        db_pool: db_pool.clone(),
        config: Config::default(),
    });

    (app, db_pool)
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("user", user);
    }

    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, body)
}

async fn join(app: &Router, name: &str) -> StatusCode {
    let (status, _) = send(
        app,
        request(
            Method::POST,
            "/participants",
            None,
            Some(json!({ "name": name })),
        ),
    )
    .await;
    status
}

async fn post_message(app: &Router, user: &str, to: &str, text: &str) -> (StatusCode, Value) {
    send(
        app,
        request(
            Method::POST,
            "/messages",
            Some(user),
            Some(json!({ "to": to, "text": text, "type": "message" })),
        ),
    )
    .await
}

async fn backdate(db_pool: &SqlitePool, name: &str, millis: i64) {
    sqlx::query("UPDATE participants SET last_activity=last_activity-? WHERE name=?")
        .bind(millis)
        .bind(name)
        .execute(db_pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn registration_posting_and_eviction() {
    let (app, db_pool) = test_app().await;

    assert_eq!(join(&app, "Ann").await, StatusCode::CREATED);
    assert_eq!(join(&app, "Ann").await, StatusCode::CONFLICT);

    let (status, _) = post_message(&app, "Ann", "everyone", "hi all").await;
    assert_eq!(status, StatusCode::CREATED);

    // Bob never registered
    let (status, _) = post_message(&app, "Bob", "everyone", "hello?").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Ann goes quiet past the idle threshold
    backdate(&db_pool, "Ann", 60_000).await;
    let evicted = sweeper::sweep_pass(&db_pool, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(evicted, 1);

    let (status, body) = send(&app, request(Method::GET, "/participants", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = send(&app, request(Method::GET, "/messages", Some("Ann"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body.as_array().unwrap();

    // join notice, the broadcast, then exactly one departure notice
    assert_eq!(messages.len(), 3);
    let departure = messages.last().unwrap();
    assert_eq!(departure["from"], "Ann");
    assert_eq!(departure["to"], "everyone");
    assert_eq!(departure["type"], "status");
}

#[tokio::test]
async fn registration_validates_the_name() {
    let (app, _) = test_app().await;

    assert_eq!(join(&app, "  ").await, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(join(&app, "everyone").await, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn heartbeat_tracks_registration() {
    let (app, _) = test_app().await;

    let (status, _) = send(&app, request(Method::POST, "/status", Some("Ann"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    join(&app, "Ann").await;
    let (status, _) = send(&app, request(Method::POST, "/status", Some("Ann"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request(Method::POST, "/status", None, None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn only_the_author_may_update_or_delete() {
    let (app, _) = test_app().await;

    join(&app, "Ann").await;
    join(&app, "Bob").await;

    let (_, body) = post_message(&app, "Ann", "everyone", "first thoughts").await;
    let id = body["id"].as_str().unwrap().to_owned();

    let edit = json!({ "to": "everyone", "text": "second thoughts", "type": "message" });

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            &format!("/messages/{id}"),
            Some("Bob"),
            Some(edit.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            &format!("/messages/{id}"),
            Some("Ann"),
            Some(edit.clone()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, request(Method::GET, "/messages", Some("Ann"), None)).await;
    let updated = body
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == id.as_str())
        .unwrap()
        .clone();
    assert_eq!(updated["text"], "second thoughts");

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            "/messages/no-such-id",
            Some("Ann"),
            Some(edit),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        request(Method::DELETE, &format!("/messages/{id}"), Some("Bob"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        request(Method::DELETE, &format!("/messages/{id}"), Some("Ann"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, request(Method::GET, "/messages", Some("Ann"), None)).await;
    assert!(body.as_array().unwrap().iter().all(|m| m["id"] != id.as_str()));
}

#[tokio::test]
async fn listing_requires_identity_and_windows_before_filtering() {
    let (app, _) = test_app().await;

    let (status, _) = send(&app, request(Method::GET, "/messages", None, None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    join(&app, "Ann").await;

    let (status, _) = send(
        &app,
        request(Method::GET, "/messages?limit=0", Some("Ann"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    post_message(&app, "Ann", "everyone", "one").await;
    send(
        &app,
        request(
            Method::POST,
            "/messages",
            Some("Ann"),
            Some(json!({ "to": "Carol", "text": "just us", "type": "private-message" })),
        ),
    )
    .await;
    post_message(&app, "Ann", "everyone", "three").await;

    // full log: join notice, "one", private to Carol, "three".
    // Bob's last-2 window is [private, "three"], of which only "three"
    // is his to see.
    let (status, body) = send(
        &app,
        request(Method::GET, "/messages?limit=2", Some("Bob"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let texts: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["three"]);

    // without a limit Bob sees everything except the private message
    let (_, body) = send(&app, request(Method::GET, "/messages", Some("Bob"), None)).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}
