use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    log::{self, MessageKind, Recipient},
    AppError, AppResult, AppState, Requester,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", get(list).post(post))
        .route("/messages/{id}", put(update).delete(delete))
}

#[derive(Deserialize)]
pub(crate) struct MessageBody {
    to: Recipient,
    text: String,
    #[serde(rename = "type")]
    kind: MessageKind,
}

#[debug_handler]
pub(crate) async fn post(
    State(db_pool): State<SqlitePool>,
    Requester(from): Requester,

    Json(MessageBody { to, text, kind }): Json<MessageBody>,
) -> AppResult<Response> {
    let id = log::post_message(&db_pool, &from, &to, &text, kind).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

#[derive(Deserialize)]
pub(crate) struct ListParams {
    limit: Option<usize>,
}

#[debug_handler]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    Requester(requester): Requester,

    Query(ListParams { limit }): Query<ListParams>,
) -> AppResult<Response> {
    if limit == Some(0) {
        return Err(AppError::invalid("limit must be at least 1"));
    }

    let messages = log::scan(&db_pool).await?;
    Ok(Json(log::visible_to(&messages, &requester, limit)).into_response())
}

#[debug_handler]
pub(crate) async fn update(
    State(db_pool): State<SqlitePool>,
    Requester(requester): Requester,
    Path(id): Path<String>,

    Json(MessageBody { to, text, kind }): Json<MessageBody>,
) -> AppResult<Response> {
    log::update(&db_pool, &id, &requester, &to, &text, kind).await?;

    Ok(StatusCode::OK.into_response())
}

#[debug_handler]
pub(crate) async fn delete(
    State(db_pool): State<SqlitePool>,
    Requester(requester): Requester,
    Path(id): Path<String>,
) -> AppResult<Response> {
    log::delete(&db_pool, &id, &requester).await?;

    Ok(StatusCode::OK.into_response())
}
