use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{log, registry, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/participants", get(list).post(join))
}

#[derive(Deserialize)]
pub(crate) struct JoinBody {
    name: String,
}

#[debug_handler]
pub(crate) async fn join(
    State(db_pool): State<SqlitePool>,

    Json(JoinBody { name }): Json<JoinBody>,
) -> AppResult<Response> {
    let name = name.trim().to_owned();
    if name.is_empty() {
        return Err(AppError::invalid("name must not be empty"));
    }
    if name == log::BROADCAST_TOKEN {
        return Err(AppError::invalid("that name is reserved"));
    }

    registry::register(&db_pool, &name).await?;
    log::append(
        &db_pool,
        &name,
        &log::Recipient::Broadcast,
        log::JOIN_NOTICE,
        log::MessageKind::Status,
    )
    .await?;

    Ok(StatusCode::CREATED.into_response())
}

#[debug_handler]
pub(crate) async fn list(State(db_pool): State<SqlitePool>) -> AppResult<Response> {
    let participants = registry::list(&db_pool).await?;
    Ok(Json(participants).into_response())
}
