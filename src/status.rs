use axum::{
    debug_handler,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use sqlx::SqlitePool;

use crate::{registry, AppResult, AppState, Requester};

pub fn router() -> Router<AppState> {
    Router::new().route("/status", post(heartbeat))
}

#[debug_handler]
pub(crate) async fn heartbeat(
    State(db_pool): State<SqlitePool>,
    Requester(name): Requester,
) -> AppResult<Response> {
    registry::heartbeat(&db_pool, &name).await?;

    Ok(StatusCode::OK.into_response())
}
