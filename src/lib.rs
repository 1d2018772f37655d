pub mod config;
pub mod log;
pub mod messages;
pub mod participants;
pub mod registry;
pub mod status;
pub mod store;
pub mod sweeper;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use crate::config::Config;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(participants::router())
        .merge(messages::router())
        .merge(status::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Invalid(String),
    #[error("name already in use")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("only the author may do that")]
    Forbidden,
    #[error("sender is not in the chat")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Invalid(_) | Self::Unauthorized => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::UNAUTHORIZED,
            Self::Store(err) => {
                // full detail stays in the server log
                tracing::error!("store error: {err}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response();
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Claimed identity of the caller, taken from the `user` header.
pub struct Requester(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("user")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Self(name.to_owned()))
            .ok_or_else(|| AppError::invalid("missing user header"))
    }
}
