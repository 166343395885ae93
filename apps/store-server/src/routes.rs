//! HTTP routes of the upload protocol.
//!
//! Every route except the health check requires the `x-owner-id` header.
//! Failures answer with the store's status code and an [`ApiError`] body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chunkvault_protocol::constants::{OWNER_HEADER, routes};
use chunkvault_protocol::{
    ApiError, CancelRequest, CancelResponse, ChunkQuery, ChunkResponse, ErrorCode,
    HandshakeRequest, HandshakeResponse, HealthResponse,
};
use chunkvault_store::{StoreError, UploadService};

#[derive(Clone)]
pub struct AppState {
    service: Arc<UploadService>,
}

pub fn router(service: Arc<UploadService>, max_chunk_bytes: usize) -> Router {
    Router::new()
        .route(routes::STATUS, get(status))
        .route(routes::HANDSHAKE, post(handshake))
        .route(
            routes::CHUNK,
            post(chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
        .route(routes::CANCEL, post(cancel))
        .with_state(AppState { service })
}

// ---------------------------------------------------------------------------
// Extractors and errors
// ---------------------------------------------------------------------------

/// Authenticated owner, taken from the owner header.
pub struct Owner(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Failure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| {
                Failure::new(
                    StatusCode::UNAUTHORIZED,
                    ErrorCode::Unauthenticated,
                    format!("missing {OWNER_HEADER} header"),
                )
            })
    }
}

/// Error response: status code plus JSON [`ApiError`].
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    error: ApiError,
}

impl Failure {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: ApiError::new(code, message),
        }
    }

    /// Request that axum could not decode.
    fn rejected(status: StatusCode, message: String) -> Self {
        tracing::debug!(%status, "rejected request: {message}");
        Self::new(status, ErrorCode::InvalidRequest, message)
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        if e.is_client_error() {
            tracing::warn!(code = ?e.code(), "request refused: {e}");
        } else {
            tracing::error!(code = ?e.code(), "store failure: {e}");
        }
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            error: e.to_api_error(),
        }
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn status() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

async fn handshake(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Result<Json<HandshakeRequest>, JsonRejection>,
) -> Result<Json<HandshakeResponse>, Failure> {
    let Json(req) = body.map_err(|r| Failure::rejected(r.status(), r.body_text()))?;
    Ok(Json(state.service.handshake(&owner, req).await?))
}

async fn chunk(
    State(state): State<AppState>,
    Owner(owner): Owner,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChunkResponse>, Failure> {
    let Query(query) = query.map_err(|r| Failure::rejected(r.status(), r.body_text()))?;
    let data = body.map_err(|r| Failure::rejected(r.status(), r.body_text()))?;
    Ok(Json(
        state
            .service
            .receive_chunk(&owner, &query, data.to_vec())
            .await?,
    ))
}

async fn cancel(
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<CancelResponse>, Failure> {
    let Json(req) = body.map_err(|r| Failure::rejected(r.status(), r.body_text()))?;
    Ok(Json(state.service.cancel(&owner, &req).await?))
}
