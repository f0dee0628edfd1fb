// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// REST API: routing, authentication and error rendering.
//
// Requests normally arrive through the Home Assistant ingress proxy, which
// authenticates the user and tags the request with `X-Ingress-Path`. That
// header is only honoured on connections from the configured ingress peer,
// since tunnel traffic reaches the same listener. Direct clients (the mobile
// app over a tunnel) present the configured bearer token.

mod print;
mod tunnel;

#[cfg(test)]
mod testing;

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::{error, warn};

use relayprint_core::{RelayError, ServerConfig};

use crate::services::app_services::AppServices;

/// Header the ingress proxy adds to every request it forwards.
pub const INGRESS_HEADER: &str = "x-ingress-path";

pub fn router(services: AppServices) -> Router {
    let body_limit = services.config().max_upload_bytes;

    let protected = Router::new()
        .route("/api/print", post(print::submit))
        .route("/api/print/:job_id/status", get(print::job_status))
        .route("/api/print/:job_id", delete(print::cancel))
        .route("/api/printers", get(print::printers))
        .route("/api/printers/summary", get(print::printer_summary))
        .route("/api/printer/:name/test-print", post(print::test_print))
        .route("/api/queue/status", get(print::queue_status))
        .route("/tunnel/start", post(tunnel::start))
        .route("/tunnel/stop", post(tunnel::stop))
        .route("/tunnel/status", get(tunnel::status))
        .route(
            "/config/tunnel",
            get(tunnel::configuration).post(tunnel::update_configuration),
        )
        .route_layer(middleware::from_fn_with_state(services.clone(), require_auth));

    Router::new()
        .route("/api/health", get(health))
        .route("/config/remote", get(tunnel::remote_config))
        .merge(protected)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(services)
}

/// Whether a request from `peer` may reach the protected routes.
pub fn is_authorized(headers: &HeaderMap, peer: Option<IpAddr>, config: &ServerConfig) -> bool {
    if headers.contains_key(INGRESS_HEADER) && peer.is_some() && peer == config.ingress_peer {
        return true;
    }
    let Some(expected) = config.api_token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented.trim() == expected)
}

async fn require_auth(State(services): State<AppServices>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if is_authorized(request.headers(), peer, services.config()) {
        return next.run(request).await;
    }
    if request.headers().contains_key(INGRESS_HEADER) {
        warn!(path = %request.uri().path(), peer = ?peer, "ingress header from untrusted peer");
    } else {
        warn!(path = %request.uri().path(), "rejected unauthenticated request");
    }
    ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "Not found")
}

// -- Errors ------------------------------------------------------------------

/// An error response, rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let status = match &e {
            RelayError::JobNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_user_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %e, "request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;
