// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tunnel control and remote-access configuration endpoints.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use relayprint_core::{
    RemoteConfigView, StartOutcome, TunnelConfigUpdate, TunnelConfiguration, TunnelProvider,
    TunnelStatus,
};

use super::ApiResult;
use crate::services::app_services::AppServices;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    /// Provider identifier; the configured provider when absent.
    pub provider: Option<String>,
    pub token: Option<String>,
}

/// Stored tunnel configuration as shown to the user. The token never leaves
/// the server; only whether one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfigView {
    pub enabled: bool,
    pub provider: TunnelProvider,
    pub has_token: bool,
    pub url: Option<String>,
}

impl From<&TunnelConfiguration> for TunnelConfigView {
    fn from(config: &TunnelConfiguration) -> Self {
        Self {
            enabled: config.enabled,
            provider: config.provider,
            has_token: config.has_token(),
            url: config.public_url.clone(),
        }
    }
}

pub async fn start(State(services): State<AppServices>, Json(request): Json<StartRequest>) -> ApiResult<StartOutcome> {
    let tunnel = services.tunnel();
    let provider = match request.provider.as_deref() {
        Some(raw) => raw.parse::<TunnelProvider>()?,
        None => tunnel.configuration().provider,
    };
    Ok(Json(tunnel.start(provider, request.token.as_deref()).await?))
}

pub async fn stop(State(services): State<AppServices>) -> ApiResult<Value> {
    services.tunnel().stop().await?;
    Ok(Json(json!({ "stopped": true })))
}

pub async fn status(State(services): State<AppServices>) -> Json<TunnelStatus> {
    Json(services.tunnel().status().await)
}

/// Unauthenticated: remote clients learn where to reach the API.
pub async fn remote_config(State(services): State<AppServices>) -> Json<RemoteConfigView> {
    let status = services.tunnel().status().await;
    Json(RemoteConfigView::from(&status))
}

pub async fn configuration(State(services): State<AppServices>) -> Json<TunnelConfigView> {
    Json(TunnelConfigView::from(&services.tunnel().configuration()))
}

pub async fn update_configuration(
    State(services): State<AppServices>,
    Json(update): Json<TunnelConfigUpdate>,
) -> ApiResult<TunnelConfigView> {
    let updated = services.tunnel().update_configuration(&update)?;
    Ok(Json(TunnelConfigView::from(&updated)))
}
