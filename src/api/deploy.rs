// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook deployment endpoint.
//!
//! One handler serves every configured service route. A delivery passes
//! through the admission gates in order — rate limit, signature, service
//! resolution — and only then reaches the remote executor. Each gate
//! short-circuits with a terminal error response; nothing runs past a gate
//! that rejected the request.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Uri},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::DeployError;
use crate::rate_limit::Admission;
use crate::registry::interpolate_command;
use crate::signature::verify_signature;
use crate::ssh::SshTarget;
use crate::state::AppState;

/// Header carrying the HMAC signature of the request body.
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Successful deployment response.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeployResponse {
    pub success: bool,
    pub service: String,
    pub message: String,
    /// Standard output of the remote deployment command.
    pub output: String,
}

/// Deployment webhook handler.
///
/// Registered once per configured service under `POST /<serviceName>`.
#[utoipa::path(
    post,
    path = "/{service}",
    tag = "Deploy",
    params(
        ("service" = String, Path, description = "Configured service name")
    ),
    responses(
        (status = 200, description = "Deployment executed", body = DeployResponse),
        (status = 401, description = "Invalid signature"),
        (status = 404, description = "Unknown service"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Configuration or execution failure")
    )
)]
pub async fn deploy_webhook(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<DeployResponse>, DeployError> {
    let service = uri.path().trim_start_matches('/').to_string();
    let deployment_id = Uuid::new_v4();
    let client = client_identity(&headers, peer);

    info!(%deployment_id, service = %service, client = %client, "Received webhook request");

    if let Admission::Rejected { retry_after_secs } = state.limiter.admit(&client) {
        warn!(%deployment_id, client = %client, retry_after_secs, "Rate limit exceeded");
        return Err(DeployError::RateLimited { retry_after_secs });
    }

    // The signed payload is the deterministic re-serialization of the JSON
    // body, exactly as the sender produced it from its own object.
    let body = payload.to_string();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !verify_signature(
        body.as_bytes(),
        signature,
        state.config.webhook_secret.as_bytes(),
    ) {
        warn!(%deployment_id, service = %service, "Invalid signature");
        return Err(DeployError::InvalidSignature);
    }

    let Some(descriptor) = state.config.services.lookup(&service) else {
        return Err(DeployError::UnknownService { service });
    };
    if descriptor.host.is_empty() {
        return Err(DeployError::MissingHost { service });
    }

    let command = interpolate_command(&descriptor.command, descriptor.args.as_ref());
    info!(
        %deployment_id,
        service = %service,
        host = %descriptor.host,
        command = %command,
        "Executing deployment"
    );

    let target = SshTarget {
        host: descriptor.host.clone(),
        port: descriptor.port,
        username: state.config.ssh.username.clone(),
        private_key: state.config.ssh.private_key.clone(),
    };

    match state.executor.execute(&command, &target).await {
        Ok(result) => {
            info!(
                %deployment_id,
                service = %service,
                stdout_bytes = result.stdout.len(),
                stderr_bytes = result.stderr.len(),
                "Deployment completed successfully"
            );
            Ok(Json(DeployResponse {
                success: true,
                service,
                message: "Deployment triggered successfully".to_string(),
                output: result.stdout,
            }))
        }
        Err(source) => {
            error!(%deployment_id, service = %service, error = %source, "Deployment failed");
            Err(DeployError::Execution { service, source })
        }
    }
}

/// Client identity for rate limiting: the first `X-Forwarded-For` entry
/// when the relay sits behind a proxy, otherwise the socket peer address.
fn client_identity(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}
