// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::DeployError;
use crate::state::AppState;

pub mod deploy;
pub mod health;

/// Build the relay router: `/healthz` plus one webhook route per
/// configured service.
pub fn router(state: AppState) -> Router {
    let mut routes = Router::new().route("/healthz", get(health::healthz));
    for name in state.config.services.names() {
        routes = routes.route(&format!("/{name}"), post(deploy::deploy_webhook));
    }

    routes
        .fallback(unknown_service)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Router::layer wraps outside-in: the request id is assigned before
        // tracing sees the request, and propagated onto the response last.
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Requests for paths outside the configured service set.
async fn unknown_service(uri: Uri) -> DeployError {
    DeployError::UnknownService {
        service: uri.path().trim_start_matches('/').to_string(),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health::healthz, deploy::deploy_webhook),
    components(schemas(health::HealthResponse, deploy::DeployResponse)),
    tags(
        (name = "Health", description = "Liveness probes"),
        (name = "Deploy", description = "Webhook-triggered deployments")
    )
)]
struct ApiDoc;
