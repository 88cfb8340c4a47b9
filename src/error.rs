// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-level error taxonomy and its HTTP mapping.
//!
//! Every failure a webhook delivery can hit maps to a structured JSON
//! response. Authentication failures never say why; execution failures
//! carry the remote diagnostics an operator needs. Nothing here leaks the
//! webhook secret or private key material.

use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::ssh::ExecError;

/// Terminal failure states of a deployment request.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Missing or wrong webhook signature. Always 401, never reveals which.
    #[error("invalid signature")]
    InvalidSignature,

    /// Client exceeded its request budget for the current window.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// The requested service is not in the registry.
    #[error("Service '{service}' not found in configuration")]
    UnknownService { service: String },

    /// The service exists but has no target host configured.
    #[error("SSH host not configured for service '{service}'")]
    MissingHost { service: String },

    /// The remote execution attempt failed.
    #[error("{source}")]
    Execution {
        service: String,
        #[source]
        source: ExecError,
    },
}

#[derive(Serialize)]
struct AuthFailureBody {
    error: String,
}

#[derive(Serialize)]
struct RateLimitBody {
    error: String,
    message: String,
    #[serde(rename = "retryAfter")]
    retry_after: u64,
}

#[derive(Serialize)]
struct DeployFailureBody {
    success: bool,
    service: String,
    error: String,
}

impl DeployError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownService { .. } => StatusCode::NOT_FOUND,
            Self::MissingHost { .. } | Self::Execution { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Self::InvalidSignature => {
                let body = AuthFailureBody {
                    error: "Invalid signature".to_string(),
                };
                (status, Json(body)).into_response()
            }
            Self::RateLimited { retry_after_secs } => {
                let body = RateLimitBody {
                    error: "Too many requests".to_string(),
                    message: format!(
                        "Rate limit exceeded. Try again in {retry_after_secs} seconds."
                    ),
                    retry_after: retry_after_secs,
                };
                let mut response = (status, Json(body)).into_response();
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                response
            }
            Self::UnknownService { ref service } | Self::MissingHost { ref service } => {
                let body = DeployFailureBody {
                    success: false,
                    service: service.clone(),
                    error: self.to_string(),
                };
                (status, Json(body)).into_response()
            }
            Self::Execution { service, source } => {
                let body = DeployFailureBody {
                    success: false,
                    service,
                    error: source.to_string(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            DeployError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DeployError::RateLimited { retry_after_secs: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            DeployError::UnknownService {
                service: "x".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DeployError::MissingHost {
                service: "x".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DeployError::Execution {
                service: "x".into(),
                source: ExecError::Disconnected,
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn invalid_signature_body_reveals_nothing() {
        let response = DeployError::InvalidSignature.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({"error": "Invalid signature"}));
    }

    #[tokio::test]
    async fn rate_limit_response_carries_retry_after() {
        let response = DeployError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );

        let body = body_json(response).await;
        assert_eq!(body["retryAfter"], 42);
        assert_eq!(body["error"], "Too many requests");
        assert_eq!(
            body["message"],
            "Rate limit exceeded. Try again in 42 seconds."
        );
    }

    #[tokio::test]
    async fn execution_failure_body_names_service_and_diagnostics() {
        let response = DeployError::Execution {
            service: "digletbot".into(),
            source: ExecError::CommandFailed {
                exit_code: 1,
                stderr: "boom".into(),
            },
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["service"], "digletbot");
        assert_eq!(body["error"], "Command failed with exit code 1: boom");
    }

    #[tokio::test]
    async fn unknown_service_body_is_operator_facing() {
        let response = DeployError::UnknownService {
            service: "ghost".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["service"], "ghost");
        assert_eq!(body["error"], "Service 'ghost' not found in configuration");
    }
}
