// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::rate_limit::RateLimiter;
use crate::ssh::{RemoteExecutor, SshExecutor};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub limiter: Arc<RateLimiter>,
    pub executor: Arc<dyn RemoteExecutor>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_executor(config, Arc::new(SshExecutor::new()))
    }

    /// Build state with a substitute executor. Tests use this to observe
    /// deployments without opening real SSH connections.
    pub fn with_executor(config: RelayConfig, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::new()),
            executor,
        }
    }
}
