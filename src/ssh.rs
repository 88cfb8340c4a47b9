// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote command execution over SSH.
//!
//! One [`RemoteExecutor::execute`] call is one session: connect,
//! authenticate with the configured private key, run a single shell
//! command, collect its output streams and exit status, disconnect. No
//! connection reuse, no retries; the relay makes exactly one attempt per
//! webhook delivery and the caller decides whether to redeliver.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, AuthResult};
use russh::keys::{decode_secret_key, ssh_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use thiserror::Error;
use tracing::debug;

/// Captured output of a completed remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
}

/// One connect-authenticate-execute-disconnect attempt's target.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key material in PEM form. Never logged.
    pub private_key: String,
}

/// Failures of a remote execution attempt.
///
/// Connection and authentication failures are distinct from a command that
/// ran and exited non-zero: the former never dispatched anything, the
/// latter carries the exit code and captured stderr as the primary
/// diagnostic payload.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("SSH connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("SSH private key could not be parsed: {0}")]
    InvalidKey(#[source] russh::keys::Error),

    #[error("SSH authentication failed for {user}@{addr}")]
    AuthFailed { user: String, addr: String },

    #[error("SSH session error: {0}")]
    Session(#[source] russh::Error),

    #[error("remote channel closed before reporting an exit status")]
    Disconnected,

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: u32, stderr: String },
}

/// Seam between the deployment orchestrator and the SSH transport.
///
/// The orchestrator only ever sees this trait, so tests substitute a
/// simulated executor and production wires in [`SshExecutor`].
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, command: &str, target: &SshTarget) -> Result<CommandResult, ExecError>;
}

/// Host key acceptor for outbound sessions.
///
/// Deployment targets come from operator-controlled configuration, matching
/// the trust model of the transport library's defaults.
struct AcceptHostKey;

impl client::Handler for AcceptHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// `russh`-backed [`RemoteExecutor`].
pub struct SshExecutor {
    config: Arc<client::Config>,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &str, target: &SshTarget) -> Result<CommandResult, ExecError> {
        let addr = format!("{}:{}", target.host, target.port);

        let mut session = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            AcceptHostKey,
        )
        .await
        .map_err(|source| ExecError::ConnectionFailed {
            addr: addr.clone(),
            source,
        })?;
        debug!(%addr, "SSH connection established");

        let outcome = run_command(&mut session, command, target, &addr).await;

        // The session is torn down on every exit path; a failed disconnect
        // of an already-broken connection is not worth surfacing.
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;

        outcome
    }
}

/// Authenticate and run the command on an established connection.
///
/// Split out of `execute` so the caller can disconnect exactly once
/// regardless of which step failed.
async fn run_command(
    session: &mut client::Handle<AcceptHostKey>,
    command: &str,
    target: &SshTarget,
    addr: &str,
) -> Result<CommandResult, ExecError> {
    let key = decode_secret_key(&target.private_key, None).map_err(ExecError::InvalidKey)?;
    let rsa_hash = session
        .best_supported_rsa_hash()
        .await
        .map_err(ExecError::Session)?
        .flatten();

    let auth = session
        .authenticate_publickey(
            target.username.clone(),
            PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash),
        )
        .await
        .map_err(ExecError::Session)?;
    if !matches!(auth, AuthResult::Success) {
        return Err(ExecError::AuthFailed {
            user: target.username.clone(),
            addr: addr.to_string(),
        });
    }
    debug!(user = %target.username, %addr, "SSH authentication complete");

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(ExecError::Session)?;
    channel.exec(true, command).await.map_err(ExecError::Session)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => {
                stdout.extend_from_slice(data);
            }
            ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                stderr.extend_from_slice(data);
            }
            ChannelMsg::ExitStatus { exit_status: code } => {
                // More stream data may still be queued behind the status
                // message; keep draining until the channel closes.
                exit_status = Some(code);
            }
            _ => {}
        }
    }

    interpret_exit(exit_status, &stdout, &stderr)
}

/// Map a drained channel to the execution outcome.
fn interpret_exit(
    exit_status: Option<u32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<CommandResult, ExecError> {
    let stdout = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr).into_owned();

    match exit_status {
        Some(0) => Ok(CommandResult { stdout, stderr }),
        Some(exit_code) => Err(ExecError::CommandFailed { exit_code, stderr }),
        None => Err(ExecError::Disconnected),
    }
}
