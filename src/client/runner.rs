//! Plugin-side serve loop.
//!
//! Pulls engine commands through a registered [`ClientSession`], runs actions
//! through an [`ActionHandler`] while heartbeating, and pushes each outcome
//! back before pulling again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::envelope::{ActionRequest, ActionResponse, ServerRequestData, ServerResponseData};

use super::{ClientError, ClientSession};

/// Shortest heartbeat cadence; `tokio::time::interval` rejects zero.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Executes actions pulled from the engine.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Runs `request` to completion and reports the outcome.
    async fn handle(&self, request: &ActionRequest) -> ActionResponse;
}

/// Why [`PluginRunner::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The engine sent a shutdown command, which was acknowledged.
    EngineShutdown,
    /// The caller cancelled the loop.
    Cancelled,
}

/// Serve loop for one registered session.
pub struct PluginRunner<H> {
    session: ClientSession,
    handler: H,
    heartbeat_interval: Duration,
}

impl<H: ActionHandler> PluginRunner<H> {
    /// Creates a runner over a registered `session`.
    #[must_use]
    pub fn new(session: ClientSession, handler: H, config: &TransportConfig) -> Self {
        Self {
            session,
            handler,
            heartbeat_interval: config.client.heartbeat_interval(),
        }
    }

    /// Overrides the heartbeat cadence. Clamped to at least one millisecond.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Returns the heartbeat cadence used while an action runs.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the underlying session.
    #[must_use]
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Gives the session back, e.g. to re-register after a failure.
    #[must_use]
    pub fn into_session(self) -> ClientSession {
        self.session
    }

    /// Serves engine commands until shutdown, cancellation, or an error.
    ///
    /// Cancellation is observed between round trips and while an action
    /// runs; a pull already in flight completes within the session's
    /// `timeout_secs`. On shutdown or cancellation the client deregisters.
    ///
    /// # Errors
    ///
    /// Returns the first transport or protocol error. Nothing is retried.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome, ClientError> {
        tracing::info!(client = %self.session.client_id(), "Plugin runner started");

        loop {
            if cancel.is_cancelled() {
                self.leave().await;
                return Ok(RunOutcome::Cancelled);
            }

            let Some(command) = self.session.recv_server_request().await? else {
                continue;
            };

            match command {
                ServerRequestData::Action(request) => {
                    tracing::info!(
                        client = %self.session.client_id(),
                        action = %request.action,
                        instance_id = %request.instance_id,
                        "Running action"
                    );
                    let Some(response) = self.run_action(&request, cancel).await? else {
                        self.leave().await;
                        return Ok(RunOutcome::Cancelled);
                    };
                    self.session
                        .send_server_response(ServerResponseData::Action(response))
                        .await?;
                }
                ServerRequestData::Shutdown => {
                    tracing::info!(client = %self.session.client_id(), "Engine requested shutdown");
                    self.session
                        .send_server_response(ServerResponseData::Shutdown)
                        .await?;
                    self.leave().await;
                    return Ok(RunOutcome::EngineShutdown);
                }
            }
        }
    }

    /// Runs the handler, heartbeating every interval. `None` if cancelled.
    async fn run_action(
        &mut self,
        request: &ActionRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<ActionResponse>, ClientError> {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        let work = self.handler.handle(request);
        tokio::pin!(work);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(None),
                response = &mut work => return Ok(Some(response)),
                _ = ticker.tick() => {
                    self.session
                        .notify_heartbeat(&request.action, Utc::now())
                        .await?;
                }
            }
        }
    }

    async fn leave(&mut self) {
        if !self.session.is_registered() {
            return;
        }
        if let Err(e) = self.session.deregister_client().await {
            tracing::warn!(error = %e, "Deregistration failed, local state cleared");
        }
    }
}
