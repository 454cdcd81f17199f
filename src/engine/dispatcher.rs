//! Engine task that drains the transport core.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{EngineConfig, TransportConfig};
use crate::envelope::{
    ActionRequest, Request, RequestKind, RequestPayload, Response, ServerRequestData,
    ServerResponseData,
};
use crate::server::{NextCall, PendingCall, TransportCore};

use super::{ClientEntry, ClientRegistry, ClientStatus, EngineError, EngineEvent};

/// Capacity of the handle command channel.
const COMMAND_CAPACITY: usize = 64;

/// Work submitted through an [`EngineHandle`].
#[derive(Debug)]
enum EngineCommand {
    SubmitAction {
        client: String,
        request: ActionRequest,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    ShutdownClient {
        client: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ListClients {
        reply: oneshot::Sender<Vec<ClientStatus>>,
    },
}

/// Cloneable control surface of a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands_tx: mpsc::Sender<EngineCommand>,
    events_tx: broadcast::Sender<EngineEvent>,
    abort: CancellationToken,
}

impl EngineHandle {
    /// Queues `request` for the client that owns its action and returns the
    /// instance id it will carry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ActionNotRegistered`] or
    /// [`EngineError::ClientNotRegistered`] if `client` cannot take the
    /// action, and [`EngineError::ShuttingDown`] once the engine has stopped.
    pub async fn submit_action(
        &self,
        client: &str,
        request: ActionRequest,
    ) -> Result<String, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SubmitAction {
            client: client.to_string(),
            request,
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Queues a shutdown command for `client`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ClientNotRegistered`] for an unknown client and
    /// [`EngineError::ShuttingDown`] once the engine has stopped.
    pub async fn shutdown_client(&self, client: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ShutdownClient {
            client: client.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Snapshot of every registered client.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once the engine has stopped.
    pub async fn clients(&self) -> Result<Vec<ClientStatus>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::ListClients { reply }).await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)
    }

    /// Returns a receiver for events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// Returns the token that stops the engine when cancelled.
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Stops the engine; held pulls and queued calls are answered
    /// `SHUTTING_DOWN`.
    pub fn shutdown(&self) {
        self.abort.cancel();
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        if self.abort.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        self.commands_tx
            .send(command)
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }
}

/// Single task that owns the client registry and answers every call.
pub struct Engine {
    core: Arc<TransportCore>,
    config: EngineConfig,
    registry: ClientRegistry,
    commands_rx: mpsc::Receiver<EngineCommand>,
    events_tx: broadcast::Sender<EngineEvent>,
    abort: CancellationToken,
}

impl Engine {
    /// Creates an engine over `core` together with its handle.
    #[must_use]
    pub fn new(config: &TransportConfig, core: Arc<TransportCore>) -> (Self, EngineHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, _) = broadcast::channel(config.engine.event_capacity.max(1));
        let abort = CancellationToken::new();

        let handle = EngineHandle {
            commands_tx,
            events_tx: events_tx.clone(),
            abort: abort.clone(),
        };
        let engine = Self {
            core,
            config: config.engine.clone(),
            registry: ClientRegistry::new(),
            commands_rx,
            events_tx,
            abort,
        };
        (engine, handle)
    }

    /// Runs until the abort token fires or a client requests shutdown.
    pub async fn run(mut self) {
        tracing::info!(
            read_timeout_ms = self.config.read_timeout_ms,
            "Engine started"
        );

        loop {
            let now = Instant::now();
            for entry in self.registry.entries_mut() {
                entry.expire_held(now);
            }
            let wait = self.next_wait(now);

            tokio::select! {
                biased;

                () = self.abort.cancelled() => break,
                Some(command) = self.commands_rx.recv() => self.handle_command(command),
                next = self.core.next_pending_call(wait, &self.abort) => match next {
                    NextCall::Call(call) => self.handle_call(call),
                    NextCall::Timeout => {}
                    NextCall::Aborted => break,
                },
            }
        }

        self.drain().await;
    }

    /// Read timeout, shortened to the nearest held pull deadline.
    fn next_wait(&mut self, now: Instant) -> Duration {
        self.registry
            .entries_mut()
            .filter_map(|entry| entry.held_deadline())
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(self.config.read_timeout(), Duration::min)
    }

    fn handle_call(&mut self, call: PendingCall) {
        match call.request().kind() {
            RequestKind::RecvServerRequest => {
                self.handle_pull(call);
                return;
            }
            RequestKind::Shutdown => {
                tracing::info!(client = %call.request().client, "Shutdown requested");
                call.respond(Response::success());
                self.abort.cancel();
                return;
            }
            _ => {}
        }

        let response = match self.process(call.request()) {
            Ok(()) => Response::success(),
            Err(e) => {
                tracing::warn!(
                    client = %call.request().client,
                    kind = %call.request().kind(),
                    error = %e,
                    "Rejected call"
                );
                e.to_response()
            }
        };
        call.respond(response);
    }

    fn process(&mut self, request: &Request) -> Result<(), EngineError> {
        let client = request.client.as_str();

        match &request.payload {
            RequestPayload::RegisterClient(data) => self.register_client(&data.name),
            RequestPayload::DeregisterClient => {
                let entry = self.registry.deregister_client(client)?;
                self.release(client, entry);
                self.emit(EngineEvent::ClientDeregistered {
                    client: client.to_string(),
                });
                Ok(())
            }
            RequestPayload::RegisterAction(data) => {
                if self
                    .registry
                    .register_action(client, &data.action, &self.config)?
                {
                    self.emit(EngineEvent::ActionRegistered {
                        client: client.to_string(),
                        action: data.action.clone(),
                    });
                }
                Ok(())
            }
            RequestPayload::DeregisterAction(data) => {
                let dropped = self.registry.deregister_action(client, &data.action)?;
                for command in dropped {
                    tracing::warn!(
                        client = %client,
                        action = %data.action,
                        "Dropping command for deregistered action"
                    );
                    self.emit(EngineEvent::CommandDropped {
                        client: client.to_string(),
                        command,
                    });
                }
                self.emit(EngineEvent::ActionDeregistered {
                    client: client.to_string(),
                    action: data.action.clone(),
                });
                Ok(())
            }
            RequestPayload::SendServerResponse(data) => self.complete(client, data),
            RequestPayload::NotifyActionHeartbeat(data) => {
                self.registry
                    .record_heartbeat(client, &data.action, data.timestamp)?;
                self.emit(EngineEvent::Heartbeat {
                    client: client.to_string(),
                    action: data.action.clone(),
                    timestamp: data.timestamp,
                });
                Ok(())
            }
            // Answered in handle_call.
            RequestPayload::RecvServerRequest | RequestPayload::Shutdown => Ok(()),
        }
    }

    fn register_client(&mut self, name: &str) -> Result<(), EngineError> {
        if let Some(stale) = self.registry.register_client(name)? {
            tracing::warn!(client = %name, "Replacing stale registration");
            self.release(name, stale);
        }
        self.emit(EngineEvent::ClientRegistered {
            client: name.to_string(),
        });
        Ok(())
    }

    /// Answers what a removed entry still holds and reports dropped commands.
    fn release(&self, client: &str, mut entry: ClientEntry) {
        if let Some(pull) = entry.take_held_pull() {
            pull.respond(Response::no_work());
        }
        for command in entry.drain_commands() {
            tracing::warn!(client = %client, command = command.name(), "Dropping command");
            self.emit(EngineEvent::CommandDropped {
                client: client.to_string(),
                command,
            });
        }
    }

    fn complete(&mut self, client: &str, response: &ServerResponseData) -> Result<(), EngineError> {
        let entry = self.registry.entry_mut(client)?;
        entry.acknowledge(client, response)?;
        entry.offer_to_held();

        let event = match response {
            ServerResponseData::Action(response) => EngineEvent::ActionCompleted {
                client: client.to_string(),
                response: response.clone(),
            },
            ServerResponseData::Shutdown => EngineEvent::ShutdownAcknowledged {
                client: client.to_string(),
            },
        };
        self.emit(event);
        Ok(())
    }

    fn handle_pull(&mut self, call: PendingCall) {
        let client = call.request().client.clone();
        let timeout_secs = call.request().timeout_secs;

        let entry = match self.registry.entry_mut(&client) {
            Ok(entry) => entry,
            Err(e) => {
                call.respond(e.to_response());
                return;
            }
        };

        if let Some(superseded) = entry.take_held_pull() {
            tracing::debug!(client = %client, "Newer pull supersedes held pull");
            superseded.respond(Response::no_work());
        }

        let Some(pull) = entry.offer(call) else {
            return;
        };
        if timeout_secs == 0 {
            pull.respond(Response::no_work());
        } else {
            tracing::debug!(client = %client, timeout_secs, "Holding pull");
            entry.hold(pull);
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SubmitAction {
                client,
                request,
                reply,
            } => {
                let result = self.submit_action(&client, request);
                let _ = reply.send(result);
            }
            EngineCommand::ShutdownClient { client, reply } => {
                let result = self.registry.entry_mut(&client).map(|entry| {
                    entry.enqueue(ServerRequestData::Shutdown);
                    entry.offer_to_held();
                });
                if result.is_ok() {
                    tracing::info!(client = %client, "Queued shutdown command");
                }
                let _ = reply.send(result);
            }
            EngineCommand::ListClients { reply } => {
                let _ = reply.send(self.registry.statuses());
            }
        }
    }

    fn submit_action(
        &mut self,
        client: &str,
        mut request: ActionRequest,
    ) -> Result<String, EngineError> {
        self.registry.ensure_owner(client, &request.action)?;

        if request.instance_id.is_empty() {
            request.instance_id = Uuid::new_v4().to_string();
        }
        if request.timeout_secs == 0 {
            request.timeout_secs = self.config.action_timeout_secs(&request.action);
        }
        let instance_id = request.instance_id.clone();

        tracing::info!(
            client = %client,
            action = %request.action,
            instance_id = %instance_id,
            timeout_secs = request.timeout_secs,
            "Queued action"
        );

        let entry = self.registry.entry_mut(client)?;
        entry.enqueue(ServerRequestData::Action(request));
        entry.offer_to_held();
        Ok(instance_id)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    async fn drain(mut self) {
        let shutting_down = EngineError::ShuttingDown.to_response();

        for entry in self.registry.entries_mut() {
            if let Some(pull) = entry.take_held_pull() {
                pull.respond(shutting_down.clone());
            }
        }
        for call in self.core.close().await {
            call.respond(shutting_down.clone());
        }
        self.commands_rx.close();

        tracing::info!(clients = self.registry.client_count(), "Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{codes, ActionData, RegisterClientData, ResponsePayload};

    fn request(client: &str, timeout_secs: u64, payload: RequestPayload) -> Request {
        Request::new(client, timeout_secs, payload)
    }

    fn register(name: &str) -> Request {
        request(
            "",
            15,
            RequestPayload::RegisterClient(RegisterClientData {
                name: name.to_string(),
            }),
        )
    }

    fn register_action(client: &str, action: &str) -> Request {
        request(
            client,
            15,
            RequestPayload::RegisterAction(ActionData {
                action: action.to_string(),
            }),
        )
    }

    fn pull(client: &str, timeout_secs: u64) -> Request {
        request(client, timeout_secs, RequestPayload::RecvServerRequest)
    }

    fn start() -> (Arc<TransportCore>, EngineHandle, tokio::task::JoinHandle<()>) {
        let config = TransportConfig::default();
        let core = Arc::new(TransportCore::from_config(&config));
        let (engine, handle) = Engine::new(&config, Arc::clone(&core));
        let task = tokio::spawn(engine.run());
        (core, handle, task)
    }

    #[tokio::test]
    async fn register_and_list_clients() {
        let (core, handle, task) = start();

        let response = core.accept(register("Foo")).await.unwrap();
        assert_eq!(response, Response::success());
        core.accept(register_action("Foo", "Detect-0")).await.unwrap();

        let clients = handle.clients().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].name, "Foo");
        assert_eq!(clients[0].actions, vec!["Detect-0".to_string()]);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn conflicting_action_registration() {
        let (core, handle, task) = start();

        core.accept(register("Foo")).await.unwrap();
        core.accept(register("Bar")).await.unwrap();
        core.accept(register_action("Foo", "Detect-0")).await.unwrap();

        let response = core.accept(register_action("Bar", "Detect-0")).await.unwrap();
        assert_eq!(response.result_code, codes::CONFLICT);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_client_is_rejected() {
        let (core, handle, task) = start();

        let response = core.accept(pull("Ghost", 1)).await.unwrap();
        assert_eq!(response.result_code, codes::NOT_REGISTERED);
        let response = core.accept(register_action("Ghost", "x")).await.unwrap();
        assert_eq!(response.result_code, codes::NOT_REGISTERED);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_pull_answers_no_work_at_once() {
        let (core, handle, task) = start();
        core.accept(register("Foo")).await.unwrap();

        let response = core.accept(pull("Foo", 0)).await.unwrap();
        assert_eq!(response, Response::no_work());

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn held_pull_receives_submitted_action() {
        let (core, handle, task) = start();
        core.accept(register("Foo")).await.unwrap();
        core.accept(register_action("Foo", "Detect-0")).await.unwrap();

        let held = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.accept(pull("Foo", 10)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let instance_id = handle
            .submit_action("Foo", ActionRequest::new("Detect-0"))
            .await
            .unwrap();
        assert!(!instance_id.is_empty());

        let response = held.await.unwrap().unwrap();
        let ResponsePayload::ServerRequest(ServerRequestData::Action(request)) = response.payload
        else {
            panic!("Expected an action, got {:?}", response.payload);
        };
        assert_eq!(request.instance_id, instance_id);
        assert_eq!(request.timeout_secs, 60);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn submit_requires_action_owner() {
        let (core, handle, task) = start();
        core.accept(register("Foo")).await.unwrap();

        let err = handle
            .submit_action("Foo", ActionRequest::new("Detect-0"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ActionNotRegistered {
                client: "Foo".to_string(),
                action: "Detect-0".to_string()
            }
        );

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn response_without_outstanding_command() {
        let (core, handle, task) = start();
        core.accept(register("Foo")).await.unwrap();

        let response = core
            .accept(request(
                "Foo",
                15,
                RequestPayload::SendServerResponse(ServerResponseData::Shutdown),
            ))
            .await
            .unwrap();
        assert_eq!(response.result_code, codes::NO_PENDING_REQUEST);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_request_stops_the_engine() {
        let (core, handle, task) = start();

        let response = core
            .accept(request("", 15, RequestPayload::Shutdown))
            .await
            .unwrap();
        assert!(response.is_success());

        task.await.unwrap();
        assert!(handle.abort_token().is_cancelled());
        assert_eq!(
            handle.clients().await.unwrap_err(),
            EngineError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn abort_answers_held_pulls_shutting_down() {
        let (core, handle, task) = start();
        core.accept(register("Foo")).await.unwrap();

        let held = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.accept(pull("Foo", 30)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        handle.shutdown();
        let response = held.await.unwrap().unwrap();
        assert_eq!(response.result_code, codes::SHUTTING_DOWN);
        assert!(started.elapsed() < Duration::from_secs(5));

        task.await.unwrap();
    }

    #[tokio::test]
    async fn events_are_published() {
        let (core, handle, task) = start();
        let mut events = handle.subscribe();

        core.accept(register("Foo")).await.unwrap();
        core.accept(register_action("Foo", "Detect-0")).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::ClientRegistered {
                client: "Foo".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::ActionRegistered {
                client: "Foo".to_string(),
                action: "Detect-0".to_string()
            }
        );

        handle.shutdown();
        task.await.unwrap();
    }
}
