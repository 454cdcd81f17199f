//! Client session for plugin hosts.
//!
//! A [`ClientSession`] owns the single connection a plugin host uses to talk
//! to the engine. Every operation is one round trip and takes `&mut self`, so
//! a session never has two calls in flight.

use chrono::{DateTime, Utc};
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::config::TransportConfig;
use crate::envelope::{
    read_frame, write_frame, ActionData, FrameError, HeartbeatData, RegisterClientData, Request,
    RequestKind, RequestPayload, Response, ResponsePayload, ServerRequestData, ServerResponseData,
    WireCall,
};

use super::ClientError;

/// One established connection to the engine.
#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn dial(address: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(ClientError::Connect)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn round_trip(&mut self, request: Request) -> Result<Response, ClientError> {
        write_frame(&mut self.writer, &WireCall::new(request))
            .await
            .map_err(|e| match e {
                FrameError::Io(e) => ClientError::Io(e),
                FrameError::Encode(e) => ClientError::Encode(e),
            })?;

        let Some(line) = read_frame(&mut self.reader).await? else {
            return Err(ClientError::ConnectionClosed);
        };
        serde_json::from_str(&line).map_err(ClientError::Decode)
    }
}

/// A plugin host's session with the engine.
#[derive(Debug)]
pub struct ClientSession {
    address: String,
    client_id: String,
    connection: Option<Connection>,
    timeout_secs: u64,
}

impl ClientSession {
    /// Creates an unregistered session for the engine in `config`.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            address: config.server.address.clone(),
            client_id: String::new(),
            connection: None,
            timeout_secs: config.client.timeout_secs,
        }
    }

    /// Overrides the pull budget sent with every request.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Registered client id, empty when unregistered.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether a registration is active.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.client_id.is_empty()
    }

    /// Returns the pull budget sent with every request.
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Engine address this session dials.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connects to the engine and registers as `name`.
    ///
    /// On any failure the session is left unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyRegistered`] or
    /// [`ClientError::InvalidName`] without touching the network; otherwise
    /// the dial error, the engine's refusal, or a payload mismatch.
    pub async fn register_client(&mut self, name: &str) -> Result<(), ClientError> {
        if self.is_registered() {
            return Err(ClientError::AlreadyRegistered {
                client: self.client_id.clone(),
            });
        }
        if name.is_empty() {
            return Err(ClientError::InvalidName { what: "client" });
        }

        let result = self.try_register(name).await;
        match &result {
            Ok(()) => self.client_id = name.to_string(),
            Err(_) => self.reset(),
        }
        result
    }

    async fn try_register(&mut self, name: &str) -> Result<(), ClientError> {
        self.connection = Some(Connection::dial(&self.address).await?);
        let payload = self
            .call(RequestPayload::RegisterClient(RegisterClientData {
                name: name.to_string(),
            }))
            .await?;
        expect_empty(RequestKind::RegisterClient, payload)
    }

    /// Deregisters the client and closes the connection.
    ///
    /// Local state is cleared even when the engine reports a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] if the session is not
    /// registered, or the remote failure after clearing local state.
    pub async fn deregister_client(&mut self) -> Result<(), ClientError> {
        self.ensure_registered(RequestKind::DeregisterClient)?;

        let result = match self.call(RequestPayload::DeregisterClient).await {
            Ok(payload) => expect_empty(RequestKind::DeregisterClient, payload),
            Err(e) => Err(e),
        };
        self.reset();
        result
    }

    /// Associates `action` with this client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] locally when unregistered,
    /// otherwise any transport or remote failure.
    pub async fn register_action(&mut self, action: &str) -> Result<(), ClientError> {
        self.ensure_registered(RequestKind::RegisterAction)?;
        if action.is_empty() {
            return Err(ClientError::InvalidName { what: "action" });
        }

        let payload = self
            .call(RequestPayload::RegisterAction(ActionData {
                action: action.to_string(),
            }))
            .await?;
        expect_empty(RequestKind::RegisterAction, payload)
    }

    /// Removes `action` from this client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] locally when unregistered,
    /// otherwise any transport or remote failure.
    pub async fn deregister_action(&mut self, action: &str) -> Result<(), ClientError> {
        self.ensure_registered(RequestKind::DeregisterAction)?;

        let payload = self
            .call(RequestPayload::DeregisterAction(ActionData {
                action: action.to_string(),
            }))
            .await?;
        expect_empty(RequestKind::DeregisterAction, payload)
    }

    /// Pulls the next engine command.
    ///
    /// The engine holds the call for up to [`timeout_secs`](Self::timeout_secs).
    /// Returns `None` when that budget expired with no work; pull again.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] locally when unregistered,
    /// otherwise any transport, remote or payload failure.
    pub async fn recv_server_request(&mut self) -> Result<Option<ServerRequestData>, ClientError> {
        self.ensure_registered(RequestKind::RecvServerRequest)?;

        match self.call(RequestPayload::RecvServerRequest).await? {
            ResponsePayload::ServerRequest(data) => Ok(Some(data)),
            ResponsePayload::NoWork => Ok(None),
            other @ ResponsePayload::Empty => Err(unexpected_payload(
                RequestKind::RecvServerRequest,
                "server_request or no_work",
                &other,
            )),
        }
    }

    /// Pushes back the outcome of a pulled command.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] locally when unregistered,
    /// otherwise any transport, remote or payload failure.
    pub async fn send_server_response(
        &mut self,
        response: ServerResponseData,
    ) -> Result<(), ClientError> {
        self.ensure_registered(RequestKind::SendServerResponse)?;

        let payload = self
            .call(RequestPayload::SendServerResponse(response))
            .await?;
        expect_empty(RequestKind::SendServerResponse, payload)
    }

    /// Reports that `action` is still alive. Returns once the engine has
    /// recorded the heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRegistered`] locally when unregistered,
    /// otherwise any transport, remote or payload failure.
    pub async fn notify_heartbeat(
        &mut self,
        action: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        self.ensure_registered(RequestKind::NotifyActionHeartbeat)?;

        let payload = self
            .call(RequestPayload::NotifyActionHeartbeat(HeartbeatData {
                action: action.to_string(),
                timestamp,
            }))
            .await?;
        expect_empty(RequestKind::NotifyActionHeartbeat, payload)
    }

    fn ensure_registered(&self, op: RequestKind) -> Result<(), ClientError> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(ClientError::NotRegistered { op })
        }
    }

    fn reset(&mut self) {
        self.client_id.clear();
        self.connection = None;
    }

    /// Sends one request and checks its result code.
    async fn call(&mut self, payload: RequestPayload) -> Result<ResponsePayload, ClientError> {
        let op = payload.kind();
        let action = payload.action().map(str::to_string);
        let context_client = match &payload {
            RequestPayload::RegisterClient(data) => data.name.clone(),
            _ => self.client_id.clone(),
        };

        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::NotRegistered { op });
        };
        let request = Request::new(self.client_id.clone(), self.timeout_secs, payload);

        let response = match connection.round_trip(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(client = %context_client, kind = %op, error = %e, "Call failed");
                return Err(e);
            }
        };

        tracing::info!(
            client = %context_client,
            kind = %op,
            result_code = response.result_code,
            result_str = %response.result_str,
            "Call completed"
        );

        if !response.is_success() {
            return Err(ClientError::Remote {
                op,
                code: response.result_code,
                message: response.result_str,
                client: context_client,
                action,
            });
        }
        Ok(response.payload)
    }
}

/// Asks the engine at `config.server.address` to shut down.
///
/// Uses a throwaway connection; no registration is needed.
///
/// # Errors
///
/// Returns the dial error, a transport failure, or the engine's refusal.
pub async fn request_engine_shutdown(config: &TransportConfig) -> Result<(), ClientError> {
    let mut connection = Connection::dial(&config.server.address).await?;
    let request = Request::new("", config.client.timeout_secs, RequestPayload::Shutdown);
    let response = connection.round_trip(request).await?;

    tracing::info!(
        kind = %RequestKind::Shutdown,
        result_code = response.result_code,
        result_str = %response.result_str,
        "Call completed"
    );

    if !response.is_success() {
        return Err(ClientError::Remote {
            op: RequestKind::Shutdown,
            code: response.result_code,
            message: response.result_str,
            client: String::new(),
            action: None,
        });
    }
    expect_empty(RequestKind::Shutdown, response.payload)
}

fn expect_empty(op: RequestKind, payload: ResponsePayload) -> Result<(), ClientError> {
    match payload {
        ResponsePayload::Empty => Ok(()),
        other => Err(unexpected_payload(op, "empty", &other)),
    }
}

fn unexpected_payload(
    op: RequestKind,
    expected: &'static str,
    found: &ResponsePayload,
) -> ClientError {
    tracing::error!(
        kind = %op,
        expected,
        found = found.name(),
        "Response payload does not match the operation"
    );
    ClientError::UnexpectedPayload {
        op,
        expected,
        found: found.name(),
    }
}
