//! Request and response types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::codes;
use super::{DecodeError, ServerRequestData, ServerResponseData};

/// Kind of a [`Request`]. Closed set; each kind has exactly one payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    RegisterClient,
    DeregisterClient,
    RegisterAction,
    DeregisterAction,
    /// Pull the next engine command (long-poll).
    RecvServerRequest,
    /// Push back the outcome of a pulled command.
    SendServerResponse,
    NotifyActionHeartbeat,
    Shutdown,
}

impl RequestKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterClient => "register_client",
            Self::DeregisterClient => "deregister_client",
            Self::RegisterAction => "register_action",
            Self::DeregisterAction => "deregister_action",
            Self::RecvServerRequest => "recv_server_request",
            Self::SendServerResponse => "send_server_response",
            Self::NotifyActionHeartbeat => "notify_action_heartbeat",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of [`RequestKind::RegisterClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterClientData {
    /// Name the client registers under.
    pub name: String,
}

/// Payload of [`RequestKind::RegisterAction`] and [`RequestKind::DeregisterAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionData {
    pub action: String,
}

/// Payload of [`RequestKind::NotifyActionHeartbeat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatData {
    /// Action that is still running.
    pub action: String,
    /// When the plugin host observed the action alive.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyData {}

/// Typed payload of a [`Request`]; the variant determines the kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    RegisterClient(RegisterClientData),
    DeregisterClient,
    RegisterAction(ActionData),
    DeregisterAction(ActionData),
    RecvServerRequest,
    SendServerResponse(ServerResponseData),
    NotifyActionHeartbeat(HeartbeatData),
    Shutdown,
}

impl RequestPayload {
    /// Kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::RegisterClient(_) => RequestKind::RegisterClient,
            Self::DeregisterClient => RequestKind::DeregisterClient,
            Self::RegisterAction(_) => RequestKind::RegisterAction,
            Self::DeregisterAction(_) => RequestKind::DeregisterAction,
            Self::RecvServerRequest => RequestKind::RecvServerRequest,
            Self::SendServerResponse(_) => RequestKind::SendServerResponse,
            Self::NotifyActionHeartbeat(_) => RequestKind::NotifyActionHeartbeat,
            Self::Shutdown => RequestKind::Shutdown,
        }
    }

    /// Decodes a raw payload against the shape required by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::PayloadMismatch`] if `value` does not have the
    /// shape of `kind`'s payload.
    pub fn decode(kind: RequestKind, value: Value) -> Result<Self, DecodeError> {
        let mismatch = |source| DecodeError::PayloadMismatch { kind, source };

        let payload = match kind {
            RequestKind::RegisterClient => {
                Self::RegisterClient(serde_json::from_value(value).map_err(mismatch)?)
            }
            RequestKind::DeregisterClient => {
                decode_empty(value).map_err(mismatch)?;
                Self::DeregisterClient
            }
            RequestKind::RegisterAction => {
                Self::RegisterAction(serde_json::from_value(value).map_err(mismatch)?)
            }
            RequestKind::DeregisterAction => {
                Self::DeregisterAction(serde_json::from_value(value).map_err(mismatch)?)
            }
            RequestKind::RecvServerRequest => {
                decode_empty(value).map_err(mismatch)?;
                Self::RecvServerRequest
            }
            RequestKind::SendServerResponse => {
                Self::SendServerResponse(serde_json::from_value(value).map_err(mismatch)?)
            }
            RequestKind::NotifyActionHeartbeat => {
                Self::NotifyActionHeartbeat(serde_json::from_value(value).map_err(mismatch)?)
            }
            RequestKind::Shutdown => {
                decode_empty(value).map_err(mismatch)?;
                Self::Shutdown
            }
        };
        Ok(payload)
    }

    /// Action named by the payload, if any.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::RegisterAction(data) | Self::DeregisterAction(data) => Some(&data.action),
            Self::NotifyActionHeartbeat(data) => Some(&data.action),
            Self::SendServerResponse(ServerResponseData::Action(response)) => {
                Some(&response.action)
            }
            _ => None,
        }
    }
}

fn decode_empty(value: Value) -> Result<(), serde_json::Error> {
    if value.is_null() {
        return Ok(());
    }
    serde_json::from_value::<EmptyData>(value).map(|_| ())
}

impl Serialize for RequestPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::RegisterClient(data) => data.serialize(serializer),
            Self::RegisterAction(data) | Self::DeregisterAction(data) => {
                data.serialize(serializer)
            }
            Self::SendServerResponse(data) => data.serialize(serializer),
            Self::NotifyActionHeartbeat(data) => data.serialize(serializer),
            Self::DeregisterClient | Self::RecvServerRequest | Self::Shutdown => {
                EmptyData::default().serialize(serializer)
            }
        }
    }
}

/// A call from a plugin host to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Id of the calling client; empty before registration.
    pub client: String,
    /// Pull budget the engine honours for [`RequestKind::RecvServerRequest`].
    pub timeout_secs: u64,
    pub payload: RequestPayload,
}

impl Request {
    /// Creates a request from `client` with the given pull budget.
    #[must_use]
    pub fn new(client: impl Into<String>, timeout_secs: u64, payload: RequestPayload) -> Self {
        Self {
            client: client.into(),
            timeout_secs,
            payload,
        }
    }

    /// Kind implied by the payload.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    /// Decodes a request from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Malformed`] for invalid JSON or missing envelope
    /// fields, and [`DecodeError::PayloadMismatch`] when the payload does not
    /// fit the declared kind.
    pub fn decode(json: &str) -> Result<Self, DecodeError> {
        let raw: RawRequest = serde_json::from_str(json)?;
        Self::try_from(raw)
    }
}

#[derive(Serialize)]
struct RequestRef<'a> {
    kind: RequestKind,
    client: &'a str,
    timeout_secs: u64,
    payload: &'a RequestPayload,
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RequestRef {
            kind: self.kind(),
            client: &self.client,
            timeout_secs: self.timeout_secs,
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

/// Wire form of a [`Request`] before its payload is checked against its kind.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRequest {
    kind: RequestKind,
    #[serde(default)]
    client: String,
    #[serde(default)]
    timeout_secs: u64,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<RawRequest> for Request {
    type Error = DecodeError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            client: raw.client,
            timeout_secs: raw.timeout_secs,
            payload: RequestPayload::decode(raw.kind, raw.payload)?,
        })
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRequest::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Typed payload of a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Acknowledgement with nothing to return.
    Empty,
    /// Work pulled through [`RequestKind::RecvServerRequest`].
    ServerRequest(ServerRequestData),
    /// The pull budget expired with no work; pull again.
    NoWork,
}

impl ResponsePayload {
    /// Short name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::ServerRequest(_) => "server_request",
            Self::NoWork => "no_work",
        }
    }
}

/// The engine's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// [`codes::SUCCESS`] or one of the failure codes.
    pub result_code: i32,
    pub result_str: String,
    pub payload: ResponsePayload,
}

impl Response {
    /// Successful response with an empty payload.
    #[must_use]
    pub fn success() -> Self {
        Self::with_payload(ResponsePayload::Empty)
    }

    /// Successful response carrying `payload`.
    #[must_use]
    pub fn with_payload(payload: ResponsePayload) -> Self {
        Self {
            result_code: codes::SUCCESS,
            result_str: codes::SUCCESS_MESSAGE.to_string(),
            payload,
        }
    }

    /// Successful long-poll answer telling the client to pull again.
    #[must_use]
    pub fn no_work() -> Self {
        Self::with_payload(ResponsePayload::NoWork)
    }

    /// Failed response with an empty payload.
    #[must_use]
    pub fn failure(result_code: i32, message: impl Into<String>) -> Self {
        Self {
            result_code,
            result_str: message.into(),
            payload: ResponsePayload::Empty,
        }
    }

    /// Whether the result code is [`codes::SUCCESS`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result_code == codes::SUCCESS
    }
}
