//! Engine-initiated work items pulled through the long-poll.

use serde::{Deserialize, Serialize};

/// A command the engine wants one specific client to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerRequestData {
    /// Run an action.
    Action(ActionRequest),
    /// Stop serving and acknowledge.
    Shutdown,
}

impl ServerRequestData {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Action(_) => "action",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outcome of a previously pulled [`ServerRequestData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerResponseData {
    /// Result of an [`ActionRequest`].
    Action(ActionResponse),
    /// Acknowledges [`ServerRequestData::Shutdown`].
    Shutdown,
}

/// Invocation of a named action on behalf of an anomaly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRequest {
    /// Action name as registered by the plugin host.
    pub action: String,
    /// Unique id of this invocation.
    #[serde(default)]
    pub instance_id: String,
    /// Instance id of the detection action that raised the anomaly.
    #[serde(default)]
    pub anomaly_instance_id: String,
    /// Key identifying the anomaly (e.g. an interface name).
    #[serde(default)]
    pub anomaly_key: String,
    /// Time budget the action is allowed to run for.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Responses of earlier actions in the same binding sequence.
    #[serde(default)]
    pub context: Vec<ActionResponse>,
}

impl ActionRequest {
    /// Creates a request for `action` with every other field empty.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }
}

/// Result of running an [`ActionRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionResponse {
    pub action: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub anomaly_instance_id: String,
    #[serde(default)]
    pub anomaly_key: String,
    /// Free-form action output.
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub result_code: i32,
    #[serde(default)]
    pub result_str: String,
}

impl ActionResponse {
    /// Starts a response that echoes the identifiers of `request`.
    #[must_use]
    pub fn for_request(request: &ActionRequest) -> Self {
        Self {
            action: request.action.clone(),
            instance_id: request.instance_id.clone(),
            anomaly_instance_id: request.anomaly_instance_id.clone(),
            anomaly_key: request.anomaly_key.clone(),
            ..Self::default()
        }
    }
}
