//! Configuration types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default listening address of the engine.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3371";

/// Transport configuration shared by the engine and plugin hosts.
///
/// Built once at startup and handed to every component constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl TransportConfig {
    /// Returns a copy that points clients and the listener at `address`.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.server.address = address.into();
        self
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Loopback address the engine listens on and clients dial.
    #[serde(default = "default_address")]
    pub address: String,
    /// Capacity of the inbound call queue; size it for the expected number
    /// of concurrent clients.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_queue_capacity() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Plugin host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long the engine may hold a pull before answering "no work".
    pub timeout_secs: u64,
    /// Heartbeat cadence while an action runs.
    pub heartbeat_interval_secs: u64,
}

impl ClientConfig {
    /// Heartbeat cadence, at least one second.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            heartbeat_interval_secs: 5,
        }
    }
}

/// Engine dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on one wait of the drain loop.
    pub read_timeout_ms: u64,
    /// Capacity of the engine event broadcast channel.
    pub event_capacity: usize,
    /// Timeout given to actions without their own entry.
    pub default_action_timeout_secs: u64,
    /// Known actions. When empty, any action name may register.
    pub actions: HashMap<String, ActionConfig>,
}

impl EngineConfig {
    /// Drain loop wake-up, at least one millisecond.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Timeout for `action`, falling back to the default.
    #[must_use]
    pub fn action_timeout_secs(&self, action: &str) -> u64 {
        self.actions
            .get(action)
            .and_then(|a| a.timeout_secs)
            .unwrap_or(self.default_action_timeout_secs)
    }

    /// Whether `action` may be registered.
    #[must_use]
    pub fn permits_action(&self, action: &str) -> bool {
        if self.actions.is_empty() {
            return true;
        }
        self.actions.get(action).is_some_and(|a| !a.disabled)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            event_capacity: 256,
            default_action_timeout_secs: 60,
            actions: HashMap::new(),
        }
    }
}

/// Per-action settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    pub timeout_secs: Option<u64>,
    pub disabled: bool,
}
