//! Registered clients, their actions, and their command queues.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::envelope::{Response, ResponsePayload, ServerRequestData, ServerResponseData};
use crate::server::PendingCall;

use super::EngineError;

/// Engine-side state of one client.
#[derive(Debug, Default)]
pub struct ClientEntry {
    actions: BTreeSet<String>,
    queued: VecDeque<ServerRequestData>,
    /// Command delivered to the client and not yet acknowledged.
    awaiting_ack: Option<ServerRequestData>,
    /// Pull being held until work arrives or its deadline passes.
    held_pull: Option<PendingCall>,
    heartbeats: HashMap<String, DateTime<Utc>>,
}

impl ClientEntry {
    /// Registered action names.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }

    /// Number of commands not yet offered.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Delivered command still waiting for its response.
    #[must_use]
    pub fn awaiting_ack(&self) -> Option<&ServerRequestData> {
        self.awaiting_ack.as_ref()
    }

    /// Whether a pull is being held for this client.
    #[must_use]
    pub fn has_held_pull(&self) -> bool {
        self.held_pull.is_some()
    }

    /// Last heartbeat reported for `action`.
    #[must_use]
    pub fn last_heartbeat(&self, action: &str) -> Option<DateTime<Utc>> {
        self.heartbeats.get(action).copied()
    }

    pub(crate) fn enqueue(&mut self, command: ServerRequestData) {
        self.queued.push_back(command);
    }

    /// Answers `pull` with the next command if one may be offered now.
    /// Gives the pull back otherwise.
    pub(crate) fn offer(&mut self, pull: PendingCall) -> Option<PendingCall> {
        if self.awaiting_ack.is_some() {
            return Some(pull);
        }
        let Some(command) = self.queued.pop_front() else {
            return Some(pull);
        };

        let payload = ResponsePayload::ServerRequest(command.clone());
        if pull.respond(Response::with_payload(payload)) {
            self.awaiting_ack = Some(command);
        } else {
            // Caller vanished; keep the command for the next pull.
            self.queued.push_front(command);
        }
        None
    }

    /// Offers queued work to the held pull, if any.
    pub(crate) fn offer_to_held(&mut self) {
        if let Some(pull) = self.held_pull.take() {
            self.held_pull = self.offer(pull);
        }
    }

    /// Holds `pull`, answering any older held pull with "no work".
    pub(crate) fn hold(&mut self, pull: PendingCall) {
        if let Some(superseded) = self.held_pull.replace(pull) {
            superseded.respond(Response::no_work());
        }
    }

    /// Answers the held pull with "no work" if its deadline has passed or its
    /// caller went away.
    pub(crate) fn expire_held(&mut self, now: Instant) {
        let expired = self
            .held_pull
            .as_ref()
            .is_some_and(|pull| pull.pull_deadline() <= now || pull.is_abandoned());
        if expired {
            if let Some(pull) = self.held_pull.take() {
                pull.respond(Response::no_work());
            }
        }
    }

    pub(crate) fn held_deadline(&self) -> Option<Instant> {
        self.held_pull.as_ref().map(PendingCall::pull_deadline)
    }

    pub(crate) fn take_held_pull(&mut self) -> Option<PendingCall> {
        self.held_pull.take()
    }

    /// Matches `response` against the outstanding command and clears it.
    pub(crate) fn acknowledge(
        &mut self,
        client: &str,
        response: &ServerResponseData,
    ) -> Result<ServerRequestData, EngineError> {
        let Some(outstanding) = self.awaiting_ack.as_ref() else {
            return Err(EngineError::NoPendingRequest(client.to_string()));
        };

        let matches = match (outstanding, response) {
            (ServerRequestData::Action(request), ServerResponseData::Action(response)) => {
                request.instance_id == response.instance_id
            }
            (ServerRequestData::Shutdown, ServerResponseData::Shutdown) => true,
            _ => false,
        };
        if !matches {
            return Err(EngineError::ResponseMismatch {
                expected: outstanding.name(),
            });
        }

        self.awaiting_ack
            .take()
            .ok_or_else(|| EngineError::NoPendingRequest(client.to_string()))
    }

    /// Everything still owed to the client, in delivery order.
    pub(crate) fn drain_commands(&mut self) -> Vec<ServerRequestData> {
        self.awaiting_ack.take().into_iter().chain(self.queued.drain(..)).collect()
    }
}

fn targets(command: &ServerRequestData, action: &str) -> bool {
    matches!(command, ServerRequestData::Action(request) if request.action == action)
}

/// Point-in-time view of one registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub name: String,
    /// Owned actions, sorted.
    pub actions: Vec<String>,
    /// Commands waiting to be offered.
    pub queued: usize,
    /// Whether a delivered command still awaits its response.
    pub awaiting_ack: bool,
}

/// All registered clients and the owner of every registered action.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientEntry>,
    action_owners: HashMap<String, String>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `client` is registered.
    #[must_use]
    pub fn is_registered(&self, client: &str) -> bool {
        self.clients.contains_key(client)
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns the entry for `client`.
    #[must_use]
    pub fn get(&self, client: &str) -> Option<&ClientEntry> {
        self.clients.get(client)
    }

    /// Client that owns `action`.
    #[must_use]
    pub fn owner_of(&self, action: &str) -> Option<&str> {
        self.action_owners.get(action).map(String::as_str)
    }

    /// Snapshot of every client, sorted by name.
    #[must_use]
    pub fn statuses(&self) -> Vec<ClientStatus> {
        let mut statuses: Vec<ClientStatus> = self
            .clients
            .iter()
            .map(|(name, entry)| ClientStatus {
                name: name.clone(),
                actions: entry.actions.iter().cloned().collect(),
                queued: entry.queued.len(),
                awaiting_ack: entry.awaiting_ack.is_some(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub(crate) fn entry_mut(&mut self, client: &str) -> Result<&mut ClientEntry, EngineError> {
        self.clients
            .get_mut(client)
            .ok_or_else(|| EngineError::ClientNotRegistered(client.to_string()))
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut ClientEntry> {
        self.clients.values_mut()
    }

    /// Registers `name`, returning the entry it replaced.
    pub(crate) fn register_client(
        &mut self,
        name: &str,
    ) -> Result<Option<ClientEntry>, EngineError> {
        if name.is_empty() {
            return Err(EngineError::EmptyClientName);
        }
        let replaced = self.remove(name);
        self.clients.insert(name.to_string(), ClientEntry::default());
        Ok(replaced)
    }

    /// Removes `name` and releases its actions.
    pub(crate) fn deregister_client(&mut self, name: &str) -> Result<ClientEntry, EngineError> {
        self.remove(name)
            .ok_or_else(|| EngineError::ClientNotRegistered(name.to_string()))
    }

    fn remove(&mut self, name: &str) -> Option<ClientEntry> {
        let entry = self.clients.remove(name)?;
        for action in &entry.actions {
            self.action_owners.remove(action);
        }
        Some(entry)
    }

    /// Associates `action` with `client`. Re-registering an owned action is
    /// a no-op; returns whether the action was newly added.
    pub(crate) fn register_action(
        &mut self,
        client: &str,
        action: &str,
        config: &EngineConfig,
    ) -> Result<bool, EngineError> {
        if !self.is_registered(client) {
            return Err(EngineError::ClientNotRegistered(client.to_string()));
        }
        if action.is_empty() {
            return Err(EngineError::EmptyActionName);
        }
        if !config.permits_action(action) {
            return Err(EngineError::ActionNotConfigured(action.to_string()));
        }
        if let Some(owner) = self.action_owners.get(action) {
            if owner == client {
                return Ok(false);
            }
            return Err(EngineError::ActionOwned {
                action: action.to_string(),
                owner: owner.clone(),
            });
        }

        self.action_owners
            .insert(action.to_string(), client.to_string());
        self.entry_mut(client)?.actions.insert(action.to_string());
        Ok(true)
    }

    /// Releases `action` and returns the commands queued for it, which can
    /// no longer be delivered. Refused while one of its commands awaits a
    /// response.
    pub(crate) fn deregister_action(
        &mut self,
        client: &str,
        action: &str,
    ) -> Result<Vec<ServerRequestData>, EngineError> {
        self.ensure_owner(client, action)?;
        let entry = self.entry_mut(client)?;
        if entry.awaiting_ack.as_ref().is_some_and(|c| targets(c, action)) {
            return Err(EngineError::ActionInFlight(action.to_string()));
        }

        let (dropped, kept): (Vec<_>, Vec<_>) =
            entry.queued.drain(..).partition(|c| targets(c, action));
        entry.queued = VecDeque::from(kept);
        entry.actions.remove(action);
        entry.heartbeats.remove(action);
        self.action_owners.remove(action);
        Ok(dropped)
    }

    pub(crate) fn record_heartbeat(
        &mut self,
        client: &str,
        action: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ensure_owner(client, action)?;
        self.entry_mut(client)?
            .heartbeats
            .insert(action.to_string(), timestamp);
        Ok(())
    }

    pub(crate) fn ensure_owner(&self, client: &str, action: &str) -> Result<(), EngineError> {
        if !self.is_registered(client) {
            return Err(EngineError::ClientNotRegistered(client.to_string()));
        }
        match self.action_owners.get(action) {
            Some(owner) if owner == client => Ok(()),
            _ => Err(EngineError::ActionNotRegistered {
                client: client.to_string(),
                action: action.to_string(),
            }),
        }
    }
}
