//! Engine-side dispatcher.
//!
//! The [`Engine`] is the single consumer of a [`TransportCore`]: it keeps the
//! client and action registry, holds pulls until work exists for the pulling
//! client, and publishes what clients do as [`EngineEvent`]s. Work reaches it
//! through a cloneable [`EngineHandle`].
//!
//! ```text
//! EngineHandle ──submit_action──┐
//!                               ▼
//! TransportCore ──PendingCall──▶ Engine ──▶ ClientRegistry
//!                               │
//!                               └──broadcast──▶ EngineEvent subscribers
//! ```
//!
//! [`TransportCore`]: crate::server::TransportCore

mod dispatcher;
mod error;
mod events;
mod registry;

pub use dispatcher::{Engine, EngineHandle};
pub use error::EngineError;
pub use events::EngineEvent;
pub use registry::{ClientEntry, ClientRegistry, ClientStatus};
