//! Engine-side transport.
//!
//! # Architecture
//!
//! ```text
//! Plugin host     connection task         TransportCore          Engine
//!     |                 |                       |                    |
//!     |-- frame ------->|                       |                    |
//!     |                 |-- accept(request) --->| (queue)            |
//!     |                 |                       |<- next_pending_call|
//!     |                 |                       |--- PendingCall --->|
//!     |                 |<------------ respond(response) ------------|
//!     |<- frame --------|                       |                    |
//! ```

mod error;
mod listener;
mod transport;

pub use error::ServerError;
pub use listener::{RpcServer, ServerHandle};
pub use transport::{NextCall, PendingCall, TransportCore};
