//! Request/response envelope shared by the engine and plugin hosts.
//!
//! Every call on the wire is one [`Request`] answered by exactly one
//! [`Response`]. The request kind is a closed set and each kind has exactly one
//! payload shape; decoding a payload against the wrong kind fails with
//! [`DecodeError::PayloadMismatch`] instead of yielding wrong data.
//!
//! # Protocol
//!
//! Frames are JSON lines over a loopback TCP stream:
//!
//! ```text
//! Plugin host                          Engine
//!     |                                  |
//!     |-- {"method":..,"request":{..}} ->|
//!     |                                  | (queue, process)
//!     |<- {"result_code":0,..} ----------|
//!     |                                  |
//! ```

pub mod codes;
mod data;
mod error;
mod types;
mod wire;

pub use data::*;
pub use error::*;
pub use types::*;
pub use wire::*;
