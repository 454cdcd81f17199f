//! LoM transport - request/response channel between the link fault
//! management engine and its plugin hosts.

pub mod client;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod server;
