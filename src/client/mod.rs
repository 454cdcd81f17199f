//! Plugin host side of the transport.
//!
//! # Example
//!
//! ```no_run
//! use lom_transport::client::ClientSession;
//! use lom_transport::config::TransportConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::default();
//! let mut session = ClientSession::new(&config);
//!
//! session.register_client("plugin-host-0").await?;
//! session.register_action("Detect-0").await?;
//!
//! if let Some(command) = session.recv_server_request().await? {
//!     println!("Engine asked for: {}", command.name());
//! }
//!
//! session.deregister_client().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod runner;
mod session;

pub use error::ClientError;
pub use runner::{ActionHandler, PluginRunner, RunOutcome};
pub use session::{request_engine_shutdown, ClientSession};
