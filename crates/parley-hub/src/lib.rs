//! Parley Hub
//!
//! The hub is the central broker of the relay:
//! - Owns room membership (one coordination task, no locks)
//! - Routes messages as broadcast or unicast inside a room
//! - Runs one session per connection (read path + write path)
//! - Drains everything on shutdown within a grace period
//!
//! # Example
//!
//! ```no_run
//! use parley_hub::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default())?;
//!     let coordinator = server.shutdown_coordinator();
//!
//!     let shutdown = tokio::spawn(coordinator.run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }));
//!     server.serve_websocket("0.0.0.0:8080").await?;
//!     shutdown.await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod hub;
pub mod rooms;
pub mod server;
pub mod session;
pub mod shutdown;

pub use error::{HubError, Result};
pub use hub::{Hub, HubConfig, HubHandle, HubStats, OverflowPolicy, ShutdownReport};
pub use rooms::Rooms;
pub use server::{Server, ServerConfig};
pub use session::{Delivery, Session, SessionHandle, SessionId};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
