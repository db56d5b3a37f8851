//! Sqlgate MCP server.
//!
//! Exposes a single `execute_query` tool over stdio. Each call runs one SQL
//! statement on the gateway's database connection and returns the result as
//! JSON text.

pub mod bootstrap;
pub mod notify;
pub mod server;

pub use bootstrap::{bootstrap_with_config, init_logging, run, Application, BootstrapError};
pub use notify::PeerNotificationSink;
pub use server::{ExecuteQueryInput, SqlGatewayServer};
