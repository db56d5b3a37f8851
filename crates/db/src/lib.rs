pub mod coerce;
pub mod connection;
pub mod declared;
pub mod decode;
pub mod executor;
pub mod params;
pub mod session;

pub use connection::{connect, Backend, ConnectError, DbConnection, DbTarget};
pub use executor::{ExecutionError, ExecutionLimits, QueryExecutor};
pub use params::{bind, has_multiple_statements, BindError, BindValue, BoundStatement};
pub use session::Session;
