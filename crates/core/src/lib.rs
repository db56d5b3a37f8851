pub mod codec;
pub mod config;
pub mod events;
pub mod storefront;

pub use codec::{
    CodecError, Parameters, QueryOutcome, QueryRequest, Record, CONNECTION_UNAVAILABLE,
    UNEXPECTED_ERROR_PREFIX,
};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use events::{EventEmitter, EventSink, GatewayEvent, InMemoryEventSink, TracingSink};
