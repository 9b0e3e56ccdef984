//! Subscriber-side stream client with reconnect and backoff

pub mod reconnecting;
pub mod state;
pub mod transport;

pub use reconnecting::ReconnectingClient;
pub use state::{BackoffPolicy, ConnectionState, ReconnectMachine};
pub use transport::{EventStream, RawEvent, SseTransport, StreamTransport};
