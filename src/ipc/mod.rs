//! Message channel between the supervisor and window agents
//!
//! WebSocket over loopback TCP, one JSON envelope per text frame.

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, ConnectionEvent};
pub use protocol::{Bounds, ConnectionId, Envelope, MessageKind};
