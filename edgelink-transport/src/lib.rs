//! The TCP connection engine, handshake, connection table and the
//! transport multiplexer.

#[macro_use]
extern crate log;

pub mod connection;
pub mod custom;
pub mod framing;
pub mod handshake;
pub mod listener;
pub mod message_thread;
pub mod mqtt;
pub mod shared;
pub mod transport;

pub use crate::connection::{Connection, ConnectionPair, ConnectionTable};
pub use crate::custom::CustomBackend;
pub use crate::listener::ListenerHandle;
pub use crate::mqtt::{MqttBackend, RumqttcBackend};
pub use crate::shared::{
    in_callback, CallbackOutcome, Event, EventCallback, NodeShared, NodeType, NO_CLIENT_ID,
};
pub use crate::transport::{CustomTransport, HybridTransport, MqttTransport, TcpTransport, Transport, TransportConfig};
