//! `EdgeNode`, the public handle-manager API: create, configure,
//! start, stop, connect, disconnect, send, release a single edge node.

#[macro_use]
extern crate log;

pub mod config;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use edgelink_core::{ErrorKind, Result};
use edgelink_data::EdgeData;
use edgelink_queue::EdgeQueue;
use edgelink_transport::{
    self as transport, CustomBackend, CustomTransport, HybridTransport, ListenerHandle,
    MqttTransport, NodeShared, TcpTransport, Transport, TransportConfig,
};

pub use edgelink_transport::{CallbackOutcome, Event, NodeType};

pub use crate::config::{parse_dest_port, parse_queue_size, ConfigKey, NodeConfig};

/// Which backend a node's public operations are routed to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectType {
    Tcp,
    Mqtt,
    Hybrid,
    Custom,
}

/// The root object, a Rust realization of the C "opaque handle + magic
/// word" pattern: the magic/valid flag becomes `alive`, and teardown is
/// expressed as an idempotent `release()` plus a `Drop` impl that calls
/// it.
pub struct EdgeNode {
    id: String,
    connect_type: ConnectType,
    node_type: NodeType,
    shared: Arc<NodeShared>,
    transport: Arc<dyn Transport>,
    listener: Mutex<Option<ListenerHandle>>,
    config: Mutex<NodeConfig>,
    metadata: Mutex<HashMap<String, String>>,
    /// Bounded outgoing-frame buffer. Exposed and fully configurable
    /// via `QUEUE_SIZE`, but `send()` itself transmits synchronously —
    /// see `DESIGN.md` for why this crate does not interpose the queue
    /// on the hot path by default.
    queue: Arc<EdgeQueue<EdgeData>>,
    alive: AtomicBool,
}

fn server_role(node_type: NodeType) -> bool {
    matches!(node_type, NodeType::QueryServer | NodeType::Pub)
}

impl EdgeNode {
    /// Creates a TCP, MQTT, or Hybrid node. Use [`EdgeNode::create_custom`]
    /// for `ConnectType::Custom`, which additionally needs a shared
    /// library path loaded at creation time.
    pub fn create(id: impl Into<String>, connect_type: ConnectType, node_type: NodeType) -> Result<Self> {
        if connect_type == ConnectType::Custom {
            return Err(ErrorKind::invalid_parameter(
                "ConnectType::Custom requires EdgeNode::create_custom",
            ));
        }
        Self::build(id, connect_type, node_type, None)
    }

    pub fn create_custom(id: impl Into<String>, node_type: NodeType, library_path: &str) -> Result<Self> {
        Self::build(id, ConnectType::Custom, node_type, Some(library_path))
    }

    fn build(
        id: impl Into<String>,
        connect_type: ConnectType,
        node_type: NodeType,
        library_path: Option<&str>,
    ) -> Result<Self> {
        let id = id.into();
        let shared = Arc::new(NodeShared::new(id.as_str(), node_type, ""));

        let transport: Arc<dyn Transport> = match connect_type {
            ConnectType::Tcp => Arc::new(TcpTransport),
            ConnectType::Mqtt => Arc::new(MqttTransport::new()),
            ConnectType::Hybrid => Arc::new(HybridTransport::new()),
            ConnectType::Custom => {
                let path = library_path
                    .ok_or_else(|| ErrorKind::invalid_parameter("custom connect type requires a library path"))?;
                Arc::new(CustomTransport::new(CustomBackend::load(path)?))
            }
        };

        Ok(EdgeNode {
            id,
            connect_type,
            node_type,
            shared,
            transport,
            listener: Mutex::new(None),
            config: Mutex::new(NodeConfig::default()),
            metadata: Mutex::new(HashMap::new()),
            queue: Arc::new(EdgeQueue::new()),
            alive: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connect_type(&self) -> ConnectType {
        self.connect_type
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn require_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ErrorKind::invalid_parameter("operation on a released edge node"))
        }
    }

    /// Rejects a destructive call made from inside the node's own event
    /// callback — calling `release`/`stop` on a node from its own
    /// callback would deadlock against the lock the callback is
    /// already running under.
    fn reject_if_reentrant(&self) -> Result<()> {
        if transport::in_callback() {
            Err(ErrorKind::invalid_parameter(
                "cannot release/stop a node from within its own event callback",
            ))
        } else {
            Ok(())
        }
    }

    pub fn set_event_callback<F>(&self, cb: F) -> Result<()>
    where
        F: Fn(Event) -> CallbackOutcome + Send + Sync + 'static,
    {
        self.require_alive()?;
        self.shared.set_event_callback(Box::new(cb));
        Ok(())
    }

    /// Recognizes the canonical keys; everything else lands in the
    /// free-form node metadata map.
    pub fn set_info(&self, key: &str, value: &str) -> Result<()> {
        self.require_alive()?;
        match ConfigKey::canonicalize(key) {
            ConfigKey::Id | ConfigKey::ClientId => {
                Err(ErrorKind::invalid_parameter(format!("{} is read-only", key)))
            }
            ConfigKey::Caps => {
                *self.shared.caps.lock().expect("caps mutex poisoned") = value.to_owned();
                Ok(())
            }
            ConfigKey::Host => {
                *self.shared.local_host.lock().expect("host mutex poisoned") = value.to_owned();
                Ok(())
            }
            ConfigKey::Port => {
                let port: u16 = value
                    .parse()
                    .map_err(|_| ErrorKind::invalid_parameter(format!("PORT is not a number: {}", value)))?;
                *self.shared.local_port.lock().expect("port mutex poisoned") = port;
                Ok(())
            }
            ConfigKey::DestHost => {
                self.config.lock().expect("config mutex poisoned").dest_host = value.to_owned();
                Ok(())
            }
            ConfigKey::DestPort => {
                let port = parse_dest_port(value)?;
                self.config.lock().expect("config mutex poisoned").dest_port = port;
                Ok(())
            }
            ConfigKey::Topic => {
                self.config.lock().expect("config mutex poisoned").topic = value.to_owned();
                Ok(())
            }
            ConfigKey::QueueSize => {
                let (max, leaky) = parse_queue_size(value)?;
                self.queue.set_limit(max, leaky);
                Ok(())
            }
            ConfigKey::Other => {
                self.metadata
                    .lock()
                    .expect("metadata mutex poisoned")
                    .insert(key.to_owned(), value.to_owned());
                Ok(())
            }
        }
    }

    pub fn get_info(&self, key: &str) -> Result<Option<String>> {
        self.require_alive()?;
        Ok(match ConfigKey::canonicalize(key) {
            ConfigKey::Id => Some(self.id.clone()),
            ConfigKey::ClientId => self.shared.client_id().map(|id| id.to_string()),
            ConfigKey::Caps => Some(self.shared.caps()),
            ConfigKey::Host => Some(self.shared.local_addr().0),
            ConfigKey::Port => Some(self.shared.local_addr().1.to_string()),
            ConfigKey::DestHost => Some(self.config.lock().expect("config mutex poisoned").dest_host.clone()),
            ConfigKey::DestPort => Some(self.config.lock().expect("config mutex poisoned").dest_port.to_string()),
            ConfigKey::Topic => Some(self.config.lock().expect("config mutex poisoned").topic.clone()),
            ConfigKey::QueueSize => Some(format!(
                "{}:{}",
                self.queue.max_len(),
                match self.queue.leak_policy() {
                    edgelink_queue::LeakPolicy::LeakOld => "OLD",
                    edgelink_queue::LeakPolicy::LeakNew => "NEW",
                }
            )),
            ConfigKey::Other => self.metadata.lock().expect("metadata mutex poisoned").get(key).cloned(),
        })
    }

    /// Binds the listener (probing an ephemeral port when `PORT` is
    /// `0`) and, for hybrid server-role nodes, connects the broker and
    /// publishes the retained server address.
    pub fn start(&self) -> Result<()> {
        self.require_alive()?;
        let (host, port) = self.shared.local_addr();
        let handle = transport::listener::start(&host, port, Arc::clone(&self.shared))?;
        *self.listener.lock().expect("listener mutex poisoned") = Some(handle);

        let custom_or_hybrid_server =
            self.connect_type == ConnectType::Custom || (self.connect_type == ConnectType::Hybrid && server_role(self.node_type));
        if custom_or_hybrid_server {
            self.transport.on_start(&self.shared, &self.transport_config())?;
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.require_alive()?;
        self.reject_if_reentrant()?;
        if let Some(mut handle) = self.listener.lock().expect("listener mutex poisoned").take() {
            handle.stop();
        }
        if self.connect_type == ConnectType::Custom {
            self.transport.on_stop(&self.shared)?;
        }
        Ok(())
    }

    fn transport_config(&self) -> TransportConfig {
        let config = self.config.lock().expect("config mutex poisoned");
        TransportConfig {
            id: self.id.clone(),
            topic: config.topic.clone(),
            dest_host: config.dest_host.clone(),
            dest_port: config.dest_port,
        }
    }

    /// Connects to `dest_host:dest_port`. For `tcp`/`custom` this opens
    /// one outbound connection and performs the handshake;
    /// for `hybrid` it discovers a peer via MQTT first; for `mqtt` it
    /// connects to the broker and subscribes to `topic`.
    pub fn connect(&self, dest_host: &str, dest_port: u16) -> Result<()> {
        self.require_alive()?;
        {
            let mut config = self.config.lock().expect("config mutex poisoned");
            config.dest_host = dest_host.to_owned();
            config.dest_port = dest_port;
        }
        self.transport.connect(&self.shared, &self.transport_config())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.require_alive()?;
        self.transport.disconnect(&self.shared)
    }

    /// Routes `data` to the Connection Pair named by its `client_id`
    /// metadata, or fans it out to every entry if none is present; the
    /// caller keeps ownership of `data` afterwards.
    pub fn send(&self, data: &EdgeData) -> Result<()> {
        self.require_alive()?;
        self.transport.send(&self.shared, data)
    }

    pub fn is_connected(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        self.transport.is_connected(&self.shared)
    }

    /// Idempotent teardown: a second call is a harmless no-op. Stops
    /// the listener (joining its thread), clears the connection
    /// table (closing and joining every message thread), releases the
    /// transport backend (closing any broker/custom connection), and
    /// marks the node dead so no further operation succeeds.
    pub fn release(&self) -> Result<()> {
        self.reject_if_reentrant()?;
        if self
            .alive
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        if let Some(mut handle) = self.listener.lock().expect("listener mutex poisoned").take() {
            handle.stop();
        }
        self.shared.table.lock().expect("table mutex poisoned").clear();
        self.queue.clear();
        if let Err(e) = self.transport.release(&self.shared) {
            warn!("transport release for node {} failed: {}", self.id, e);
        }
        self.shared.emit(Event::CallbackReleased);
        Ok(())
    }
}

impl Drop for EdgeNode {
    fn drop(&mut self) {
        if self.alive.load(Ordering::SeqCst) {
            let _ = self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn port_zero_yields_an_ephemeral_bound_port() {
        let node = EdgeNode::create("s1", ConnectType::Tcp, NodeType::QueryServer).unwrap();
        node.set_info("HOST", "127.0.0.1").unwrap();
        node.set_info("PORT", "0").unwrap();
        node.start().unwrap();

        let port: u16 = node.get_info("PORT").unwrap().unwrap().parse().unwrap();
        assert!(port > 0);
        node.release().unwrap();
    }

    #[test]
    fn id_and_client_id_are_read_only() {
        let node = EdgeNode::create("s1", ConnectType::Tcp, NodeType::QueryServer).unwrap();
        assert!(node.set_info("ID", "other").is_err());
        assert!(node.set_info("CLIENT_ID", "1").is_err());
    }

    #[test]
    fn double_release_does_not_error() {
        let node = EdgeNode::create("s1", ConnectType::Tcp, NodeType::QueryServer).unwrap();
        node.release().unwrap();
        node.release().unwrap();
    }

    #[test]
    fn operations_fail_after_release() {
        let node = EdgeNode::create("s1", ConnectType::Tcp, NodeType::QueryServer).unwrap();
        node.release().unwrap();
        assert!(node.start().is_err());
        assert!(node.connect("127.0.0.1", 1).is_err());
    }

    #[test]
    fn local_tcp_round_trip_delivers_two_slots() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);

        let server = EdgeNode::create("srv", ConnectType::Tcp, NodeType::QueryServer).unwrap();
        server.set_info("HOST", "127.0.0.1").unwrap();
        server.set_info("PORT", "0").unwrap();
        server.set_info("CAPS", "x").unwrap();
        server.start().unwrap();
        let server_port: u16 = server.get_info("PORT").unwrap().unwrap().parse().unwrap();

        let client = EdgeNode::create("cli", ConnectType::Tcp, NodeType::QueryClient).unwrap();
        client.set_info("HOST", "127.0.0.1").unwrap();
        client.set_info("PORT", "0").unwrap();
        client
            .set_event_callback(move |event| {
                if let Event::NewDataReceived(data) = event {
                    *received_clone.lock().unwrap() = Some(data);
                }
                CallbackOutcome::Continue
            })
            .unwrap();
        client.start().unwrap();
        client.connect("127.0.0.1", server_port).unwrap();

        std::thread::sleep(Duration::from_millis(200));

        let client_id = client.get_info("CLIENT_ID").unwrap().unwrap().parse::<i64>().unwrap();

        let slot_a: Vec<u8> = (0u32..10).flat_map(u32::to_le_bytes).collect();
        let slot_b: Vec<u8> = (0u32..20).flat_map(u32::to_le_bytes).collect();
        let mut data = EdgeData::new();
        data.add(&slot_a).unwrap();
        data.add(&slot_b).unwrap();
        data.set_info("client_id", client_id.to_string());

        server.send(&data).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let got = received.lock().unwrap().take().expect("callback never fired");
        assert_eq!(got.num(), 2);
        assert_eq!(got.get(0), Some(slot_a.as_slice()));
        assert_eq!(got.get(1), Some(slot_b.as_slice()));

        client.release().unwrap();
        server.release().unwrap();
    }
}
