//! The transport multiplexer: one `Transport` trait with TCP, MQTT,
//! Hybrid and Custom implementations, dispatched on the node's
//! `connect_type`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgelink_core::{ErrorKind, Result};
use edgelink_data::EdgeData;

use crate::custom::CustomBackend;
use crate::framing;
use crate::listener;
use crate::mqtt::{MqttBackend, RumqttcBackend};
use crate::shared::NodeShared;

/// Everything a `Transport` needs that isn't already on `NodeShared`:
/// the node's id and the destination/topic configuration read from its
/// `set_info` metadata at call time.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub id: String,
    pub topic: String,
    pub dest_host: String,
    pub dest_port: u16,
}

/// How long the hybrid discovery loop waits for a retained
/// server-address message on each poll before trying the next one.
const DISCOVERY_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How many candidate addresses hybrid discovery will try per
/// `connect()` call before giving up — bounded so a broker with no
/// live servers doesn't hang `connect()` forever.
const DISCOVERY_MAX_CANDIDATES: usize = 20;

/// Dispatch target for `connect`/`disconnect`/`send`/`subscribe`/
/// `is_connected`/`release`. A missing capability on a particular
/// backend (e.g. a `Custom` table without `subscribe`) returns
/// `ErrorKind::NotSupported` rather than silently no-op-ing.
pub trait Transport: Send + Sync {
    /// Extra start-time work beyond "always create the TCP listener" —
    /// only `Hybrid` servers and `Custom` backends act here.
    fn on_start(&self, _shared: &Arc<NodeShared>, _cfg: &TransportConfig) -> Result<()> {
        Ok(())
    }

    /// Extra stop-time work paired with `on_start`. Only `Custom`
    /// backends act here; TCP/MQTT/Hybrid tear down via `disconnect`/
    /// `release` instead.
    fn on_stop(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        Ok(())
    }

    fn connect(&self, shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()>;
    fn disconnect(&self, shared: &Arc<NodeShared>) -> Result<()>;
    fn send(&self, shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()>;
    fn is_connected(&self, shared: &Arc<NodeShared>) -> bool;
    fn release(&self, shared: &Arc<NodeShared>) -> Result<()>;
}

fn broker_topic(id: &str, topic: &str) -> String {
    format!("edge/inference/device-{}/{}/", id, topic)
}

fn discovery_filter(topic: &str) -> String {
    format!("edge/inference/+/{}/#", topic)
}

fn parse_host_port(payload: &[u8]) -> Option<(String, u16)> {
    let text = std::str::from_utf8(payload).ok()?.trim_end_matches('\0');
    let (host, port) = text.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_owned(), port))
}

fn send_via_table(shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()> {
    match data.get_info("client_id").and_then(|s| s.parse::<i64>().ok()) {
        Some(client_id) => send_to_one(shared, client_id, data),
        None => {
            // No client-id in metadata: fan out to every entry.
            let ids: Vec<i64> = {
                let table = shared.table.lock().expect("table mutex poisoned");
                table.iter().map(|(id, _)| *id).collect()
            };
            let mut last_err = None;
            for id in ids {
                if let Err(e) = send_to_one(shared, id, data) {
                    last_err = Some(e);
                }
            }
            match last_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

fn send_to_one(shared: &Arc<NodeShared>, client_id: i64, data: &EdgeData) -> Result<()> {
    let mut table = shared.table.lock().expect("table mutex poisoned");
    let pair = table
        .get_mut(client_id)
        .ok_or_else(|| ErrorKind::connection_failure(format!("no connection for client {}", client_id)))?;
    let conn = pair
        .sink_conn
        .as_mut()
        .ok_or_else(|| ErrorKind::connection_failure(format!("client {} has no sink connection", client_id)))?;
    let mut stream = conn.try_clone_stream()?;
    framing::write_transfer_frame(&mut stream, client_id, data)
}

/// Direct point-to-point TCP transport.
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()> {
        listener::connect_out(&cfg.dest_host, cfg.dest_port, shared).map(|_| ())
    }

    fn disconnect(&self, shared: &Arc<NodeShared>) -> Result<()> {
        shared.table.lock().expect("table mutex poisoned").clear();
        Ok(())
    }

    fn send(&self, shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()> {
        send_via_table(shared, data)
    }

    fn is_connected(&self, shared: &Arc<NodeShared>) -> bool {
        let table = shared.table.lock().expect("table mutex poisoned");
        table.iter().any(|(_, pair)| pair.is_connected())
    }

    fn release(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        Ok(())
    }
}

/// Pure MQTT-broker transport: `send`/`connect`/`subscribe` all go
/// through the broker, no TCP connection is ever opened between peers.
pub struct MqttTransport {
    backend: Mutex<Option<Box<dyn MqttBackend>>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        MqttTransport { backend: Mutex::new(None) }
    }
}

impl Transport for MqttTransport {
    fn connect(&self, _shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()> {
        let backend = RumqttcBackend::connect(&cfg.id, &cfg.topic, &cfg.dest_host, cfg.dest_port)?;
        backend.subscribe()?;
        *self.backend.lock().expect("mqtt backend mutex poisoned") = Some(Box::new(backend));
        Ok(())
    }

    fn disconnect(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        *self.backend.lock().expect("mqtt backend mutex poisoned") = None;
        Ok(())
    }

    fn send(&self, _shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()> {
        let guard = self.backend.lock().expect("mqtt backend mutex poisoned");
        let backend = guard
            .as_ref()
            .ok_or_else(|| ErrorKind::connection_failure("mqtt backend not connected"))?;
        backend.publish(&edgelink_data::serialize(data), false)
    }

    fn is_connected(&self, _shared: &Arc<NodeShared>) -> bool {
        self.backend
            .lock()
            .expect("mqtt backend mutex poisoned")
            .as_ref()
            .map_or(false, |b| b.is_connected())
    }

    fn release(&self, shared: &Arc<NodeShared>) -> Result<()> {
        self.disconnect(shared)
    }
}

/// MQTT-for-discovery, TCP-for-transport.
pub struct HybridTransport {
    backend: Mutex<Option<Box<dyn MqttBackend>>>,
}

impl HybridTransport {
    pub fn new() -> Self {
        HybridTransport { backend: Mutex::new(None) }
    }
}

impl Transport for HybridTransport {
    /// Server-role start-time behavior: publish the local `host:port`
    /// retained on the device's own discovery topic.
    fn on_start(&self, shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()> {
        let topic = broker_topic(&cfg.id, &cfg.topic);
        let backend = RumqttcBackend::connect(&cfg.id, &topic, &cfg.dest_host, cfg.dest_port)?;
        let (host, port) = shared.local_addr();
        backend.publish(format!("{}:{}", host, port).as_bytes(), true)?;
        *self.backend.lock().expect("mqtt backend mutex poisoned") = Some(Box::new(backend));
        Ok(())
    }

    /// Client-role discovery: subscribe to the wildcard discovery
    /// filter, poll retained addresses, and attempt the TCP handshake
    /// against each candidate until one succeeds.
    fn connect(&self, shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()> {
        let filter = discovery_filter(&cfg.topic);
        let backend = RumqttcBackend::connect(&cfg.id, &filter, &cfg.dest_host, cfg.dest_port)?;
        backend.subscribe()?;

        let mut last_err = ErrorKind::connection_failure("no hybrid peers discovered via mqtt");
        for _ in 0..DISCOVERY_MAX_CANDIDATES {
            let payload = match backend.get_message(Some(DISCOVERY_POLL_TIMEOUT))? {
                Some(p) => p,
                None => continue,
            };
            let (host, port) = match parse_host_port(&payload) {
                Some(hp) => hp,
                None => continue,
            };
            shared.emit(crate::shared::Event::DeviceFound { host: host.clone(), port });
            match listener::connect_out(&host, port, shared) {
                Ok(_) => {
                    *self.backend.lock().expect("mqtt backend mutex poisoned") = Some(Box::new(backend));
                    return Ok(());
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn disconnect(&self, shared: &Arc<NodeShared>) -> Result<()> {
        shared.table.lock().expect("table mutex poisoned").clear();
        *self.backend.lock().expect("mqtt backend mutex poisoned") = None;
        Ok(())
    }

    fn send(&self, shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()> {
        send_via_table(shared, data)
    }

    fn is_connected(&self, shared: &Arc<NodeShared>) -> bool {
        let table = shared.table.lock().expect("table mutex poisoned");
        table.iter().any(|(_, pair)| pair.is_connected())
    }

    fn release(&self, shared: &Arc<NodeShared>) -> Result<()> {
        self.disconnect(shared)
    }
}

/// Wraps a dynamically loaded backend's function-pointer table
/// (`CustomBackend`). Missing capabilities on the loaded table surface
/// as `ErrorKind::NotSupported`.
pub struct CustomTransport {
    inner: CustomBackend,
}

impl CustomTransport {
    pub fn new(inner: CustomBackend) -> Self {
        CustomTransport { inner }
    }
}

impl Transport for CustomTransport {
    fn on_start(&self, shared: &Arc<NodeShared>, _cfg: &TransportConfig) -> Result<()> {
        let (host, port) = shared.local_addr();
        match self.inner.start(&host, port) {
            Ok(()) => Ok(()),
            Err(ErrorKind::NotSupported(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn on_stop(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        self.inner.stop()
    }

    fn connect(&self, _shared: &Arc<NodeShared>, cfg: &TransportConfig) -> Result<()> {
        self.inner.connect(&cfg.dest_host, cfg.dest_port)
    }

    fn disconnect(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        self.inner.disconnect()
    }

    fn send(&self, _shared: &Arc<NodeShared>, data: &EdgeData) -> Result<()> {
        let blob = edgelink_data::serialize(data);
        self.inner.send_data(&blob)
    }

    fn is_connected(&self, _shared: &Arc<NodeShared>) -> bool {
        self.inner.is_connected()
    }

    fn release(&self, _shared: &Arc<NodeShared>) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_topic_has_the_expected_layout() {
        assert_eq!(broker_topic("dev-1", "frames"), "edge/inference/device-dev-1/frames/");
    }

    #[test]
    fn discovery_filter_wildcards_the_device_segment() {
        assert_eq!(discovery_filter("frames"), "edge/inference/+/frames/#");
    }

    #[test]
    fn parses_retained_host_port_payload() {
        assert_eq!(
            parse_host_port(b"192.168.1.10:9000"),
            Some(("192.168.1.10".to_owned(), 9000))
        );
    }

    #[test]
    fn rejects_payload_without_port() {
        assert_eq!(parse_host_port(b"192.168.1.10"), None);
    }
}
