//! The abstract MQTT backend interface and a concrete adapter over
//! `rumqttc`.
//!
//! Two interchangeable broker libraries sit behind one six-operation
//! contract (`connect`/`close`/`publish`/`subscribe`/`get_message`/
//! `is_connected`); the wire protocol itself is out of scope here.
//! `rumqttc` ships one real backend satisfying that contract — see
//! `DESIGN.md` for why a second vendored client isn't fabricated here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use edgelink_core::{ErrorKind, Result};

/// Stable internal contract every MQTT broker backend must satisfy.
/// `close` is realized as `Drop` rather than a method.
pub trait MqttBackend: Send {
    fn publish(&self, payload: &[u8], retained: bool) -> Result<()>;
    fn subscribe(&self) -> Result<()>;
    /// Blocks up to `timeout` for the next inbound message (`None` means
    /// wait indefinitely); returns `Ok(None)` on timeout.
    fn get_message(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>>;
    fn is_connected(&self) -> bool;
}

/// A backend built on `rumqttc`'s synchronous `Client`/`Connection`
/// pair. The connection's event loop is drained on a dedicated thread
/// into a plain `mpsc` channel — `get_message` never itself touches the
/// network.
pub struct RumqttcBackend {
    client: Client,
    topic: String,
    messages: mpsc::Receiver<Vec<u8>>,
    connected: std::sync::Arc<AtomicBool>,
    _poll_thread: JoinHandle<()>,
}

impl RumqttcBackend {
    /// Connects to `host:port` as MQTT client `id` bound to `topic`.
    pub fn connect(id: &str, topic: &str, host: &str, port: u16) -> Result<Self> {
        let mut opts = MqttOptions::new(id, host, port);
        opts.set_keep_alive(Duration::from_secs(5));

        let (client, mut connection) = Client::new(opts, 64);
        let (tx, rx) = mpsc::channel();
        let connected = std::sync::Arc::new(AtomicBool::new(false));
        let connected_clone = std::sync::Arc::clone(&connected);

        let poll_thread = thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected_clone.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if tx.send(publish.payload.to_vec()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("mqtt event loop for {} ended: {}", topic, e);
                        connected_clone.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(RumqttcBackend {
            client,
            topic: topic.to_owned(),
            messages: rx,
            connected,
            _poll_thread: poll_thread,
        })
    }
}

impl MqttBackend for RumqttcBackend {
    fn publish(&self, payload: &[u8], retained: bool) -> Result<()> {
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, retained, payload.to_vec())
            .map_err(|e| ErrorKind::connection_failure(e.to_string()))
    }

    fn subscribe(&self) -> Result<()> {
        self.client
            .subscribe(&self.topic, QoS::AtLeastOnce)
            .map_err(|e| ErrorKind::connection_failure(e.to_string()))
    }

    fn get_message(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        match timeout {
            Some(t) => match self.messages.recv_timeout(t) {
                Ok(msg) => Ok(Some(msg)),
                Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    Err(ErrorKind::connection_failure("mqtt event loop terminated"))
                }
            },
            None => self
                .messages
                .recv()
                .map(Some)
                .map_err(|_| ErrorKind::connection_failure("mqtt event loop terminated")),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttcBackend {
    fn drop(&mut self) {
        let _ = self.client.disconnect();
    }
}
