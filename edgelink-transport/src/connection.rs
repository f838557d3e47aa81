use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use edgelink_core::{CommandCode, ErrorKind, Result};
use edgelink_data::EdgeData;

use crate::framing;

/// One TCP stream to or from a specific peer, plus the message thread
/// reading it.
pub struct Connection {
    pub peer_host: String,
    pub peer_port: u16,
    stream: TcpStream,
    pub(crate) running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_host: String, peer_port: u16) -> Self {
        Connection {
            peer_host,
            peer_port,
            stream,
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }

    pub fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }

    pub fn attach_thread(&mut self, thread: JoinHandle<()>) {
        self.thread = Some(thread);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cancels the message thread cooperatively, sends a final `error`
    /// frame as a graceful-close signal, then shuts the socket down and
    /// joins the thread — unless called from the message thread's own
    /// body (it exits right after this call returns, so joining it here
    /// would deadlock).
    pub fn close(&mut self, client_id: i64) {
        self.running.store(false, Ordering::SeqCst);
        let _ = framing::write_simple_frame(&mut self.stream, CommandCode::Error, client_id, &[]);
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// A single Connection Table entry: up to two `Connection`s sharing a
/// client-id — `src_conn` (we-accepted-from-them) and `sink_conn`
/// (we-connected-to-them).
#[derive(Default)]
pub struct ConnectionPair {
    pub src_conn: Option<Connection>,
    pub sink_conn: Option<Connection>,
}

impl ConnectionPair {
    pub fn is_connected(&self) -> bool {
        self.src_conn.as_ref().map_or(false, Connection::is_running)
            || self.sink_conn.as_ref().map_or(false, Connection::is_running)
    }

    pub fn close(&mut self, client_id: i64) {
        if let Some(conn) = self.src_conn.as_mut() {
            conn.close(client_id);
        }
        if let Some(conn) = self.sink_conn.as_mut() {
            conn.close(client_id);
        }
    }
}

/// Maps a client-id to its Connection Pair. Not internally
/// synchronized — callers hold `NodeShared::table`'s mutex around
/// every operation.
#[derive(Default)]
pub struct ConnectionTable {
    entries: HashMap<i64, ConnectionPair>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable::default()
    }

    pub fn get(&self, client_id: i64) -> Option<&ConnectionPair> {
        self.entries.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: i64) -> Option<&mut ConnectionPair> {
        self.entries.get_mut(&client_id)
    }

    pub fn get_or_insert(&mut self, client_id: i64) -> &mut ConnectionPair {
        self.entries.entry(client_id).or_insert_with(ConnectionPair::default)
    }

    pub fn remove(&mut self, client_id: i64) -> Option<ConnectionPair> {
        self.entries.remove(&client_id)
    }

    pub fn clear(&mut self) {
        for (client_id, mut pair) in self.entries.drain() {
            pair.close(client_id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i64, &ConnectionPair)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for ConnectionTable {
    fn drop(&mut self) {
        self.clear();
    }
}
