use std::cell::Cell;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use edgelink_data::EdgeData;

use crate::connection::ConnectionTable;

thread_local! {
    /// Set for the duration of a user-callback invocation on whichever
    /// thread is running it (a message thread, or the caller's own
    /// thread for synchronous paths). Checked by `EdgeNode::release`/
    /// `stop` to reject a callback that tries to tear down its own node.
    static IN_CALLBACK: Cell<bool> = Cell::new(false);
}

/// Whether the current thread is presently inside a user-callback
/// invocation triggered by [`NodeShared::emit`].
pub fn in_callback() -> bool {
    IN_CALLBACK.with(Cell::get)
}

/// Sentinel stored in [`NodeShared::client_id`] before a node has
/// adopted an identity handed to it during a handshake.
pub const NO_CLIENT_ID: i64 = i64::MIN;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeType {
    QueryClient,
    QueryServer,
    Pub,
    Sub,
}

/// The seven event kinds the user callback may observe.
#[derive(Debug, Clone)]
pub enum Event {
    Capability(Vec<u8>),
    NewDataReceived(EdgeData),
    CallbackReleased,
    ConnectionClosed { client_id: i64 },
    ConnectionCompleted { client_id: i64 },
    ConnectionFailure { reason: String },
    DeviceFound { host: String, port: u16 },
}

/// What the user callback decided. Only `Capability` honors `Reject`;
/// every other event is purely informational.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CallbackOutcome {
    Continue,
    Reject,
}

pub type EventCallback = Box<dyn Fn(Event) -> CallbackOutcome + Send + Sync>;

/// State shared by the listener thread, every message thread and the
/// public API, held behind an `Arc`.
///
/// State is split into several independently-locked fields rather than
/// one coarse `Mutex` guarding the whole struct: each lock is taken
/// only for the instant needed to read or mutate its own field and is
/// never held across a blocking `recv`/`send`/`accept` call.
pub struct NodeShared {
    pub id: String,
    pub node_type: NodeType,
    pub caps: Mutex<String>,
    pub local_host: Mutex<String>,
    pub local_port: Mutex<u16>,
    client_id: AtomicI64,
    pub table: Mutex<ConnectionTable>,
    /// Client-ids this node is currently expecting a reverse pairing
    /// connection for, bucketed by the peer IP it dialed out to.
    /// Populated right after completing the client-initiated half of a
    /// handshake and drained once the matching reverse leg identifies
    /// itself (see `handshake::reverse_accept_side`). Bucketed rather
    /// than single-valued so dialing two peers that share an IP (e.g.
    /// two servers on one host at different ports) doesn't clobber one
    /// pairing with the other.
    pub pending_reverse: Mutex<HashMap<IpAddr, Vec<i64>>>,
    pub listening: AtomicBool,
    event_cb: Mutex<Option<EventCallback>>,
}

impl NodeShared {
    pub fn new(id: impl Into<String>, node_type: NodeType, caps: impl Into<String>) -> Self {
        NodeShared {
            id: id.into(),
            node_type,
            caps: Mutex::new(caps.into()),
            local_host: Mutex::new(String::from("0.0.0.0")),
            local_port: Mutex::new(0),
            client_id: AtomicI64::new(NO_CLIENT_ID),
            table: Mutex::new(ConnectionTable::new()),
            pending_reverse: Mutex::new(HashMap::new()),
            listening: AtomicBool::new(false),
            event_cb: Mutex::new(None),
        }
    }

    pub fn set_event_callback(&self, cb: EventCallback) {
        *self.event_cb.lock().expect("event callback mutex poisoned") = Some(cb);
    }

    /// Invokes the user callback, marking the calling thread as
    /// "inside a callback" for the duration of the call. A callback
    /// that tries to call `release` on its own node is caught via
    /// [`in_callback`], not prevented here.
    pub fn emit(&self, event: Event) -> CallbackOutcome {
        let guard = self.event_cb.lock().expect("event callback mutex poisoned");
        match guard.as_ref() {
            Some(cb) => {
                let previous = IN_CALLBACK.with(|flag| flag.replace(true));
                let outcome = cb(event);
                IN_CALLBACK.with(|flag| flag.set(previous));
                outcome
            }
            None => CallbackOutcome::Continue,
        }
    }

    /// Adopts `id` as this node's own identity, but only the first time
    /// it is called — later calls (e.g. a redundant capability exchange
    /// on a reverse leg) are no-ops. First caller wins.
    pub fn adopt_client_id(&self, id: i64) {
        let _ = self
            .client_id
            .compare_exchange(NO_CLIENT_ID, id, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn client_id(&self) -> Option<i64> {
        match self.client_id.load(Ordering::SeqCst) {
            NO_CLIENT_ID => None,
            id => Some(id),
        }
    }

    pub fn caps(&self) -> String {
        self.caps.lock().expect("caps mutex poisoned").clone()
    }

    pub fn local_addr(&self) -> (String, u16) {
        (
            self.local_host.lock().expect("host mutex poisoned").clone(),
            *self.local_port.lock().expect("port mutex poisoned"),
        )
    }

    pub fn remove_connection(&self, client_id: i64) {
        {
            let mut table = self.table.lock().expect("table mutex poisoned");
            if let Some(mut pair) = table.remove(client_id) {
                pair.close(client_id);
            }
        }
        self.emit(Event::ConnectionClosed { client_id });
    }
}
