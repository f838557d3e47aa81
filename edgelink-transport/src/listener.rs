use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use edgelink_core::Result;

use crate::connection::Connection;
use crate::handshake;
use crate::message_thread;
use crate::shared::{Event, NodeShared};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Listen backlog passed to the platform's `listen(2)` call.
const LISTEN_BACKLOG: i32 = 10;

/// Owns the listener thread for one node. Dropping (or `stop`-ping) it
/// clears the shutdown flag and joins the thread deterministically —
/// cooperative cancellation only, no `pthread_cancel`-style interrupt.
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pub port: u16,
}

impl ListenerHandle {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds `bind_host:bind_port` (`0` picks an ephemeral port) with an
/// explicit listen backlog, spawns the accept-loop thread, and records
/// the bound address on `shared` so `get_info("PORT")` can discover it
/// afterwards. `std::net::TcpListener::bind` has no way to set the
/// backlog itself, so the socket is built and `listen`-ed through
/// `socket2` and only converted to a `std::net::TcpListener` afterwards.
pub fn start(bind_host: &str, bind_port: u16, shared: Arc<NodeShared>) -> Result<ListenerHandle> {
    let addr = (bind_host, bind_port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| edgelink_core::ErrorKind::invalid_parameter("bind address resolved to nothing"))?;

    let domain = if addr.is_ipv6() { Domain::ipv6() } else { Domain::ipv4() };
    let socket = Socket::new(domain, Type::stream(), None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    let listener = TcpListener::from(socket);
    listener.set_nonblocking(true)?;
    let actual_port = listener.local_addr()?.port();

    *shared.local_host.lock().expect("host mutex poisoned") = bind_host.to_owned();
    *shared.local_port.lock().expect("port mutex poisoned") = actual_port;
    shared.listening.store(true, Ordering::SeqCst);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    let thread = thread::spawn(move || accept_loop(listener, shared, shutdown_clone));

    Ok(ListenerHandle {
        shutdown,
        thread: Some(thread),
        port: actual_port,
    })
}

fn accept_loop(listener: TcpListener, shared: Arc<NodeShared>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = handle_accept(stream, addr, &shared) {
                    warn!("inbound handshake from {} failed: {}", addr, e);
                    shared.emit(Event::ConnectionFailure { reason: e.to_string() });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!("listener accept error: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    shared.listening.store(false, Ordering::SeqCst);
}

fn handle_accept(mut stream: TcpStream, addr: SocketAddr, shared: &Arc<NodeShared>) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_nonblocking(false)?;

    let has_pending = shared
        .pending_reverse
        .lock()
        .expect("pending-reverse mutex poisoned")
        .contains_key(&addr.ip());

    if has_pending {
        // A peer whose IP we're expecting a reverse dial-back from. The
        // reverse opener always speaks first here (see `open_reverse`),
        // so reading is safe and won't race a fresh inbound dial, which
        // instead waits for us to speak first in `accept_side`.
        let claimed_id = handshake::reverse_accept_side(&mut stream)?;
        let mut pending = shared.pending_reverse.lock().expect("pending-reverse mutex poisoned");
        let bucket = pending.get_mut(&addr.ip());
        let matched = bucket.and_then(|ids| {
            let pos = ids.iter().position(|&id| id == claimed_id)?;
            Some(ids.remove(pos))
        });
        if let Some(ids) = pending.get(&addr.ip()) {
            if ids.is_empty() {
                pending.remove(&addr.ip());
            }
        }
        drop(pending);

        let client_id = matched.ok_or_else(|| {
            edgelink_core::ErrorKind::invalid_parameter(format!(
                "reverse leg from {} claimed unexpected client-id {}",
                addr, claimed_id
            ))
        })?;
        register_leg(client_id, stream, addr.ip().to_string(), addr.port(), shared, true);
        shared.emit(Event::ConnectionCompleted { client_id });
        return Ok(());
    }

    let (client_id, peer_host, peer_port) = handshake::accept_side(&mut stream, shared)?;
    register_leg(client_id, stream, addr.ip().to_string(), addr.port(), shared, true);
    shared.emit(Event::ConnectionCompleted { client_id });

    if let Err(e) = open_reverse(client_id, &peer_host, peer_port, shared) {
        warn!(
            "failed to open reverse connection to {}:{} for client {}: {}",
            peer_host, peer_port, client_id, e
        );
    }
    Ok(())
}

/// Opens the sink_conn half back to a peer whose listener address we
/// just learned via `host-info`, identifying the connection with a
/// single `host-info` frame carrying `client_id` so the peer's accept
/// loop can pair it exactly (see `handshake::reverse_connect_side`)
/// instead of guessing from our address alone.
fn open_reverse(client_id: i64, peer_host: &str, peer_port: u16, shared: &Arc<NodeShared>) -> Result<()> {
    let mut stream = TcpStream::connect((peer_host, peer_port))?;
    stream.set_nodelay(true)?;
    handshake::reverse_connect_side(&mut stream, client_id)?;
    register_leg(client_id, stream, peer_host.to_owned(), peer_port, shared, false);
    Ok(())
}

/// Performs the full client-initiated handshake on a new outbound
/// connection and registers it as the node's sink_conn, arming a
/// pending-reverse entry so this node's own listener recognizes the
/// server's completion dial-back.
pub fn connect_out(dest_host: &str, dest_port: u16, shared: &Arc<NodeShared>) -> Result<i64> {
    let mut stream = TcpStream::connect((dest_host, dest_port))?;
    stream.set_nodelay(true)?;
    let peer_ip = stream.peer_addr()?.ip();

    let (local_host, local_port) = shared.local_addr();
    let client_id = handshake::connect_side(&mut stream, shared, &local_host, local_port)?;

    shared
        .pending_reverse
        .lock()
        .expect("pending-reverse mutex poisoned")
        .entry(peer_ip)
        .or_default()
        .push(client_id);

    register_leg(client_id, stream, dest_host.to_owned(), dest_port, shared, false);
    shared.emit(Event::ConnectionCompleted { client_id });
    Ok(client_id)
}

fn register_leg(
    client_id: i64,
    stream: TcpStream,
    peer_host: String,
    peer_port: u16,
    shared: &Arc<NodeShared>,
    is_src: bool,
) {
    let mut conn = Connection::new(stream, peer_host, peer_port);
    let running = Arc::clone(&conn.running);
    match conn.try_clone_stream() {
        Ok(reader_stream) => {
            let thread = message_thread::spawn(client_id, reader_stream, running, Arc::clone(shared));
            conn.attach_thread(thread);
        }
        Err(e) => warn!("failed to clone stream for client {}: {}", client_id, e),
    }

    let mut table = shared.table.lock().expect("table mutex poisoned");
    let pair = table.get_or_insert(client_id);
    if is_src {
        pair.src_conn = Some(conn);
    } else {
        pair.sink_conn = Some(conn);
    }
}
