use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hexplay::HexViewBuilder;

use edgelink_core::{CommandCode, CommandHeader};

use crate::framing;
use crate::shared::{Event, NodeShared};

/// How often a blocked `recv` wakes up to re-check the running/shutdown
/// flags, in place of `pthread_cancel`.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn is_recoverable_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Spawns the per-connection receive loop. The thread never holds any
/// `NodeShared` lock while blocked in `recv`; it reacquires
/// `shared.table` only to remove itself on exit.
pub fn spawn(
    client_id: i64,
    mut stream: TcpStream,
    running: Arc<AtomicBool>,
    shared: Arc<NodeShared>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = stream.set_read_timeout(Some(POLL_INTERVAL)) {
            warn!("failed to set read timeout for client {}: {}", client_id, e);
        }

        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }

            match CommandHeader::decode(&mut stream) {
                Ok(header) => {
                    if !dispatch(client_id, &mut stream, header, &shared) {
                        break;
                    }
                }
                Err(edgelink_core::ErrorKind::Io(e)) if is_recoverable_timeout(&e) => continue,
                Err(e) => {
                    debug!("message thread for client {} exiting: {}", client_id, e);
                    break;
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        shared.remove_connection(client_id);
    })
}

/// Handles one decoded frame. Returns `false` when the loop should stop
/// (peer closed gracefully or sent a protocol-level `error`).
fn dispatch(client_id: i64, stream: &mut TcpStream, header: CommandHeader, shared: &NodeShared) -> bool {
    match header.cmd {
        CommandCode::Error => false,
        CommandCode::TransferData => {
            match framing::read_transfer_payload(stream, &header) {
                Ok(mut data) => {
                    if data.num() > 0 {
                        trace!(
                            "client {} slot 0, {} bytes:\n{}",
                            client_id,
                            data.get(0).map_or(0, <[u8]>::len),
                            HexViewBuilder::new(data.get(0).unwrap_or(&[])).finish()
                        );
                    }
                    data.set_info("client_id", client_id.to_string());
                    shared.emit(Event::NewDataReceived(data));
                    true
                }
                Err(e) => {
                    warn!("failed to reconstruct edge-data from client {}: {}", client_id, e);
                    false
                }
            }
        }
        // Capability/host-info only ever appear during the handshake;
        // seeing one here is reserved for future use.
        CommandCode::HostInfo | CommandCode::Capability => {
            if let Err(e) = framing::drain_unknown(stream, &header) {
                warn!("failed to drain reserved frame from client {}: {}", client_id, e);
                return false;
            }
            true
        }
    }
}
