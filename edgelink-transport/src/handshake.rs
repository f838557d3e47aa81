use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use edgelink_core::{CommandCode, CommandHeader, ErrorKind, Result};

use crate::framing;
use crate::shared::{CallbackOutcome, Event, NodeShared};

static LAST_CLIENT_ID: AtomicI64 = AtomicI64::new(0);

/// A strictly increasing microsecond timestamp, used to mint client-ids.
/// Strictly increasing even across calls that land in the same
/// microsecond, so client-ids stay unique within a node's lifetime
/// under a busy accept loop.
pub fn monotonic_time_us() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_micros() as i64;
    loop {
        let last = LAST_CLIENT_ID.load(Ordering::SeqCst);
        let next = if now > last { now } else { last + 1 };
        if LAST_CLIENT_ID
            .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return next;
        }
    }
}

/// Server-initiated half of the handshake on a freshly accepted
/// socket: mint a client-id, send `capability`, then receive
/// `host-info` and return the peer's own listener address.
pub fn accept_side(stream: &mut TcpStream, shared: &NodeShared) -> Result<(i64, String, u16)> {
    let client_id = monotonic_time_us();
    let mut caps = shared.caps().into_bytes();
    caps.push(0);
    framing::write_simple_frame(stream, CommandCode::Capability, client_id, &caps)?;

    let header = CommandHeader::decode(stream)?;
    if header.cmd != CommandCode::HostInfo || header.num != 1 {
        return Err(ErrorKind::invalid_parameter(
            "protocol violation: expected host-info after capability",
        ));
    }
    let payload = framing::read_simple_payload(stream, &header)?;
    let (host, port) = parse_host_port(&payload)?;
    Ok((client_id, host, port))
}

/// Client-initiated half of the handshake on a freshly connected
/// socket: receive `capability`, invoke the user callback, then send
/// `host-info` with this node's own listener address.
pub fn connect_side(
    stream: &mut TcpStream,
    shared: &NodeShared,
    local_host: &str,
    local_port: u16,
) -> Result<i64> {
    let header = CommandHeader::decode(stream)?;
    if header.cmd != CommandCode::Capability || header.num != 1 {
        return Err(ErrorKind::invalid_parameter(
            "protocol violation: expected capability frame first",
        ));
    }
    let mut payload = framing::read_simple_payload(stream, &header)?;
    if payload.last() == Some(&0) {
        payload.pop();
    }
    shared.adopt_client_id(header.client_id);

    if shared.emit(Event::Capability(payload)) == CallbackOutcome::Reject {
        let _ = framing::write_simple_frame(stream, CommandCode::Error, header.client_id, &[]);
        return Err(ErrorKind::connection_failure("capability rejected by callback"));
    }

    let host_info = format!("{}:{}", local_host, local_port);
    framing::write_simple_frame(
        stream,
        CommandCode::HostInfo,
        header.client_id,
        host_info.as_bytes(),
    )?;
    Ok(header.client_id)
}

/// Client-role half of the reverse leg: the node that already completed
/// `accept_side` on the forward connection dials back and identifies
/// itself with a zero-payload `host-info` frame carrying the client-id
/// the forward handshake minted, so the far end can pair this socket
/// to the right connection instead of guessing from the peer address.
pub fn reverse_connect_side(stream: &mut TcpStream, client_id: i64) -> Result<()> {
    framing::write_simple_frame(stream, CommandCode::HostInfo, client_id, &[])
}

/// Server-role half of the reverse leg: reads the identifying frame a
/// reverse dial-back sends and returns the client-id it claims.
pub fn reverse_accept_side(stream: &mut TcpStream) -> Result<i64> {
    let header = CommandHeader::decode(stream)?;
    if header.cmd != CommandCode::HostInfo || header.num != 0 {
        return Err(ErrorKind::invalid_parameter(
            "protocol violation: expected a zero-payload host-info on the reverse leg",
        ));
    }
    Ok(header.client_id)
}

fn parse_host_port(payload: &[u8]) -> Result<(String, u16)> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ErrorKind::invalid_parameter("host-info payload is not UTF-8"))?
        .trim_end_matches('\0');
    let (host, port) = text
        .rsplit_once(':')
        .ok_or_else(|| ErrorKind::invalid_parameter("host-info missing ':'"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ErrorKind::invalid_parameter("host-info has a non-numeric port"))?;
    Ok((host.to_owned(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_strictly_increase() {
        let a = monotonic_time_us();
        let b = monotonic_time_us();
        assert!(b > a);
    }

    #[test]
    fn parses_host_port() {
        assert_eq!(
            parse_host_port(b"127.0.0.1:4242").unwrap(),
            ("127.0.0.1".to_owned(), 4242)
        );
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_host_port(b"127.0.0.1").is_err());
    }

    #[test]
    fn reverse_leg_round_trips_client_id() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut dialer = TcpStream::connect(addr).unwrap();
        let (mut acceptor, _) = listener.accept().unwrap();

        reverse_connect_side(&mut dialer, 4242).unwrap();
        assert_eq!(reverse_accept_side(&mut acceptor).unwrap(), 4242);
    }
}
