//! End-to-end scenarios exercised against real `EdgeNode`s bound to
//! `127.0.0.1:0`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgelink_data::EdgeData;
use edgelink_node::{CallbackOutcome, ConnectType, EdgeNode, Event, NodeType};

fn frame(tag: u8) -> EdgeData {
    let mut data = EdgeData::new();
    data.add(&[tag; 4]).unwrap();
    data
}

fn spawn_client(name: &str) -> (EdgeNode, Arc<Mutex<Vec<EdgeData>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let client = EdgeNode::create(name, ConnectType::Tcp, NodeType::QueryClient).unwrap();
    client.set_info("HOST", "127.0.0.1").unwrap();
    client.set_info("PORT", "0").unwrap();
    client
        .set_event_callback(move |event| {
            if let Event::NewDataReceived(data) = event {
                received_clone.lock().unwrap().push(data);
            }
            CallbackOutcome::Continue
        })
        .unwrap();
    client.start().unwrap();
    (client, received)
}

/// Scenario 2: a single `send` with no `client_id` in metadata fans out
/// to every connected client.
#[test]
fn multi_client_fan_out_reaches_every_peer() {
    let server = EdgeNode::create("srv", ConnectType::Tcp, NodeType::QueryServer).unwrap();
    server.set_info("HOST", "127.0.0.1").unwrap();
    server.set_info("PORT", "0").unwrap();
    server.start().unwrap();
    let server_port: u16 = server.get_info("PORT").unwrap().unwrap().parse().unwrap();

    let (c1, r1) = spawn_client("c1");
    let (c2, r2) = spawn_client("c2");
    c1.connect("127.0.0.1", server_port).unwrap();
    c2.connect("127.0.0.1", server_port).unwrap();

    std::thread::sleep(Duration::from_millis(250));

    let data = frame(7);
    server.send(&data).unwrap();

    std::thread::sleep(Duration::from_millis(250));

    assert_eq!(r1.lock().unwrap().len(), 1, "client 1 should have received the broadcast frame");
    assert_eq!(r2.lock().unwrap().len(), 1, "client 2 should have received the broadcast frame");

    c1.release().unwrap();
    c2.release().unwrap();
    server.release().unwrap();
}

/// Scenario 5: after `release` returns, every message thread is joined
/// and every socket closed, so the peer observes disconnection shortly
/// after.
#[test]
fn release_while_connected_disconnects_the_peer() {
    let server = EdgeNode::create("srv2", ConnectType::Tcp, NodeType::QueryServer).unwrap();
    server.set_info("HOST", "127.0.0.1").unwrap();
    server.set_info("PORT", "0").unwrap();
    server.start().unwrap();
    let server_port: u16 = server.get_info("PORT").unwrap().unwrap().parse().unwrap();

    let (client, _received) = spawn_client("c3");
    client.connect("127.0.0.1", server_port).unwrap();

    std::thread::sleep(Duration::from_millis(250));
    assert!(client.is_connected());

    server.release().unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while std::time::Instant::now() < deadline && client.is_connected() {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!client.is_connected(), "client should observe disconnection within 1s");

    client.release().unwrap();
}
