//! A minimal edge-data subscriber: connects to a publisher's TCP
//! listener and prints a summary of every frame it receives.

#[macro_use]
extern crate log;

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use structopt::StructOpt;

use edgelink_node::{CallbackOutcome, ConnectType, EdgeNode, Event, NodeType};

#[derive(StructOpt, Debug)]
#[structopt(name = "edgelink-subscriber", about = "subscribe to a publisher's edge-data frames")]
struct Opt {
    /// Publisher host to connect to.
    #[structopt(long, default_value = "127.0.0.1")]
    dest_host: String,

    /// Publisher port to connect to.
    #[structopt(long)]
    dest_port: u16,

    /// Local address to bind this node's own listener to (the
    /// handshake's reverse leg connects back to it).
    #[structopt(short, long, default_value = "0.0.0.0")]
    host: String,

    /// Local port to listen on (0 picks an ephemeral port).
    #[structopt(short, long, default_value = "0")]
    port: u16,

    /// Number of frames to receive before exiting (0 = run forever).
    #[structopt(short = "n", long, default_value = "0")]
    count: u64,
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    debug!("{:#?}", opt);

    let node = EdgeNode::create("subscriber", ConnectType::Tcp, NodeType::QueryClient)?;
    node.set_info("HOST", &opt.host)?;
    node.set_info("PORT", &opt.port.to_string())?;

    let received = std::sync::Arc::new(AtomicU64::new(0));
    let received_clone = std::sync::Arc::clone(&received);
    let target_count = opt.count;

    node.set_event_callback(move |event| match event {
        Event::Capability(caps) => {
            info!("publisher capability: {}", String::from_utf8_lossy(&caps));
            CallbackOutcome::Continue
        }
        Event::NewDataReceived(data) => {
            let n = received_clone.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "frame {}: {} slot(s), frame metadata = {:?}",
                n,
                data.num(),
                data.get_info("frame")
            );
            CallbackOutcome::Continue
        }
        Event::ConnectionClosed { client_id } => {
            info!("connection {} closed", client_id);
            CallbackOutcome::Continue
        }
        other => {
            debug!("event: {:?}", other);
            CallbackOutcome::Continue
        }
    })?;

    node.start()?;
    node.connect(&opt.dest_host, opt.dest_port)?;
    info!("connected to {}:{}", opt.dest_host, opt.dest_port);

    loop {
        if target_count != 0 && received.load(Ordering::SeqCst) >= target_count {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    node.release()?;
    Ok(())
}
