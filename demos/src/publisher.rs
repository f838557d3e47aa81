//! A minimal edge-data publisher: starts a TCP query-server node and
//! sends one synthetic two-slot frame per `--interval-ms` to every
//! connected subscriber.

#[macro_use]
extern crate log;

use std::thread;
use std::time::Duration;

use anyhow::Result;
use structopt::StructOpt;

use edgelink_data::EdgeData;
use edgelink_node::{ConnectType, EdgeNode, NodeType};

#[derive(StructOpt, Debug)]
#[structopt(name = "edgelink-publisher", about = "publish synthetic edge-data frames")]
struct Opt {
    /// Local address to bind the listener to.
    #[structopt(short, long, default_value = "0.0.0.0")]
    host: String,

    /// Local port to listen on (0 picks an ephemeral port).
    #[structopt(short, long, default_value = "0")]
    port: u16,

    /// Opaque capability string sent to subscribers during the handshake.
    #[structopt(short, long, default_value = "edgelink-demo/v1")]
    caps: String,

    /// Milliseconds between frames.
    #[structopt(short, long, default_value = "1000")]
    interval_ms: u64,

    /// Number of frames to publish before exiting (0 = run forever).
    #[structopt(short = "n", long, default_value = "0")]
    count: u64,
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    debug!("{:#?}", opt);

    let node = EdgeNode::create("publisher", ConnectType::Tcp, NodeType::QueryServer)?;
    node.set_info("HOST", &opt.host)?;
    node.set_info("PORT", &opt.port.to_string())?;
    node.set_info("CAPS", &opt.caps)?;
    node.start()?;

    let bound_port = node.get_info("PORT")?.unwrap_or_default();
    info!("publishing on {}:{}", opt.host, bound_port);

    let mut sent = 0u64;
    loop {
        if opt.count != 0 && sent >= opt.count {
            break;
        }

        let mut data = EdgeData::new();
        let samples: Vec<u8> = (0u32..16).flat_map(u32::to_le_bytes).collect();
        data.add(&samples)?;
        data.set_info("frame", sent.to_string());

        match node.send(&data) {
            Ok(()) => info!("sent frame {}", sent),
            Err(e) => warn!("failed to send frame {}: {}", sent, e),
        }

        sent += 1;
        thread::sleep(Duration::from_millis(opt.interval_ms));
    }

    node.release()?;
    Ok(())
}
