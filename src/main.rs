use std::path::PathBuf;
use std::sync::Arc;
use bytes::Bytes;
use libp2p::PeerId;
use log::{error, info};
use structopt::StructOpt;
use tokio::sync::mpsc;

use hotstuff_p2p::config::Config;
use hotstuff_p2p::init_logger_with_level;
use hotstuff_p2p::network::Module;
use hotstuff_p2p::util::fingerprint;
use hotstuff_p2p::Switch;

#[derive(Debug, StructOpt)]
#[structopt(name = "hotstuff-p2p", about = "HotStuff peer-to-peer switch")]
struct Opt {
    /// Configuration file
    #[structopt(short, long, parse(from_os_str), default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let config = match Config::load(&opt.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", opt.config.display(), e);
            std::process::exit(1);
        }
    };

    // Initialize logger
    init_logger_with_level(&config.node.log_level);
    info!("Starting {}...", config.node.node_name);

    let mut switch: Switch = Switch::new(config.p2p.clone());

    // Log every inbound frame until a real consensus engine is attached
    for module in Module::ALL {
        let (tx, mut rx) = mpsc::channel::<(PeerId, i32, Bytes)>(1024);
        if let Err(e) = switch.add_reactor(module, Arc::new(tx)) {
            error!("Failed to register {} reactor: {}", module, e);
            std::process::exit(1);
        }

        tokio::spawn(async move {
            while let Some((peer, channel, payload)) = rx.recv().await {
                info!(
                    "[module {}] {} bytes on channel {} from {} ({})",
                    module,
                    payload.len(),
                    channel,
                    peer,
                    fingerprint(&payload)
                );
            }
        });
    }

    if let Err(e) = switch.start().await {
        error!("Failed to start switch: {}", e);
        std::process::exit(1);
    }

    if let Some(addr) = switch.listen_addr() {
        info!("Node reachable at {}", addr);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    if let Err(e) = switch.stop().await {
        error!("Failed to stop switch: {}", e);
    }
}
