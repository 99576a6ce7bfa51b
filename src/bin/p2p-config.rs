use std::path::PathBuf;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use log::{error, info, warn};
use structopt::StructOpt;

use hotstuff_p2p::config::Config;
use hotstuff_p2p::init_logger;
use hotstuff_p2p::network::host::{decode_keypair, encode_keypair, split_p2p_addr};

#[derive(Debug, StructOpt)]
#[structopt(name = "p2p-config", about = "HotStuff P2P configuration tool")]
struct Opt {
    /// Output file; printed to stdout when omitted
    #[structopt(long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// Existing configuration to start from; its key is kept
    #[structopt(long, parse(from_os_str))]
    input: Option<PathBuf>,

    /// Node name
    #[structopt(long)]
    node_name: Option<String>,

    /// Listen multiaddress
    #[structopt(long)]
    address: Option<String>,

    /// Comma separated bootstrap multiaddresses ending in /p2p/<peer-id>
    #[structopt(long)]
    bootstrap: Option<String>,

    /// Generate a new key even if the input has one
    #[structopt(long)]
    new_key: bool,
}

fn main() {
    // Initialize logger
    init_logger();

    let opt = Opt::from_args();

    let mut config = match &opt.input {
        Some(input) => match Config::load(input) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(node_name) = opt.node_name {
        config.node.node_name = node_name;
    }

    if let Some(address) = opt.address {
        if let Err(e) = address.parse::<Multiaddr>() {
            error!("Invalid listen address {}: {}", address, e);
            std::process::exit(1);
        }
        config.p2p.address = address;
    }

    if let Some(bootstrap) = opt.bootstrap {
        config.p2p.bootstrap = bootstrap
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        for addr in &config.p2p.bootstrap {
            if let Err(e) = split_p2p_addr(addr) {
                warn!("Bootstrap entry will be skipped at runtime: {}", e);
            }
        }
    }

    let keypair = if opt.new_key || config.p2p.private_key.is_empty() {
        let keypair = Keypair::generate_ed25519();
        match encode_keypair(&keypair) {
            Ok((private_key, public_key)) => {
                config.p2p.private_key = private_key;
                config.p2p.public_key = public_key;
            }
            Err(e) => {
                error!("Failed to encode key: {}", e);
                std::process::exit(1);
            }
        }
        keypair
    } else {
        match decode_keypair(&config.p2p.private_key) {
            Ok(keypair) => keypair,
            Err(e) => {
                error!("Existing private key is invalid: {}", e);
                std::process::exit(1);
            }
        }
    };

    let peer_id = keypair.public().to_peer_id();
    info!("Peer id: {}", peer_id);
    if let Ok(addr) = config.p2p.address.parse::<Multiaddr>() {
        info!("Dial as: {}", addr.with(Protocol::P2p(peer_id)));
    }

    match opt.output {
        Some(output) => match config.save(&output) {
            Ok(()) => info!("Configuration saved to {:?}", output),
            Err(e) => {
                error!("Failed to save configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => match toml::to_string_pretty(&config) {
            Ok(config_str) => println!("{}", config_str),
            Err(e) => {
                error!("Failed to serialize configuration: {}", e);
                std::process::exit(1);
            }
        },
    }
}
