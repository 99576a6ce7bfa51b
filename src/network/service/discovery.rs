use std::time::Duration;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::SwitchConfig;
use crate::error::P2pError;
use crate::network::host::{peer_multiaddr, Network};
use crate::network::service::dialer::Connector;

const BOOTSTRAP_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const BOOTSTRAP_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Concurrent dials per bootstrap round
const BOOTSTRAP_DIAL_CONCURRENCY: usize = 16;

/// Resolves once the shutdown signal is set, including when it already was
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Dial every address, logging and skipping failures
async fn connect_all<N: Network>(connector: &Connector<N>, addrs: &[String]) {
    stream::iter(addrs)
        .for_each_concurrent(BOOTSTRAP_DIAL_CONCURRENCY, |addr| async move {
            match connector.connect(addr).await {
                Ok(()) => debug!("Connected to bootstrap peer {}", addr),
                Err(e) => warn!("Failed to connect to bootstrap peer {}: {}", addr, e),
            }
        })
        .await;
}

/// One bootstrap attempt: DHT bootstrap, then dial the seed set
async fn bootstrap_round<N: Network>(connector: &Connector<N>, addrs: &[String]) {
    if let Err(e) = connector.network().bootstrap_routing().await {
        debug!("DHT bootstrap: {}", e);
    }
    connect_all(connector, addrs).await;
}

/// Join the overlay through the configured bootstrap peers
///
/// Retries with exponential backoff until the routing table holds at least
/// one peer or the bootstrap timeout elapses. Never fails: an isolated node
/// keeps running and discovery retries the seed set later.
pub async fn bootstrap<N: Network>(connector: &Connector<N>, config: &SwitchConfig) {
    if config.bootstrap.is_empty() {
        bootstrap_round(connector, &config.bootstrap).await;
        info!("No bootstrap peers configured, starting standalone");
        return;
    }

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(BOOTSTRAP_INITIAL_INTERVAL)
        .with_max_interval(BOOTSTRAP_MAX_INTERVAL)
        .with_max_elapsed_time(Some(config.bootstrap_timeout()))
        .build();

    let attempt = move || async move {
        bootstrap_round(connector, &config.bootstrap).await;
        let known = connector.network().routing_peers().await.len();
        if known == 0 {
            debug!("Routing table still empty, retrying bootstrap");
            Err(backoff::Error::transient(P2pError::NoRoutingPeers))
        } else {
            Ok(known)
        }
    };

    match backoff::future::retry(policy, attempt).await {
        Ok(known) => info!("Bootstrap complete, {} peers in routing table", known),
        Err(e) => warn!(
            "Bootstrap gave up after {:?}: {}",
            config.bootstrap_timeout(),
            e
        ),
    }
}

/// Periodically connects to identities the DHT knows about
pub struct DiscoveryLoop<N: Network> {
    connector: Connector<N>,
    bootstrap: Vec<String>,
    interval: Duration,
}

impl<N: Network> DiscoveryLoop<N> {
    pub fn new(connector: Connector<N>, config: &SwitchConfig) -> Self {
        Self {
            connector,
            bootstrap: config.bootstrap.clone(),
            interval: config.discovery_interval(),
        }
    }

    /// Tick until shutdown is signalled
    ///
    /// A round in progress is abandoned as soon as the signal is set.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow_and_update() {
            debug!("Shutdown already signalled, discovery loop not started");
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Discovery loop started, every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => tokio::select! {
                    _ = signalled(&mut shutdown) => break,
                    _ = self.discover() => {}
                },
            }
        }

        info!("Discovery loop stopped");
    }

    /// One discovery round
    pub async fn discover(&self) {
        let peers = self.connector.peers();

        let stale = peers.prune_stopped();
        if !stale.is_empty() {
            debug!("Pruned {} stopped peers", stale.len());
            for peer in stale {
                peer.flush_stop().await;
            }
        }

        if peers.is_empty() && !self.bootstrap.is_empty() {
            debug!("No peers connected, re-dialing bootstrap peers");
            connect_all(&self.connector, &self.bootstrap).await;
        }

        let network = self.connector.network();
        let local = network.local_peer_id();

        for id in network.routing_peers().await {
            if id == local || peers.contains_valid(&id) {
                continue;
            }

            let addrs = network.peer_addrs(id).await;
            let addr = match addrs.first() {
                Some(addr) => peer_multiaddr(addr, id).to_string(),
                None => {
                    debug!("No known address for {}", id);
                    continue;
                }
            };

            match self.connector.connect(&addr).await {
                Ok(()) => debug!("Discovered peer {}", addr),
                Err(e) => warn!("Failed to connect to discovered peer {}: {}", addr, e),
            }
        }
    }
}
