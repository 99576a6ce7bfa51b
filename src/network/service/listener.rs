use futures::StreamExt;
use log::{debug, info};
use tokio::sync::watch;

use crate::network::host::{Incoming, Network};
use crate::network::service::dialer::Connector;

/// Accept inbound application streams until shutdown
///
/// Each stream is admitted on its own task so a slow setup never holds
/// up the next remote.
pub async fn accept_loop<N: Network>(
    mut incoming: Incoming<N::Stream>,
    connector: Connector<N>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Accepting inbound streams on {}", connector.network().listen_addr());

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = incoming.next() => match next {
                Some((peer, stream)) => {
                    debug!("Inbound stream from {}", peer);
                    let connector = connector.clone();
                    tokio::spawn(async move {
                        connector.handle_stream(peer, stream).await;
                    });
                }
                None => {
                    info!("Inbound stream source closed");
                    break;
                }
            }
        }
    }

    debug!("Accept loop stopped");
}
