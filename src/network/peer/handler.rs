use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use bytes::Bytes;
use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use libp2p::{Multiaddr, PeerId};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::SwitchConfig;
use crate::error::{P2pError, Result};
use crate::network::codec::frame::{Frame, FrameCodec};
use crate::network::handlers::table::ReactorTable;
use crate::network::peer::state::{AtomicPeerState, PeerState};
use crate::network::types::direction::Direction;
use crate::network::types::module::Module;
use crate::util::fingerprint;

/// Duplex byte stream a peer runs on
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

type BoxedStream = Box<dyn PeerStream>;

/// Per-peer timing and queue settings
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Upper bound for one send, enqueue plus write
    pub send_timeout: Duration,

    /// Upper bound for draining on stop
    pub drain_timeout: Duration,

    /// Outbound queue capacity
    pub queue_capacity: usize,
}

impl From<&SwitchConfig> for PeerConfig {
    fn from(config: &SwitchConfig) -> Self {
        Self {
            send_timeout: config.send_timeout(),
            drain_timeout: config.drain_timeout(),
            queue_capacity: config.queue_capacity(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::from(&SwitchConfig::default())
    }
}

/// A frame waiting for the writer, with its delivery acknowledgment
struct Outgoing {
    frame: Frame,
    ack: oneshot::Sender<bool>,
}

/// Stream halves and queues held until the peer is started
struct PendingIo {
    reader: FramedRead<ReadHalf<BoxedStream>, FrameCodec>,
    writer: FramedWrite<WriteHalf<BoxedStream>, FrameCodec>,
    outgoing_rx: mpsc::Receiver<Outgoing>,
    reader_shutdown: watch::Receiver<bool>,
    writer_shutdown: watch::Receiver<bool>,
}

/// One live connection to a remote identity
pub struct Peer {
    /// Remote identity
    id: PeerId,

    /// Known addresses of the remote
    addrs: Vec<Multiaddr>,

    /// Which side opened the stream
    direction: Direction,

    /// Lifecycle state shared with the peer's tasks
    state: Arc<AtomicPeerState>,

    /// Queue feeding the writer task
    outgoing_tx: mpsc::Sender<Outgoing>,

    /// Stop signal observed by both tasks
    shutdown_tx: Arc<watch::Sender<bool>>,

    /// Reactors inbound frames are routed to
    reactors: Arc<ReactorTable>,

    /// Stream halves until `start`
    pending: Mutex<Option<PendingIo>>,

    /// Read and write tasks after `start`
    tasks: Mutex<Vec<JoinHandle<()>>>,

    config: PeerConfig,
}

impl Peer {
    /// Wrap an opened stream. Fails if the consensus module has no reactor.
    pub fn new<S>(
        id: PeerId,
        addrs: Vec<Multiaddr>,
        direction: Direction,
        stream: S,
        reactors: Arc<ReactorTable>,
        config: PeerConfig,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        reactors.require(Module::Consensus)?;

        let stream: BoxedStream = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(stream);

        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, reader_shutdown) = watch::channel(false);
        let writer_shutdown = shutdown_tx.subscribe();

        let pending = PendingIo {
            reader: FramedRead::new(read_half, FrameCodec::new()),
            writer: FramedWrite::new(write_half, FrameCodec::new()),
            outgoing_rx,
            reader_shutdown,
            writer_shutdown,
        };

        Ok(Self {
            id,
            addrs,
            direction,
            state: Arc::new(AtomicPeerState::new()),
            outgoing_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            reactors,
            pending: Mutex::new(Some(pending)),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> PeerState {
        self.state.get()
    }

    /// Launch the read/dispatch and write loops
    ///
    /// Returns false if the peer was already started or stopped.
    pub fn start(&self) -> bool {
        if !self.state.start() {
            return false;
        }

        let io = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        let io = match io {
            Some(io) => io,
            None => {
                self.state.stop();
                return false;
            }
        };

        let reader = tokio::spawn(read_loop(
            self.id,
            io.reader,
            self.reactors.clone(),
            self.state.clone(),
            self.shutdown_tx.clone(),
            io.reader_shutdown,
        ));
        let writer = tokio::spawn(write_loop(
            self.id,
            io.writer,
            io.outgoing_rx,
            self.state.clone(),
            self.shutdown_tx.clone(),
            io.writer_shutdown,
        ));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([reader, writer]);

        info!("Started {} peer {}", self.direction, self.id);
        true
    }

    /// Write a frame on `channel` and wait for it to hit the stream
    ///
    /// Returns false on failure or after the send timeout.
    pub async fn send(&self, channel: i32, payload: Bytes) -> bool {
        if self.state.is_stopped() {
            debug!("Skipping send to stopped peer {} on channel {}", self.id, channel);
            return false;
        }

        let digest = fingerprint(&payload);
        let (ack_tx, ack_rx) = oneshot::channel();
        let outgoing = Outgoing {
            frame: Frame::new(channel, payload),
            ack: ack_tx,
        };

        let queue = &self.outgoing_tx;
        let delivery = async move {
            queue.send(outgoing).await.is_ok() && ack_rx.await.unwrap_or(false)
        };

        match timeout(self.config.send_timeout, delivery).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    "Failed to send to peer {} on channel {} (payload {})",
                    self.id, channel, digest
                );
                false
            }
            Err(_) => {
                warn!(
                    "Send to peer {} on channel {} timed out after {:?} (payload {})",
                    self.id, channel, self.config.send_timeout, digest
                );
                false
            }
        }
    }

    /// Whether the underlying stream is still usable
    pub fn validate(&self) -> Result<()> {
        if self.state.is_stopped() || self.outgoing_tx.is_closed() {
            return Err(P2pError::PeerStopped(self.id));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Drain queued frames, close the stream and wait for both loops
    ///
    /// Loops still running after the drain timeout are aborted.
    pub async fn flush_stop(&self) {
        let previous = self.state.stop();
        self.shutdown_tx.send_replace(true);

        // Never started: dropping the halves closes the stream
        drop(self.pending.lock().unwrap_or_else(PoisonError::into_inner).take());

        let mut handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if handles.is_empty() {
            if previous != PeerState::Stopped {
                info!("Stopped peer {}", self.id);
            }
            return;
        }

        if timeout(self.config.drain_timeout, join_all(handles.iter_mut())).await.is_err() {
            warn!(
                "Peer {} did not drain within {:?}, aborting",
                self.id, self.config.drain_timeout
            );
            for handle in &handles {
                handle.abort();
            }
        }

        info!("Stopped peer {}", self.id);
    }
}

/// Read frames and route them to reactors until the stream ends or stop is signalled
async fn read_loop(
    id: PeerId,
    mut reader: FramedRead<ReadHalf<BoxedStream>, FrameCodec>,
    reactors: Arc<ReactorTable>,
    state: Arc<AtomicPeerState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("Read loop of peer {} stopping", id);
                break;
            }
            next = reader.next() => match next {
                Some(Ok(frame)) => {
                    reactors.dispatch(id, frame).await;
                }
                Some(Err(e)) => {
                    error!("Error reading from peer {}: {}", id, e);
                    break;
                }
                None => {
                    info!("Peer {} closed the stream", id);
                    break;
                }
            }
        }
    }

    state.stop();
    shutdown_tx.send_replace(true);
}

/// Write queued frames; on stop, drain what is queued and close the sink
async fn write_loop(
    id: PeerId,
    mut writer: FramedWrite<WriteHalf<BoxedStream>, FrameCodec>,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    state: Arc<AtomicPeerState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut healthy = true;

    loop {
        tokio::select! {
            next = outgoing_rx.recv() => match next {
                Some(outgoing) => {
                    if !write_frame(id, &mut writer, outgoing).await {
                        healthy = false;
                        break;
                    }
                }
                None => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // No new frames from here on
    state.stop();
    outgoing_rx.close();

    if healthy {
        while let Some(outgoing) = outgoing_rx.recv().await {
            if !write_frame(id, &mut writer, outgoing).await {
                break;
            }
        }
        if let Err(e) = writer.close().await {
            debug!("Error closing stream to peer {}: {}", id, e);
        }
    }

    shutdown_tx.send_replace(true);
}

async fn write_frame(
    id: PeerId,
    writer: &mut FramedWrite<WriteHalf<BoxedStream>, FrameCodec>,
    outgoing: Outgoing,
) -> bool {
    let channel = outgoing.frame.channel;
    match writer.send(outgoing.frame).await {
        Ok(()) => {
            let _ = outgoing.ack.send(true);
            true
        }
        Err(e) => {
            error!("Failed to write channel {} frame to peer {}: {}", channel, id, e);
            let _ = outgoing.ack.send(false);
            false
        }
    }
}
