//! Per-connection session state and its outbound write path.
//!
//! A `ClientSession` is what the registry tracks for each accepted peer. It
//! owns the sending side of the connection: packets queued with
//! [`ClientSession::send`] are framed and written by a dedicated writer task,
//! so callers never wait on the socket. Packets that arrive by datagram are
//! queued with [`ClientSession::deliver_datagram`] and handled by the
//! session's own read loop, next to its stream packets.

use log::{debug, warn};
use shared::{write_frame, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type ClientId = String;

#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    peer_addr: SocketAddr,
    /// Server time of the last acknowledged heartbeat, 0 if none yet
    last_heartbeat: AtomicU64,
    heartbeats: AtomicU64,
    outbound: mpsc::UnboundedSender<Packet>,
    datagrams: mpsc::UnboundedSender<Packet>,
    /// Taken once by the read loop
    datagram_rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    /// Flips to true once when the session is closed
    closed: watch::Sender<bool>,
}

impl ClientSession {
    pub fn new(id: impl Into<ClientId>, peer_addr: SocketAddr, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        let (closed, _) = watch::channel(false);
        let (datagrams, datagram_rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            peer_addr,
            last_heartbeat: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            outbound,
            datagrams,
            datagram_rx: Mutex::new(Some(datagram_rx)),
            closed,
        }
    }

    /// Creates a session with a fresh random identifier
    pub fn with_random_id(peer_addr: SocketAddr, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self::new(Uuid::new_v4().to_string(), peer_addr, outbound)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_alive(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Queues a packet for the writer task.
    ///
    /// Returns false if the connection is already gone; the packet is dropped.
    pub fn send(&self, packet: Packet) -> bool {
        if !self.is_alive() {
            debug!("Dropping {} for closed client {}", packet.kind, self.id);
            return false;
        }

        match self.outbound.send(packet) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping {} for client {}: writer stopped", e.0.kind, self.id);
                false
            }
        }
    }

    /// Hands a packet received by datagram to this session's read loop,
    /// which dispatches it like a stream packet.
    pub fn deliver_datagram(&self, packet: Packet) -> bool {
        if !self.is_alive() {
            debug!("Dropping datagram {} for closed client {}", packet.kind, self.id);
            return false;
        }

        self.datagrams.send(packet).is_ok()
    }

    pub(crate) fn take_datagrams(&self) -> Option<mpsc::UnboundedReceiver<Packet>> {
        match self.datagram_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Records a heartbeat received at the given server time
    pub fn acknowledge_heartbeat(&self, server_time: u64) {
        self.last_heartbeat.store(server_time, Ordering::SeqCst);
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
    }

    pub fn last_heartbeat(&self) -> Option<u64> {
        match self.last_heartbeat.load(Ordering::SeqCst) {
            0 => None,
            time => Some(time),
        }
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// Marks the session dead and wakes its read loop and writer.
    ///
    /// Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Resolves once the flag behind `signal` is set, or its sender is gone.
pub(crate) async fn wait_until_set(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

/// Spawns the task that drains a session's outbound queue onto the socket.
///
/// Queued packets are written before a close is honoured, so a response sent
/// just ahead of a disconnect still goes out. A failed write closes the
/// session, which makes its read loop deregister it. Each packet is released
/// as soon as its write attempt finishes.
pub(crate) fn spawn_writer<W>(
    session: Arc<ClientSession>,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut closed = session.closed_signal();

        loop {
            let packet = tokio::select! {
                biased;
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = wait_until_set(&mut closed) => break,
            };

            if let Err(e) = write_frame(&mut writer, &packet).await {
                warn!("Failed to send {} to client {}: {}", packet.kind, session.id(), e);
                session.close();
                break;
            }
        }

        let _ = writer.shutdown().await;
        debug!("Writer for client {} stopped", session.id());
    })
}
