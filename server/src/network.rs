//! Server network layer: stream acceptor, per-session read loops and the
//! datagram listener.

use crate::clock::{Clock, SystemClock};
use crate::config::{validated_tcp_port, validated_udp_port, ServerConfig};
use crate::context::ServerContext;
use crate::dispatch::{DispatchTable, Handler};
use crate::error::ServerError;
use crate::heartbeat::handle_heartbeat;
use crate::session::{spawn_writer, wait_until_set, ClientSession};
use crate::status::{handle_status_request, StatusTracker};
use log::{debug, error, info, warn};
use shared::{
    decode_datagram, read_frame, Packet, ProtocolError, ServerStatus, CONNECTED, HEARTBEAT, MAX_DATAGRAM_LEN,
    SERVER_STATUS,
};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// How long `shutdown` waits for session threads to deregister
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Back-off after a failed accept or receive so a persistent error can't spin
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Assembles a `Server` with its time source and any extra packet handlers.
pub struct ServerBuilder {
    config: ServerConfig,
    clock: Option<Arc<dyn Clock>>,
    handlers: Vec<(String, Handler)>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clock: None,
            handlers: Vec::new(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Adds a handler for `kind`. Handlers are fixed once the server is built.
    pub fn handler<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ServerContext, &Arc<ClientSession>, Packet) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.handlers.push((kind.into(), handler));
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };

        let mut dispatch = DispatchTable::new();
        dispatch.register(HEARTBEAT, handle_heartbeat)?;
        dispatch.register(SERVER_STATUS, handle_status_request)?;
        for (kind, handler) in self.handlers {
            dispatch.register_handler(kind, handler)?;
        }

        let status = StatusTracker::new(
            self.config.id,
            self.config.group_id,
            self.config.name.clone(),
            self.config.max_clients,
            self.config.crowd_threshold(),
            Arc::clone(&clock),
        );

        let ctx = Arc::new(ServerContext::new(dispatch, status, clock, self.config.max_clients));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Server {
            config: self.config,
            ctx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            tcp_started: AtomicBool::new(false),
            udp_started: AtomicBool::new(false),
        })
    }
}

/// Connection-handling core of the game server.
///
/// Owns the client registry (through its `ServerContext`), the listeners and
/// the shutdown signal. All public operations take `&self`, so the server is
/// normally shared behind an `Arc` between the networking side and game logic.
pub struct Server {
    config: ServerConfig,
    ctx: Arc<ServerContext>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    tcp_started: AtomicBool,
    udp_started: AtomicBool,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        ServerBuilder::new(config).build()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn status(&self) -> ServerStatus {
        self.ctx.status().snapshot()
    }

    pub fn client_count(&self) -> usize {
        self.ctx.registry().len()
    }

    pub fn session(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.ctx.registry().get(id)
    }

    fn track(&self, handle: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Binds the stream listener and spawns the accept loop.
    /// Returns the address actually bound.
    pub async fn start_tcp(&self) -> Result<SocketAddr, ServerError> {
        if self.tcp_started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted("TCP"));
        }

        let port = validated_tcp_port(self.config.tcp_port);
        let addr = format!("{}:{}", self.config.host, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.tcp_started.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind { addr, source });
            }
        };

        let local_addr = listener.local_addr()?;
        info!("TCP listener started on {}", local_addr);

        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.ctx),
            self.shutdown_tx.subscribe(),
        ));
        self.track(handle);

        Ok(local_addr)
    }

    /// Binds the datagram socket and spawns its receive loop.
    /// Returns the address actually bound.
    pub async fn start_udp(&self) -> Result<SocketAddr, ServerError> {
        if self.udp_started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted("UDP"));
        }

        let port = validated_udp_port(self.config.udp_port);
        let addr = format!("{}:{}", self.config.host, port);
        let socket = match UdpSocket::bind(&addr).await {
            Ok(socket) => socket,
            Err(source) => {
                self.udp_started.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind { addr, source });
            }
        };

        let local_addr = socket.local_addr()?;
        info!("UDP listener started on {}", local_addr);

        let handle = tokio::spawn(datagram_loop(
            socket,
            Arc::clone(&self.ctx),
            self.shutdown_tx.subscribe(),
        ));
        self.track(handle);

        Ok(local_addr)
    }

    /// Stops both listeners, closes every session and waits for their read
    /// loops to deregister (bounded by `SESSION_DRAIN_TIMEOUT`).
    pub async fn shutdown(&self) {
        info!("Server shutting down");
        self.shutdown_tx.send_replace(true);

        for handle in self.take_tasks() {
            if let Err(e) = handle.await {
                error!("Listener task failed: {}", e);
            }
        }

        for session in self.ctx.registry().snapshot() {
            session.close();
        }

        let deadline = Instant::now() + SESSION_DRAIN_TIMEOUT;
        while !self.ctx.registry().is_empty() && Instant::now() < deadline {
            sleep(ERROR_BACKOFF).await;
        }

        let remaining = self.ctx.registry().len();
        if remaining > 0 {
            warn!("{} sessions still registered after shutdown", remaining);
        } else {
            info!("Server stopped");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn send_packet(&self, session: &ClientSession, packet: Packet) {
        session.send(packet);
    }

    pub fn broadcast(&self, packet: &Packet) {
        self.ctx.broadcast(packet);
    }

    pub fn multicast_to<I, S>(&self, ids: I, packet: &Packet)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ctx.multicast_to(ids, packet);
    }

    /// Force-closes a client. Its read loop removes it from the registry.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.ctx.registry().get(id) {
            Some(session) => {
                info!("Disconnecting client {}", id);
                session.close()
            }
            None => false,
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => admit(&ctx, stream, peer, shutdown.clone()),
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    sleep(ERROR_BACKOFF).await;
                }
            },
        }
    }

    info!("TCP listener stopped");
}

/// Turns an accepted stream into a registered session with its own read thread.
/// Rejected connections are closed by dropping the stream.
fn admit(ctx: &Arc<ServerContext>, stream: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
    if ctx.is_full() {
        warn!(
            "Rejecting connection from {}: server full ({} clients)",
            peer,
            ctx.max_clients()
        );
        return;
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = Arc::new(ClientSession::with_random_id(peer, outbound_tx));

    if let Err(e) = ctx.register(Arc::clone(&session)) {
        error!("Closing connection from {}: {}", peer, e);
        return;
    }

    info!("Client {} connected from {}", session.id(), peer);
    match Packet::with_body(CONNECTED, &session.id().to_string()) {
        Ok(welcome) => {
            session.send(welcome);
        }
        Err(e) => error!("Failed to encode welcome for client {}: {}", session.id(), e),
    }
    spawn_writer(Arc::clone(&session), writer, outbound_rx);

    let runtime = tokio::runtime::Handle::current();
    let thread_ctx = Arc::clone(ctx);
    let thread_session = Arc::clone(&session);
    let spawned = thread::Builder::new()
        .name(peer.to_string())
        .spawn(move || runtime.block_on(read_loop(thread_ctx, thread_session, reader, shutdown)));

    if let Err(e) = spawned {
        error!("Failed to start read loop for client {}: {}", session.id(), e);
        session.close();
        ctx.deregister(&session);
    }
}

/// Reads one frame and hands the reader back, so a pending read can be kept
/// across loop iterations instead of being cancelled mid-frame.
async fn next_frame(mut reader: OwnedReadHalf) -> (OwnedReadHalf, Result<Option<Packet>, ProtocolError>) {
    let frame = read_frame(&mut reader).await;
    (reader, frame)
}

async fn next_datagram(datagrams: &mut Option<mpsc::UnboundedReceiver<Packet>>) -> Option<Packet> {
    match datagrams {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Reads and dispatches packets for one session until the peer disconnects,
/// a read or handler fails, the session is closed, or the server shuts down.
/// Packets the session received by datagram are dispatched here too, so every
/// handler for a session runs on that session's thread.
/// Always ends by deregistering the session.
async fn read_loop(
    ctx: Arc<ServerContext>,
    session: Arc<ClientSession>,
    reader: OwnedReadHalf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut closed = session.closed_signal();
    let mut datagrams = session.take_datagrams();
    let mut pending = Box::pin(next_frame(reader));

    loop {
        let frame = tokio::select! {
            _ = wait_until_set(&mut shutdown) => {
                debug!("Read loop for client {} stopping for shutdown", session.id());
                break;
            }
            _ = wait_until_set(&mut closed) => {
                debug!("Read loop for client {} stopping: session closed", session.id());
                break;
            }
            Some(packet) = next_datagram(&mut datagrams) => Ok(Some(packet)),
            (reader, frame) = &mut pending => {
                pending.set(next_frame(reader));
                frame
            }
        };

        match frame {
            Ok(Some(packet)) => {
                let kind = packet.kind.clone();
                let outcome = catch_unwind(AssertUnwindSafe(|| ctx.dispatch(&session, packet)));
                if outcome.is_err() {
                    error!("Handler for '{}' panicked, closing client {}", kind, session.id());
                    break;
                }
            }
            Ok(None) => {
                info!("Client {} disconnected", session.id());
                break;
            }
            Err(e) => {
                warn!("Closing client {} after read error: {}", session.id(), e);
                break;
            }
        }
    }

    session.close();
    ctx.deregister(&session);
}

/// Bounded datagram receive loop with the same shutdown discipline as the acceptor
async fn datagram_loop(socket: UdpSocket, ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut buffer = [0u8; MAX_DATAGRAM_LEN];

    while !*shutdown.borrow_and_update() {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, from)) => handle_datagram(&ctx, &buffer[..len], from),
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    sleep(ERROR_BACKOFF).await;
                }
            },
        }
    }

    info!("UDP listener stopped");
}

/// Queues a datagram's packet on the session it names, whose read loop
/// dispatches it. The sender must share the registered session's IP address.
fn handle_datagram(ctx: &ServerContext, data: &[u8], from: SocketAddr) {
    let datagram = match decode_datagram(data) {
        Ok(datagram) => datagram,
        Err(e) => {
            warn!("Dropping malformed datagram from {}: {}", from, e);
            return;
        }
    };

    let Some(session) = ctx.registry().get(&datagram.client_id) else {
        warn!("Dropping datagram from {}: unknown client {}", from, datagram.client_id);
        return;
    };

    if session.peer_addr().ip() != from.ip() {
        warn!(
            "Dropping datagram from {}: client {} is connected from {}",
            from,
            session.id(),
            session.peer_addr()
        );
        return;
    }

    if !session.deliver_datagram(datagram.packet) {
        debug!("Dropping datagram from {}: client {} is closing", from, session.id());
    }
}
