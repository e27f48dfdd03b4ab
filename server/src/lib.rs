//! # Game Server Library
//!
//! This library provides the connection-handling core of the multiplayer game
//! server. It accepts inbound client connections, tracks them in a shared
//! registry, routes decoded packets to type-specific handlers, answers
//! liveness checks and reports aggregate load.
//!
//! ## Core Responsibilities
//!
//! ### Connection Acceptance
//! A stream listener accepts connections until shutdown is requested. Each
//! accepted peer becomes a `ClientSession` with a random identifier. If the
//! registry is at capacity or the identifier collides, the connection is
//! closed immediately; no session exists without a registry entry.
//!
//! ### Client Registry
//! The registry is the only structure every connection touches. It is a
//! sharded concurrent map, so insert, lookup, removal and iteration never need
//! an external lock. A session's presence in the registry is what "connected"
//! means: when its read loop ends for any reason it deregisters itself.
//!
//! ### Packet Dispatch
//! Inbound packets carry a string `kind`. The dispatch table maps each kind to a
//! handler and is fixed once the server is built. Unknown kinds are logged and
//! dropped without affecting the session.
//!
//! ### Heartbeat and Status
//! `Heartbeat` requests from live sessions are acknowledged and answered with
//! `ResponseHeartbeat` carrying the current server time. `ServerStatus`
//! requests are answered with `ResponseServerStatus` and a full snapshot. The
//! status escalates `Standard -> Crowded -> Full` as the registry fills and
//! never steps back down.
//!
//! ## Architecture Design
//!
//! ### Thread Per Session
//! Every accepted session gets a dedicated OS thread that drives its read loop
//! on the runtime handle. Handlers run synchronously on that thread, so a slow
//! or blocked handler stalls only its own session. Packets that arrive by
//! datagram are queued on their session and dispatched by the same read loop.
//! Outbound packets go through a per-session writer task and never block the
//! caller.
//!
//! ### Cooperative Shutdown
//! A single watch signal stops the acceptor and the datagram listener and wakes
//! every read loop, each of which closes and deregisters its own session.
//!
//! ### Injected Time Source
//! Server time comes from the `Clock` handed to the builder, created once at
//! startup and only read afterwards.
//!
//! ## Module Organization
//!
//! - `network`: `Server`, `ServerBuilder`, the accept loop, read loops and the datagram loop
//! - `context`: shared state handed to handlers, plus broadcast and multicast
//! - `registry`: the concurrent identifier to session map
//! - `session`: per-connection state and the outbound writer task
//! - `dispatch`: the packet-kind to handler table
//! - `heartbeat`: heartbeat request handling
//! - `status`: load classification and status request handling
//! - `clock`: the server time source
//! - `config`: configuration and port validation
//! - `error`: error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder(ServerConfig::default())
//!         .handler("Chat", |ctx, _session, packet| ctx.broadcast(&packet))
//!         .build()?;
//!
//!     let addr = server.start_tcp().await?;
//!     server.start_udp().await?;
//!     println!("Listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod network;
pub mod registry;
pub mod session;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ServerConfig;
pub use context::ServerContext;
pub use error::{RegistryError, ServerError};
pub use network::{Server, ServerBuilder};
pub use session::{ClientId, ClientSession};
