//! # Probe Client Library
//!
//! A headless client for the game server. It speaks the same length-prefixed
//! packet protocol as the server (see the `shared` crate) and exposes the
//! request/response exchanges the server supports:
//!
//! - connecting and learning the assigned session id from the `Connected` packet
//! - heartbeats, returning the server time carried by `ResponseHeartbeat`
//! - status requests, returning the `ServerStatus` snapshot
//! - datagrams tagged with the session id, sent to the server's UDP listener
//!
//! The binary in this crate uses it to probe a running server; the workspace
//! integration tests use it to drive a real server over loopback.

pub mod network;

pub use network::{current_timestamp, Client, ClientError};
