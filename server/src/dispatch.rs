//! Packet dispatch table.
//!
//! Routes a decoded packet to the handler registered for its exact `kind`.
//! The table is filled while the server is being built and is read-only once
//! the server holds it, so lookups need no synchronization.

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::session::ClientSession;
use log::warn;
use shared::Packet;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles one inbound packet for one session.
///
/// Runs synchronously on the session's own read-loop thread. By convention a
/// handler sends at most one response per call.
pub type Handler = Arc<dyn Fn(&ServerContext, &Arc<ClientSession>, Packet) + Send + Sync>;

#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F) -> Result<(), ServerError>
    where
        F: Fn(&ServerContext, &Arc<ClientSession>, Packet) + Send + Sync + 'static,
    {
        self.register_handler(kind, Arc::new(handler))
    }

    pub fn register_handler(&mut self, kind: impl Into<String>, handler: Handler) -> Result<(), ServerError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(ServerError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes the handler for `packet.kind`.
    ///
    /// Unknown kinds are logged and dropped; returns whether a handler ran.
    pub fn dispatch(&self, ctx: &ServerContext, session: &Arc<ClientSession>, packet: Packet) -> bool {
        match self.handlers.get(packet.kind.as_str()) {
            Some(handler) => {
                (**handler)(ctx, session, packet);
                true
            }
            None => {
                warn!(
                    "No handler for packet type '{}' from client {}, dropping",
                    packet.kind,
                    session.id()
                );
                false
            }
        }
    }
}
