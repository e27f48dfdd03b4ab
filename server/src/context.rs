//! Shared server state handed to every handler and connection thread.

use crate::clock::Clock;
use crate::dispatch::DispatchTable;
use crate::error::RegistryError;
use crate::registry::ClientRegistry;
use crate::session::ClientSession;
use crate::status::StatusTracker;
use log::{debug, info};
use shared::{Packet, StatusCode};
use std::sync::Arc;

pub struct ServerContext {
    registry: ClientRegistry,
    dispatch: DispatchTable,
    status: StatusTracker,
    clock: Arc<dyn Clock>,
    max_clients: usize,
}

impl ServerContext {
    pub fn new(dispatch: DispatchTable, status: StatusTracker, clock: Arc<dyn Clock>, max_clients: usize) -> Self {
        Self {
            registry: ClientRegistry::new(),
            dispatch,
            status,
            clock,
            max_clients,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn server_time(&self) -> u64 {
        self.clock.server_time()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn is_full(&self) -> bool {
        self.registry.len() >= self.max_clients
    }

    /// Registers a session and reclassifies load
    pub fn register(&self, session: Arc<ClientSession>) -> Result<(), RegistryError> {
        self.registry.try_insert(session)?;
        self.refresh_status();
        Ok(())
    }

    /// Removes a session if it is still registered and reclassifies load.
    /// Safe to call more than once for the same session.
    pub fn deregister(&self, session: &Arc<ClientSession>) -> bool {
        if !self.registry.remove_session(session) {
            return false;
        }

        info!(
            "Client {} removed ({} connected)",
            session.id(),
            self.registry.len()
        );
        self.refresh_status();
        true
    }

    pub fn refresh_status(&self) -> Option<StatusCode> {
        self.status.recompute(self.registry.len())
    }

    pub fn dispatch(&self, session: &Arc<ClientSession>, packet: Packet) -> bool {
        self.dispatch.dispatch(self, session, packet)
    }

    /// Sends a copy of `packet` to every session registered when the call starts.
    /// Sessions that disconnect meanwhile are skipped.
    pub fn broadcast(&self, packet: &Packet) {
        for session in self.registry.snapshot() {
            session.send(packet.clone());
        }
    }

    /// Sends a copy of `packet` to each listed client that is still registered
    pub fn multicast_to<I, S>(&self, ids: I, packet: &Packet)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            match self.registry.get(id.as_ref()) {
                Some(session) => {
                    session.send(packet.clone());
                }
                None => debug!("Skipping {} for unknown client {}", packet.kind, id.as_ref()),
            }
        }
    }
}
