//! Heartbeat request handling.
//!
//! A live session's heartbeat is acknowledged against the session and answered
//! with a `ResponseHeartbeat` carrying the current server time. Requests from
//! closed sessions or with an undecodable body are dropped without a response.

use crate::context::ServerContext;
use crate::session::ClientSession;
use log::{debug, error, warn};
use shared::{Packet, RESPONSE_HEARTBEAT};
use std::sync::Arc;

pub fn handle_heartbeat(ctx: &ServerContext, session: &Arc<ClientSession>, packet: Packet) {
    if !session.is_alive() {
        warn!("Dropping heartbeat from client {}: session not alive", session.id());
        return;
    }

    // The body is optional; when present it is the client's own clock reading
    if packet.has_body() {
        match packet.body::<u64>() {
            Ok(client_time) => debug!("Heartbeat from client {} (client time {})", session.id(), client_time),
            Err(e) => {
                warn!("Dropping malformed heartbeat from client {}: {}", session.id(), e);
                return;
            }
        }
    }

    let server_time = ctx.server_time();
    session.acknowledge_heartbeat(server_time);

    match Packet::with_body(RESPONSE_HEARTBEAT, &server_time) {
        Ok(response) => {
            session.send(response);
        }
        Err(e) => error!("Failed to encode heartbeat response: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::DispatchTable;
    use crate::status::StatusTracker;
    use shared::HEARTBEAT;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn context(clock: Arc<ManualClock>) -> ServerContext {
        let status = StatusTracker::new(0, 0, "Test", 1000, 900, clock.clone());
        ServerContext::new(DispatchTable::new(), status, clock, 1000)
    }

    fn session() -> (Arc<ClientSession>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ClientSession::new("hb-client", "127.0.0.1:7000".parse().unwrap(), tx);
        (Arc::new(session), rx)
    }

    #[test]
    fn test_heartbeat_echoes_server_time() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone());
        let (session, mut rx) = session();

        handle_heartbeat(&ctx, &session, Packet::new(HEARTBEAT));

        let response = rx.try_recv().unwrap();
        assert_eq!(response.kind, RESPONSE_HEARTBEAT);
        assert_eq!(response.body::<u64>().unwrap(), 1_000);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.last_heartbeat(), Some(1_000));
    }

    #[test]
    fn test_successive_heartbeats_carry_increasing_time() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = context(clock.clone());
        let (session, mut rx) = session();

        handle_heartbeat(&ctx, &session, Packet::new(HEARTBEAT));
        clock.advance(Duration::from_millis(250));
        handle_heartbeat(&ctx, &session, Packet::with_body(HEARTBEAT, &42u64).unwrap());

        let first = rx.try_recv().unwrap().body::<u64>().unwrap();
        let second = rx.try_recv().unwrap().body::<u64>().unwrap();
        assert!(second > first);
        assert_eq!(session.heartbeat_count(), 2);
    }

    #[test]
    fn test_heartbeat_from_closed_session_dropped() {
        let ctx = context(Arc::new(ManualClock::new(1_000)));
        let (session, mut rx) = session();
        session.close();

        handle_heartbeat(&ctx, &session, Packet::new(HEARTBEAT));

        assert!(rx.try_recv().is_err());
        assert_eq!(session.heartbeat_count(), 0);
    }

    #[test]
    fn test_malformed_heartbeat_dropped() {
        let ctx = context(Arc::new(ManualClock::new(1_000)));
        let (session, mut rx) = session();
        let packet = Packet {
            kind: HEARTBEAT.to_string(),
            payload: vec![1, 2, 3],
        };

        handle_heartbeat(&ctx, &session, packet);

        assert!(rx.try_recv().is_err());
        assert_eq!(session.last_heartbeat(), None);
    }
}
