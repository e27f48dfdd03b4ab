//! Load classification and the status request handler.

use crate::clock::Clock;
use crate::context::ServerContext;
use crate::session::ClientSession;
use log::{error, info, warn};
use shared::{Packet, ServerStatus, StatusCode, RESPONSE_SERVER_STATUS};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Tracks the server's advertised load state.
///
/// The status code only ever escalates: `Standard -> Crowded -> Full`. A drop in
/// the session count never lowers it. Recomputation is a single atomic max, so
/// concurrent triggers from the acceptor and from closing sessions are safe.
pub struct StatusTracker {
    id: u32,
    group_id: u32,
    name: String,
    capacity: usize,
    crowd_threshold: usize,
    code: AtomicU8,
    clock: Arc<dyn Clock>,
}

impl StatusTracker {
    pub fn new(
        id: u32,
        group_id: u32,
        name: impl Into<String>,
        capacity: usize,
        crowd_threshold: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            group_id,
            name: name.into(),
            capacity,
            crowd_threshold,
            code: AtomicU8::new(StatusCode::Standard as u8),
            clock,
        }
    }

    pub fn current(&self) -> StatusCode {
        StatusCode::from_u8(self.code.load(Ordering::Acquire)).unwrap_or(StatusCode::Full)
    }

    /// Reclassifies load for the given registered-session count.
    ///
    /// Returns the new code if this call escalated it, `None` otherwise.
    pub fn recompute(&self, count: usize) -> Option<StatusCode> {
        let target = if count >= self.capacity {
            StatusCode::Full
        } else if count >= self.crowd_threshold {
            StatusCode::Crowded
        } else {
            return None;
        };

        let previous = self.code.fetch_max(target as u8, Ordering::AcqRel);
        if previous >= target as u8 {
            return None;
        }

        info!(
            "Server status escalated to {:?} ({} / {} clients)",
            target, count, self.capacity
        );
        Some(target)
    }

    pub fn snapshot(&self) -> ServerStatus {
        ServerStatus {
            id: self.id,
            group_id: self.group_id,
            name: self.name.clone(),
            status: self.current(),
            server_time: self.clock.server_time(),
        }
    }
}

/// Answers a status request with the full status snapshot
pub fn handle_status_request(ctx: &ServerContext, session: &Arc<ClientSession>, _packet: Packet) {
    if !session.is_alive() {
        warn!("Dropping status request from client {}: session not alive", session.id());
        return;
    }

    let status = ctx.status().snapshot();
    match Packet::with_body(RESPONSE_SERVER_STATUS, &status) {
        Ok(response) => {
            session.send(response);
        }
        Err(e) => error!("Failed to encode server status: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn tracker(capacity: usize) -> StatusTracker {
        let threshold = (capacity as f64 * 0.9) as usize;
        StatusTracker::new(1, 2, "Test Server", capacity, threshold, Arc::new(ManualClock::new(77)))
    }

    #[test]
    fn test_starts_standard() {
        let tracker = tracker(1000);
        assert_eq!(tracker.current(), StatusCode::Standard);
        assert_eq!(tracker.recompute(1), None);
        assert_eq!(tracker.recompute(899), None);
        assert_eq!(tracker.current(), StatusCode::Standard);
    }

    #[test]
    fn test_escalates_to_crowded_once() {
        let tracker = tracker(1000);

        assert_eq!(tracker.recompute(900), Some(StatusCode::Crowded));
        assert_eq!(tracker.recompute(901), None);
        assert_eq!(tracker.recompute(950), None);
        assert_eq!(tracker.current(), StatusCode::Crowded);
    }

    #[test]
    fn test_never_deescalates() {
        let tracker = tracker(1000);
        tracker.recompute(900);

        assert_eq!(tracker.recompute(899), None);
        assert_eq!(tracker.recompute(0), None);
        assert_eq!(tracker.current(), StatusCode::Crowded);
    }

    #[test]
    fn test_escalates_to_full_at_capacity() {
        let tracker = tracker(10);

        assert_eq!(tracker.recompute(9), Some(StatusCode::Crowded));
        assert_eq!(tracker.recompute(10), Some(StatusCode::Full));
        assert_eq!(tracker.recompute(9), None);
        assert_eq!(tracker.current(), StatusCode::Full);
    }

    #[test]
    fn test_concurrent_recompute_reports_single_transition() {
        let tracker = Arc::new(tracker(1000));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.recompute(900).is_some())
            })
            .collect();

        let transitions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();

        assert_eq!(transitions, 1);
    }

    #[test]
    fn test_snapshot_fields() {
        let tracker = tracker(1000);
        let status = tracker.snapshot();

        assert_eq!(status.id, 1);
        assert_eq!(status.group_id, 2);
        assert_eq!(status.name, "Test Server");
        assert_eq!(status.status, StatusCode::Standard);
        assert_eq!(status.server_time, 77);
    }
}
