//! Server configuration and listener port validation.

use log::warn;
use std::net::TcpListener;

/// Fallback stream port when the requested one is unusable
pub const DEFAULT_TCP_PORT: u16 = 43950;
/// Fallback datagram port when the requested one is unusable
pub const DEFAULT_UDP_PORT: u16 = 53950;
/// Lowest port a listener may be configured on; everything below is reserved
pub const MIN_PORT: u32 = 1025;
pub const MAX_PORT: u32 = 65535;

/// Maximum number of tracked sessions
pub const MAX_CLIENTS: usize = 1000;
/// Fraction of capacity at which the server reports itself as crowded
pub const CROWD_RATIO: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub id: u32,
    pub group_id: u32,
    pub name: String,
    pub host: String,
    /// Requested stream port; `0` lets the OS pick one
    pub tcp_port: u32,
    /// Requested datagram port; `0` lets the OS pick one
    pub udp_port: u32,
    pub max_clients: usize,
    pub crowd_ratio: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: 0,
            group_id: 0,
            name: "Game Server".to_string(),
            host: "0.0.0.0".to_string(),
            tcp_port: DEFAULT_TCP_PORT as u32,
            udp_port: DEFAULT_UDP_PORT as u32,
            max_clients: MAX_CLIENTS,
            crowd_ratio: CROWD_RATIO,
        }
    }
}

impl ServerConfig {
    /// Session count at which the status escalates to crowded
    pub fn crowd_threshold(&self) -> usize {
        (self.max_clients as f64 * self.crowd_ratio) as usize
    }
}

fn in_port_range(port: u32) -> bool {
    (MIN_PORT..=MAX_PORT).contains(&port)
}

/// Returns true if another socket on this host already holds the port
pub fn is_port_occupied(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_err()
}

/// Resolves the stream port: out-of-range or occupied ports fall back to
/// `DEFAULT_TCP_PORT`. Port `0` is passed through for OS assignment.
pub fn validated_tcp_port(port: u32) -> u16 {
    if port == 0 {
        return 0;
    }

    if !in_port_range(port) {
        warn!("TCP port {} out of range, using default {}", port, DEFAULT_TCP_PORT);
        return DEFAULT_TCP_PORT;
    }

    let port = port as u16;
    if is_port_occupied(port) {
        warn!("TCP port {} is occupied, using default {}", port, DEFAULT_TCP_PORT);
        return DEFAULT_TCP_PORT;
    }

    port
}

/// Resolves the datagram port: out-of-range ports fall back to `DEFAULT_UDP_PORT`.
pub fn validated_udp_port(port: u32) -> u16 {
    if port == 0 || in_port_range(port) {
        return port as u16;
    }

    warn!("UDP port {} out of range, using default {}", port, DEFAULT_UDP_PORT);
    DEFAULT_UDP_PORT
}
