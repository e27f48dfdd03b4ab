use clap::Parser;
use log::{error, info};
use server::config::{ServerConfig, CROWD_RATIO, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, MAX_CLIENTS};
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Numeric server identifier reported in status responses
    #[arg(long, default_value = "0")]
    id: u32,

    /// Server group identifier reported in status responses
    #[arg(long, default_value = "0")]
    group_id: u32,

    /// Display name reported in status responses
    #[arg(short, long, default_value = "Game Server")]
    name: String,

    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port (1025-65535, otherwise the default is used; 0 picks a free port)
    #[arg(short, long, default_value_t = DEFAULT_TCP_PORT as u32)]
    tcp_port: u32,

    /// UDP port (1025-65535, otherwise the default is used; 0 picks a free port)
    #[arg(short, long, default_value_t = DEFAULT_UDP_PORT as u32)]
    udp_port: u32,

    /// Maximum number of connected clients
    #[arg(short, long, default_value_t = MAX_CLIENTS)]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        id: args.id,
        group_id: args.group_id,
        name: args.name,
        host: args.host,
        tcp_port: args.tcp_port,
        udp_port: args.udp_port,
        max_clients: args.max_clients,
        crowd_ratio: CROWD_RATIO,
    };

    info!(
        "Starting server '{}' (id {}, group {}, max {} clients)",
        config.name, config.id, config.group_id, config.max_clients
    );

    let server = Server::new(config)?;
    server.start_tcp().await?;

    // The datagram side is optional; the server keeps running on TCP alone
    if let Err(e) = server.start_udp().await {
        error!("UDP listener unavailable: {}", e);
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    server.shutdown().await;

    Ok(())
}
