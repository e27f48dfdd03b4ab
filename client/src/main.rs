use clap::Parser;
use client::{current_timestamp, Client};
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server TCP address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:43950")]
    server: String,

    /// Number of heartbeats to send
    #[arg(short = 'n', long, default_value = "5")]
    heartbeats: u32,

    /// Delay between heartbeats in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// Request and print the server status after the heartbeats
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = Client::connect(args.server.as_str()).await?;

    let mut last_time = None;
    for i in 0..args.heartbeats {
        let sent = current_timestamp();
        match client.heartbeat().await {
            Ok(server_time) => {
                let rtt = current_timestamp().saturating_sub(sent);
                info!("Heartbeat {}: server time {} (rtt {}ms)", i + 1, server_time, rtt);
                if let Some(previous) = last_time {
                    if server_time < previous {
                        error!("Server time went backwards: {} -> {}", previous, server_time);
                    }
                }
                last_time = Some(server_time);
            }
            Err(e) => {
                error!("Heartbeat {} failed: {}", i + 1, e);
                break;
            }
        }

        if i + 1 < args.heartbeats {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    if args.status {
        let status = client.request_status().await?;
        info!(
            "Server '{}' (id {}, group {}): {:?} at {}",
            status.name, status.id, status.group_id, status.status, status.server_time
        );
    }

    client.close().await?;
    Ok(())
}
