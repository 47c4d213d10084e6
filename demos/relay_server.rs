//! RTSP to WebSocket relay server
//!
//! Run with: cargo run --example relay_server [OPTIONS] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                      # binds to 0.0.0.0:2000
//!   cargo run --example relay_server localhost            # binds to 127.0.0.1:2000
//!   cargo run --example relay_server --udp 0.0.0.0:2001   # RTSP over UDP
//!   cargo run --example relay_server --format fmp4        # fragmented MP4 output
//!
//! ## Watching a camera
//!
//! Point a WebSocket MPEG-TS player (for example JSMpeg) at:
//!   ws://localhost:2000/api/stream?url=rtsp%3A%2F%2Fcamera.local%2Fstream1
//!
//! Every browser watching the same camera shares one ffmpeg process. The
//! process stops as soon as the last browser disconnects.

use std::net::SocketAddr;
use std::time::Duration;

use rtsp_relay::{OutputFormat, RelayServer, ServerConfig, StreamOptions, Transport};

const DEFAULT_PORT: u16 = 2000;

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:2000
/// - "localhost:2001" -> 127.0.0.1:2001
/// - "127.0.0.1" -> 127.0.0.1:2000
/// - "0.0.0.0:2000" -> 0.0.0.0:2000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [OPTIONS] [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR          Address to bind to (default: 0.0.0.0:2000)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --udp              Pull RTSP over UDP instead of TCP");
    eprintln!("  --format <FORMAT>  Output format: mpegts (default), fmp4, mjpeg");
    eprintln!("  --quiet            Do not forward ffmpeg diagnostics to the log");
    eprintln!("  --max <N>          Maximum concurrent viewers (default: unlimited)");
}

struct Args {
    bind_addr: SocketAddr,
    options: StreamOptions,
    max_connections: usize,
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        options: StreamOptions::default(),
        max_connections: 0,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--udp" => args.options = args.options.transport(Transport::Udp),
            "--quiet" => args.options = args.options.verbose(false),
            "--format" => {
                let value = iter.next().ok_or("--format needs a value")?;
                let format = value.parse::<OutputFormat>()?;
                args.options = args.options.format(format);
            }
            "--max" => {
                let value = iter.next().ok_or("--max needs a value")?;
                args.max_connections = value
                    .parse()
                    .map_err(|_| format!("Invalid connection limit: '{}'", value))?;
            }
            addr => args.bind_addr = parse_bind_addr(addr)?,
        }
    }

    Ok(Some(args))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtsp_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::with_addr(args.bind_addr)
        .max_connections(args.max_connections)
        .stream_options(args.options);

    println!("Starting relay server on {}", config.bind_addr);
    println!();
    println!(
        "Connect a player to ws://{}{}?url=<rtsp-url>",
        config.bind_addr, config.path
    );
    println!();

    let server = std::sync::Arc::new(RelayServer::new(config));

    // Periodic stats
    let stats_server = std::sync::Arc::clone(&server);
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = stats_server.stats().await;
            tracing::info!(
                viewers = stats.active_connections,
                sessions = stats.active_sessions,
                launches = stats.launches,
                "Relay stats"
            );
        }
    });

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        println!("\nShutting down...");
    };

    if let Err(e) = server.run_until(shutdown).await {
        eprintln!("Server error: {}", e);
    }

    stats_task.abort();

    Ok(())
}
