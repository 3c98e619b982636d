//! Simple TCP relay example
//!
//! Run with: cargo run --example simple_relay <SOURCE_URL> [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_relay rtsp://192.168.1.10/stream
//!   cargo run --example simple_relay rtsp://cam1/live 127.0.0.1:9000
//!
//! ## Watching
//!
//! Every TCP client receives the 8-byte jsmp preamble followed by MPEG-TS.
//! Strip the preamble and hand the rest to any player:
//!
//!   nc localhost 8554 | tail -c +9 | ffplay -
//!
//! ffmpeg is started when the first client connects and stopped when the
//! last one leaves. Ctrl-C stops the server and reaps any stray ffmpeg.
//!
//! Set RUST_LOG=rtsp_relay=debug for lifecycle details.

use std::net::SocketAddr;

use rtsp_relay::{LaunchOptions, Relay, RelayConfig, RelayServer, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_default();
    let bind_addr: SocketAddr = match args.next().as_deref() {
        Some("localhost") => "127.0.0.1:8554".parse()?,
        Some(addr) => addr.parse()?,
        None => ServerConfig::default().bind_addr,
    };

    let relay = Relay::new(RelayConfig::default());
    let handler = relay.proxy(
        LaunchOptions::new(url)
            .additional_flags(["-q:v", "4"])
            .verbose(true),
    )?;

    let server = RelayServer::new(ServerConfig::with_addr(bind_addr), handler);
    println!("Relaying {} on tcp://{}", server.handler().key(), bind_addr);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let reaped = relay.kill_all().await?;
    println!("Stopped; reaped {} transcoder(s)", reaped.len());

    Ok(())
}
