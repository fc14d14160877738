//! MJPEG relay server
//!
//! Run with: cargo run --example relay_server -- --url <SOURCE_URL> [OPTIONS]
//!
//! Examples:
//!   cargo run --example relay_server -- --url http://192.168.1.20/video.cgi
//!   cargo run --example relay_server -- --url http://cam/mjpg --username admin --password secret
//!   MJPEG_SOURCE_URL=http://cam/mjpg cargo run --example relay_server -- --bind 127.0.0.1:9000
//!
//! ## Watching
//!
//! Open http://localhost:8080/stream in a browser, or:
//!   ffplay http://localhost:8080/stream
//!
//! The camera is only contacted while at least one viewer is connected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use mjpeg_relay::{ProxyEndpoint, RelayConfig, RelayEvent, RelaySession, SourceConfig};

#[derive(Parser, Debug)]
#[command(name = "relay_server")]
#[command(about = "Relay one MJPEG camera to many HTTP viewers", long_about = None)]
struct Args {
    /// Source stream URL
    #[arg(long, env = "MJPEG_SOURCE_URL")]
    url: String,

    /// Digest username for the source
    #[arg(long, env = "MJPEG_SOURCE_USERNAME")]
    username: Option<String>,

    /// Digest password for the source
    #[arg(long, env = "MJPEG_SOURCE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// HTTP listen address
    #[arg(long, env = "MJPEG_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Route viewers connect to
    #[arg(long, env = "MJPEG_PATH", default_value = "/stream")]
    path: String,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "MJPEG_CONNECT_TIMEOUT", default_value = "10")]
    connect_timeout: u64,

    /// Seconds without upstream data before the connection is dropped (0 disables)
    #[arg(long, env = "MJPEG_IDLE_TIMEOUT", default_value = "60")]
    idle_timeout: u64,

    /// Chunks buffered per viewer before it is dropped as too slow
    #[arg(long, env = "MJPEG_VIEWER_BUFFER", default_value = "64")]
    viewer_buffer: usize,

    /// Keep viewers attached when the upstream fails
    #[arg(long, env = "MJPEG_KEEP_VIEWERS_ON_ERROR")]
    keep_viewers_on_error: bool,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        let mut source = SourceConfig::new(&self.url);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            source = source.credentials(username, password);
        }

        let mut config = RelayConfig::new(source)
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .viewer_buffer(self.viewer_buffer);

        config = if self.idle_timeout == 0 {
            config.no_idle_timeout()
        } else {
            config.idle_timeout(Duration::from_secs(self.idle_timeout))
        };

        if self.keep_viewers_on_error {
            config = config.keep_viewers_on_error();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_relay=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let session = Arc::new(RelaySession::new(args.relay_config())?);

    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RelayEvent::StreamStart { message, .. }) => println!("{}", message),
                Ok(RelayEvent::StreamStop { message }) => println!("{}", message),
                Ok(RelayEvent::Error { url, cause, .. }) => eprintln!("Error on {}: {}", url, cause),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed = missed, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = ProxyEndpoint::new(Arc::clone(&session)).router(&args.path);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;

    println!("Relaying {}", session.source_url());
    println!("Viewers: http://{}{}", args.bind, args.path);
    println!();

    let stats_session = Arc::clone(&session);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");

            // Ends every open viewer body so the server can drain
            stats_session.shutdown();

            let stats = stats_session.stats();
            println!(
                "Stats: connects={} chunks={} bytes={} repaired={} viewers={}",
                stats.upstream_connects,
                stats.chunks_relayed,
                stats.bytes_relayed,
                stats.markers_repaired,
                stats.viewers_joined,
            );
        })
        .await?;

    Ok(())
}
