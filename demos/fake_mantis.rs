//! Stand-in Mantis server for trying the dispatcher locally.
//!
//! Answers status probes with the default status reply and job commands
//! with `n_years * wells` synthetic loading values, well-major.
//!
//! ```text
//! cargo run --example fake_mantis -- --port 1234 --wells 20
//! mantis-dispatch --server 127.0.0.1:1234 dispatch run.json -p 50
//! ```

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mantis_dispatch::protocol::{DEFAULT_STATUS_REQUEST, DEFAULT_STATUS_RESPONSE, TERMINATOR};

#[derive(Parser, Debug)]
#[command(name = "fake-mantis")]
#[command(about = "Minimal Mantis look-alike for local testing")]
struct Args {
    #[arg(long, default_value = "1234")]
    port: u16,

    /// Wells to report per run
    #[arg(long, default_value = "10")]
    wells: u32,
}

async fn handle(mut stream: TcpStream, wells: u32) -> std::io::Result<()> {
    let mut request = Vec::new();
    stream.read_to_end(&mut request).await?;

    if request == DEFAULT_STATUS_REQUEST {
        stream.write_all(DEFAULT_STATUS_RESPONSE).await?;
        return stream.shutdown().await;
    }

    let text = String::from_utf8_lossy(&request);
    if !text.trim_end().ends_with(TERMINATOR) {
        tracing::warn!(request = %text, "Request without terminator");
        return stream.shutdown().await;
    }
    let n_years: u32 = text
        .split_whitespace()
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    tracing::info!(n_years, wells, command = %text.trim_end(), "Job received");

    let mut body = String::new();
    for well in 0..wells {
        for year in 0..n_years {
            body.push_str(&format!("{:.4} ", 1.0 + well as f64 + year as f64 * 0.1));
        }
    }
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!(port = args.port, "Fake Mantis listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let wells = args.wells;
        tokio::spawn(async move {
            if let Err(e) = handle(stream, wells).await {
                tracing::warn!(peer = %peer, error = %e, "Connection failed");
            }
        });
    }
}
