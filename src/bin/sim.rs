//! Location-update simulator
//!
//! Walks a synthetic user along a straight line through a target
//! point, posting each step to the engine's HTTP ingress. Useful for
//! smoke-testing a locally running engine against a seeded region:
//!
//!   cargo run --bin sim -- --token dev-token --lat 0.0 --lon 0.0

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

/// Synthetic walk generator for the proximity engine ingress
#[derive(Parser, Debug)]
#[command(name = "sim", version, about)]
struct Args {
    /// Ingress address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Bearer token mapped to a user in the engine's ingest config
    #[arg(long, default_value = "dev-token")]
    token: String,

    /// Target latitude the walk passes through
    #[arg(long, default_value_t = 0.0)]
    lat: f64,

    /// Target longitude the walk passes through
    #[arg(long, default_value_t = 0.0)]
    lon: f64,

    /// Number of steps in the walk
    #[arg(long, default_value_t = 20)]
    steps: u32,

    /// Milliseconds between steps
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Half-width of the walk in degrees of longitude (~333m default)
    #[arg(long, default_value_t = 0.003)]
    span_deg: f64,
}

/// POST one location update, returning the HTTP status line
async fn post_location(
    addr: &str,
    token: &str,
    lat: f64,
    lon: f64,
) -> anyhow::Result<String> {
    let body = format!("{{\"lat\":{lat},\"lon\":{lon}}}");
    let request = format!(
        "POST /locations HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Authorization: Bearer {token}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let status_line = String::from_utf8_lossy(&response)
        .lines()
        .next()
        .unwrap_or("")
        .to_string();
    Ok(status_line)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!(
        "walking through ({}, {}) in {} steps against {}",
        args.lat, args.lon, args.steps, args.addr
    );

    // Straight west-to-east line through the target point
    for step in 0..=args.steps {
        let fraction = step as f64 / args.steps as f64;
        let lon = args.lon - args.span_deg + 2.0 * args.span_deg * fraction;

        match post_location(&args.addr, &args.token, args.lat, lon).await {
            Ok(status) => println!("step {step:>3} lon={lon:+.5} -> {status}"),
            Err(e) => println!("step {step:>3} lon={lon:+.5} -> error: {e}"),
        }

        sleep(Duration::from_millis(args.interval_ms)).await;
    }

    Ok(())
}
