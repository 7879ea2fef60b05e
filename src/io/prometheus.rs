//! Prometheus metrics HTTP endpoint
//!
//! Exposes engine counters in Prometheus text format at /metrics.
//! Only monotonic totals are exported; the interval counters belong to
//! the periodic log report and are not disturbed by scrapes.

use crate::infra::metrics::Metrics;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Write one counter with a site label
fn write_counter(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format the engine counters in Prometheus text exposition format
fn format_metrics(metrics: &Metrics, site: &str) -> String {
    let totals = metrics.totals();
    let mut output = String::with_capacity(2048);

    write_counter(
        &mut output,
        "proximity_updates_total",
        "Location updates processed",
        site,
        totals.updates,
    );
    write_counter(
        &mut output,
        "proximity_notifications_total",
        "Notifications dispatched",
        site,
        totals.notifications,
    );
    write_counter(
        &mut output,
        "proximity_suppressed_total",
        "Entry signals suppressed by the dedup store",
        site,
        totals.suppressed,
    );
    write_counter(
        &mut output,
        "proximity_episodes_closed_total",
        "Entry episodes closed",
        site,
        totals.episodes_closed,
    );
    write_counter(
        &mut output,
        "proximity_invalid_updates_total",
        "Updates rejected for invalid coordinates",
        site,
        totals.invalid_updates,
    );
    write_counter(
        &mut output,
        "proximity_dedup_failures_total",
        "Dedup store failures (notifications skipped, fail closed)",
        site,
        totals.dedup_failures,
    );
    write_counter(
        &mut output,
        "proximity_persistence_failures_total",
        "Notification persistence failures",
        site,
        totals.persistence_failures,
    );
    write_counter(
        &mut output,
        "proximity_delivery_failures_total",
        "Delivery channel failures",
        site,
        totals.delivery_failures,
    );
    write_counter(
        &mut output,
        "proximity_ingest_dropped_total",
        "Updates dropped at ingress (channel full)",
        site,
        totals.ingest_dropped,
    );
    write_counter(
        &mut output,
        "proximity_ingest_rejected_total",
        "Ingress requests rejected (auth or payload)",
        site,
        totals.ingest_rejected,
    );

    output
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %port, "metrics_server_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        let site = site_id.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site = site.clone();
                                async move { handle_request(req, &metrics, &site) }
                            });
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "metrics_server_accept_failed");
                    }
                }
            }
        }
    }
}

fn handle_request<T>(
    req: Request<T>,
    metrics: &Metrics,
    site: &str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        let body = format_metrics(metrics, site);
        Ok(Response::new(Full::new(Bytes::from(body))))
    } else {
        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap_or_default())
    }
}
