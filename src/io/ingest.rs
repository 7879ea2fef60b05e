//! HTTP location-update ingress
//!
//! Accepts `POST /locations` with a JSON body holding either one
//! update or a batch (`{"updates": [...]}`). The user identity comes
//! from the bearer token via the auth collaborator; a client-asserted
//! user id in the body is never trusted. Updates are forwarded into
//! the bounded engine channel with `try_send`, so a slow engine
//! surfaces as 503 rather than unbounded buffering.

use crate::domain::geo::Coordinate;
use crate::domain::types::{LocationUpdate, UserId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::engine::EngineCommand;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Verified-identity lookup for incoming requests
pub trait AuthVerifier: Send + Sync {
    /// Map a bearer token to a verified user id, or reject
    fn verify(&self, token: &str) -> Option<UserId>;
}

/// Token table sourced from configuration
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuth {
    pub fn from_config(config: &Config) -> Self {
        let mut tokens = HashMap::new();
        for (token, user) in config.ingest_tokens() {
            match Uuid::parse_str(user) {
                Ok(id) => {
                    tokens.insert(token.clone(), UserId(id));
                }
                Err(_) => {
                    warn!(user = %user, "ingest_token_invalid_user_id");
                }
            }
        }
        Self { tokens }
    }

    pub fn with_token(token: &str, user_id: UserId) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(token.to_string(), user_id);
        Self { tokens }
    }
}

impl AuthVerifier for StaticTokenAuth {
    fn verify(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// Ingress configuration
#[derive(Debug, Clone)]
pub struct IngestServerConfig {
    pub port: u16,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct LocationPayload {
    lat: f64,
    lon: f64,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestBody {
    Batch { updates: Vec<LocationPayload> },
    Single(LocationPayload),
}

/// Parse a request body into validated updates for one verified user
fn parse_updates(
    body: &[u8],
    user_id: UserId,
    received_at: DateTime<Utc>,
) -> anyhow::Result<Vec<LocationUpdate>> {
    let parsed: IngestBody =
        serde_json::from_slice(body).map_err(|e| anyhow!("malformed payload: {e}"))?;
    let payloads = match parsed {
        IngestBody::Single(p) => vec![p],
        IngestBody::Batch { updates } => updates,
    };

    let mut out = Vec::with_capacity(payloads.len());
    for p in payloads {
        let coordinate = Coordinate::new(p.lat, p.lon).map_err(|e| anyhow!(e))?;
        out.push(LocationUpdate {
            user_id,
            coordinate,
            timestamp: p.timestamp.unwrap_or(received_at),
        });
    }
    Ok(out)
}

/// Start the ingress HTTP server
pub async fn start_ingest_server(
    config: IngestServerConfig,
    auth: Arc<dyn AuthVerifier>,
    command_tx: mpsc::Sender<EngineCommand>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !config.enabled {
        info!("ingest_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "ingest_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingest_shutdown");
                    return Ok(());
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let auth = auth.clone();
                        let tx = command_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                handle_request(req, auth.clone(), tx.clone(), m.clone())
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!(error = %e, "ingest_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "ingest_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    auth: Arc<dyn AuthVerifier>,
    command_tx: mpsc::Sender<EngineCommand>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/locations" {
        return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
    }

    let Some(user_id) = bearer_token(&req).and_then(|token| auth.verify(token)) else {
        metrics.record_ingest_rejected();
        return Ok(text_response(StatusCode::UNAUTHORIZED, "unauthorized"));
    };

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            metrics.record_ingest_rejected();
            debug!(error = %e, "ingest_body_read_failed");
            return Ok(text_response(StatusCode::BAD_REQUEST, "bad request"));
        }
    };

    let updates = match parse_updates(&body, user_id, Utc::now()) {
        Ok(updates) => updates,
        Err(e) => {
            metrics.record_ingest_rejected();
            metrics.record_invalid_update();
            debug!(user_id = %user_id, error = %e, "ingest_payload_rejected");
            return Ok(text_response(StatusCode::BAD_REQUEST, "bad request"));
        }
    };

    match enqueue_updates(updates, &command_tx, &metrics) {
        EnqueueOutcome::Accepted { accepted } => {
            let body = format!("{{\"accepted\":{accepted}}}");
            Ok(text_response(StatusCode::ACCEPTED, &body))
        }
        EnqueueOutcome::Busy { accepted } => {
            warn!(user_id = %user_id, accepted = %accepted, "ingest_dropped: channel full");
            // The accepted prefix is already enqueued; callers retry
            // only the tail
            let body = format!("{{\"accepted\":{accepted},\"error\":\"busy\"}}");
            Ok(text_response(StatusCode::SERVICE_UNAVAILABLE, &body))
        }
        EnqueueOutcome::Closed { accepted } => {
            warn!(accepted = %accepted, "ingest_channel_closed");
            let body = format!("{{\"accepted\":{accepted},\"error\":\"shutting down\"}}");
            Ok(text_response(StatusCode::SERVICE_UNAVAILABLE, &body))
        }
    }
}

/// Result of forwarding a batch into the engine channel
#[derive(Debug, PartialEq, Eq)]
enum EnqueueOutcome {
    /// Every update was enqueued
    Accepted { accepted: usize },
    /// The channel filled after `accepted` updates
    Busy { accepted: usize },
    /// The engine is shutting down; `accepted` updates got through
    Closed { accepted: usize },
}

fn enqueue_updates(
    updates: Vec<LocationUpdate>,
    command_tx: &mpsc::Sender<EngineCommand>,
    metrics: &Metrics,
) -> EnqueueOutcome {
    let mut accepted = 0usize;
    for update in updates {
        match command_tx.try_send(EngineCommand::Location(update)) {
            Ok(()) => accepted += 1,
            Err(TrySendError::Full(_)) => {
                metrics.record_ingest_dropped();
                return EnqueueOutcome::Busy { accepted };
            }
            Err(TrySendError::Closed(_)) => {
                return EnqueueOutcome::Closed { accepted };
            }
        }
    }
    EnqueueOutcome::Accepted { accepted }
}

fn bearer_token<T>(req: &Request<T>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn text_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
