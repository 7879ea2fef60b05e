//! Proximity engine - geofence proximity-notification service
//!
//! Consumes verified location updates, matches them against active
//! geofence regions, and dispatches at-most-one notification per
//! (user, region) entry episode.
//!
//! Module structure:
//! - `domain/` - Core types (Coordinate, GeofenceRegion, LocationUpdate)
//! - `io/` - External interfaces (ingress, persistence, delivery, audit)
//! - `services/` - Business logic (Engine, Evaluator, RegionIndex, Dedup)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use proximity_engine::domain::geo::Coordinate;
use proximity_engine::domain::region::GeofenceRegion;
use proximity_engine::domain::types::{ExperienceId, RegionId, UserId};
use proximity_engine::infra::{Config, Metrics};
use proximity_engine::io::{
    start_ingest_server, AuditLog, IngestServerConfig, InMemoryNotificationStore,
    InMemoryRegionStore, LogDelivery, StaticTokenAuth,
};
use proximity_engine::services::{Engine, RegionIndex, ShardedDedupStore};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Proximity engine - geofence notification service
#[derive(Parser, Debug)]
#[command(name = "proximity-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

/// Seed region record, loaded from the optional regions JSON file
#[derive(Debug, Deserialize)]
struct SeedRegion {
    #[serde(default)]
    id: Option<Uuid>,
    experience_id: Uuid,
    lat: f64,
    lon: f64,
    radius_m: u32,
    #[serde(default = "default_seed_active")]
    active: bool,
    #[serde(default)]
    created_by: Option<Uuid>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn default_seed_active() -> bool {
    true
}

fn load_seed_regions(path: &str) -> anyhow::Result<Vec<GeofenceRegion>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read regions file {path}"))?;
    let seeds: Vec<SeedRegion> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse regions file {path}"))?;

    let mut regions = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let center = Coordinate::new(seed.lat, seed.lon)
            .map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
        if seed.radius_m == 0 {
            anyhow::bail!("{path}: radius_m must be positive");
        }
        let created_at = seed.created_at.unwrap_or_else(Utc::now);
        regions.push(GeofenceRegion {
            id: RegionId(seed.id.unwrap_or_else(Uuid::now_v7)),
            experience_id: ExperienceId(seed.experience_id),
            center,
            radius_m: seed.radius_m,
            active: seed.active,
            created_by: UserId(seed.created_by.unwrap_or_else(Uuid::now_v7)),
            created_at,
            updated_at: created_at,
        });
    }
    Ok(regions)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level configurable via RUST_LOG (default info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("proximity-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        exit_factor = %config.exit_factor(),
        renotify_cooldown_secs = %config.renotify_cooldown_secs(),
        hint_cap_m = %config.hint_cap_m(),
        cell_floor_m = %config.cell_floor_m(),
        dedup_shards = %config.dedup_shards(),
        ingest_port = %config.ingest_port(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let index = Arc::new(RegionIndex::new(config.cell_floor_m()));
    let episodes = Arc::new(ShardedDedupStore::new(
        config.dedup_shards(),
        chrono::Duration::seconds(config.renotify_cooldown_secs() as i64),
    ));

    // Persistence collaborators; in-memory for this binary, optionally
    // seeded from a regions JSON file
    let seed_regions = match config.regions_file() {
        Some(path) => load_seed_regions(path)?,
        None => Vec::new(),
    };
    if !seed_regions.is_empty() {
        info!(regions = %seed_regions.len(), "seed_regions_loaded");
    }
    let region_store = Arc::new(InMemoryRegionStore::with_regions(seed_regions));
    let notification_store = Arc::new(InMemoryNotificationStore::new());

    let delivery = Arc::new(LogDelivery::new());
    let audit = AuditLog::new(config.audit_file());

    // Engine command channel (bounded for backpressure)
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity());

    // Ingress HTTP server
    let ingest_config = IngestServerConfig {
        port: config.ingest_port(),
        enabled: config.ingest_enabled(),
    };
    let auth = Arc::new(StaticTokenAuth::from_config(&config));
    let ingest_tx = command_tx.clone();
    let ingest_metrics = metrics.clone();
    let ingest_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_ingest_server(ingest_config, auth, ingest_tx, ingest_metrics, ingest_shutdown)
                .await
        {
            tracing::error!(error = %e, "ingest server error");
        }
    });

    // Prometheus metrics server (if port > 0)
    if config.prometheus_port() > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_port = config.prometheus_port();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = proximity_engine::io::prometheus::start_metrics_server(
                prom_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    // Shutdown on Ctrl+C; dropping our command sender closes the
    // engine loop once in-flight senders finish
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
        drop(command_tx);
    });

    // Engine loop (main consumer)
    let mut engine = Engine::new(
        &config,
        index,
        episodes,
        region_store,
        notification_store,
        delivery,
        Some(audit),
        metrics,
    );
    engine.warm_up().await.context("region index warm-up failed")?;
    info!("engine_started");

    engine.run(command_rx).await;

    info!("proximity-engine shutdown complete");
    Ok(())
}
