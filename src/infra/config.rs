//! Configuration loading from TOML files
//!
//! The hysteresis factor, re-notification cool-down, grid cell floor
//! and hint cap are deliberately configuration rather than constants;
//! they are correctness tuning pending product input.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Deployment identifier used in metrics labels
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "proximity".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Exit threshold as a multiple of the region radius (anti-flapping)
    #[serde(default = "default_exit_factor")]
    pub exit_factor: f64,
    /// Seconds after an episode close before the same key may notify
    /// again; 0 disables the cool-down
    #[serde(default)]
    pub renotify_cooldown_secs: u64,
    /// Upper bound on the index query hint radius
    #[serde(default = "default_hint_cap_m")]
    pub hint_cap_m: f64,
    /// Minimum grid cell size
    #[serde(default = "default_cell_floor_m")]
    pub cell_floor_m: f64,
    /// Shard count for the dedup store
    #[serde(default = "default_dedup_shards")]
    pub dedup_shards: usize,
    /// Bounded capacity of the engine command channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exit_factor: default_exit_factor(),
            renotify_cooldown_secs: 0,
            hint_cap_m: default_hint_cap_m(),
            cell_floor_m: default_cell_floor_m(),
            dedup_shards: default_dedup_shards(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_exit_factor() -> f64 {
    1.1
}

fn default_hint_cap_m() -> f64 {
    5000.0
}

fn default_cell_floor_m() -> f64 {
    500.0
}

fn default_dedup_shards() -> usize {
    64
}

fn default_channel_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ingest_port")]
    pub port: u16,
    /// Bearer token to verified user id (UUID string)
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: default_ingest_enabled(),
            port: default_ingest_port(),
            tokens: HashMap::new(),
        }
    }
}

fn default_ingest_enabled() -> bool {
    true
}

fn default_ingest_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9464
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// File path for the notification audit trail (JSONL format)
    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { file: default_audit_file() }
    }
}

fn default_audit_file() -> String {
    "notifications.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegionsConfig {
    /// Optional JSON file of seed regions loaded at startup
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub regions: RegionsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    exit_factor: f64,
    renotify_cooldown_secs: u64,
    hint_cap_m: f64,
    cell_floor_m: f64,
    dedup_shards: usize,
    channel_capacity: usize,
    ingest_enabled: bool,
    ingest_port: u16,
    ingest_tokens: HashMap<String, String>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    audit_file: String,
    regions_file: Option<String>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        let site = if toml_config.site.id.is_empty() {
            default_site_id()
        } else {
            toml_config.site.id
        };
        let engine = toml_config.engine;
        Self {
            site_id: site,
            exit_factor: if engine.exit_factor > 0.0 { engine.exit_factor } else { default_exit_factor() },
            renotify_cooldown_secs: engine.renotify_cooldown_secs,
            hint_cap_m: if engine.hint_cap_m > 0.0 { engine.hint_cap_m } else { default_hint_cap_m() },
            cell_floor_m: if engine.cell_floor_m > 0.0 { engine.cell_floor_m } else { default_cell_floor_m() },
            dedup_shards: if engine.dedup_shards > 0 { engine.dedup_shards } else { default_dedup_shards() },
            channel_capacity: if engine.channel_capacity > 0 { engine.channel_capacity } else { default_channel_capacity() },
            ingest_enabled: toml_config.ingest.enabled,
            ingest_port: if toml_config.ingest.port > 0 { toml_config.ingest.port } else { default_ingest_port() },
            ingest_tokens: toml_config.ingest.tokens,
            metrics_interval_secs: if toml_config.metrics.interval_secs > 0 { toml_config.metrics.interval_secs } else { default_metrics_interval() },
            prometheus_port: toml_config.metrics.prometheus_port,
            audit_file: toml_config.audit.file,
            regions_file: toml_config.regions.file,
            config_file: source.to_string(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn exit_factor(&self) -> f64 {
        self.exit_factor
    }

    pub fn renotify_cooldown_secs(&self) -> u64 {
        self.renotify_cooldown_secs
    }

    pub fn hint_cap_m(&self) -> f64 {
        self.hint_cap_m
    }

    pub fn cell_floor_m(&self) -> f64 {
        self.cell_floor_m
    }

    pub fn dedup_shards(&self) -> usize {
        self.dedup_shards
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn ingest_enabled(&self) -> bool {
        self.ingest_enabled
    }

    pub fn ingest_port(&self) -> u16 {
        self.ingest_port
    }

    pub fn ingest_tokens(&self) -> &HashMap<String, String> {
        &self.ingest_tokens
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn audit_file(&self) -> &str {
        &self.audit_file
    }

    pub fn regions_file(&self) -> Option<&str> {
        self.regions_file.as_deref()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests and the sim binary
    pub fn with_exit_factor(mut self, factor: f64) -> Self {
        self.exit_factor = factor;
        self
    }

    pub fn with_renotify_cooldown_secs(mut self, secs: u64) -> Self {
        self.renotify_cooldown_secs = secs;
        self
    }

    pub fn with_hint_cap_m(mut self, cap: f64) -> Self {
        self.hint_cap_m = cap;
        self
    }
}
