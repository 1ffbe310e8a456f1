//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`gatehouse.toml` and friends)
//! - Environment variables (`RELAY_*`, nested keys joined with `__`)

use anyhow::{Context, Result};
use gatehouse_core::{AdmissionDelivery, ConnectionOptions, HubConfig};
use gatehouse_protocol::EnvelopeCodec;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RELAY";

/// Files searched by [`Config::load`], first match wins.
const CONFIG_PATHS: [&str; 3] = [
    "gatehouse.toml",
    "/etc/gatehouse/gatehouse.toml",
    "~/.config/gatehouse/gatehouse.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment. `production` switches logs to JSON.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Origins allowed to open connections. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Hub configuration.
    #[serde(default)]
    pub hub: HubSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Capacity of each member's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Capacity of the hub's request channel.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Delivery policy for admission traffic: `evict` or `blocking`.
    #[serde(default)]
    pub admission_delivery: AdmissionDelivery,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Room ids are drawn from `0..room_id_space`.
    #[serde(default = "default_room_id_space")]
    pub room_id_space: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_true() -> bool {
    true
}

fn default_outbound_capacity() -> usize {
    gatehouse_core::DEFAULT_OUTBOUND_CAPACITY
}

fn default_request_capacity() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    gatehouse_protocol::codec::MAX_FRAME_SIZE
}

fn default_room_id_space() -> u64 {
    1_000_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            allowed_origins: Vec::new(),
            hub: HubSection::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            request_capacity: default_request_capacity(),
            admission_delivery: AdmissionDelivery::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            room_id_space: default_room_id_space(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found plus `RELAY_*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(file.as_deref(), environment())
    }

    /// Merge an optional TOML file and an environment source over the
    /// defaults.
    fn layered(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            let name = path
                .to_str()
                .with_context(|| format!("Config path is not UTF-8: {}", path.display()))?;
            builder = builder.add_source(config::File::new(name, config::FileFormat::Toml));
        }

        let settings = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Whether this is a production deployment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Whether `origin` may open a connection.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            request_capacity: self.hub.request_capacity,
            admission_delivery: self.hub.admission_delivery,
        }
    }

    /// Per-connection settings.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            outbound_capacity: self.hub.outbound_capacity,
            codec: EnvelopeCodec::with_max_frame_size(self.limits.max_frame_size),
        }
    }
}

/// `RELAY_PORT`, `RELAY_HUB__OUTBOUND_CAPACITY`, `RELAY_ALLOWED_ORIGINS=a,b`.
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("allowed_origins")
}
