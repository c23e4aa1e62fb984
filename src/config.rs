use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::{collections::BTreeMap, net::SocketAddr, path::Path, time::Duration};
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::domain::{LoadId, LoadTier};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "SOLAR_HUB__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
    #[validate(nested)]
    pub history: HistoryConfig,
    #[validate(nested)]
    pub forecast: ForecastConfig,
    #[validate(nested)]
    pub interlock: InterlockConfig,
    pub loads: LoadsConfig,
    #[validate(nested)]
    pub actuation: ActuationConfig,
    #[validate(nested)]
    pub broadcast: BroadcastConfig,
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8001,
            enable_cors: false,
            cors_origins: vec!["http://localhost:3000".into()],
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the session issuer
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: "__SET_VIA_ENV__".into() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Optional directory for a daily-rolling log file
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_telemetry"))]
pub struct TelemetryConfig {
    pub base_url: String,
    pub channel_id: String,
    pub read_key: String,
    /// Samples requested per upstream fetch
    #[validate(range(min = 1, max = 8000))]
    pub batch_size: u32,
    #[validate(range(min = 1))]
    pub ttl_secs: u64,
    /// Time since the feed last produced a new sample after which the device counts as offline
    pub offline_threshold_secs: u64,
    #[validate(range(min = 1))]
    pub fetch_timeout_ms: u64,
    #[validate(range(max = 10))]
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Reported when the device does not publish a state-of-health channel
    #[validate(range(min = 0.0, max = 100.0))]
    pub nominal_soh_percent: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.thingspeak.com".into(),
            channel_id: String::new(),
            read_key: String::new(),
            batch_size: 288,
            ttl_secs: 10,
            offline_threshold_secs: 60,
            fetch_timeout_ms: 10_000,
            max_retries: 2,
            retry_backoff_ms: 250,
            nominal_soh_percent: 100.0,
        }
    }
}

impl TelemetryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.offline_threshold_secs)
    }
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn validate_telemetry(cfg: &TelemetryConfig) -> Result<(), ValidationError> {
    if cfg.offline_threshold_secs <= cfg.ttl_secs {
        return Err(ValidationError::new("offline_threshold_must_exceed_ttl"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct HistoryConfig {
    #[validate(range(min = 1, max = 100_000))]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum DecayKernel {
    #[default]
    Linear,
    Exponential { half_life_hours: f64 },
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ForecastConfig {
    /// Samples taken from the history tail
    #[validate(range(min = 1))]
    pub window: usize,
    /// Sample count that earns full confidence
    #[validate(range(min = 1))]
    pub required_samples: usize,
    #[validate(range(min = 0.01, max = 1.0))]
    pub ewma_alpha: f64,
    #[validate(range(min = 0.1))]
    pub horizon_hours: f64,
    pub decay: DecayKernel,
    /// SOC below which a discharging battery is reported as critical
    #[validate(range(min = 0.0, max = 100.0))]
    pub critical_soc_percent: f64,
    /// SOC drop between two readings that is reported as critical at any SOC
    #[validate(range(min = 0.1, max = 100.0))]
    pub fast_discharge_percent: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            window: 50,
            required_samples: 50,
            ewma_alpha: 0.3,
            horizon_hours: 24.0,
            decay: DecayKernel::Linear,
            critical_soc_percent: 20.0,
            fast_discharge_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_interlock"))]
pub struct InterlockConfig {
    #[validate(range(min = 0.0, max = 100.0))]
    pub lock_threshold: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub unlock_threshold: f64,
    #[validate(range(min = 1, max = 10_000))]
    pub event_history: usize,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        Self {
            lock_threshold: 20.0,
            unlock_threshold: 25.0,
            event_history: 100,
        }
    }
}

fn validate_interlock(cfg: &InterlockConfig) -> Result<(), ValidationError> {
    if cfg.unlock_threshold <= cfg.lock_threshold {
        return Err(ValidationError::new("unlock_threshold_must_exceed_lock_threshold"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    pub tier: LoadTier,
    /// Virtual pin written to switch the load
    pub pin: String,
    /// Virtual pin reporting the relay state, if the device exposes one
    #[serde(default)]
    pub status_pin: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct LoadsConfig(pub BTreeMap<LoadId, LoadConfig>);

impl Default for LoadsConfig {
    fn default() -> Self {
        let mut loads = BTreeMap::new();
        loads.insert(LoadId::Light, LoadConfig { tier: LoadTier::Essential, pin: "V30".into(), status_pin: Some("V0".into()) });
        loads.insert(LoadId::Fan, LoadConfig { tier: LoadTier::SemiEssential, pin: "V31".into(), status_pin: Some("V1".into()) });
        loads.insert(LoadId::Pump, LoadConfig { tier: LoadTier::NonEssential, pin: "V32".into(), status_pin: Some("V2".into()) });
        Self(loads)
    }
}

impl LoadsConfig {
    pub fn tiers(&self) -> BTreeMap<LoadId, LoadTier> {
        self.0.iter().map(|(id, l)| (*id, l.tier)).collect()
    }
    pub fn get(&self, id: LoadId) -> Option<&LoadConfig> {
        self.0.get(&id)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ActuationConfig {
    pub base_url: String,
    pub auth_token: String,
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    #[validate(range(max = 20))]
    pub max_redirects: usize,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://blynk.cloud/external/api".into(),
            auth_token: String::new(),
            timeout_ms: 5_000,
            max_redirects: 5,
        }
    }
}

impl ActuationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct BroadcastConfig {
    #[validate(range(min = 100))]
    pub tick_ms: u64,
    #[validate(range(min = 1))]
    pub send_timeout_ms: u64,
    /// How long a tick waits on a cache refresh before sending the current snapshot
    pub refresh_wait_ms: u64,
    #[validate(range(min = 1, max = 1024))]
    pub session_buffer: usize,
    pub max_sessions: Option<usize>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            tick_ms: 2_000,
            send_timeout_ms: 1_000,
            refresh_wait_ms: 500,
            session_buffer: 4,
            max_sessions: None,
        }
    }
}

impl BroadcastConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
    pub fn refresh_wait(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    #[default]
    Simulated,
    Remote,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Merge the TOML file at `path` with `SOLAR_HUB__*` environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: Config = figment.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }
}
