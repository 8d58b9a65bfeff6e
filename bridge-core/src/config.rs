//! Layered configuration: a base file, an environment-specific overlay and
//! `BRIDGE_`-prefixed environment variable overrides, composed the way the
//! teacher's `NodeConfig` composes its sub-configs. `Duration`-valued fields
//! are stored as milliseconds and converted through `duration_ms_serde`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("{0}")]
    Source(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract: String,
    pub admin_key: String,
    #[serde(with = "duration_ms_serde")]
    pub call_timeout: Duration,
}

impl ChainConfig {
    fn validate(&self, name: &str, environment: Environment) -> Result<(), ConfigValidationError> {
        if self.rpc_url.is_empty() {
            return Err(ConfigValidationError::MissingField(format!(
                "{name}.rpc_url"
            )));
        }
        if self.contract.is_empty() {
            return Err(ConfigValidationError::MissingField(format!(
                "{name}.contract"
            )));
        }
        if environment == Environment::Production && self.admin_key.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: format!("{name}.admin_key"),
                reason: "admin key must not be empty in production".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    #[serde(with = "duration_ms_serde")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
    pub breaker_failure_threshold: u32,
    #[serde(with = "duration_ms_serde")]
    pub breaker_open_timeout: Duration,
    pub operation_queue_size: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2,
            breaker_failure_threshold: 5,
            breaker_open_timeout: Duration::from_secs(60),
            operation_queue_size: 3,
        }
    }
}

impl ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.operation_queue_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "operation_queue_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.backoff_multiplier < 1 {
            return Err(ConfigValidationError::InvalidValue {
                field: "backoff_multiplier".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "duration_ms_serde")]
    pub polling_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10),
        }
    }
}

impl MonitorConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        let ms = self.polling_interval.as_millis();
        if !(1_000..=60_000).contains(&ms) {
            return Err(ConfigValidationError::InvalidValue {
                field: "polling_interval_ms".into(),
                reason: "must be between 1000 and 60000".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    #[serde(with = "duration_ms_serde")]
    pub tick_interval: Duration,
    pub max_parallel_per_tick: usize,
    pub max_attempts: u32,
    #[serde(with = "duration_ms_serde")]
    pub retry_delay: Duration,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_parallel_per_tick: 5,
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub environment: Environment,
    pub log_level: String,
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    pub resilience: ResilienceConfig,
    pub monitor: MonitorConfig,
    pub relayer: RelayerConfig,
    pub server: ServerConfig,
    pub default_timelock_sec: u32,
    #[serde(with = "duration_ms_serde")]
    pub swap_retention_ttl: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: "info".to_string(),
            chain_a: ChainConfig {
                rpc_url: "http://localhost:8545".to_string(),
                contract: String::new(),
                admin_key: String::new(),
                call_timeout: Duration::from_secs(30),
            },
            chain_b: ChainConfig {
                rpc_url: "http://localhost:8000".to_string(),
                contract: String::new(),
                admin_key: String::new(),
                call_timeout: Duration::from_secs(60),
            },
            resilience: ResilienceConfig::default(),
            monitor: MonitorConfig::default(),
            relayer: RelayerConfig::default(),
            server: ServerConfig::default(),
            default_timelock_sec: 3600,
            swap_retention_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BridgeConfig {
    /// Load layered configuration: `config/default.toml` as the base, an
    /// `environment`-named overlay, then `BRIDGE_`-prefixed env overrides.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigValidationError> {
        let base = config_dir.join("default.toml");
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(base).required(false))
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            );
        let settings = builder.build()?;
        let cfg: BridgeConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.chain_a.validate("chain_a", self.environment)?;
        self.chain_b.validate("chain_b", self.environment)?;
        self.resilience.validate()?;
        self.monitor.validate()?;
        if !(300..=86_400).contains(&self.default_timelock_sec) {
            return Err(ConfigValidationError::InvalidValue {
                field: "default_timelock_sec".into(),
                reason: "must be within [300, 86400]".into(),
            });
        }
        Ok(())
    }

    /// Validate a candidate `timelock_sec` supplied in an initiate request.
    pub fn validate_timelock(timelock_sec: u32) -> Result<(), ConfigValidationError> {
        if !(300..=86_400).contains(&timelock_sec) {
            return Err(ConfigValidationError::InvalidValue {
                field: "timelock_sec".into(),
                reason: "must be within [300, 86400]".into(),
            });
        }
        Ok(())
    }
}

/// Watch `config_dir/default.toml` for modifications, signalling the
/// returned receiver on each change so the caller can reload tuning values
/// (retry/backoff/breaker parameters, polling interval) without a restart.
/// Chain endpoints and contract addresses are boot-time-only even though a
/// reload is available.
pub fn watch_config(
    config_dir: &Path,
) -> Result<(RecommendedWatcher, tokio::sync::mpsc::Receiver<()>), ConfigValidationError> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let path = config_dir.join("default.toml");

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if event.kind.is_modify() => {
                if tx.try_send(()).is_err() {
                    error!("config reload channel full or closed");
                }
            }
            Ok(_) => {}
            Err(e) => error!("config watch error: {e}"),
        },
        notify::Config::default(),
    )
    .map_err(|e| ConfigValidationError::InvalidValue {
        field: "config_dir".into(),
        reason: e.to_string(),
    })?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| ConfigValidationError::InvalidValue {
            field: "config_dir".into(),
            reason: e.to_string(),
        })?;

    info!("watching {:?} for configuration changes", path);
    Ok((watcher, rx))
}

pub fn default_config_dir() -> PathBuf {
    PathBuf::from("config")
}

mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
