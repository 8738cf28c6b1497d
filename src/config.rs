use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

const SSL_MODES: &[&str] = &["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,
    /// Keep all state in process memory instead of PostgreSQL
    pub in_memory: bool,
}

/// Secret shipped in `config/dev.yaml`
const DEV_JWT_SECRET: &str = "dev-secret-change-me";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "wallet_ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            broker: BrokerConfig::default(),
            jwt_secret: String::new(),
            in_memory: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Budget of one request, applied as its deadline
    pub request_timeout_ms: u64,
    /// How long shutdown waits for in-flight requests
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 10_000,
            shutdown_grace_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub sslmode: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "wallet".to_string(),
            password: "wallet".to_string(),
            name: "wallet_ledger".to_string(),
            sslmode: "disable".to_string(),
            max_connections: 20,
            acquire_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Event bus addresses; empty disables publishing to the bus
    pub brokers: Vec<String>,
    /// Prepended to trigger slugs as `<prefix>.<slug>`
    pub topic_prefix: String,
}

impl AppConfig {
    /// Load `config/{env}.yaml`, then apply environment overrides.
    ///
    /// A missing file falls back to defaults.
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::load_with(env, |var| std::env::var(var).ok())
    }

    /// [`AppConfig::load`] with variables read from `lookup`
    pub fn load_with(env: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let mut config = match fs::read_to_string(&config_path) {
            Ok(content) => Self::from_yaml(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: config_path,
                    source,
                });
            }
        };
        config.apply_env(lookup)?;
        config.validate()?;
        if env != "dev" && config.jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::invalid("jwt_secret", "the dev secret is only accepted in dev"));
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from `lookup(var)`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = v
                .parse()
                .map_err(|_| ConfigError::invalid("DB_PORT", format!("not a port: {}", v)))?;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = lookup("DB_SSLMODE") {
            self.database.sslmode = v;
        }
        if let Some(v) = lookup("KAFKA_BROKERS") {
            self.broker.brokers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("DEBUG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = lookup("HTTP_PORT") {
            self.gateway.port = v
                .parse()
                .map_err(|_| ConfigError::invalid("HTTP_PORT", format!("not a port: {}", v)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SSL_MODES.contains(&self.database.sslmode.as_str()) {
            return Err(ConfigError::invalid(
                "database.sslmode",
                format!("unknown mode: {}", self.database.sslmode),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections", "must be at least 1"));
        }
        if self.gateway.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("gateway.request_timeout_ms", "must be at least 1"));
        }
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::invalid("jwt_secret", "must not be empty"));
        }
        Ok(())
    }
}
