use std::env;
use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
    #[error("exactly one of TOKEN_VALIDATOR_ADDR and TOKEN_SHARED_SECRET must be set")]
    AmbiguousValidator,
    #[error("unsupported bus address {0} (only mem:// is built in)")]
    UnsupportedBus(String),
    #[error("METRICS_PATH must start with '/': {0}")]
    BadMetricsPath(String),
}

/// Which token validator backend to construct at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorConfig {
    /// HMAC-signed tokens checked against a shared secret.
    Hmac { secret: String },
    /// Tokens validated by a remote service.
    Remote { base_url: String },
}

/// All runtime configuration. Every field reads from an environment
/// variable with a default; `from_env` fails on unparseable values so a
/// typo surfaces at startup instead of silently falling back.
///
/// Environment variables:
/// - `HTTP_ADDR` — gateway bind address, `[host]:port` (default `:8000`)
/// - `METRICS_PATH` — scrape path (default `/metrics`)
/// - `BUS_ADDR` — bus backend (default `mem://local`)
/// - `BUS_AUTH` — bus credential, reserved for external backends
/// - `TOKEN_VALIDATOR_ADDR` / `TOKEN_SHARED_SECRET` — exactly one required
/// - `STORE_DSN` — SQLite path (default `data/chat.db`)
/// - `UPLOAD_ENDPOINT`, `UPLOAD_BUCKET`, `UPLOAD_PUBLIC_BASE`, `UPLOAD_DIR`
/// - `READ_DEADLINE_S` (60), `WRITE_DEADLINE_S` (10), `PING_PERIOD_S` (54)
/// - `SEND_QUEUE_CAP` (256), `REG_CAP` (100), `RATE_LIMIT_UPLOADS` (10)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub metrics_path: String,
    pub bus_addr: String,
    pub bus_auth: Option<String>,
    pub validator: ValidatorConfig,
    pub store_dsn: String,
    pub upload_endpoint: Option<String>,
    pub upload_bucket: String,
    pub upload_public_base: Option<String>,
    pub upload_dir: String,
    pub read_deadline_s: u64,
    pub write_deadline_s: u64,
    pub ping_period_s: u64,
    pub send_queue_cap: usize,
    pub reg_cap: usize,
    pub rate_limit_uploads: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| ":8000".to_string());
        let (host, port) = parse_http_addr(&http_addr)?;

        let metrics_path = env::var("METRICS_PATH").unwrap_or_else(|_| "/metrics".to_string());
        if !metrics_path.starts_with('/') {
            return Err(ConfigError::BadMetricsPath(metrics_path));
        }

        let bus_addr = env::var("BUS_ADDR").unwrap_or_else(|_| "mem://local".to_string());
        if !bus_addr.starts_with("mem://") {
            return Err(ConfigError::UnsupportedBus(bus_addr));
        }

        let validator = match (
            env::var("TOKEN_VALIDATOR_ADDR").ok().filter(|s| !s.is_empty()),
            env::var("TOKEN_SHARED_SECRET").ok().filter(|s| !s.is_empty()),
        ) {
            (Some(base_url), None) => ValidatorConfig::Remote { base_url },
            (None, Some(secret)) => ValidatorConfig::Hmac { secret },
            _ => return Err(ConfigError::AmbiguousValidator),
        };

        Ok(Config {
            host,
            port,
            metrics_path,
            bus_addr,
            bus_auth: env::var("BUS_AUTH").ok().filter(|s| !s.is_empty()),
            validator,
            store_dsn: env::var("STORE_DSN").unwrap_or_else(|_| "data/chat.db".to_string()),
            upload_endpoint: env::var("UPLOAD_ENDPOINT").ok().filter(|s| !s.is_empty()),
            upload_bucket: env::var("UPLOAD_BUCKET")
                .unwrap_or_else(|_| "chat-uploads".to_string()),
            upload_public_base: env::var("UPLOAD_PUBLIC_BASE").ok().filter(|s| !s.is_empty()),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| "data/uploads".to_string()),
            read_deadline_s: env_u64("READ_DEADLINE_S", 60)?,
            write_deadline_s: env_u64("WRITE_DEADLINE_S", 10)?,
            ping_period_s: env_u64("PING_PERIOD_S", 54)?,
            send_queue_cap: env_usize("SEND_QUEUE_CAP", 256)?,
            reg_cap: env_usize("REG_CAP", 100)?,
            rate_limit_uploads: env_usize("RATE_LIMIT_UPLOADS", 10)?,
        })
    }

    /// A config suitable for tests: in-memory-ish defaults, HMAC validator,
    /// caller-supplied store path.
    pub fn for_testing(store_dsn: &str, secret: &str) -> Self {
        Config {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            metrics_path: "/metrics".to_string(),
            bus_addr: "mem://local".to_string(),
            bus_auth: None,
            validator: ValidatorConfig::Hmac {
                secret: secret.to_string(),
            },
            store_dsn: store_dsn.to_string(),
            upload_endpoint: None,
            upload_bucket: "chat-uploads".to_string(),
            upload_public_base: None,
            upload_dir: format!("{store_dsn}.uploads"),
            read_deadline_s: 60,
            write_deadline_s: 10,
            ping_period_s: 54,
            send_queue_cap: 256,
            reg_cap: 100,
            rate_limit_uploads: 10,
        }
    }
}

/// `[host]:port` — a bare `:8000` binds all interfaces.
fn parse_http_addr(addr: &str) -> Result<(IpAddr, u16), ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "HTTP_ADDR",
        value: addr.to_string(),
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    let host: IpAddr = if host.is_empty() {
        "0.0.0.0".parse().unwrap()
    } else {
        host.parse().map_err(|_| invalid())?
    };
    Ok((host, port))
}

fn env_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(val) => val.parse().map_err(|_| ConfigError::Invalid { var, value: val }),
        Err(_) => Ok(default),
    }
}

fn env_usize(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(var) {
        Ok(val) => val.parse().map_err(|_| ConfigError::Invalid { var, value: val }),
        Err(_) => Ok(default),
    }
}
