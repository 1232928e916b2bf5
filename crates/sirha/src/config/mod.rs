use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::workflows::change_requests::RequestPolicy;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub requests: RequestPolicyConfig,
    pub admin: AdminBootstrapConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let response_window_days = parse_positive("SIRHA_RESPONSE_WINDOW_DAYS", 30)?;
        let default_priority = parse_positive("SIRHA_DEFAULT_PRIORITY", 1)?;
        let default_priority =
            u8::try_from(default_priority).map_err(|_| ConfigError::InvalidNumber {
                variable: "SIRHA_DEFAULT_PRIORITY",
                value: default_priority.to_string(),
            })?;

        let admin_email = env::var("SIRHA_ADMIN_EMAIL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let admin_name =
            env::var("SIRHA_ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            requests: RequestPolicyConfig {
                response_window_days,
                default_priority,
            },
            admin: AdminBootstrapConfig {
                email: admin_email,
                display_name: admin_name,
            },
        })
    }
}

fn parse_positive(variable: &'static str, default: i64) -> Result<i64, ConfigError> {
    let raw = match env::var(variable) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            variable,
            value: raw,
        }),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Deadline window and starting priority for new requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicyConfig {
    pub response_window_days: i64,
    pub default_priority: u8,
}

impl From<&RequestPolicyConfig> for RequestPolicy {
    fn from(config: &RequestPolicyConfig) -> Self {
        RequestPolicy::new(config.response_window_days, config.default_priority)
    }
}

/// Administrator account seeded once at startup, if configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminBootstrapConfig {
    pub email: Option<String>,
    pub display_name: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a positive integer (got '{value}')")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
