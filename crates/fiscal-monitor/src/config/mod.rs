use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

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
    pub provider: ProviderConfig,
    pub monitor: MonitorConfig,
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

        let base_url = env::var("INFOSIMPLES_BASE_URL")
            .unwrap_or_else(|_| ProviderConfig::DEFAULT_BASE_URL.to_string());
        let token = env::var("INFOSIMPLES_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let provider = ProviderConfig {
            base_url,
            token,
            default_timeout: Duration::from_secs(read_number("INFOSIMPLES_TIMEOUT_SECS", 60)?),
            payroll_fund_timeout: Duration::from_secs(read_number(
                "INFOSIMPLES_PAYROLL_TIMEOUT_SECS",
                120,
            )?),
        };

        let max_attempts: u32 = read_number("MONITOR_MAX_ATTEMPTS", 3)?;
        if !(1..=MonitorConfig::MAX_ATTEMPTS).contains(&max_attempts) {
            return Err(ConfigError::OutOfRange {
                var: "MONITOR_MAX_ATTEMPTS",
                min: 1,
                max: u64::from(MonitorConfig::MAX_ATTEMPTS),
            });
        }

        let monitor = MonitorConfig {
            max_attempts,
            retry_delay: Duration::from_secs(read_number("MONITOR_RETRY_DELAY_SECS", 5)?),
            rate_limit_delay: Duration::from_secs(read_number("MONITOR_RATE_LIMIT_SECS", 3)?),
            log_window: read_number("MONITOR_LOG_WINDOW", 50)?,
            stale_after: Duration::from_secs(read_number("MONITOR_STALE_AFTER_SECS", 600)?),
        };

        let longest_run = monitor.longest_run(&provider);
        if monitor.stale_after <= longest_run {
            return Err(ConfigError::StaleThresholdTooShort {
                stale_after_secs: monitor.stale_after.as_secs(),
                longest_run_secs: longest_run.as_secs(),
            });
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            provider,
            monitor,
        })
    }
}

fn read_number<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var }),
        _ => Ok(default),
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

/// Connection settings for the certificate lookup provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub default_timeout: Duration,
    pub payroll_fund_timeout: Duration,
}

impl ProviderConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.infosimples.com";
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token.as_ref().map(|token| {
            let tail: String = token
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("…{tail}")
        });
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("token", &token)
            .field("default_timeout", &self.default_timeout)
            .field("payroll_fund_timeout", &self.payroll_fund_timeout)
            .finish()
    }
}

/// Retry, pacing, and housekeeping knobs for consultations and batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub rate_limit_delay: Duration,
    pub log_window: usize,
    pub stale_after: Duration,
}

impl MonitorConfig {
    /// Hard ceiling on provider calls per consultation.
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Worst-case wall time of one consultation: every attempt hits the slowest
    /// timeout and every retry waits the full delay.
    pub fn longest_run(&self, provider: &ProviderConfig) -> Duration {
        let attempts = self.max_attempts.clamp(1, Self::MAX_ATTEMPTS);
        let slowest = provider.default_timeout.max(provider.payroll_fund_timeout);
        slowest * attempts + self.retry_delay * (attempts - 1)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(3),
            log_window: 50,
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str },
    OutOfRange { var: &'static str, min: u64, max: u64 },
    StaleThresholdTooShort { stale_after_secs: u64, longest_run_secs: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var } => {
                write!(f, "{var} must be a non-negative integer")
            }
            ConfigError::OutOfRange { var, min, max } => {
                write!(f, "{var} must be between {min} and {max}")
            }
            ConfigError::StaleThresholdTooShort {
                stale_after_secs,
                longest_run_secs,
            } => write!(
                f,
                "MONITOR_STALE_AFTER_SECS ({stale_after_secs}) must exceed the longest possible consultation ({longest_run_secs}s)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. }
            | ConfigError::StaleThresholdTooShort { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
