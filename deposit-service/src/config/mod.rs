//! Configuration module for deposit-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DepositConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// In-memory store when absent.
    pub database: Option<DatabaseConfig>,
    pub accrual: AccrualConfig,
    pub correlator: CorrelatorConfig,
    pub treasury: TreasuryConfig,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AccrualConfig {
    pub interval: Duration,
    pub max_catch_up_iterations: u32,
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TreasuryConfig {
    pub customer_id: String,
    pub currency: String,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_catch_up_iterations: 1200,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
        }
    }
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            customer_id: "TREASURY".to_string(),
            currency: "INR".to_string(),
        }
    }
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl DepositConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let accrual_interval_secs: u64 = parsed_or("ACCRUAL_INTERVAL_SECS", 60);
        if accrual_interval_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCRUAL_INTERVAL_SECS must be greater than zero"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "deposit-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: non_empty("OTLP_ENDPOINT"),
            database: non_empty("DATABASE_URL").map(|url| DatabaseConfig {
                url,
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or("DATABASE_MIN_CONNECTIONS", 2),
            }),
            accrual: AccrualConfig {
                interval: Duration::from_secs(accrual_interval_secs),
                max_catch_up_iterations: parsed_or("ACCRUAL_MAX_CATCH_UP_ITERATIONS", 1200),
            },
            correlator: CorrelatorConfig {
                timeout: Duration::from_millis(parsed_or("CORRELATOR_TIMEOUT_MS", 5000)),
            },
            treasury: TreasuryConfig {
                customer_id: non_empty("TREASURY_CUSTOMER_ID")
                    .unwrap_or_else(|| "TREASURY".to_string()),
                currency: non_empty("TREASURY_CURRENCY").unwrap_or_else(|| "INR".to_string()),
            },
            admin_token: non_empty("ADMIN_TOKEN"),
        })
    }
}
