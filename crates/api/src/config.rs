//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::Money;
use lending::{LendingConfig, LoanPeriod};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `8085`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on an in-memory demo store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `LOAN_PERIOD_MONTHS`: calendar months until a loan is due (default: `2`)
/// - `FINE_PER_DAY_CENTS`: fine per whole day overdue (default: `50`)
/// - `WORK_TIMEOUT_MS`: limit on one workflow (default: `5000`)
/// - `LOCK_TIMEOUT_MS`: limit on one row-lock wait (default: `3000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub loan_period_months: u32,
    pub fine_per_day_cents: u32,
    pub work_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            loan_period_months: parse_env("LOAN_PERIOD_MONTHS", defaults.loan_period_months),
            fine_per_day_cents: parse_env("FINE_PER_DAY_CENTS", defaults.fine_per_day_cents),
            work_timeout_ms: parse_env("WORK_TIMEOUT_MS", defaults.work_timeout_ms),
            lock_timeout_ms: parse_env("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Returns the lending rules for the engine.
    pub fn lending_config(&self) -> LendingConfig {
        LendingConfig {
            loan_period: LoanPeriod::Months(self.loan_period_months),
            fine_per_day: Money::from_cents(i64::from(self.fine_per_day_cents)),
            work_timeout: Duration::from_millis(self.work_timeout_ms),
        }
    }

    /// Returns how long a unit of work may wait for a row lock.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            database_url: None,
            database_max_connections: 5,
            loan_period_months: 2,
            fine_per_day_cents: 50,
            work_timeout_ms: 5000,
            lock_timeout_ms: 3000,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok().as_deref(), default)
}

/// Parses `raw`, keeping `default` when it is unset or malformed.
fn parse_or<T: FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
