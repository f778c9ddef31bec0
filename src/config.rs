use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use dotenvy::dotenv;

use crate::attendance::context::offset_from_minutes;
use crate::attendance::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    MySql,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mysql" => Ok(StoreBackend::MySql),
            other => bail!("unknown STORE_BACKEND {other:?} (expected memory or mysql)"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: String,
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub run_migrations: bool,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,
    pub log_dir: String,

    /// Admin account created at startup when both are set and the email is unknown.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_password: Option<String>,

    // Attendance
    pub default_utc_offset: FixedOffset,
    pub tx_max_attempts: u32,
    pub tx_retry_backoff: Duration,
    pub running_hours_refresh: Duration,
    pub directory_cache_ttl: Duration,
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} must be set"))
}

fn or_default<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let store_backend: StoreBackend = match env::var("STORE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => StoreBackend::Memory,
        };
        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::MySql && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=mysql");
        }

        let offset_minutes: i32 = or_default("DEFAULT_UTC_OFFSET_MINUTES", 0)?;
        let default_utc_offset = offset_from_minutes(offset_minutes)
            .with_context(|| format!("DEFAULT_UTC_OFFSET_MINUTES={offset_minutes} is out of range"))?;

        let refresh_secs: u64 = or_default("RUNNING_HOURS_REFRESH_SECS", 30)?;
        if refresh_secs == 0 {
            bail!("RUNNING_HOURS_REFRESH_SECS must be positive");
        }

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            jwt_secret: required("JWT_SECRET")?,
            store_backend,
            database_url,
            run_migrations: or_default("RUN_MIGRATIONS", true)?,
            access_token_ttl: or_default("ACCESS_TOKEN_TTL", 900)?, // default 15 min
            refresh_token_ttl: or_default("REFRESH_TOKEN_TTL", 604_800)?, // default 7 days

            rate_login_per_min: or_default("RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: or_default("RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: or_default("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),

            bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok(),
            bootstrap_admin_password: env::var("BOOTSTRAP_ADMIN_PASSWORD").ok(),

            default_utc_offset,
            tx_max_attempts: or_default("TX_MAX_ATTEMPTS", 5)?,
            tx_retry_backoff: Duration::from_millis(or_default("TX_RETRY_BACKOFF_MS", 10)?),
            running_hours_refresh: Duration::from_secs(refresh_secs),
            directory_cache_ttl: Duration::from_secs(or_default("DIRECTORY_CACHE_TTL_SECS", 300)?),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.tx_max_attempts,
            backoff: self.tx_retry_backoff,
        }
    }

    /// Settings for in-process tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_addr: "127.0.0.1:0".into(),
            jwt_secret: "test-secret".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            run_migrations: false,
            access_token_ttl: 900,
            refresh_token_ttl: 3600,
            rate_login_per_min: 60,
            rate_refresh_per_min: 30,
            rate_protected_per_min: 1000,
            api_prefix: "/api".into(),
            log_dir: "logs".into(),
            bootstrap_admin_email: None,
            bootstrap_admin_password: None,
            default_utc_offset: FixedOffset::east_opt(0).expect("zero offset"),
            tx_max_attempts: 5,
            tx_retry_backoff: Duration::ZERO,
            running_hours_refresh: Duration::from_secs(30),
            directory_cache_ttl: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!("MySQL".parse::<StoreBackend>().unwrap(), StoreBackend::MySql);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
