//! Startup configuration.
//!
//! Read once in `main` from the environment (after `dotenvy::dotenv()`).
//! Every option has a default except the database DSN and the API key.
//! Parse failures are fatal at startup; nothing re-reads the environment
//! afterwards.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BUCKET_MS: i64 = 180_000;
pub const DEFAULT_PAGES_PER_TICK: u32 = 20;
pub const DEFAULT_PAGE_SIZE: u32 = 250;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RATE_LIMIT_RPS: f64 = 2.0;
pub const DEFAULT_POLL_INTERVAL_S: u64 = 3;
pub const DEFAULT_SAFETY_DELAY_S: u64 = 5;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_HTTP_TIMEOUT_S: u64 = 30;
pub const DEFAULT_STATEMENT_TIMEOUT_S: u64 = 60;

const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone)]
pub struct Config {
    /// Snapshot bucket size Δ in milliseconds; fixed for the process lifetime.
    pub bucket_ms: i64,
    /// Hard cap on pages fetched per tick.
    pub pages_per_tick: u32,
    /// Assets per upstream page, at most 250.
    pub page_size: u32,
    /// Bounded parallelism for page fetches.
    pub concurrency: usize,
    /// Retry attempts for transient HTTP and DB failures.
    pub retries: u32,
    /// Upstream quota enforced by the token bucket.
    pub rate_limit_rps: f64,
    pub poll_interval: Duration,
    pub safety_delay: Duration,
    /// Max rows per upsert sub-batch.
    pub insert_batch_size: usize,
    pub http_timeout: Duration,
    pub statement_timeout: Duration,
    pub database_url: String,
    pub api_base_url: String,
    pub api_key: String,
    pub webhook_urls: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source. Tests inject maps here instead of
    /// mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket_ms = parse_or(&lookup, "BUCKET_MS", DEFAULT_BUCKET_MS)?;
        if bucket_ms <= 0 {
            return Err(invalid("BUCKET_MS", bucket_ms.to_string(), "must be positive"));
        }

        let page_size = parse_or(&lookup, "PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(invalid(
                "PAGE_SIZE",
                page_size.to_string(),
                "must be between 1 and 250",
            ));
        }

        let pages_per_tick = parse_or(&lookup, "PAGES_PER_TICK", DEFAULT_PAGES_PER_TICK)?;
        if pages_per_tick == 0 {
            return Err(invalid("PAGES_PER_TICK", "0".into(), "must be at least 1"));
        }

        let concurrency = parse_or(&lookup, "CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if concurrency == 0 {
            return Err(invalid("CONCURRENCY", "0".into(), "must be at least 1"));
        }

        let rate_limit_rps: f64 = parse_or(&lookup, "RATE_LIMIT_RPS", DEFAULT_RATE_LIMIT_RPS)?;
        if !rate_limit_rps.is_finite() || rate_limit_rps <= 0.0 {
            return Err(invalid(
                "RATE_LIMIT_RPS",
                rate_limit_rps.to_string(),
                "must be a positive number",
            ));
        }

        let insert_batch_size =
            parse_or(&lookup, "INSERT_BATCH_SIZE", DEFAULT_INSERT_BATCH_SIZE)?;
        if insert_batch_size == 0 {
            return Err(invalid("INSERT_BATCH_SIZE", "0".into(), "must be at least 1"));
        }

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let api_key =
            lookup("COINGECKO_API_KEY").ok_or(ConfigError::Missing("COINGECKO_API_KEY"))?;
        let api_base_url = lookup("COINGECKO_BASE_URL")
            .unwrap_or_else(|| "https://pro-api.coingecko.com/api/v3".to_string());

        let webhook_urls = lookup("WEBHOOK_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            bucket_ms,
            pages_per_tick,
            page_size,
            concurrency,
            retries: parse_or(&lookup, "RETRIES", DEFAULT_RETRIES)?,
            rate_limit_rps,
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "POLL_INTERVAL_S",
                DEFAULT_POLL_INTERVAL_S,
            )?),
            safety_delay: Duration::from_secs(parse_or(
                &lookup,
                "SAFETY_DELAY_S",
                DEFAULT_SAFETY_DELAY_S,
            )?),
            insert_batch_size,
            http_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HTTP_TIMEOUT_S",
                DEFAULT_HTTP_TIMEOUT_S,
            )?),
            statement_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STATEMENT_TIMEOUT_S",
                DEFAULT_STATEMENT_TIMEOUT_S,
            )?),
            database_url,
            api_base_url,
            api_key,
            webhook_urls,
        })
    }

    /// Tick wall-clock deadline: two full buckets.
    pub fn tick_deadline(&self) -> Duration {
        Duration::from_millis((self.bucket_ms as u64).saturating_mul(2))
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn invalid(key: &'static str, value: String, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.to_string(),
    }
}
