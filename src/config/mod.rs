//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crate::error::{Error, Result};
use secrecy::SecretString;

/// How a worker picks profiles to claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStrategy {
    /// Uniform random sample over all unclaimed profiles.
    Sample,
    /// Only profiles hashed into this worker's slot, in key order.
    Partition { index: u32, count: u32 },
}

/// Which claims the startup sweep releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPolicy {
    /// Every claimed profile, regardless of age.
    All,
    /// Only claims older than the threshold.
    OlderThan(Duration),
}

impl SweepPolicy {
    /// Threshold in minutes; zero releases every claim.
    pub fn from_minutes(minutes: u64) -> Result<Self> {
        if minutes == 0 {
            return Ok(Self::All);
        }
        let secs = minutes.checked_mul(60).ok_or_else(|| {
            Error::Config(format!("stale threshold of {minutes} minutes is too large"))
        })?;
        let policy = Self::OlderThan(Duration::from_secs(secs));
        policy.cutoff(Utc::now())?;
        Ok(policy)
    }

    /// Claims made before the returned instant are stale. `None` means all.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            Self::All => Ok(None),
            Self::OlderThan(age) => chrono::Duration::from_std(*age)
                .ok()
                .and_then(|age| now.checked_sub_signed(age))
                .map(Some)
                .ok_or_else(|| Error::Config(format!("stale threshold {age:?} is out of range"))),
        }
    }
}

/// What an unclassified fetch failure resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownErrorPolicy {
    /// Back to `not_collected`, to be tried again later.
    #[default]
    Retry,
    /// Done, with status `error`.
    Terminal,
}

impl FromStr for UnknownErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "retry" => Ok(Self::Retry),
            "terminal" => Ok(Self::Terminal),
            other => Err(Error::Config(format!(
                "UNKNOWN_ERROR_POLICY must be 'retry' or 'terminal', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub ingest_url: String,
    pub ingest_token: SecretString,

    /// Request-cost ceiling before the worker rotates identity.
    pub max_cost: u32,
    /// Consecutive rate-limited fetches before the worker rotates identity.
    pub max_consecutive_rate_limits: u32,
    /// Inclusive range of the randomized delay before each fetch.
    pub sleep_range: (Duration, Duration),
    /// Pending updates that trigger a flush.
    pub batch_size: usize,
    /// Profiles requested per claim round.
    pub claim_limit: usize,
    pub sweep: SweepPolicy,
    pub claim_strategy: ClaimStrategy,
    pub unknown_error_policy: UnknownErrorPolicy,

    /// Executable that switches the network identity (e.g. a VPN script).
    /// When unset the worker exits for restart instead.
    pub rotate_command: Option<PathBuf>,
    /// TOML file replacing the built-in rate-limit indicators.
    pub rate_limit_rules: Option<PathBuf>,
    /// Service that echoes the caller's public IP, logged at startup.
    pub egress_ip_url: Option<String>,
    pub http_timeout: Duration,

    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, the container environment provides the vars.
    pub fn from_env() -> Result<Self> {
        let sleep_min: f64 = parsed_var("SLEEP_MIN_SECS", 2.0)?;
        let sleep_max: f64 = parsed_var("SLEEP_MAX_SECS", 5.0)?;
        if !(sleep_min >= 0.0 && sleep_min <= sleep_max) {
            return Err(Error::Config(format!(
                "SLEEP_MIN_SECS ({sleep_min}) must be between 0 and SLEEP_MAX_SECS ({sleep_max})"
            )));
        }
        let sleep_range = (
            secs_var("SLEEP_MIN_SECS", sleep_min)?,
            secs_var("SLEEP_MAX_SECS", sleep_max)?,
        );

        let batch_size: usize = parsed_var("BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(Error::Config("BATCH_SIZE must be at least 1".to_string()));
        }

        let sweep = SweepPolicy::from_minutes(parsed_var("STALE_CLAIM_MINUTES", 30)?)?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            ingest_url: required_var("INGEST_URL")?,
            ingest_token: SecretString::from(required_var("INGEST_TOKEN")?),
            max_cost: parsed_var("MAX_REQUESTS_PER_RESTART", 120)?,
            max_consecutive_rate_limits: parsed_var("MAX_CONSECUTIVE_RATE_LIMITS", 3)?,
            sleep_range,
            batch_size,
            claim_limit: parsed_var("CLAIM_LIMIT", 100)?,
            sweep,
            claim_strategy: claim_strategy_from_env()?,
            unknown_error_policy: parsed_var("UNKNOWN_ERROR_POLICY", UnknownErrorPolicy::Retry)?,
            rotate_command: std::env::var("ROTATE_COMMAND").ok().map(PathBuf::from),
            rate_limit_rules: std::env::var("RATE_LIMIT_RULES").ok().map(PathBuf::from),
            egress_ip_url: std::env::var("EGRESS_IP_URL").ok(),
            http_timeout: Duration::from_secs(parsed_var("HTTP_TIMEOUT_SECS", 30)?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: std::env::var("LOG_DIR").ok().map(PathBuf::from),
        })
    }

    /// Only what the operator commands (`seed`, `status`, `reset`) need.
    pub fn database_url_from_env() -> Result<SecretString> {
        Ok(SecretString::from(required_var("DATABASE_URL")?))
    }
}

fn claim_strategy_from_env() -> Result<ClaimStrategy> {
    match std::env::var("CLAIM_STRATEGY").as_deref() {
        Err(_) | Ok("sample") => Ok(ClaimStrategy::Sample),
        Ok("partition") => {
            let count: u32 = parsed_var("INSTANCE_COUNT", 1)?;
            if count == 0 {
                return Err(Error::Config("INSTANCE_COUNT must be at least 1".to_string()));
            }
            let index = match std::env::var("INSTANCE_INDEX") {
                Ok(raw) => raw.parse::<u32>().map_err(|e| {
                    Error::Config(format!("INSTANCE_INDEX is not a number ({raw}): {e}"))
                })?,
                Err(_) => {
                    let hostname = crate::model::Owner::from_env().hostname;
                    partition_slot(&hostname, count)
                }
            };
            if index >= count {
                return Err(Error::Config(format!(
                    "INSTANCE_INDEX ({index}) must be below INSTANCE_COUNT ({count})"
                )));
            }
            Ok(ClaimStrategy::Partition { index, count })
        }
        Ok(other) => Err(Error::Config(format!(
            "CLAIM_STRATEGY must be 'sample' or 'partition', got '{other}'"
        ))),
    }
}

/// Stable slot for a hostname. FNV-1a, so every build agrees.
pub fn partition_slot(hostname: &str, count: u32) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in hostname.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % u64::from(count.max(1))) as u32
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw}): {e}"))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("invalid value for {name} ({secs}): {e}")))
}
