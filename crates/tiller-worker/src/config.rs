// Worker configuration
//
// Everything is read once at startup and passed explicitly; nothing in the
// worker consults the environment after construction.

use std::time::Duration;

use tiller_storage::ENCRYPTION_KEY_ENV;

const DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_IDEMPOTENCY_TTL_HOURS: u64 = 24;
const DEFAULT_IDEMPOTENCY_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Runtime configuration for the worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often the scheduler checks for due cron schedules
    pub schedule_check_interval: Duration,
    /// Time-to-live for idempotency records
    pub idempotency_ttl: Duration,
    /// How often expired idempotency records are swept
    pub idempotency_sweep_interval: Duration,
    /// Base64 secret-encryption key (Fernet-compatible format)
    pub encryption_key: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            schedule_check_interval: Duration::from_secs(DEFAULT_SCHEDULE_CHECK_INTERVAL_SECS),
            idempotency_ttl: Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_HOURS * 3600),
            idempotency_sweep_interval: Duration::from_secs(
                DEFAULT_IDEMPOTENCY_SWEEP_INTERVAL_SECS,
            ),
            encryption_key: None,
        }
    }
}

impl WorkerConfig {
    /// Build from environment variables (loading `.env` when present):
    /// - TILLER_SCHEDULE_CHECK_INTERVAL: seconds between scheduler ticks
    /// - TILLER_IDEMPOTENCY_TTL_HOURS: idempotency record TTL
    /// - TILLER_IDEMPOTENCY_SWEEP_INTERVAL: seconds between sweeper runs
    /// - TILLER_ENCRYPTION_KEY: base64 secret-encryption key
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            schedule_check_interval: env_secs("TILLER_SCHEDULE_CHECK_INTERVAL")
                .unwrap_or(defaults.schedule_check_interval),
            idempotency_ttl: env_parse::<u64>("TILLER_IDEMPOTENCY_TTL_HOURS")
                .map(|hours| Duration::from_secs(hours * 3600))
                .unwrap_or(defaults.idempotency_ttl),
            idempotency_sweep_interval: env_secs("TILLER_IDEMPOTENCY_SWEEP_INTERVAL")
                .unwrap_or(defaults.idempotency_sweep_interval),
            encryption_key: std::env::var(ENCRYPTION_KEY_ENV).ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}
