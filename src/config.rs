use std::time::Duration;

/// Runtime settings, read once at startup from the environment
/// (`.env` supported). Anything missing or unparsable falls back to
/// the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
    /// How long a participant may go without a heartbeat before it is
    /// eligible for eviction.
    pub idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_owned(),
            database_url: "sqlite://palaver.db?mode=rwc".to_owned(),
            sweep_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            sweep_interval: secs_var("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            idle_timeout: secs_var("IDLE_TIMEOUT_SECS", defaults.idle_timeout),
        }
    }
}

fn secs_var(key: &str, default: Duration) -> Duration {
    let Ok(raw) = dotenv::var(key) else {
        return default;
    };

    match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(err) => {
            tracing::warn!("ignoring {key}={raw}: {err}");
            default
        }
    }
}
