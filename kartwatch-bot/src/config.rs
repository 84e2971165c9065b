use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::client::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_TRIES, Knocker};

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    /// Env: DATABASE_PATH (default: "kartwatch.db")
    pub database_path: String,

    /// Discord API Token
    /// Env: DISCORD_TOKEN (optional here, the bot refuses to start without it)
    pub discord_token: Option<String>,

    /// Time between two polls of every watched server
    /// Env: POLL_INTERVAL_SECS (default: 30)
    pub poll_interval: Duration,

    /// Asks sent to a server before giving up on it for this cycle
    /// Env: KNOCK_TRIES (default: 5)
    pub knock_tries: u32,

    /// How long one ask waits for its answer
    /// Env: KNOCK_TIMEOUT_MS (default: 5000)
    pub knock_timeout: Duration,

    /// How long the status command waits for a server that has no data yet
    /// Env: REFRESH_WAIT_SECS (default: 10)
    pub refresh_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            discord_token: var("DISCORD_TOKEN").ok(),
            poll_interval: Duration::from_secs(env_or_default(
                "POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            knock_tries: env_or_default("KNOCK_TRIES", defaults.knock_tries),
            knock_timeout: Duration::from_millis(env_or_default(
                "KNOCK_TIMEOUT_MS",
                defaults.knock_timeout.as_millis() as u64,
            )),
            refresh_wait: Duration::from_secs(env_or_default(
                "REFRESH_WAIT_SECS",
                defaults.refresh_wait.as_secs(),
            )),
        }
    }

    /// Retry policy for knocks.
    pub fn knocker(&self) -> Knocker {
        Knocker::new(self.knock_tries, self.knock_timeout)
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            database_path: "kartwatch.db".to_string(),
            discord_token: None,
            poll_interval: Duration::from_secs(30),
            knock_tries: DEFAULT_TRIES,
            knock_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            refresh_wait: Duration::from_secs(10),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
