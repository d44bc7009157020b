//! Configuration types.
//!
//! Every section reads from the environment with sensible defaults, so a
//! bare `cargo run` against a local backend works without any setup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backend::RetryPolicy;
use crate::error::ConfigError;

/// Dialogue agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Assistant persona name used in stage instructions.
    pub name: String,
    /// Number of transcript messages handed to the reasoner per turn.
    pub history_window: usize,
    /// City assumed when a parsed address carries none.
    pub default_city: String,
    /// Token ceiling for each reasoner call.
    pub max_tokens: u32,
    /// Sampling temperature for stage reasoning (extraction always uses 0).
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Alice".to_string(),
            history_window: 20,
            default_city: "Barranquilla".to_string(),
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            name: env_or("TAXI_AGENT_NAME", defaults.name),
            history_window: env_parse("TAXI_AGENT_HISTORY_WINDOW", defaults.history_window)?,
            default_city: env_or("TAXI_AGENT_DEFAULT_CITY", defaults.default_city),
            max_tokens: env_parse("TAXI_AGENT_MAX_TOKENS", defaults.max_tokens)?,
            temperature: env_parse("TAXI_AGENT_TEMPERATURE", defaults.temperature)?,
        })
    }
}

/// Remote customer/dispatch service configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Customer, history and service-detail lookups.
    pub lookup_policy: RetryPolicy,
    pub cancel_policy: RetryPolicy,
    pub geocode_policy: RetryPolicy,
    /// Registration is not idempotent: one attempt only.
    pub registration_policy: RetryPolicy,
    pub pool_max_idle_per_host: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            lookup_policy: RetryPolicy::informational(),
            cancel_policy: RetryPolicy::informational(),
            geocode_policy: RetryPolicy::single(Duration::from_secs(15)),
            registration_policy: RetryPolicy::single(Duration::from_secs(15)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lookup_timeout = env_parse(
            "TAXI_AGENT_LOOKUP_TIMEOUT_MS",
            defaults.lookup_policy.attempt_timeout.as_millis() as u64,
        )?;
        let closing_timeout = env_parse(
            "TAXI_AGENT_CLOSING_TIMEOUT_MS",
            defaults.registration_policy.attempt_timeout.as_millis() as u64,
        )?;
        let lookup_policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(lookup_timeout),
            ..defaults.lookup_policy
        };

        Ok(Self {
            base_url: env_or("CUSTOMER_API_BASE_URL", defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            lookup_policy,
            cancel_policy: lookup_policy,
            geocode_policy: RetryPolicy::single(Duration::from_millis(closing_timeout)),
            registration_policy: RetryPolicy::single(Duration::from_millis(closing_timeout)),
            pool_max_idle_per_host: env_parse(
                "TAXI_AGENT_POOL_MAX_IDLE",
                defaults.pool_max_idle_per_host,
            )?,
        })
    }
}

/// Session usage log configuration.
#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub log_path: PathBuf,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs/token_usage.txt"),
        }
    }
}

impl UsageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            log_path: std::env::var("TAXI_AGENT_USAGE_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default().log_path),
        })
    }
}

/// HTTP server and persistence configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// libSQL file for checkpoints. `None` keeps threads in memory.
    pub db_path: Option<PathBuf>,
    /// Directory for the application log file.
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            db_path: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: env_parse("TAXI_AGENT_PORT", defaults.port)?,
            db_path: std::env::var("TAXI_AGENT_DB_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            log_dir: std::env::var("TAXI_AGENT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_informational_latency() {
        let config = BackendConfig::default();
        assert_eq!(config.lookup_policy.max_attempts, 2);
        assert_eq!(config.lookup_policy.attempt_timeout, Duration::from_secs(2));
        assert_eq!(config.registration_policy.max_attempts, 1);
        assert_eq!(
            config.registration_policy.attempt_timeout,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // SAFETY: test-only variable name not read anywhere else.
        unsafe { std::env::set_var("TAXI_AGENT_TEST_GARBAGE", "not-a-number") };
        let result: Result<u16, _> = env_parse("TAXI_AGENT_TEST_GARBAGE", 1);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("TAXI_AGENT_TEST_GARBAGE") };
    }

    #[test]
    fn env_parse_falls_back_when_unset() {
        let value: usize = env_parse("TAXI_AGENT_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }
}
