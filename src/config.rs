use std::env;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the backing store base URL.
pub const ENV_URL: &str = "BRIGADE_URL";
/// Environment variable holding the anonymous API key.
pub const ENV_ANON_KEY: &str = "BRIGADE_ANON_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
}

/// Connection settings for one backing-store project.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: String,
    pub anon_key: String,
}

impl Config {
    /// Read the connection settings from the environment. Both variables
    /// are required; a missing one is a startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var(ENV_URL).map_err(|_| ConfigError::MissingVar(ENV_URL))?;
        let anon_key = env::var(ENV_ANON_KEY).map_err(|_| ConfigError::MissingVar(ENV_ANON_KEY))?;

        Ok(Self { url, anon_key })
    }
}

/// Tuning knobs for the back-office client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// HTTP request timeout. `None` uses the reqwest default.
    pub request_timeout: Option<Duration>,
    /// Bucket holding menu item images. Must exist with public-read access.
    pub image_bucket: String,
    /// Trailing window for coalescing full-table refreshes after a burst
    /// of change notifications.
    pub refresh_debounce: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            image_bucket: "menu-images".to_string(),
            refresh_debounce: Duration::from_secs(1),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_image_bucket(mut self, bucket: &str) -> Self {
        self.image_bucket = bucket.to_string();
        self
    }

    pub fn with_refresh_debounce(mut self, window: Duration) -> Self {
        self.refresh_debounce = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.image_bucket, "menu-images");
        assert_eq!(options.refresh_debounce, Duration::from_secs(1));
    }

    #[test]
    fn from_env_reports_the_missing_variable() {
        // Serialize access to the process environment with the other env test.
        let _guard = crate::test_env_lock().lock().unwrap();
        env::remove_var(ENV_URL);
        env::remove_var(ENV_ANON_KEY);

        match Config::from_env() {
            Err(ConfigError::MissingVar(var)) => assert_eq!(var, ENV_URL),
            other => panic!("expected MissingVar, got {:?}", other),
        }
    }

    #[test]
    fn from_env_reads_both_variables() {
        let _guard = crate::test_env_lock().lock().unwrap();
        env::set_var(ENV_URL, "http://localhost:54321");
        env::set_var(ENV_ANON_KEY, "anon_key");

        let config = Config::from_env().unwrap();
        assert_eq!(config.url, "http://localhost:54321");
        assert_eq!(config.anon_key, "anon_key");

        env::remove_var(ENV_URL);
        env::remove_var(ENV_ANON_KEY);
    }
}
