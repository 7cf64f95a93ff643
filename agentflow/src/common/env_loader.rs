//! Prefixed environment variable loading
//!
//! Every engine setting can be overridden by an `AGENTFLOW_<NAME>` variable.
//! Values that fail to parse fall back to the supplied default and are logged.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Reads environment variables that share a common prefix
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a loader for variables named `<prefix>_<suffix>`
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Full variable name for a suffix
    pub fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Load a string value with default
    pub fn load_string(&self, suffix: &str, default: &str) -> String {
        env::var(self.key(suffix)).unwrap_or_else(|_| default.to_string())
    }

    /// Load a parsed value, keeping `default` when the variable is missing or malformed
    pub fn load_parsed<T>(&self, suffix: &str, default: T) -> T
    where
        T: FromStr,
    {
        match self.load_optional(suffix) {
            Some(value) => value,
            None => default,
        }
    }

    /// Load an optional parsed value
    pub fn load_optional<T>(&self, suffix: &str) -> Option<T>
    where
        T: FromStr,
    {
        let key = self.key(suffix);
        let raw = env::var(&key).ok()?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring unparsable value '{}' for {}", raw, key);
                None
            }
        }
    }

    /// Load a duration expressed in milliseconds; `0` disables it
    pub fn load_duration_ms(&self, suffix: &str, default: Option<Duration>) -> Option<Duration> {
        match self.load_optional::<u64>(suffix) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_parsed_with_prefix() {
        let loader = EnvLoader::new("AGENTFLOW_TEST");
        env::remove_var("AGENTFLOW_TEST_LIMIT");
        assert_eq!(loader.load_parsed("LIMIT", 7usize), 7);

        env::set_var("AGENTFLOW_TEST_LIMIT", "42");
        assert_eq!(loader.load_parsed("LIMIT", 7usize), 42);

        env::set_var("AGENTFLOW_TEST_LIMIT", "many");
        assert_eq!(loader.load_parsed("LIMIT", 7usize), 7);

        env::remove_var("AGENTFLOW_TEST_LIMIT");
    }

    #[test]
    #[serial]
    fn test_load_duration_ms() {
        let loader = EnvLoader::new("AGENTFLOW_TEST");
        env::set_var("AGENTFLOW_TEST_WAIT_MS", "1500");
        assert_eq!(
            loader.load_duration_ms("WAIT_MS", None),
            Some(Duration::from_millis(1500))
        );

        env::set_var("AGENTFLOW_TEST_WAIT_MS", "0");
        assert_eq!(
            loader.load_duration_ms("WAIT_MS", Some(Duration::from_secs(1))),
            None
        );

        env::remove_var("AGENTFLOW_TEST_WAIT_MS");
        assert_eq!(
            loader.load_duration_ms("WAIT_MS", Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    #[serial]
    fn test_load_string() {
        let loader = EnvLoader::new("AGENTFLOW_TEST");
        env::remove_var("AGENTFLOW_TEST_NAME");
        assert_eq!(loader.load_string("NAME", "fallback"), "fallback");
        env::set_var("AGENTFLOW_TEST_NAME", "custom");
        assert_eq!(loader.load_string("NAME", "fallback"), "custom");
        env::remove_var("AGENTFLOW_TEST_NAME");
    }
}
