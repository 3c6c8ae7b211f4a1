//! Session configuration.

use std::time::Duration;

use serde::Deserialize;

/// Port of the appliance's Web Services API.
pub const DEFAULT_PORT: u16 = 6794;

/// Connection settings shared by a `Session` and the jobs polled through it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    pub scheme: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Delay between two status polls of a job.
    pub job_poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 30,
            read_timeout_secs: 300,
            job_poll_interval_ms: 1000,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `HMC_SCHEME`, `HMC_PORT`, `HMC_CONNECT_TIMEOUT`,
    /// `HMC_READ_TIMEOUT` and `HMC_JOB_POLL_INTERVAL_MS`. Unparseable values
    /// are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(scheme) = lookup("HMC_SCHEME") {
            config.scheme = scheme;
        }
        if let Some(port) = lookup("HMC_PORT").and_then(|v| v.parse().ok()) {
            config.port = port;
        }
        if let Some(secs) = lookup("HMC_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = lookup("HMC_READ_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.read_timeout_secs = secs;
        }
        if let Some(ms) = lookup("HMC_JOB_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.job_poll_interval_ms = ms;
        }
        config
    }

    pub fn base_url(&self, host: &str) -> String {
        format!("{}://{host}:{}", self.scheme, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url() {
        assert_eq!(
            SessionConfig::default().base_url("fake-host"),
            "https://fake-host:6794"
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"scheme":"http","job-poll-interval-ms":10}"#).unwrap();
        assert_eq!(config.scheme, "http");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.job_poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let config = SessionConfig::from_lookup(|key| match key {
            "HMC_PORT" => Some("16794".to_string()),
            "HMC_READ_TIMEOUT" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.port, 16794);
        assert_eq!(config.read_timeout_secs, 300);
    }
}
