//! Client configuration loaded from the environment.

use std::time::Duration;

use jobdash_observability::LogFormat;

/// Configuration for the dashboard client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the job service, without a trailing slash
    /// (e.g. `http://localhost:8080/api`).
    pub api_url: String,
    /// Delay between a fetch completing and the next scheduled fetch of the
    /// same query.
    pub poll_interval: Duration,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
    /// How long an unobserved query keeps its last value before it is
    /// garbage-collected.
    pub gc_time: Duration,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
            gc_time: Duration::from_secs(300),
            log_format: LogFormat::Json,
        }
    }
}

impl ClientConfig {
    /// Load from process environment variables, falling back to defaults.
    ///
    /// - `JOBDASH_API_URL`
    /// - `JOBDASH_POLL_INTERVAL_MS`
    /// - `JOBDASH_REQUEST_TIMEOUT_MS`
    /// - `JOBDASH_GC_TIME_MS`
    /// - `JOBDASH_LOG_FORMAT` (`json` | `pretty`)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup (used by `from_env` and tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_url = lookup("JOBDASH_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.api_url);

        Self {
            api_url: normalize_base_url(&api_url),
            poll_interval: millis_var(&lookup, "JOBDASH_POLL_INTERVAL_MS", defaults.poll_interval),
            request_timeout: millis_var(
                &lookup,
                "JOBDASH_REQUEST_TIMEOUT_MS",
                defaults.request_timeout,
            ),
            gc_time: millis_var(&lookup, "JOBDASH_GC_TIME_MS", defaults.gc_time),
            log_format: lookup("JOBDASH_LOG_FORMAT")
                .map(|v| LogFormat::from_env_value(&v))
                .unwrap_or(defaults.log_format),
        }
    }

    pub fn with_api_url(mut self, api_url: impl AsRef<str>) -> Self {
        self.api_url = normalize_base_url(api_url.as_ref());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn millis_var(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            tracing::warn!("{key}={raw:?} is not a positive integer; using {default:?}");
            default
        }
    }
}
