use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::store::{DEFAULT_BACKUP_KEEP, DEFAULT_CLEANUP_PROBABILITY};

pub const DEFAULT_DATA_PATH: &str = "data/ai-generated-content.json";
pub const DEFAULT_BUSINESS_DESCRIPTION: &str = "Modern web application";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Polling cadence for the change watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Poll interval while nothing has changed recently
    pub idle_interval: Duration,
    /// Poll interval after a change or an explicit trigger
    pub active_interval: Duration,
    /// Time without activity before Active decays back to Idle
    pub quiet_period: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(30),
            active_interval: Duration::from_secs(3),
            quiet_period: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Job submission URL; submits fail with a configuration error without it.
    pub generate_endpoint: Option<String>,
    /// Result stream URL. Derived from `generate_endpoint` when unset.
    pub stream_endpoint: Option<String>,
    pub business_description: String,
    pub data_path: PathBuf,
    pub request_timeout: Duration,
    pub watch: WatchConfig,
    pub backup_keep: usize,
    /// Chance in `[0, 1]` of rotating backups after a successful upsert.
    pub cleanup_probability: f64,
    /// Submit `<element>_custom_<field>` instead of the bare element id.
    pub scope_request_ids: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            generate_endpoint: None,
            stream_endpoint: None,
            business_description: DEFAULT_BUSINESS_DESCRIPTION.into(),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            watch: WatchConfig::default(),
            backup_keep: DEFAULT_BACKUP_KEEP,
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
            scope_request_ids: true,
        }
    }
}

impl SyncConfig {
    /// Reads the process environment on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(endpoint) = var("AI_API_ENDPOINT") {
            config.generate_endpoint = Some(endpoint);
        }
        if let Some(endpoint) = var("AI_STREAM_ENDPOINT") {
            config.stream_endpoint = Some(endpoint);
        }
        if let Some(description) = var("BUSINESS_DESCRIPTION") {
            config.business_description = description;
        }
        if let Some(path) = var("AI_DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }

        config.request_timeout = parse_secs(&var, "AI_REQUEST_TIMEOUT_SECS", config.request_timeout);
        config.watch.idle_interval = parse_secs(&var, "WATCH_IDLE_SECS", config.watch.idle_interval);
        config.watch.active_interval =
            parse_secs(&var, "WATCH_ACTIVE_SECS", config.watch.active_interval);
        config.watch.quiet_period = parse_secs(&var, "WATCH_QUIET_SECS", config.watch.quiet_period);
        config.backup_keep = parse_or(&var, "AI_BACKUP_KEEP", config.backup_keep);

        config
    }

    /// Explicit stream endpoint, or the generate endpoint with its trailing
    /// `/generate` swapped for `/stream`.
    pub fn resolved_stream_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.stream_endpoint {
            return Some(endpoint.clone());
        }
        let generate = self.generate_endpoint.as_deref()?;
        let trimmed = generate.trim_end_matches('/');
        match trimmed.strip_suffix("/generate") {
            Some(base) => Some(format!("{base}/stream")),
            None => Some(format!("{trimmed}/stream")),
        }
    }

    pub fn cleanup_probability(&self) -> f64 {
        if self.cleanup_probability.is_nan() {
            return 0.0;
        }
        self.cleanup_probability.clamp(0.0, 1.0)
    }
}

fn parse_or<T: FromStr + Copy>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("ignoring {key}={raw:?}: not a valid number");
            default
        }),
    }
}

/// Upper bound for any configured interval or timeout: one year.
const MAX_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let secs = parse_or::<f64>(var, key, default.as_secs_f64());
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if secs > 0.0 && secs <= MAX_SECS => duration,
        _ => {
            warn!("ignoring {key}={secs}: must be between 0 and {MAX_SECS} seconds");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = config_from(&[]);
        assert_eq!(config.data_path, PathBuf::from("data/ai-generated-content.json"));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.watch.active_interval, Duration::from_secs(3));
        assert_eq!(config.watch.idle_interval, Duration::from_secs(30));
        assert_eq!(config.business_description, "Modern web application");
        assert!(config.scope_request_ids);
        assert_eq!(config.resolved_stream_endpoint(), None);
    }

    #[test]
    fn stream_endpoint_is_derived_from_generate() {
        let config = config_from(&[("AI_API_ENDPOINT", "http://localhost:8000/generate")]);
        assert_eq!(
            config.resolved_stream_endpoint().as_deref(),
            Some("http://localhost:8000/stream")
        );

        let explicit = config_from(&[
            ("AI_API_ENDPOINT", "http://localhost:8000/generate"),
            ("AI_STREAM_ENDPOINT", "http://events.local/results"),
        ]);
        assert_eq!(
            explicit.resolved_stream_endpoint().as_deref(),
            Some("http://events.local/results")
        );
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("AI_REQUEST_TIMEOUT_SECS", "soon"),
            ("WATCH_ACTIVE_SECS", "0.5"),
            ("WATCH_IDLE_SECS", "-3"),
            ("AI_BACKUP_KEEP", "2"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.watch.active_interval, Duration::from_millis(500));
        assert_eq!(config.watch.idle_interval, Duration::from_secs(30));
        assert_eq!(config.backup_keep, 2);
    }

    #[test]
    fn oversized_durations_fall_back_to_defaults() {
        let config = config_from(&[
            ("WATCH_IDLE_SECS", "1e20"),
            ("WATCH_QUIET_SECS", "inf"),
            ("AI_REQUEST_TIMEOUT_SECS", "NaN"),
            ("WATCH_ACTIVE_SECS", "86400"),
        ]);
        assert_eq!(config.watch.idle_interval, Duration::from_secs(30));
        assert_eq!(config.watch.quiet_period, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.watch.active_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn cleanup_probability_is_clamped() {
        let config = SyncConfig {
            cleanup_probability: 4.0,
            ..SyncConfig::default()
        };
        assert_eq!(config.cleanup_probability(), 1.0);
    }
}
