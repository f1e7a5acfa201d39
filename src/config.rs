use std::time::Duration;

use tracing::warn;

use crate::polling::StatusVocabulary;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_PLAN_POLL_INTERVAL_MS: u64 = 3000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Runtime settings for the client. Read from the environment by
/// [`ClientConfig::from_env`]; every value has a working default.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    /// Interval between `/api/task-status` probes.
    pub poll_interval: Duration,
    /// Interval between travel-recommendation status probes.
    pub plan_poll_interval: Duration,
    pub task_status_vocabulary: StatusVocabulary,
    pub plan_status_vocabulary: StatusVocabulary,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            plan_poll_interval: Duration::from_millis(DEFAULT_PLAN_POLL_INTERVAL_MS),
            task_status_vocabulary: StatusVocabulary::lower(),
            plan_status_vocabulary: StatusVocabulary::upper(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: lookup("TRAVEL_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            poll_interval: millis(&lookup, "TRAVEL_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            plan_poll_interval: millis(&lookup, "TRAVEL_PLAN_POLL_INTERVAL_MS", DEFAULT_PLAN_POLL_INTERVAL_MS),
            task_status_vocabulary: vocabulary(&lookup, "TRAVEL_TASK_STATUS_CASING", defaults.task_status_vocabulary),
            plan_status_vocabulary: vocabulary(&lookup, "TRAVEL_PLAN_STATUS_CASING", defaults.plan_status_vocabulary),
            request_timeout: Duration::from_secs(number(
                &lookup,
                "TRAVEL_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("Ignoring invalid {key}={raw:?}, using {default}");
                default
            }
        },
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    Duration::from_millis(number(lookup, key, default))
}

fn vocabulary(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: StatusVocabulary,
) -> StatusVocabulary {
    match lookup(key).as_deref().map(str::trim) {
        None => default,
        Some("upper") => StatusVocabulary::upper(),
        Some("lower") => StatusVocabulary::lower(),
        Some(other) => {
            warn!("Ignoring unknown {key}={other:?}, expected 'upper' or 'lower'");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ClientConfig {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ClientConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = config(&[]);
        assert_eq!(cfg.api_url, "http://localhost:8000");
        assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
        assert_eq!(cfg.plan_poll_interval, Duration::from_millis(3000));
        assert_eq!(cfg.task_status_vocabulary, StatusVocabulary::lower());
        assert_eq!(cfg.plan_status_vocabulary, StatusVocabulary::upper());
    }

    #[test]
    fn reads_overrides_and_strips_trailing_slash() {
        let cfg = config(&[
            ("TRAVEL_API_URL", "http://api.test/"),
            ("TRAVEL_POLL_INTERVAL_MS", "250"),
            ("TRAVEL_TASK_STATUS_CASING", "upper"),
        ]);
        assert_eq!(cfg.endpoint("/api/search-flights"), "http://api.test/api/search-flights");
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.task_status_vocabulary, StatusVocabulary::upper());
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = config(&[
            ("TRAVEL_POLL_INTERVAL_MS", "soon"),
            ("TRAVEL_PLAN_POLL_INTERVAL_MS", "0"),
            ("TRAVEL_PLAN_STATUS_CASING", "mixed"),
        ]);
        assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
        assert_eq!(cfg.plan_poll_interval, Duration::from_millis(3000));
        assert_eq!(cfg.plan_status_vocabulary, StatusVocabulary::upper());
    }
}
