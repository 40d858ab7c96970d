use std::env;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    pub checkpoint_interval: Duration,
    pub seek_debounce: Duration,
    pub retry_backoff: Duration,
    pub autoplay_delay: Duration,
    pub resume_threshold_seconds: f64,
    pub completion_ratio: f64,
    pub rewind_tolerance_seconds: f64,
    pub report_interval: Duration,
    pub autostart: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(10),
            seek_debounce: Duration::from_millis(250),
            retry_backoff: Duration::from_millis(750),
            autoplay_delay: Duration::from_secs(3),
            resume_threshold_seconds: 15.0,
            completion_ratio: 0.9,
            rewind_tolerance_seconds: 5.0,
            report_interval: Duration::from_secs(1),
            autostart: true,
        }
    }
}

impl PlaybackConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var(&lookup, "EPWATCH_CHECKPOINT_INTERVAL_SECS", positive_u64) {
            config.checkpoint_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "EPWATCH_SEEK_DEBOUNCE_MS", any_u64) {
            config.seek_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "EPWATCH_RETRY_BACKOFF_MS", any_u64) {
            config.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var(&lookup, "EPWATCH_AUTOPLAY_DELAY_SECS", any_u64) {
            config.autoplay_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "EPWATCH_RESUME_THRESHOLD_SECS", non_negative_f64) {
            config.resume_threshold_seconds = secs;
        }
        if let Some(ratio) = parse_var(&lookup, "EPWATCH_COMPLETION_RATIO", unit_ratio) {
            config.completion_ratio = ratio;
        }
        if let Some(secs) = parse_var(&lookup, "EPWATCH_REWIND_TOLERANCE_SECS", non_negative_f64) {
            config.rewind_tolerance_seconds = secs;
        }
        if let Some(ms) = parse_var(&lookup, "EPWATCH_REPORT_INTERVAL_MS", positive_u64) {
            config.report_interval = Duration::from_millis(ms);
        }
        if let Some(autostart) = parse_var(&lookup, "EPWATCH_AUTOSTART", parse_flag) {
            config.autostart = autostart;
        }

        config
    }
}

fn parse_var<F, T, P>(lookup: &F, key: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = parse(trimmed);
    if parsed.is_none() {
        warn!(key, value = trimmed, "ignoring invalid configuration value");
    }
    parsed
}

fn any_u64(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok()
}

fn positive_u64(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|value| *value > 0)
}

fn non_negative_f64(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

fn unit_ratio(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0 && *value <= 1.0)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_player_constants() {
        let config = PlaybackConfig::from_lookup(|_| None);
        assert_eq!(config, PlaybackConfig::default());
        assert_eq!(config.checkpoint_interval, Duration::from_secs(10));
        assert_eq!(config.seek_debounce, Duration::from_millis(250));
        assert_eq!(config.autoplay_delay, Duration::from_secs(3));
        assert!((config.completion_ratio - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = PlaybackConfig::from_lookup(lookup_from(&[
            ("EPWATCH_CHECKPOINT_INTERVAL_SECS", "30"),
            ("EPWATCH_AUTOPLAY_DELAY_SECS", "0"),
            ("EPWATCH_COMPLETION_RATIO", "0.95"),
            ("EPWATCH_AUTOSTART", "off"),
        ]));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(30));
        assert_eq!(config.autoplay_delay, Duration::ZERO);
        assert!((config.completion_ratio - 0.95).abs() < f64::EPSILON);
        assert!(!config.autostart);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = PlaybackConfig::from_lookup(lookup_from(&[
            ("EPWATCH_CHECKPOINT_INTERVAL_SECS", "0"),
            ("EPWATCH_COMPLETION_RATIO", "1.5"),
            ("EPWATCH_RESUME_THRESHOLD_SECS", "-3"),
            ("EPWATCH_AUTOSTART", "maybe"),
        ]));
        assert_eq!(config, PlaybackConfig::default());
    }
}
