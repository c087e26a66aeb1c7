//! Deciding how long to wait for a surface's visual transition.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TransitionConfig;

static TIME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d.]+)(ms|s)").expect("valid duration pattern"));

/// Parse the first `<number>s` / `<number>ms` token of a CSS time list.
pub fn parse_duration(css: &str) -> Option<Duration> {
    let caps = TIME_TOKEN.captures(css)?;
    let value: f64 = caps[1].parse().ok()?;
    let millis = match &caps[2] {
        "s" => value * 1000.0,
        _ => value,
    };
    if !millis.is_finite() {
        return None;
    }
    Some(Duration::from_nanos((millis * 1_000_000.0).round() as u64))
}

/// Outcome of [`TransitionPolicy::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionWait {
    /// No meaningful transition; settle right away.
    Immediate,
    /// Wait for `transitionend`, but never longer than this.
    Bounded(Duration),
}

/// Thresholds for turning a computed duration into a [`TransitionWait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Durations at or below this are treated as no transition.
    pub min_duration: Duration,
    /// Timer used when a duration is present but unparsable.
    pub fallback: Duration,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::from(&TransitionConfig::default())
    }
}

impl From<&TransitionConfig> for TransitionPolicy {
    fn from(config: &TransitionConfig) -> Self {
        Self {
            min_duration: Duration::from_millis(config.min_duration_ms),
            fallback: Duration::from_millis(config.fallback_ms),
        }
    }
}

impl TransitionPolicy {
    pub fn plan(&self, computed: Option<&str>) -> TransitionWait {
        let Some(css) = computed.map(str::trim).filter(|s| !s.is_empty()) else {
            return TransitionWait::Immediate;
        };
        match parse_duration(css) {
            Some(d) if d <= self.min_duration => TransitionWait::Immediate,
            Some(d) => TransitionWait::Bounded(d),
            None => TransitionWait::Bounded(self.fallback),
        }
    }
}
