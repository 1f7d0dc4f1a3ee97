//! Alert Manager Implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{AlertError, AlertSink, DrowsinessAlert};

const HOUR: Duration = Duration::from_secs(3600);

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum capture time between two delivered alerts (seconds, 0 = every frame)
    pub cooldown_secs: f64,
    /// Maximum alerts per hour of capture time before throttling
    pub max_alerts_per_hour: Option<usize>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 0.0,
            max_alerts_per_hour: None,
        }
    }
}

impl AlertConfig {
    /// Reject a cooldown that is negative, not a number, or too long to
    /// represent as a duration
    pub fn validate(&self) -> Result<(), AlertError> {
        Duration::try_from_secs_f64(self.cooldown_secs)
            .map(|_| ())
            .map_err(|_| {
                AlertError::InvalidConfiguration(format!(
                    "cooldown_secs must be a non-negative number of seconds, got {}",
                    self.cooldown_secs
                ))
            })
    }
}

/// Alert manager for deduplication and throttling.
///
/// Works on capture timestamps, so replaying a recording suppresses the same
/// alerts as the live run did.
#[derive(Debug)]
pub struct AlertManager {
    config: AlertConfig,
    cooldown: Duration,
    last_fired: Option<Duration>,
    hour_start: Option<Duration>,
    hourly_count: usize,
    fired: u64,
    suppressed: u64,
}

impl AlertManager {
    /// Create a new alert manager
    pub fn new(config: AlertConfig) -> Self {
        info!("Creating alert manager with config: {:?}", config);
        // Unvalidated configs: an out-of-range cooldown never expires
        let cooldown = match Duration::try_from_secs_f64(config.cooldown_secs) {
            Ok(cooldown) => cooldown,
            Err(_) if config.cooldown_secs > 0.0 => Duration::MAX,
            Err(_) => Duration::ZERO,
        };
        Self {
            config,
            cooldown,
            last_fired: None,
            hour_start: None,
            hourly_count: 0,
            fired: 0,
            suppressed: 0,
        }
    }

    /// Check whether an alert raised at `now` should be delivered
    pub fn should_fire(&mut self, now: Duration) -> bool {
        // Reset hourly counter if needed
        let hour_start = *self.hour_start.get_or_insert(now);
        if now.saturating_sub(hour_start) >= HOUR {
            self.hourly_count = 0;
            self.hour_start = Some(now);
        }

        if let Some(max) = self.config.max_alerts_per_hour {
            if self.hourly_count >= max {
                warn!("Alert throttled: max alerts per hour reached");
                return false;
            }
        }

        if let Some(last) = self.last_fired {
            if now.saturating_sub(last) < self.cooldown {
                debug!("Alert suppressed: in cooldown period");
                return false;
            }
        }

        true
    }

    /// Record that an alert was fired at `now`
    pub fn record_fire(&mut self, now: Duration) {
        self.hourly_count += 1;
        self.fired += 1;
        self.last_fired = Some(now);
    }

    /// Deliver `alert` to `sink` unless it is suppressed. Returns whether it
    /// was delivered.
    pub fn dispatch<S: AlertSink + ?Sized>(&mut self, alert: &DrowsinessAlert, sink: &S) -> bool {
        if !self.should_fire(alert.timestamp) {
            self.suppressed += 1;
            return false;
        }
        sink.notify(alert);
        self.record_fire(alert.timestamp);
        true
    }

    /// Alerts delivered so far
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Alerts dropped by cooldown or throttling
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Get hourly alert count
    pub fn hourly_count(&self) -> usize {
        self.hourly_count
    }

    /// Clear all alert states
    pub fn clear(&mut self) {
        self.last_fired = None;
        self.hour_start = None;
        self.hourly_count = 0;
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}
