//! Drowsiness accumulation over a session
//!
//! Drowsy frames are counted into a window that is cleared every
//! `reset_interval_secs`. Counts are converted to time with the capture frame
//! rate, so the window fraction is independent of how fast frames are
//! processed. Session-wide totals are kept separately for the final verdict.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::evaluator::Classification;
use crate::{DmsConfig, DmsError};

/// Window state after recording one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStatus {
    /// Drowsy frames counted in the window, this frame included
    pub drowsiness_counter: u64,
    /// `drowsiness_counter / captured_fps`
    pub drowsiness_time_secs: f64,
    /// Share of the reset interval spent drowsy
    pub drowsy_fraction: f64,
    /// `drowsy_fraction` exceeded the alert fraction
    pub alert: bool,
    /// The window was cleared after this frame was counted
    pub window_reset: bool,
}

/// End-of-session verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Alert,
    Fatigued,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Alert => f.write_str("driver was generally alert during the session"),
            Verdict::Fatigued => f.write_str("driver showed signs of fatigue during the session"),
        }
    }
}

/// Session totals and verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_drowsy_minutes: f64,
    pub session_minutes: f64,
    /// `fatigue_fraction * session_minutes`
    pub fatigue_threshold_minutes: f64,
    pub evaluated_frames: u64,
    pub drowsy_frames: u64,
    pub verdict: Verdict,
}

/// Per-session drowsiness window and totals
#[derive(Debug, Clone)]
pub struct DriverStateSession {
    captured_fps: f64,
    reset_interval: Duration,
    alert_fraction: f64,
    fatigue_fraction: f64,
    drowsiness_counter: u64,
    window_start: Option<Duration>,
    total_drowsy_frames: u64,
    evaluated_frames: u64,
    session_start: Option<Duration>,
    last_seen: Option<Duration>,
}

impl DriverStateSession {
    /// Create a new session for a stream captured at `captured_fps`
    pub fn new(captured_fps: f64, config: &DmsConfig) -> Result<Self, DmsError> {
        if !captured_fps.is_finite() || captured_fps <= 0.0 {
            return Err(DmsError::InvalidConfiguration(format!(
                "capture frame rate must be positive, got {captured_fps}"
            )));
        }
        let reset_interval = match Duration::try_from_secs_f64(config.reset_interval_secs) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => {
                return Err(DmsError::InvalidConfiguration(format!(
                    "reset_interval_secs must be a positive number of seconds, got {}",
                    config.reset_interval_secs
                )))
            }
        };

        Ok(Self {
            captured_fps,
            reset_interval,
            alert_fraction: config.alert_fraction,
            fatigue_fraction: config.fatigue_fraction,
            drowsiness_counter: 0,
            window_start: None,
            total_drowsy_frames: 0,
            evaluated_frames: 0,
            session_start: None,
            last_seen: None,
        })
    }

    /// Note that a frame was captured at `now`, whether or not it could be
    /// evaluated. Only timestamps move; no counter changes.
    pub fn observe(&mut self, now: Duration) {
        self.session_start.get_or_insert(now);
        self.window_start.get_or_insert(now);
        self.last_seen = Some(self.last_seen.map_or(now, |last| last.max(now)));
    }

    /// Record one evaluated frame.
    ///
    /// The counter is incremented first, the fraction computed, then the
    /// window is reset if the interval has elapsed. The alert decision uses
    /// the fraction computed before the reset.
    pub fn record(&mut self, now: Duration, classification: Classification) -> WindowStatus {
        self.observe(now);
        self.evaluated_frames += 1;

        if classification == Classification::Drowsy {
            self.drowsiness_counter += 1;
            self.total_drowsy_frames += 1;
        }

        let drowsiness_counter = self.drowsiness_counter;
        let drowsiness_time_secs = drowsiness_counter as f64 / self.captured_fps;
        let drowsy_fraction = drowsiness_time_secs / self.reset_interval.as_secs_f64();

        let window_start = self.window_start.unwrap_or(now);
        let window_reset = now.saturating_sub(window_start) >= self.reset_interval;
        if window_reset {
            debug!(
                "Drowsiness window reset after {} drowsy frames ({:.2}s)",
                drowsiness_counter, drowsiness_time_secs
            );
            self.drowsiness_counter = 0;
            self.window_start = Some(now);
        }

        WindowStatus {
            drowsiness_counter,
            drowsiness_time_secs,
            drowsy_fraction,
            alert: drowsy_fraction > self.alert_fraction,
            window_reset,
        }
    }

    /// Drowsy frames in the current window
    pub fn drowsiness_counter(&self) -> u64 {
        self.drowsiness_counter
    }

    pub fn captured_fps(&self) -> f64 {
        self.captured_fps
    }

    /// Totals for the whole session, from the first to the last observed frame
    pub fn summary(&self) -> SessionSummary {
        let session_minutes = match (self.session_start, self.last_seen) {
            (Some(start), Some(last)) => last.saturating_sub(start).as_secs_f64() / 60.0,
            _ => 0.0,
        };
        let total_drowsy_minutes = self.total_drowsy_frames as f64 / self.captured_fps / 60.0;
        let fatigue_threshold_minutes = self.fatigue_fraction * session_minutes;
        let verdict = if total_drowsy_minutes > fatigue_threshold_minutes {
            Verdict::Fatigued
        } else {
            Verdict::Alert
        };

        SessionSummary {
            total_drowsy_minutes,
            session_minutes,
            fatigue_threshold_minutes,
            evaluated_frames: self.evaluated_frames,
            drowsy_frames: self.total_drowsy_frames,
            verdict,
        }
    }

    /// Clear the window and totals, as for a new driver
    pub fn reset(&mut self) {
        self.drowsiness_counter = 0;
        self.window_start = None;
        self.total_drowsy_frames = 0;
        self.evaluated_frames = 0;
        self.session_start = None;
        self.last_seen = None;
    }
}
