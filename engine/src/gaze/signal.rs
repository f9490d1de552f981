//! Signal conditioning: outlier rejection, EMA smoothing, loss monitoring
//! and the calibration readiness gate.
//!
//! Invalid samples pass through as "no sample". They are never smoothed as
//! (0, 0) and never stand in for a position in dwell timing.

use tracing::{debug, info, warn};

use crate::config::SmoothingConfig;

// ── Samples ─────────────────────────────────────────────────

/// A screen-space point in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
}

impl GazePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: GazePoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// One estimator tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: f64,
    /// False for a dropped/failed detection.
    pub valid: bool,
}

impl GazeSample {
    pub fn new(x: f64, y: f64, timestamp_ms: f64) -> Self {
        Self {
            x,
            y,
            timestamp_ms,
            valid: true,
        }
    }

    /// A tick on which the estimator produced no position.
    pub fn lost(timestamp_ms: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            timestamp_ms,
            valid: false,
        }
    }

    /// Position if this sample carries a usable one.
    pub fn position(&self) -> Option<GazePoint> {
        if self.valid && self.x.is_finite() && self.y.is_finite() {
            Some(GazePoint::new(self.x, self.y))
        } else {
            None
        }
    }
}

// ── Smoother ────────────────────────────────────────────────

/// Outlier-rejecting exponential moving average over screen positions.
#[derive(Debug, Clone)]
pub struct GazeSmoother {
    /// Weight of the new sample: 1 = no smoothing.
    pub alpha: f64,
    /// Jump distance beyond which a sample is discarded (0 = disabled).
    pub outlier_px: f64,
    /// Consecutive rejections after which the filter re-seeds.
    pub outlier_reset_count: u32,
    last: Option<GazePoint>,
    consecutive_outliers: u32,
    /// Total samples discarded as outliers.
    pub rejected: u64,
}

impl GazeSmoother {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            alpha: config.ema_alpha.clamp(f64::EPSILON, 1.0),
            outlier_px: config.outlier_px,
            outlier_reset_count: config.outlier_reset_count,
            last: None,
            consecutive_outliers: 0,
            rejected: 0,
        }
    }

    /// Apply new parameters, keeping the current smoothed position.
    pub fn reconfigure(&mut self, config: &SmoothingConfig) {
        self.alpha = config.ema_alpha.clamp(f64::EPSILON, 1.0);
        self.outlier_px = config.outlier_px;
        self.outlier_reset_count = config.outlier_reset_count;
    }

    /// Condition one raw position. `None` in gives `None` out and leaves the
    /// filter untouched.
    pub fn update(&mut self, raw: Option<GazePoint>) -> Option<GazePoint> {
        let raw = raw?;
        let last = match self.last {
            Some(last) => last,
            None => {
                self.last = Some(raw);
                return Some(raw);
            }
        };

        if self.outlier_px > 0.0 && raw.distance_to(last) > self.outlier_px {
            self.consecutive_outliers += 1;
            if self.outlier_reset_count > 0 && self.consecutive_outliers >= self.outlier_reset_count {
                debug!(
                    x = raw.x,
                    y = raw.y,
                    "gaze relocated after {} outliers, re-seeding",
                    self.consecutive_outliers
                );
                self.consecutive_outliers = 0;
                self.last = Some(raw);
                return Some(raw);
            }
            self.rejected += 1;
            return Some(last);
        }

        self.consecutive_outliers = 0;
        let smoothed = GazePoint::new(
            self.alpha * raw.x + (1.0 - self.alpha) * last.x,
            self.alpha * raw.y + (1.0 - self.alpha) * last.y,
        );
        self.last = Some(smoothed);
        Some(smoothed)
    }

    /// Last smoothed position, for rendering only.
    pub fn last_position(&self) -> Option<GazePoint> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.consecutive_outliers = 0;
    }
}

// ── Signal monitor ──────────────────────────────────────────

/// Transition in signal availability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalStatus {
    /// First valid sample, or first valid sample after a reported loss.
    Active,
    /// No valid sample for `for_ms`.
    Lost { for_ms: f64 },
}

/// Tracks signal health and owns the calibration readiness gate.
#[derive(Debug, Clone)]
pub struct SignalMonitor {
    /// Silence after which loss is reported.
    pub no_signal_ms: f64,
    /// Any valid sample has ever been observed.
    pub signal_ready: bool,
    /// Out-of-band face detection from the estimator.
    pub face_ready: bool,
    started_ms: f64,
    last_valid_ms: Option<f64>,
    lost_reported: bool,
    /// Consecutive invalid samples.
    pub consecutive_invalid: u32,
}

impl SignalMonitor {
    pub fn new(no_signal_ms: f64, now_ms: f64) -> Self {
        Self {
            no_signal_ms,
            signal_ready: false,
            face_ready: false,
            started_ms: now_ms,
            last_valid_ms: None,
            lost_reported: false,
            consecutive_invalid: 0,
        }
    }

    /// Record whether the latest sample was valid.
    pub fn observe(&mut self, valid: bool, now_ms: f64) -> Option<SignalStatus> {
        if !valid {
            self.consecutive_invalid += 1;
            return self.tick(now_ms);
        }

        self.consecutive_invalid = 0;
        self.last_valid_ms = Some(now_ms);
        if !self.signal_ready {
            self.signal_ready = true;
            self.lost_reported = false;
            info!("gaze signal acquired");
            return Some(SignalStatus::Active);
        }
        if self.lost_reported {
            self.lost_reported = false;
            info!("gaze signal recovered");
            return Some(SignalStatus::Active);
        }
        None
    }

    /// Host tick: report loss once the silence threshold is crossed.
    pub fn tick(&mut self, now_ms: f64) -> Option<SignalStatus> {
        if self.lost_reported {
            return None;
        }
        let since = self.last_valid_ms.unwrap_or(self.started_ms);
        let silent_ms = now_ms - since;
        if silent_ms >= self.no_signal_ms {
            self.lost_reported = true;
            warn!(silent_ms, "no gaze data");
            return Some(SignalStatus::Lost { for_ms: silent_ms });
        }
        None
    }

    pub fn set_face_detected(&mut self, detected: bool) {
        if detected != self.face_ready {
            debug!(detected, "face presence changed");
        }
        self.face_ready = detected;
    }

    /// Whether calibration may start without forcing.
    pub fn gate_open(&self) -> bool {
        self.signal_ready || self.face_ready
    }

    /// Whether a loss is currently being reported.
    pub fn is_lost(&self) -> bool {
        self.lost_reported
    }

    pub fn last_valid_ms(&self) -> Option<f64> {
        self.last_valid_ms
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother(alpha: f64, outlier_px: f64) -> GazeSmoother {
        GazeSmoother::new(&SmoothingConfig {
            ema_alpha: alpha,
            outlier_px,
            outlier_reset_count: 3,
        })
    }

    fn p(x: f64, y: f64) -> Option<GazePoint> {
        Some(GazePoint::new(x, y))
    }

    #[test]
    fn test_first_sample_passes_through() {
        let mut s = smoother(0.3, 100.0);
        assert_eq!(s.update(p(500.0, 400.0)), p(500.0, 400.0));
    }

    #[test]
    fn test_ema_weighting() {
        let mut s = smoother(0.5, 0.0);
        s.update(p(0.0, 0.0));
        let out = s.update(p(100.0, 50.0)).unwrap();
        assert!((out.x - 50.0).abs() < 1e-9);
        assert!((out.y - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_one_is_passthrough() {
        let mut s = smoother(1.0, 0.0);
        s.update(p(10.0, 10.0));
        assert_eq!(s.update(p(90.0, 30.0)), p(90.0, 30.0));
    }

    #[test]
    fn test_outlier_keeps_prior_position() {
        let mut s = smoother(0.5, 100.0);
        s.update(p(500.0, 500.0));
        let prior = s.update(p(520.0, 500.0)).unwrap();

        // 400px jump: discarded, output is the prior smoothed position
        let out = s.update(p(920.0, 500.0)).unwrap();
        assert_eq!(out, prior);
        assert_eq!(s.last_position(), Some(prior));
        assert_eq!(s.rejected, 1);
    }

    #[test]
    fn test_repeated_outliers_reseed() {
        let mut s = smoother(0.5, 100.0);
        s.update(p(100.0, 100.0));
        assert_eq!(s.update(p(1500.0, 900.0)), p(100.0, 100.0));
        assert_eq!(s.update(p(1500.0, 900.0)), p(100.0, 100.0));
        // Third consecutive rejection re-seeds at the new location
        assert_eq!(s.update(p(1500.0, 900.0)), p(1500.0, 900.0));
    }

    #[test]
    fn test_missing_sample_is_not_zero() {
        let mut s = smoother(0.5, 0.0);
        s.update(p(800.0, 600.0));
        assert_eq!(s.update(None), None);
        // Filter state unaffected by the gap
        assert_eq!(s.last_position(), p(800.0, 600.0));
        let out = s.update(p(800.0, 600.0)).unwrap();
        assert_eq!(out, GazePoint::new(800.0, 600.0));
    }

    #[test]
    fn test_sample_validity() {
        assert!(GazeSample::new(1.0, 2.0, 0.0).position().is_some());
        assert!(GazeSample::lost(0.0).position().is_none());
        assert!(GazeSample::new(f64::NAN, 2.0, 0.0).position().is_none());
    }

    #[test]
    fn test_monitor_acquire_and_loss() {
        let mut m = SignalMonitor::new(3000.0, 0.0);
        assert!(!m.gate_open());

        assert_eq!(m.observe(true, 100.0), Some(SignalStatus::Active));
        assert!(m.gate_open());
        assert_eq!(m.observe(true, 130.0), None);

        assert_eq!(m.observe(false, 2000.0), None);
        assert_eq!(m.tick(3129.0), None);
        assert_eq!(m.tick(3130.0), Some(SignalStatus::Lost { for_ms: 3000.0 }));
        // Reported once
        assert_eq!(m.tick(5000.0), None);
        assert!(m.is_lost());

        assert_eq!(m.observe(true, 5100.0), Some(SignalStatus::Active));
        assert!(!m.is_lost());
    }

    #[test]
    fn test_monitor_loss_without_any_signal() {
        let mut m = SignalMonitor::new(3000.0, 1000.0);
        assert_eq!(m.tick(3999.0), None);
        assert!(matches!(m.tick(4000.0), Some(SignalStatus::Lost { .. })));
    }

    #[test]
    fn test_face_gate() {
        let mut m = SignalMonitor::new(3000.0, 0.0);
        m.set_face_detected(true);
        assert!(m.gate_open());
        assert!(!m.signal_ready);
    }
}
