//! Edge-zone dwell scrolling.
//!
//! Classifies each conditioned gaze point into the top, bottom or right edge
//! band of the viewport and fires a scroll once the same zone has been held
//! for the dwell threshold. Fires repeat once per cooldown while the gaze
//! stays in the zone.

use tracing::debug;

use crate::action::ScrollDirection;
use crate::config::{DwellConfig, ViewportConfig, ZonesConfig};

// ── Viewport ───────────────────────────────────────────────

/// Pixel size of the consuming surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl From<&ViewportConfig> for Viewport {
    fn from(c: &ViewportConfig) -> Self {
        Self::new(c.width, c.height)
    }
}

/// Which directions the host document can still scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollLimits {
    pub up: bool,
    pub down: bool,
    pub right: bool,
}

impl Default for ScrollLimits {
    fn default() -> Self {
        Self {
            up: true,
            down: true,
            right: true,
        }
    }
}

impl ScrollLimits {
    pub fn allows(&self, direction: ScrollDirection) -> bool {
        match direction {
            ScrollDirection::Up => self.up,
            ScrollDirection::Down => self.down,
            ScrollDirection::Right => self.right,
        }
    }
}

// ── State ──────────────────────────────────────────────────

/// Dwell bookkeeping for the active zone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneState {
    pub active_zone: Option<ScrollDirection>,
    pub zone_entered_at: f64,
    pub last_fired_at: Option<f64>,
}

/// Repeat-fire dwell engine over the three edge zones.
pub struct ZoneDwellEngine {
    pub zones: ZonesConfig,
    pub dwell_ms: f64,
    pub cooldown_ms: f64,
    pub viewport: Viewport,
    pub limits: ScrollLimits,
    state: ZoneState,
    /// Fires withheld because the document could not scroll further.
    pub suppressed: u64,
}

impl ZoneDwellEngine {
    pub fn new(zones: &ZonesConfig, dwell: &DwellConfig, viewport: Viewport) -> Self {
        Self {
            zones: zones.clone(),
            dwell_ms: dwell.threshold_ms as f64,
            cooldown_ms: dwell.cooldown_ms as f64,
            viewport,
            limits: ScrollLimits::default(),
            state: ZoneState::default(),
            suppressed: 0,
        }
    }

    /// Apply new thresholds and geometry. Dwell state is kept.
    pub fn reconfigure(&mut self, zones: &ZonesConfig, dwell: &DwellConfig) {
        self.zones = zones.clone();
        self.dwell_ms = dwell.threshold_ms as f64;
        self.cooldown_ms = dwell.cooldown_ms as f64;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_limits(&mut self, limits: ScrollLimits) {
        self.limits = limits;
    }

    /// Height of the top and bottom bands in pixels.
    pub fn band_heights(&self) -> (f64, f64) {
        let z = &self.zones;
        let clamp = |px: f64| px.max(z.min_zone_px).min(z.max_zone_px);
        match z.height_fraction {
            Some(f) => {
                let h = clamp(f * self.viewport.height);
                (h, h)
            }
            None => (clamp(z.top_px), clamp(z.bottom_px)),
        }
    }

    /// Zone under a point. Corners resolve to the vertical zone.
    pub fn classify(&self, x: f64, y: f64) -> Option<ScrollDirection> {
        let (top, bottom) = self.band_heights();
        if y <= top {
            Some(ScrollDirection::Up)
        } else if y >= self.viewport.height - bottom {
            Some(ScrollDirection::Down)
        } else if x >= self.viewport.width - self.zones.right_px {
            Some(ScrollDirection::Right)
        } else {
            None
        }
    }

    /// Feed one conditioned point. Returns the direction to scroll, if any.
    pub fn on_sample(&mut self, x: f64, y: f64, now_ms: f64) -> Option<ScrollDirection> {
        let zone = self.classify(x, y);
        self.on_zone(zone, now_ms)
    }

    /// Feed an already-classified zone. `None` covers both the neutral area
    /// and ticks with no usable sample.
    pub fn on_zone(&mut self, zone: Option<ScrollDirection>, now_ms: f64) -> Option<ScrollDirection> {
        if zone != self.state.active_zone {
            debug!(
                from = self.state.active_zone.map(|z| z.as_str()),
                to = zone.map(|z| z.as_str()),
                "zone changed"
            );
            self.state.active_zone = zone;
            self.state.zone_entered_at = now_ms;
            return None;
        }

        let direction = zone?;
        if now_ms - self.state.zone_entered_at < self.dwell_ms {
            return None;
        }
        if let Some(last) = self.state.last_fired_at {
            if now_ms - last < self.cooldown_ms {
                return None;
            }
        }
        if !self.limits.allows(direction) {
            self.suppressed += 1;
            return None;
        }

        self.state.last_fired_at = Some(now_ms);
        debug!(direction = direction.as_str(), now_ms, "zone fired");
        Some(direction)
    }

    /// Drop any in-progress dwell. Cooldown history is kept.
    pub fn reset(&mut self, now_ms: f64) {
        self.state.active_zone = None;
        self.state.zone_entered_at = now_ms;
    }

    pub fn state(&self) -> &ZoneState {
        &self.state
    }

    /// Fraction of the dwell threshold elapsed in the active zone, 0..1.
    pub fn dwell_progress(&self, now_ms: f64) -> f64 {
        if self.state.active_zone.is_none() || self.dwell_ms <= 0.0 {
            return 0.0;
        }
        ((now_ms - self.state.zone_entered_at) / self.dwell_ms).clamp(0.0, 1.0)
    }

    /// Generate IPC zone status s-expression.
    pub fn status_sexp(&self, now_ms: f64) -> String {
        let (top, bottom) = self.band_heights();
        format!(
            "(:zone {} :progress {:.2} :top-px {:.0} :bottom-px {:.0} :right-px {:.0} :suppressed {})",
            self.state
                .active_zone
                .map(|z| format!(":{}", z.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.dwell_progress(now_ms),
            top,
            bottom,
            self.zones.right_px,
            self.suppressed,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dwell: u64, cooldown: u64) -> ZoneDwellEngine {
        let zones = ZonesConfig {
            top_px: 120.0,
            bottom_px: 120.0,
            right_px: 80.0,
            min_zone_px: 60.0,
            max_zone_px: 180.0,
            height_fraction: None,
        };
        let dwell = DwellConfig {
            threshold_ms: dwell,
            cooldown_ms: cooldown,
        };
        ZoneDwellEngine::new(&zones, &dwell, Viewport::new(1920.0, 1080.0))
    }

    #[test]
    fn test_classification_and_precedence() {
        let e = engine(500, 250);
        assert_eq!(e.classify(500.0, 120.0), Some(ScrollDirection::Up));
        assert_eq!(e.classify(500.0, 121.0), None);
        assert_eq!(e.classify(500.0, 960.0), Some(ScrollDirection::Down));
        assert_eq!(e.classify(1840.0, 500.0), Some(ScrollDirection::Right));
        assert_eq!(e.classify(960.0, 540.0), None);
        // Corners resolve to vertical
        assert_eq!(e.classify(1900.0, 10.0), Some(ScrollDirection::Up));
        assert_eq!(e.classify(1900.0, 1070.0), Some(ScrollDirection::Down));
    }

    #[test]
    fn test_band_heights_clamped() {
        let mut e = engine(500, 250);
        e.zones.height_fraction = Some(0.12);
        e.set_viewport(Viewport::new(800.0, 300.0));
        // 36px clamps up to the minimum
        assert_eq!(e.band_heights(), (60.0, 60.0));
        e.set_viewport(Viewport::new(3840.0, 2160.0));
        // 259px clamps down to the maximum
        assert_eq!(e.band_heights(), (180.0, 180.0));
    }

    #[test]
    fn test_scenario_fire_cooldown_refire() {
        let mut e = engine(500, 250);
        let mut fired = Vec::new();
        for t in (0..=900).step_by(100) {
            if let Some(d) = e.on_sample(960.0, 50.0, t as f64) {
                fired.push((t, d));
            }
        }
        assert_eq!(fired[0], (500, ScrollDirection::Up));
        assert!(!fired.iter().any(|(t, _)| *t == 600 || *t == 700));
        assert_eq!(fired[1], (800, ScrollDirection::Up));
    }

    #[test]
    fn test_zone_change_resets_timer() {
        let mut e = engine(500, 0);
        e.on_sample(960.0, 50.0, 0.0);
        e.on_sample(960.0, 50.0, 400.0);
        // Brief neutral glance
        assert_eq!(e.on_sample(960.0, 540.0, 450.0), None);
        assert_eq!(e.on_sample(960.0, 50.0, 460.0), None);
        assert_eq!(e.on_sample(960.0, 50.0, 900.0), None);
        assert_eq!(e.on_sample(960.0, 50.0, 960.0), Some(ScrollDirection::Up));
    }

    #[test]
    fn test_missing_sample_breaks_dwell() {
        let mut e = engine(500, 0);
        e.on_sample(960.0, 1050.0, 0.0);
        assert_eq!(e.on_zone(None, 300.0), None);
        assert_eq!(e.on_sample(960.0, 1050.0, 310.0), None);
        assert_eq!(e.on_sample(960.0, 1050.0, 600.0), None);
        assert_eq!(e.on_sample(960.0, 1050.0, 810.0), Some(ScrollDirection::Down));
    }

    #[test]
    fn test_repeat_fire_count() {
        let dwell = 500;
        let cooldown = 200;
        let mut e = engine(dwell, cooldown);
        let mut fires = 0;
        let mut t = 0;
        while t <= 3 * dwell {
            if e.on_sample(1900.0, 540.0, t as f64).is_some() {
                fires += 1;
            }
            t += 10;
        }
        assert_eq!(fires, 1 + (2 * dwell / cooldown) as usize);
    }

    #[test]
    fn test_limits_suppress_without_consuming_cooldown() {
        let mut e = engine(500, 250);
        e.set_limits(ScrollLimits {
            up: true,
            down: false,
            right: true,
        });
        e.on_sample(960.0, 1050.0, 0.0);
        assert_eq!(e.on_sample(960.0, 1050.0, 500.0), None);
        assert_eq!(e.suppressed, 1);
        assert_eq!(e.state().last_fired_at, None);

        e.set_limits(ScrollLimits::default());
        assert_eq!(e.on_sample(960.0, 1050.0, 520.0), Some(ScrollDirection::Down));
    }

    #[test]
    fn test_dwell_progress() {
        let mut e = engine(500, 250);
        assert_eq!(e.dwell_progress(0.0), 0.0);
        e.on_sample(960.0, 50.0, 100.0);
        assert!((e.dwell_progress(350.0) - 0.5).abs() < 1e-9);
        assert_eq!(e.dwell_progress(5000.0), 1.0);
        assert!(e.status_sexp(350.0).contains(":zone :up :progress 0.50"));
    }
}
