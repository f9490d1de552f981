//! Engine configuration: JSON file, validation and hot-reload setters.
//!
//! Every section is optional in the file; missing keys take defaults.
//! snake_case aliases keep the legacy desktop `config.json` loadable.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gaze::calibration::ConfirmMode;

/// Top-level configuration for one interaction engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub smoothing: SmoothingConfig,
    pub dwell: DwellConfig,
    pub zones: ZonesConfig,
    pub scroll: ScrollConfig,
    pub calibration: CalibrationConfig,
    pub menu: MenuConfig,
    pub signal: SignalConfig,
    #[serde(alias = "screen")]
    pub viewport: ViewportConfig,
}

/// Signal conditioner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmoothingConfig {
    /// EMA weight of the new sample, in (0, 1].
    #[serde(alias = "ema_alpha")]
    pub ema_alpha: f64,
    /// Jump distance beyond which a sample is discarded. 0 disables.
    #[serde(alias = "outlier_px")]
    pub outlier_px: f64,
    /// Consecutive rejections after which the filter re-seeds.
    pub outlier_reset_count: u32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.35,
            outlier_px: 250.0,
            outlier_reset_count: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DwellConfig {
    #[serde(alias = "threshold_ms")]
    pub threshold_ms: u64,
    #[serde(alias = "cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 500,
            cooldown_ms: 300,
        }
    }
}

/// Edge zone geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ZonesConfig {
    #[serde(alias = "top_px")]
    pub top_px: f64,
    #[serde(alias = "bottom_px")]
    pub bottom_px: f64,
    #[serde(alias = "right_px")]
    pub right_px: f64,
    pub min_zone_px: f64,
    pub max_zone_px: f64,
    /// When set, top/bottom zone heights are this fraction of the viewport
    /// height instead of `top_px`/`bottom_px`. Clamped either way.
    pub height_fraction: Option<f64>,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self {
            top_px: 120.0,
            bottom_px: 120.0,
            right_px: 80.0,
            min_zone_px: 60.0,
            max_zone_px: 180.0,
            height_fraction: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrollConfig {
    #[serde(alias = "amount")]
    pub amount_per_fire: i32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        // One wheel notch.
        Self {
            amount_per_fire: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalibrationConfig {
    /// 5 (centre + corners) or 9 (adds edge midpoints).
    pub target_count: usize,
    /// Explicit-hold recording window.
    pub hold_ms: u64,
    /// Recording interval inside the hold window.
    pub sample_interval_ms: u64,
    /// Auto-dwell fixation time required on a target.
    pub auto_hold_ms: u64,
    /// Auto-dwell acceptance radius around a target.
    pub auto_radius_px: f64,
    /// Auto-dwell give-up time per target.
    pub point_timeout_ms: u64,
    /// Force-start when the readiness gate never opens.
    pub force_start_timeout_ms: u64,
    /// Confirmation strategy used when a request does not name one.
    pub mode: ConfirmMode,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_count: 9,
            hold_ms: 1500,
            sample_interval_ms: 30,
            auto_hold_ms: 900,
            auto_radius_px: 40.0,
            point_timeout_ms: 10_000,
            force_start_timeout_ms: 8000,
            mode: ConfirmMode::ExplicitHold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MenuConfig {
    pub enabled: bool,
    pub hub_radius_px: f64,
    /// Distance from the hub edge to the item ring.
    pub ring_gap_px: f64,
    pub item_radius_px: f64,
    /// Distance from the right viewport edge to the menu centre.
    pub right_inset_px: f64,
    /// Overrides `dwell.thresholdMs` for menu items.
    pub dwell_ms: Option<u64>,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hub_radius_px: 28.0,
            ring_gap_px: 36.0,
            item_radius_px: 20.0,
            right_inset_px: 120.0,
            dwell_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignalConfig {
    /// Silence after which "no gaze data" is reported.
    pub no_signal_ms: u64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { no_signal_ms: 3000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load a config file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Persist as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Check every value is within its accepted range.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.smoothing;
        if !(s.ema_alpha > 0.0 && s.ema_alpha <= 1.0) {
            bail!("smoothing.emaAlpha must be in (0, 1], got {}", s.ema_alpha);
        }
        if s.outlier_px < 0.0 {
            bail!("smoothing.outlierPx must be >= 0, got {}", s.outlier_px);
        }
        if self.dwell.threshold_ms == 0 {
            bail!("dwell.thresholdMs must be > 0");
        }
        let z = &self.zones;
        if z.top_px < 0.0 || z.bottom_px < 0.0 || z.right_px < 0.0 {
            bail!("zone sizes must be >= 0");
        }
        if z.min_zone_px > z.max_zone_px {
            bail!(
                "zones.minZonePx ({}) exceeds zones.maxZonePx ({})",
                z.min_zone_px,
                z.max_zone_px
            );
        }
        if let Some(f) = z.height_fraction {
            if !(0.0..=0.5).contains(&f) {
                bail!("zones.heightFraction must be in [0, 0.5], got {}", f);
            }
        }
        if self.scroll.amount_per_fire <= 0 {
            bail!("scroll.amountPerFire must be > 0");
        }
        let c = &self.calibration;
        if c.target_count != 5 && c.target_count != 9 {
            bail!("calibration.targetCount must be 5 or 9, got {}", c.target_count);
        }
        if c.hold_ms == 0 || c.sample_interval_ms == 0 || c.auto_hold_ms == 0 {
            bail!("calibration durations must be > 0");
        }
        if c.sample_interval_ms > c.hold_ms {
            bail!("calibration.sampleIntervalMs exceeds calibration.holdMs");
        }
        let m = &self.menu;
        if m.hub_radius_px <= 0.0 || m.item_radius_px <= 0.0 || m.ring_gap_px < 0.0 {
            bail!("menu radii must be positive");
        }
        if self.viewport.width <= 0.0 || self.viewport.height <= 0.0 {
            bail!("viewport dimensions must be positive");
        }
        Ok(())
    }

    /// Set one field by its IPC key (kebab-case). Does not validate.
    pub fn set_field(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        fn num<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
            value
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid value for {}: {}", key, value))
        }
        match key {
            "ema-alpha" => self.smoothing.ema_alpha = num(key, value)?,
            "outlier-px" => self.smoothing.outlier_px = num(key, value)?,
            "outlier-reset-count" => self.smoothing.outlier_reset_count = num(key, value)?,
            "dwell-ms" | "threshold-ms" => self.dwell.threshold_ms = num(key, value)?,
            "cooldown-ms" => self.dwell.cooldown_ms = num(key, value)?,
            // A fixed band height switches off proportional mode.
            "top-px" => {
                self.zones.top_px = num(key, value)?;
                self.zones.height_fraction = None;
            }
            "bottom-px" => {
                self.zones.bottom_px = num(key, value)?;
                self.zones.height_fraction = None;
            }
            "right-px" => self.zones.right_px = num(key, value)?,
            "min-zone-px" => self.zones.min_zone_px = num(key, value)?,
            "max-zone-px" => self.zones.max_zone_px = num(key, value)?,
            "height-fraction" => {
                self.zones.height_fraction = match value {
                    "nil" => None,
                    v => Some(num(key, v)?),
                }
            }
            "amount" | "amount-per-fire" => self.scroll.amount_per_fire = num(key, value)?,
            "target-count" => self.calibration.target_count = num(key, value)?,
            "hold-ms" => self.calibration.hold_ms = num(key, value)?,
            "sample-interval-ms" => self.calibration.sample_interval_ms = num(key, value)?,
            "auto-hold-ms" => self.calibration.auto_hold_ms = num(key, value)?,
            "auto-radius-px" => self.calibration.auto_radius_px = num(key, value)?,
            "point-timeout-ms" => self.calibration.point_timeout_ms = num(key, value)?,
            "force-start-timeout-ms" => {
                self.calibration.force_start_timeout_ms = num(key, value)?
            }
            "calibration-mode" => {
                self.calibration.mode = ConfirmMode::from_str(value)
                    .ok_or_else(|| anyhow::anyhow!("unknown calibration mode: {}", value))?
            }
            "menu-enabled" => self.menu.enabled = value != "nil",
            "menu-dwell-ms" => {
                self.menu.dwell_ms = match value {
                    "nil" => None,
                    v => Some(num(key, v)?),
                }
            }
            "no-signal-ms" => self.signal.no_signal_ms = num(key, value)?,
            _ => bail!("unknown config key: {}", key),
        }
        Ok(())
    }

    /// Dwell threshold used by the radial menu.
    pub fn menu_dwell_ms(&self) -> u64 {
        self.menu.dwell_ms.unwrap_or(self.dwell.threshold_ms)
    }

    /// Generate IPC config s-expression.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:ema-alpha {:.2} :outlier-px {:.0} :dwell-ms {} :cooldown-ms {} :top-px {:.0} :bottom-px {:.0} :right-px {:.0} :min-zone-px {:.0} :max-zone-px {:.0} :height-fraction {} :amount {} :target-count {} :hold-ms {} :force-start-timeout-ms {} :calibration-mode :{} :menu-enabled {} :menu-dwell-ms {} :no-signal-ms {})",
            self.smoothing.ema_alpha,
            self.smoothing.outlier_px,
            self.dwell.threshold_ms,
            self.dwell.cooldown_ms,
            self.zones.top_px,
            self.zones.bottom_px,
            self.zones.right_px,
            self.zones.min_zone_px,
            self.zones.max_zone_px,
            self.zones
                .height_fraction
                .map(|f| format!("{:.2}", f))
                .unwrap_or_else(|| "nil".to_string()),
            self.scroll.amount_per_fire,
            self.calibration.target_count,
            self.calibration.hold_ms,
            self.calibration.force_start_timeout_ms,
            self.calibration.mode.as_str(),
            if self.menu.enabled { "t" } else { "nil" },
            self.menu_dwell_ms(),
            self.signal.no_signal_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ScrollDirection;
    use crate::gaze::zone_dwell::{Viewport, ZoneDwellEngine};

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.calibration.target_count, 9);
        assert_eq!(config.menu_dwell_ms(), config.dwell.threshold_ms);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"dwell": {"thresholdMs": 700}}"#).unwrap();
        assert_eq!(config.dwell.threshold_ms, 700);
        assert_eq!(config.dwell.cooldown_ms, 300);
        assert_eq!(config.smoothing, SmoothingConfig::default());
    }

    #[test]
    fn test_legacy_snake_case_aliases() {
        let raw = r#"{
            "screen": {"width": 2560, "height": 1440},
            "smoothing": {"ema_alpha": 0.25, "outlier_px": 180},
            "dwell": {"threshold_ms": 650, "cooldown_ms": 400},
            "zones": {"top_px": 90, "bottom_px": 100, "right_px": 70},
            "scroll": {"amount": 240}
        }"#;
        let config: EngineConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.viewport.width, 2560.0);
        assert_eq!(config.smoothing.ema_alpha, 0.25);
        assert_eq!(config.dwell.threshold_ms, 650);
        assert_eq!(config.zones.right_px, 70.0);
        assert_eq!(config.scroll.amount_per_fire, 240);
    }

    #[test]
    fn test_legacy_top_px_sets_band_height() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"zones": {"top_px": 300, "maxZonePx": 400}}"#).unwrap();
        assert_eq!(config.zones.height_fraction, None);
        let zones = ZoneDwellEngine::new(&config.zones, &config.dwell, Viewport::from(&config.viewport));
        assert_eq!(zones.band_heights().0, 300.0);
        assert_eq!(zones.classify(960.0, 250.0), Some(ScrollDirection::Up));
    }

    #[test]
    fn test_set_top_px_leaves_proportional_mode() {
        let mut config = EngineConfig::default();
        config.set_field("height-fraction", "0.2").unwrap();
        config.set_field("top-px", "150").unwrap();
        assert_eq!(config.zones.height_fraction, None);
        assert_eq!(config.zones.top_px, 150.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.smoothing.ema_alpha = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.calibration.target_count = 7;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.zones.min_zone_px = 300.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_field() {
        let mut config = EngineConfig::default();
        config.set_field("ema-alpha", "0.5").unwrap();
        config.set_field("cooldown-ms", "250").unwrap();
        config.set_field("height-fraction", "nil").unwrap();
        config.set_field("calibration-mode", "auto").unwrap();
        assert_eq!(config.smoothing.ema_alpha, 0.5);
        assert_eq!(config.dwell.cooldown_ms, 250);
        assert_eq!(config.zones.height_fraction, None);
        assert_eq!(config.calibration.mode, ConfirmMode::AutoDwell);

        assert!(config.set_field("no-such-key", "1").is_err());
        assert!(config.set_field("dwell-ms", "soon").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = EngineConfig::default();
        config.dwell.threshold_ms = 800;
        config.menu.dwell_ms = Some(1000);
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"calibration": {"targetCount": 4}}"#).unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }

    #[test]
    fn test_config_sexp() {
        let sexp = EngineConfig::default().to_sexp();
        assert!(sexp.contains(":ema-alpha 0.35"));
        assert!(sexp.contains(":dwell-ms 500"));
        assert!(sexp.contains(":calibration-mode :hold"));
        assert!(sexp.contains(":menu-enabled t"));
    }
}
