//! Action dispatch of fired zone and menu events to external effectors.
//!
//! The engine never performs a scroll or closes a window itself. It calls
//! the host's `Effectors` capability and the estimator's `CalibrationSink`.
//! Effector failures are local: the dispatch is dropped and counted, never
//! retried, since the next dwell cycle re-attempts naturally.

use tracing::{debug, warn};

// ── Scroll direction ────────────────────────────────────────

/// Edge zone / scroll direction. A zone of `None` is modelled as `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
    Right,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

// ── Menu action ─────────────────────────────────────────────

/// Discrete command selectable from the radial menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuAction {
    Pause,
    Resume,
    Recalibrate,
    Exit,
}

impl MenuAction {
    /// Ring order, clockwise from 12 o'clock.
    pub const ALL: [MenuAction; 4] = [
        MenuAction::Pause,
        MenuAction::Resume,
        MenuAction::Recalibrate,
        MenuAction::Exit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Recalibrate => "recalibrate",
            Self::Exit => "exit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "recalibrate" => Some(Self::Recalibrate),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

// ── Status ──────────────────────────────────────────────────

/// Observational status reported to the host. No engine behavior depends on
/// the host consuming these.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// Valid gaze acquired or recovered.
    TrackingActive,
    /// No valid sample for `for_ms`.
    NoSignal { for_ms: f64 },
    /// Calibration requested before the readiness gate opened.
    CalibrationPending { timeout_ms: f64 },
    /// Calibration entered its first target.
    CalibrationStarted { total: usize, forced: bool },
    /// A target is now shown at pixel position (x, y).
    CalibrationTarget { index: usize, total: usize, x: f64, y: f64 },
    /// A target finished with at least one usable sample.
    CalibrationPointAccepted { index: usize, samples: u32, attempts: u32 },
    /// A target finished without any usable sample.
    CalibrationPointEmpty { index: usize, attempts: u32 },
    /// Calibration finished; emitted exactly once per session.
    CalibrationCompleted { total: usize, empty_points: usize },
    /// Menu hub entered or left.
    MenuExpanded { expanded: bool },
    /// Hovered menu item changed.
    MenuHover { action: Option<MenuAction> },
    /// Zone scrolling suspended.
    Paused,
    /// Zone scrolling re-enabled.
    Resumed,
    /// Session termination requested.
    SessionExit,
}

impl StatusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TrackingActive => "tracking-active",
            Self::NoSignal { .. } => "no-signal",
            Self::CalibrationPending { .. } => "calibration-pending",
            Self::CalibrationStarted { .. } => "calibration-started",
            Self::CalibrationTarget { .. } => "calibration-target",
            Self::CalibrationPointAccepted { .. } => "calibration-point-accepted",
            Self::CalibrationPointEmpty { .. } => "calibration-point-empty",
            Self::CalibrationCompleted { .. } => "calibration-completed",
            Self::MenuExpanded { .. } => "menu-expanded",
            Self::MenuHover { .. } => "menu-hover",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::SessionExit => "session-exit",
        }
    }

    /// Plist fields following `:status :<name>` (leading space included).
    fn fields_sexp(&self) -> String {
        match self {
            Self::NoSignal { for_ms } => format!(" :for-ms {:.0}", for_ms),
            Self::CalibrationPending { timeout_ms } => format!(" :timeout-ms {:.0}", timeout_ms),
            Self::CalibrationStarted { total, forced } => format!(
                " :total {} :forced {}",
                total,
                if *forced { "t" } else { "nil" }
            ),
            Self::CalibrationTarget { index, total, x, y } => {
                format!(" :index {} :total {} :x {:.0} :y {:.0}", index, total, x, y)
            }
            Self::CalibrationPointAccepted {
                index,
                samples,
                attempts,
            } => format!(" :index {} :samples {} :attempts {}", index, samples, attempts),
            Self::CalibrationPointEmpty { index, attempts } => {
                format!(" :index {} :attempts {}", index, attempts)
            }
            Self::CalibrationCompleted {
                total,
                empty_points,
            } => format!(" :total {} :empty-points {}", total, empty_points),
            Self::MenuExpanded { expanded } => {
                format!(" :expanded {}", if *expanded { "t" } else { "nil" })
            }
            Self::MenuHover { action } => format!(
                " :action {}",
                action
                    .map(|a| format!(":{}", a.as_str()))
                    .unwrap_or_else(|| "nil".to_string())
            ),
            Self::TrackingActive | Self::Paused | Self::Resumed | Self::SessionExit => {
                String::new()
            }
        }
    }

    /// Convert the status to an IPC event s-expression.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:type :event :event :status :status :{}{})",
            self.name(),
            self.fields_sexp()
        )
    }
}

// ── Capability interfaces ───────────────────────────────────

/// Host-side effects. Implemented differently per host shell.
pub trait Effectors {
    /// Fire-and-forget scroll. `amount` is always positive.
    fn scroll(&mut self, direction: ScrollDirection, amount: i32) -> anyhow::Result<()>;

    /// Hand a selected menu command to host application logic.
    fn dispatch_menu_action(&mut self, action: MenuAction) -> anyhow::Result<()>;

    /// Purely observational status.
    fn report_status(&mut self, status: &StatusEvent);
}

/// Estimator-side training interface.
pub trait CalibrationSink {
    /// Record one `(target_x, target_y)` training pair against the
    /// estimator's current eye features.
    fn record_calibration_sample(&mut self, screen_x: f64, screen_y: f64) -> anyhow::Result<()>;
}

// ── Dispatcher ──────────────────────────────────────────────

/// Counters for dispatched and dropped effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub scrolls: u64,
    pub menu_actions: u64,
    pub calibration_samples: u64,
    pub dropped: u64,
}

/// Routes engine decisions to the effector capability.
pub struct ActionDispatcher<E> {
    effectors: E,
    /// Scroll magnitude per fire.
    pub amount_per_fire: i32,
    pub stats: DispatchStats,
}

impl<E: Effectors + CalibrationSink> ActionDispatcher<E> {
    pub fn new(effectors: E, amount_per_fire: i32) -> Self {
        Self {
            effectors,
            amount_per_fire,
            stats: DispatchStats::default(),
        }
    }

    /// Dispatch one scroll for a fired zone.
    pub fn scroll(&mut self, direction: ScrollDirection) {
        match self.effectors.scroll(direction, self.amount_per_fire) {
            Ok(()) => {
                self.stats.scrolls += 1;
                debug!(direction = direction.as_str(), amount = self.amount_per_fire, "scroll dispatched");
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(direction = direction.as_str(), "scroll dropped: {:#}", e);
            }
        }
    }

    /// Dispatch a selected menu action to the host.
    pub fn menu_action(&mut self, action: MenuAction) {
        match self.effectors.dispatch_menu_action(action) {
            Ok(()) => self.stats.menu_actions += 1,
            Err(e) => {
                self.stats.dropped += 1;
                warn!(action = action.as_str(), "menu action dropped: {:#}", e);
            }
        }
    }

    /// Hand a calibration training pair to the estimator.
    /// Returns true if the sink accepted it.
    pub fn calibration_sample(&mut self, x: f64, y: f64) -> bool {
        match self.effectors.record_calibration_sample(x, y) {
            Ok(()) => {
                self.stats.calibration_samples += 1;
                true
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!("calibration sample dropped: {:#}", e);
                false
            }
        }
    }

    pub fn status(&mut self, status: StatusEvent) {
        debug!(status = status.name(), "status");
        self.effectors.report_status(&status);
    }

    pub fn effectors(&self) -> &E {
        &self.effectors
    }

    pub fn effectors_mut(&mut self) -> &mut E {
        &mut self.effectors
    }
}

// ── Recording effectors ─────────────────────────────────────

/// Effectors that record every call. Used by the replay driver and tests.
#[derive(Debug, Default)]
pub struct RecordingEffectors {
    pub scrolls: Vec<(ScrollDirection, i32)>,
    pub menu_actions: Vec<MenuAction>,
    pub statuses: Vec<StatusEvent>,
    pub calibration_samples: Vec<(f64, f64)>,
    /// Simulate a host that cannot scroll (closed tab, no scrollable).
    pub fail_scrolls: bool,
}

impl RecordingEffectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scrolls in the given direction.
    pub fn scroll_count(&self, direction: ScrollDirection) -> usize {
        self.scrolls.iter().filter(|(d, _)| *d == direction).count()
    }

    /// Statuses with the given name.
    pub fn statuses_named(&self, name: &str) -> Vec<&StatusEvent> {
        self.statuses.iter().filter(|s| s.name() == name).collect()
    }

    pub fn clear(&mut self) {
        self.scrolls.clear();
        self.menu_actions.clear();
        self.statuses.clear();
        self.calibration_samples.clear();
    }
}

impl Effectors for RecordingEffectors {
    fn scroll(&mut self, direction: ScrollDirection, amount: i32) -> anyhow::Result<()> {
        if self.fail_scrolls {
            anyhow::bail!("no scrollable target");
        }
        self.scrolls.push((direction, amount));
        Ok(())
    }

    fn dispatch_menu_action(&mut self, action: MenuAction) -> anyhow::Result<()> {
        self.menu_actions.push(action);
        Ok(())
    }

    fn report_status(&mut self, status: &StatusEvent) {
        self.statuses.push(status.clone());
    }
}

impl CalibrationSink for RecordingEffectors {
    fn record_calibration_sample(&mut self, screen_x: f64, screen_y: f64) -> anyhow::Result<()> {
        self.calibration_samples.push((screen_x, screen_y));
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_and_action_names() {
        for d in [ScrollDirection::Up, ScrollDirection::Down, ScrollDirection::Right] {
            assert_eq!(ScrollDirection::from_str(d.as_str()), Some(d));
        }
        for a in MenuAction::ALL {
            assert_eq!(MenuAction::from_str(a.as_str()), Some(a));
        }
        assert_eq!(MenuAction::from_str("reboot"), None);
    }

    #[test]
    fn test_dispatch_counts_scrolls() {
        let mut d = ActionDispatcher::new(RecordingEffectors::new(), 120);
        d.scroll(ScrollDirection::Down);
        d.scroll(ScrollDirection::Up);
        assert_eq!(d.stats.scrolls, 2);
        assert_eq!(
            d.effectors().scrolls,
            vec![(ScrollDirection::Down, 120), (ScrollDirection::Up, 120)]
        );
    }

    #[test]
    fn test_effector_failure_is_dropped() {
        let mut effectors = RecordingEffectors::new();
        effectors.fail_scrolls = true;
        let mut d = ActionDispatcher::new(effectors, 120);

        d.scroll(ScrollDirection::Down);
        d.scroll(ScrollDirection::Down);

        assert_eq!(d.stats.scrolls, 0);
        assert_eq!(d.stats.dropped, 2);
        assert!(d.effectors().scrolls.is_empty());
    }

    #[test]
    fn test_status_sexp() {
        let s = StatusEvent::NoSignal { for_ms: 3000.0 }.to_sexp();
        assert_eq!(s, "(:type :event :event :status :status :no-signal :for-ms 3000)");

        let s = StatusEvent::CalibrationStarted { total: 9, forced: true }.to_sexp();
        assert!(s.contains(":calibration-started :total 9 :forced t"));

        let s = StatusEvent::MenuHover { action: Some(MenuAction::Exit) }.to_sexp();
        assert!(s.contains(":action :exit"));

        let s = StatusEvent::Paused.to_sexp();
        assert!(s.ends_with(":status :paused)"));
    }
}
