//! Interaction engine: one per consuming surface.
//!
//! Owns the signal conditioner, zone dwell, radial menu and calibration
//! sequencer for a single viewport, and routes their decisions through the
//! action dispatcher. All timing comes from the `now_ms` passed in; the
//! engine never reads a clock.

use tracing::{debug, info};

use super::calibration::{CalibrationEvent, CalibrationSequencer, ConfirmMode};
use super::radial_menu::{MenuEvent, RadialMenu};
use super::signal::{GazePoint, GazeSample, GazeSmoother, SignalMonitor, SignalStatus};
use super::zone_dwell::{ScrollLimits, Viewport, ZoneDwellEngine};
use crate::action::{ActionDispatcher, CalibrationSink, Effectors, MenuAction, StatusEvent};
use crate::config::EngineConfig;
use crate::session::SharedSession;

pub struct InteractionEngine<E> {
    config: EngineConfig,
    viewport: Viewport,
    smoother: GazeSmoother,
    monitor: SignalMonitor,
    zones: ZoneDwellEngine,
    menu: RadialMenu,
    calibration: CalibrationSequencer,
    dispatcher: ActionDispatcher<E>,
    session: SharedSession,
    /// Conditioned position of the latest sample, `None` if it was unusable.
    current: Option<GazePoint>,
    /// Position of a sample no host tick has seen yet.
    fresh: Option<GazePoint>,
    /// Latest time seen; earlier timestamps are clamped to it.
    last_now_ms: f64,
    /// Samples processed.
    pub samples: u64,
}

impl<E: Effectors + CalibrationSink> InteractionEngine<E> {
    pub fn new(config: EngineConfig, effectors: E, session: SharedSession, now_ms: f64) -> Self {
        let viewport = Viewport::from(&config.viewport);
        Self {
            smoother: GazeSmoother::new(&config.smoothing),
            monitor: SignalMonitor::new(config.signal.no_signal_ms as f64, now_ms),
            zones: ZoneDwellEngine::new(&config.zones, &config.dwell, viewport),
            menu: RadialMenu::new(&config.menu, config.menu_dwell_ms(), viewport),
            calibration: CalibrationSequencer::new(&config.calibration, viewport),
            dispatcher: ActionDispatcher::new(effectors, config.scroll.amount_per_fire),
            session,
            viewport,
            config,
            current: None,
            fresh: None,
            last_now_ms: now_ms,
            samples: 0,
        }
    }

    fn clamp_now(&mut self, now_ms: f64) -> f64 {
        if now_ms > self.last_now_ms {
            self.last_now_ms = now_ms;
        }
        self.last_now_ms
    }

    // ── Input ──────────────────────────────────────────────

    /// Process one estimator tick.
    pub fn on_sample(&mut self, sample: GazeSample) {
        let now = self.clamp_now(sample.timestamp_ms);
        self.samples += 1;

        let raw = sample.position();
        self.observe_signal(raw.is_some(), now);
        let point = self.smoother.update(raw);
        self.current = point;
        self.fresh = point;

        if self.session.is_terminated() {
            return;
        }
        if self.calibration.is_running() {
            let events = self.calibration.update(point, now, self.monitor.gate_open());
            self.apply_calibration(events);
            return;
        }

        let Some(p) = point else {
            self.zones.on_zone(None, now);
            if let Some(event) = self.menu.on_no_signal(now) {
                self.apply_menu_event(event, now);
            }
            return;
        };

        if let Some(event) = self.menu.on_sample(p, now) {
            self.apply_menu_event(event, now);
            if self.calibration.is_running() || self.session.is_terminated() {
                return;
            }
        }
        let zone = if self.menu.captures(p) {
            None
        } else {
            self.zones.classify(p.x, p.y)
        };

        if !self.session.tracking_enabled() {
            self.zones.on_zone(None, now);
            return;
        }
        if let Some(direction) = self.zones.on_zone(zone, now) {
            self.dispatcher.scroll(direction);
        }
    }

    pub fn on_gaze(&mut self, x: f64, y: f64, now_ms: f64) {
        self.on_sample(GazeSample::new(x, y, now_ms));
    }

    pub fn on_gaze_lost(&mut self, now_ms: f64) {
        self.on_sample(GazeSample::lost(now_ms));
    }

    /// Host tick: signal-loss detection and calibration deadlines. Ticks
    /// carry no position, so nothing is recorded against a stale one.
    pub fn tick(&mut self, now_ms: f64) {
        let now = self.clamp_now(now_ms);
        self.fresh = None;
        if let Some(SignalStatus::Lost { for_ms }) = self.monitor.tick(now) {
            self.current = None;
            self.zones.reset(now);
            if let Some(event) = self.menu.on_no_signal(now) {
                self.apply_menu_event(event, now);
            }
            self.dispatcher.status(StatusEvent::NoSignal { for_ms });
        }
        if self.calibration.is_running() && !self.session.is_terminated() {
            let events = self.calibration.tick(now, self.monitor.gate_open());
            self.apply_calibration(events);
        }
    }

    /// Out-of-band face detection from the estimator.
    pub fn set_face_detected(&mut self, detected: bool, now_ms: f64) {
        let now = self.clamp_now(now_ms);
        self.monitor.set_face_detected(detected);
        if self.calibration.is_running() {
            let events = self.calibration.tick(now, self.monitor.gate_open());
            self.apply_calibration(events);
        }
    }

    // ── Host commands ──────────────────────────────────────

    pub fn set_viewport(&mut self, viewport: Viewport) {
        debug!(width = viewport.width, height = viewport.height, "viewport changed");
        self.viewport = viewport;
        self.zones.set_viewport(viewport);
        self.zones.reset(self.last_now_ms);
        self.menu
            .reconfigure(&self.config.menu, self.config.menu_dwell_ms(), viewport);
        self.menu.collapse();
        self.calibration.set_viewport(viewport);
    }

    pub fn set_scroll_limits(&mut self, limits: ScrollLimits) {
        self.zones.set_limits(limits);
    }

    /// Begin (or restart) calibration. `None` uses the configured mode.
    pub fn start_calibration(&mut self, mode: Option<ConfirmMode>, now_ms: f64) {
        let now = self.clamp_now(now_ms);
        self.zones.reset(now);
        self.menu.collapse();
        let events = self.calibration.request(mode, now, self.monitor.gate_open());
        self.apply_calibration(events);
    }

    /// Pointer-down on the current calibration target. Records right away
    /// only if a sample arrived since the last host tick.
    pub fn begin_calibration_hold(&mut self, now_ms: f64) {
        let now = self.clamp_now(now_ms);
        let events = self.calibration.begin_hold(self.fresh.take(), now);
        self.apply_calibration(events);
    }

    /// Execute a menu action, whether dwell-selected or host-requested.
    pub fn handle_menu_action(&mut self, action: MenuAction, now_ms: f64) {
        let now = self.clamp_now(now_ms);
        info!(action = action.as_str(), "menu action");
        self.dispatcher.menu_action(action);
        match action {
            MenuAction::Pause => {
                self.session.set_tracking_enabled(false);
                self.zones.reset(now);
                self.dispatcher.status(StatusEvent::Paused);
            }
            MenuAction::Resume => {
                self.session.set_tracking_enabled(true);
                self.zones.reset(now);
                self.dispatcher.status(StatusEvent::Resumed);
            }
            MenuAction::Recalibrate => self.start_calibration(None, now),
            MenuAction::Exit => {
                self.session.terminate();
                self.calibration.abandon();
                self.zones.reset(now);
                self.menu.collapse();
                self.dispatcher.status(StatusEvent::SessionExit);
            }
        }
    }

    /// Hot-reload parameters. In-progress dwell state survives; calibration
    /// parameters apply from the next session.
    pub fn apply_config(&mut self, config: EngineConfig) {
        self.smoother.reconfigure(&config.smoothing);
        self.monitor.no_signal_ms = config.signal.no_signal_ms as f64;
        self.zones.reconfigure(&config.zones, &config.dwell);
        self.menu
            .reconfigure(&config.menu, config.menu_dwell_ms(), self.viewport);
        self.calibration.reconfigure(&config.calibration);
        self.dispatcher.amount_per_fire = config.scroll.amount_per_fire;
        self.config = config;
        debug!("engine reconfigured");
    }

    // ── Internals ──────────────────────────────────────────

    fn observe_signal(&mut self, valid: bool, now: f64) {
        match self.monitor.observe(valid, now) {
            Some(SignalStatus::Active) => self.dispatcher.status(StatusEvent::TrackingActive),
            Some(SignalStatus::Lost { for_ms }) => {
                self.zones.reset(now);
                self.dispatcher.status(StatusEvent::NoSignal { for_ms });
            }
            None => {}
        }
    }

    fn apply_menu_event(&mut self, event: MenuEvent, now: f64) {
        match event {
            MenuEvent::Expanded => self.dispatcher.status(StatusEvent::MenuExpanded { expanded: true }),
            MenuEvent::Collapsed => self.dispatcher.status(StatusEvent::MenuExpanded { expanded: false }),
            MenuEvent::HoverChanged(action) => self.dispatcher.status(StatusEvent::MenuHover { action }),
            MenuEvent::Selected(action) => self.handle_menu_action(action, now),
        }
    }

    fn apply_calibration(&mut self, events: Vec<CalibrationEvent>) {
        for event in events {
            match event {
                CalibrationEvent::RecordSample { x, y } => {
                    self.dispatcher.calibration_sample(x, y);
                }
                CalibrationEvent::Completed { .. } => {
                    self.session.set_calibrated(true);
                    if let Some(status) = event.to_status() {
                        self.dispatcher.status(status);
                    }
                }
                _ => {
                    if let Some(status) = event.to_status() {
                        self.dispatcher.status(status);
                    }
                }
            }
        }
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn current_position(&self) -> Option<GazePoint> {
        self.current
    }

    pub fn smoother(&self) -> &GazeSmoother {
        &self.smoother
    }

    pub fn monitor(&self) -> &SignalMonitor {
        &self.monitor
    }

    pub fn zones(&self) -> &ZoneDwellEngine {
        &self.zones
    }

    pub fn menu(&self) -> &RadialMenu {
        &self.menu
    }

    pub fn calibration(&self) -> &CalibrationSequencer {
        &self.calibration
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<E> {
        &self.dispatcher
    }

    pub fn effectors(&self) -> &E {
        self.dispatcher.effectors()
    }

    pub fn effectors_mut(&mut self) -> &mut E {
        self.dispatcher.effectors_mut()
    }

    /// Generate IPC engine status s-expression.
    pub fn status_sexp(&self) -> String {
        let now = self.last_now_ms;
        let signal = if self.monitor.is_lost() {
            "lost"
        } else if self.monitor.signal_ready {
            "active"
        } else {
            "waiting"
        };
        let stats = &self.dispatcher.stats;
        format!(
            "(:session {} :signal :{} :face {} :width {:.0} :height {:.0} :samples {} :rejected {} :zone {} :menu {} :calibration {} :stats (:scrolls {} :menu-actions {} :calibration-samples {} :dropped {}))",
            self.session.to_sexp(),
            signal,
            if self.monitor.face_ready { "t" } else { "nil" },
            self.viewport.width,
            self.viewport.height,
            self.samples,
            self.smoother.rejected,
            self.zones.status_sexp(now),
            self.menu.status_sexp(now),
            self.calibration.status_sexp(),
            stats.scrolls,
            stats.menu_actions,
            stats.calibration_samples,
            stats.dropped,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{RecordingEffectors, ScrollDirection};

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.smoothing.ema_alpha = 1.0;
        config.dwell.threshold_ms = 500;
        config.dwell.cooldown_ms = 250;
        config
    }

    fn engine() -> InteractionEngine<RecordingEffectors> {
        InteractionEngine::new(config(), RecordingEffectors::new(), SharedSession::new(), 0.0)
    }

    #[test]
    fn test_top_zone_scrolls_up() {
        let mut e = engine();
        for t in (0..=800).step_by(100) {
            e.on_gaze(960.0, 50.0, t as f64);
        }
        assert_eq!(e.effectors().scrolls, vec![(ScrollDirection::Up, 120), (ScrollDirection::Up, 120)]);
        assert_eq!(e.effectors().statuses_named("tracking-active").len(), 1);
    }

    #[test]
    fn test_lost_samples_do_not_fire() {
        let mut e = engine();
        for t in (0..=2000).step_by(100) {
            if t % 400 == 300 {
                e.on_gaze_lost(t as f64);
            } else {
                e.on_gaze(960.0, 1050.0, t as f64);
            }
        }
        assert!(e.effectors().scrolls.is_empty());
    }

    #[test]
    fn test_pause_blocks_scrolling_until_resume() {
        let mut e = engine();
        e.handle_menu_action(MenuAction::Pause, 0.0);
        for t in (0..=1000).step_by(100) {
            e.on_gaze(960.0, 50.0, t as f64);
        }
        assert!(e.effectors().scrolls.is_empty());

        e.handle_menu_action(MenuAction::Resume, 1000.0);
        for t in (1100..=1600).step_by(100) {
            e.on_gaze(960.0, 50.0, t as f64);
        }
        assert_eq!(e.effectors().scroll_count(ScrollDirection::Up), 1);
        assert_eq!(e.effectors().menu_actions, vec![MenuAction::Pause, MenuAction::Resume]);
    }

    #[test]
    fn test_calibration_consumes_samples() {
        let mut e = engine();
        e.on_gaze(960.0, 540.0, 0.0);
        e.start_calibration(Some(ConfirmMode::AutoDwell), 0.0);
        assert!(e.calibration().is_running());

        // Fixation in the top band drives calibration, not scrolling
        for t in (0..=1000).step_by(50) {
            e.on_gaze(960.0, 50.0, t as f64);
        }
        assert!(e.effectors().scrolls.is_empty());
        assert_eq!(e.effectors().statuses_named("calibration-started").len(), 1);
    }

    #[test]
    fn test_silent_estimator_never_confirms_auto_target() {
        let mut e = engine();
        e.on_gaze(960.0, 540.0, 0.0);
        e.start_calibration(Some(ConfirmMode::AutoDwell), 0.0);
        e.on_gaze(960.0, 540.0, 0.0);
        for t in (50..=1500).step_by(50) {
            e.tick(t as f64);
        }
        assert!(e.effectors().calibration_samples.is_empty());
        assert!(e.effectors().statuses_named("calibration-point-accepted").is_empty());
        assert_eq!(e.calibration().progress(), Some((0, 9)));
    }

    #[test]
    fn test_silent_estimator_hold_window_is_empty() {
        let mut e = engine();
        e.on_gaze(960.0, 540.0, 0.0);
        e.start_calibration(Some(ConfirmMode::ExplicitHold), 0.0);
        e.tick(50.0);
        e.begin_calibration_hold(60.0);
        for t in (100..=1600).step_by(50) {
            e.tick(t as f64);
        }
        assert!(e.effectors().calibration_samples.is_empty());
        assert_eq!(e.effectors().statuses_named("calibration-point-empty").len(), 1);
        assert!(e.effectors().statuses_named("calibration-point-accepted").is_empty());
    }

    #[test]
    fn test_no_signal_reported_on_tick() {
        let mut e = engine();
        e.on_gaze(960.0, 540.0, 0.0);
        e.tick(2999.0);
        assert!(e.effectors().statuses_named("no-signal").is_empty());
        e.tick(3000.0);
        e.tick(4000.0);
        assert_eq!(e.effectors().statuses_named("no-signal").len(), 1);
        assert!(e.status_sexp().contains(":signal :lost"));
    }

    #[test]
    fn test_exit_terminates_session() {
        let mut e = engine();
        e.handle_menu_action(MenuAction::Exit, 0.0);
        assert!(e.session().is_terminated());
        for t in (0..=1000).step_by(100) {
            e.on_gaze(960.0, 50.0, t as f64);
        }
        assert!(e.effectors().scrolls.is_empty());
        assert_eq!(e.effectors().statuses_named("session-exit").len(), 1);
    }

    #[test]
    fn test_hot_reload_amount() {
        let mut e = engine();
        let mut c = config();
        c.scroll.amount_per_fire = 240;
        e.apply_config(c);
        for t in (0..=500).step_by(100) {
            e.on_gaze(1900.0, 540.0, t as f64);
        }
        assert_eq!(e.effectors().scrolls, vec![(ScrollDirection::Right, 240)]);
    }
}
