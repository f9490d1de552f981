//! Calibration sequencing.
//!
//! `Idle → Pending → Active(i) → … → Completed`. A request made before the
//! readiness gate opens waits in `Pending` and is force-started after a
//! bounded timeout. Each target is confirmed either by an auto-dwell
//! fixation or by an explicit hold window; training pairs are handed to the
//! estimator as `(target_x, target_y)` in viewport pixels.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::signal::GazePoint;
use super::zone_dwell::Viewport;
use crate::action::StatusEvent;
use crate::config::CalibrationConfig;

// ── Mode ───────────────────────────────────────────────────

/// How a target is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmMode {
    /// Gaze held near the target for `autoHoldMs`.
    #[serde(rename = "auto")]
    AutoDwell,
    /// Pointer-down opens a `holdMs` recording window.
    #[serde(rename = "hold")]
    ExplicitHold,
}

impl ConfirmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoDwell => "auto",
            Self::ExplicitHold => "hold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auto" | "auto-dwell" => Some(Self::AutoDwell),
            "hold" | "explicit-hold" => Some(Self::ExplicitHold),
            _ => None,
        }
    }
}

/// Normalized target positions: centre and corners, then edge midpoints.
pub fn target_sequence(count: usize) -> Vec<(f64, f64)> {
    let mut targets = vec![(0.5, 0.5), (0.1, 0.1), (0.9, 0.1), (0.1, 0.9), (0.9, 0.9)];
    if count >= 9 {
        targets.extend([(0.5, 0.1), (0.9, 0.5), (0.5, 0.9), (0.1, 0.5)]);
    }
    targets
}

// ── Session ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationPhase {
    Idle,
    Pending { requested_at: f64, deadline: f64 },
    Active,
    Completed,
}

impl CalibrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending { .. } => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// One run through the target sequence.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    pub mode: ConfirmMode,
    pub targets: Vec<(f64, f64)>,
    pub target_index: usize,
    /// Start of the explicit-hold window, if one is open.
    pub hold_started_at: Option<f64>,
    /// Start of the current auto-dwell fixation.
    pub fixation_started_at: Option<f64>,
    pub samples_for_target: u32,
    pub attempts_for_target: u32,
    /// Interval slots already counted and recorded in the open window.
    last_attempt_slot: Option<u64>,
    last_record_slot: Option<u64>,
    pub target_shown_at: f64,
    pub empty_points: Vec<usize>,
    pub forced: bool,
    completion_notified: bool,
}

impl CalibrationSession {
    fn new(mode: ConfirmMode, target_count: usize) -> Self {
        Self {
            mode,
            targets: target_sequence(target_count),
            target_index: 0,
            hold_started_at: None,
            fixation_started_at: None,
            samples_for_target: 0,
            attempts_for_target: 0,
            last_attempt_slot: None,
            last_record_slot: None,
            target_shown_at: 0.0,
            empty_points: Vec::new(),
            forced: false,
            completion_notified: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.target_index >= self.targets.len()
    }

    fn reset_target(&mut self, now_ms: f64) {
        self.hold_started_at = None;
        self.fixation_started_at = None;
        self.samples_for_target = 0;
        self.attempts_for_target = 0;
        self.last_attempt_slot = None;
        self.last_record_slot = None;
        self.target_shown_at = now_ms;
    }
}

// ── Events ─────────────────────────────────────────────────

/// Output of the sequencer, applied in order by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    Pending { timeout_ms: f64 },
    Started { total: usize, forced: bool },
    TargetShown { index: usize, total: usize, x: f64, y: f64 },
    /// Hand one training pair to the estimator.
    RecordSample { x: f64, y: f64 },
    PointAccepted { index: usize, samples: u32, attempts: u32 },
    PointEmpty { index: usize, attempts: u32 },
    Completed { total: usize, empty_points: usize },
}

impl CalibrationEvent {
    /// Host-facing status for this event. `RecordSample` goes to the
    /// estimator instead.
    pub fn to_status(&self) -> Option<StatusEvent> {
        Some(match *self {
            Self::Pending { timeout_ms } => StatusEvent::CalibrationPending { timeout_ms },
            Self::Started { total, forced } => StatusEvent::CalibrationStarted { total, forced },
            Self::TargetShown { index, total, x, y } => {
                StatusEvent::CalibrationTarget { index, total, x, y }
            }
            Self::RecordSample { .. } => return None,
            Self::PointAccepted {
                index,
                samples,
                attempts,
            } => StatusEvent::CalibrationPointAccepted {
                index,
                samples,
                attempts,
            },
            Self::PointEmpty { index, attempts } => {
                StatusEvent::CalibrationPointEmpty { index, attempts }
            }
            Self::Completed {
                total,
                empty_points,
            } => StatusEvent::CalibrationCompleted {
                total,
                empty_points,
            },
        })
    }
}

// ── Sequencer ──────────────────────────────────────────────

pub struct CalibrationSequencer {
    pub config: CalibrationConfig,
    pub viewport: Viewport,
    phase: CalibrationPhase,
    session: Option<CalibrationSession>,
}

impl CalibrationSequencer {
    pub fn new(config: &CalibrationConfig, viewport: Viewport) -> Self {
        Self {
            config: config.clone(),
            viewport,
            phase: CalibrationPhase::Idle,
            session: None,
        }
    }

    /// New parameters apply to the next session.
    pub fn reconfigure(&mut self, config: &CalibrationConfig) {
        self.config = config.clone();
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    /// Whether samples belong to calibration rather than interaction.
    pub fn is_running(&self) -> bool {
        matches!(
            self.phase,
            CalibrationPhase::Pending { .. } | CalibrationPhase::Active
        )
    }

    /// `(target_index, total)` of the current session.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.session
            .as_ref()
            .map(|s| (s.target_index.min(s.targets.len()), s.targets.len()))
    }

    /// Pixel position of the current target.
    pub fn current_target(&self) -> Option<GazePoint> {
        let s = self.session.as_ref()?;
        let (nx, ny) = *s.targets.get(s.target_index)?;
        Some(GazePoint::new(nx * self.viewport.width, ny * self.viewport.height))
    }

    /// Request a new session. Any session in progress is abandoned.
    pub fn request(&mut self, mode: Option<ConfirmMode>, now_ms: f64, gate_open: bool) -> Vec<CalibrationEvent> {
        if self.is_running() {
            info!("calibration restarted, abandoning session in progress");
        }
        let mode = mode.unwrap_or(self.config.mode);
        self.session = Some(CalibrationSession::new(mode, self.config.target_count));

        let mut events = Vec::new();
        if gate_open {
            self.start(now_ms, false, &mut events);
        } else {
            let timeout_ms = self.config.force_start_timeout_ms as f64;
            self.phase = CalibrationPhase::Pending {
                requested_at: now_ms,
                deadline: now_ms + timeout_ms,
            };
            info!(mode = mode.as_str(), timeout_ms, "calibration pending, waiting for signal");
            events.push(CalibrationEvent::Pending { timeout_ms });
        }
        events
    }

    /// Drop the current session without completing it.
    pub fn abandon(&mut self) {
        if self.is_running() {
            info!("calibration abandoned");
        }
        self.phase = CalibrationPhase::Idle;
        self.session = None;
    }

    /// Pointer-down on the current target: open a recording window.
    pub fn begin_hold(&mut self, point: Option<GazePoint>, now_ms: f64) -> Vec<CalibrationEvent> {
        let mut events = Vec::new();
        if self.phase != CalibrationPhase::Active {
            return events;
        }
        let Some(session) = self.session.as_mut() else {
            return events;
        };
        if session.mode != ConfirmMode::ExplicitHold || session.hold_started_at.is_some() {
            return events;
        }
        debug!(index = session.target_index, "hold window opened");
        session.hold_started_at = Some(now_ms);
        self.record_hold(point, now_ms, &mut events);
        events
    }

    /// Advance on an estimator sample. `point` is the sample's conditioned
    /// position, `None` if it was unusable.
    pub fn update(&mut self, point: Option<GazePoint>, now_ms: f64, gate_open: bool) -> Vec<CalibrationEvent> {
        let mut events = Vec::new();
        match self.advance_pending(now_ms, gate_open, &mut events) {
            Some(ConfirmMode::ExplicitHold) => self.record_hold(point, now_ms, &mut events),
            Some(ConfirmMode::AutoDwell) => self.auto_dwell(point, now_ms, &mut events),
            None => {}
        }
        events
    }

    /// Advance on a host tick. Only deadlines move: force-start, hold
    /// window end and point timeout. Nothing is recorded or fixated.
    pub fn tick(&mut self, now_ms: f64, gate_open: bool) -> Vec<CalibrationEvent> {
        let mut events = Vec::new();
        match self.advance_pending(now_ms, gate_open, &mut events) {
            Some(ConfirmMode::ExplicitHold) => self.record_hold(None, now_ms, &mut events),
            Some(ConfirmMode::AutoDwell) => self.check_point_timeout(now_ms, &mut events),
            None => {}
        }
        events
    }

    /// Start a pending session if it may start. Returns the session mode
    /// when a target is active.
    fn advance_pending(&mut self, now_ms: f64, gate_open: bool, events: &mut Vec<CalibrationEvent>) -> Option<ConfirmMode> {
        if let CalibrationPhase::Pending { deadline, .. } = self.phase {
            if gate_open {
                self.start(now_ms, false, events);
            } else if now_ms >= deadline {
                warn!("no gaze signal before timeout, force-starting calibration");
                self.start(now_ms, true, events);
            } else {
                return None;
            }
        }
        if self.phase != CalibrationPhase::Active {
            return None;
        }
        self.session.as_ref().map(|s| s.mode)
    }

    fn start(&mut self, now_ms: f64, forced: bool, events: &mut Vec<CalibrationEvent>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.forced = forced;
        session.reset_target(now_ms);
        self.phase = CalibrationPhase::Active;
        let total = session.targets.len();
        info!(total, forced, mode = session.mode.as_str(), "calibration started");
        events.push(CalibrationEvent::Started { total, forced });
        self.show_target(events);
    }

    fn show_target(&self, events: &mut Vec<CalibrationEvent>) {
        if let (Some(s), Some(target)) = (self.session.as_ref(), self.current_target()) {
            events.push(CalibrationEvent::TargetShown {
                index: s.target_index,
                total: s.targets.len(),
                x: target.x,
                y: target.y,
            });
        }
    }

    fn record_hold(&mut self, point: Option<GazePoint>, now_ms: f64, events: &mut Vec<CalibrationEvent>) {
        let Some(target) = self.current_target() else {
            return;
        };
        let hold_ms = self.config.hold_ms as f64;
        let interval_ms = self.config.sample_interval_ms.max(1) as f64;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(started) = session.hold_started_at else {
            return;
        };

        let elapsed = now_ms - started;
        if elapsed >= hold_ms {
            self.finish_target(now_ms, events);
            return;
        }

        let slot = (elapsed.max(0.0) / interval_ms) as u64;
        if session.last_attempt_slot != Some(slot) {
            session.last_attempt_slot = Some(slot);
            session.attempts_for_target += 1;
        }
        if point.is_some() && session.last_record_slot != Some(slot) {
            session.last_record_slot = Some(slot);
            session.samples_for_target += 1;
            events.push(CalibrationEvent::RecordSample {
                x: target.x,
                y: target.y,
            });
        }
    }

    fn auto_dwell(&mut self, point: Option<GazePoint>, now_ms: f64, events: &mut Vec<CalibrationEvent>) {
        let Some(target) = self.current_target() else {
            return;
        };
        let radius = self.config.auto_radius_px;
        let hold_ms = self.config.auto_hold_ms as f64;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match point {
            Some(p) if p.distance_to(target) <= radius => {
                let started = match session.fixation_started_at {
                    Some(t) => t,
                    None => {
                        session.fixation_started_at = Some(now_ms);
                        session.attempts_for_target += 1;
                        now_ms
                    }
                };
                if now_ms - started >= hold_ms {
                    session.samples_for_target += 1;
                    events.push(CalibrationEvent::RecordSample {
                        x: target.x,
                        y: target.y,
                    });
                    self.finish_target(now_ms, events);
                    return;
                }
            }
            _ => session.fixation_started_at = None,
        }
        self.check_point_timeout(now_ms, events);
    }

    fn check_point_timeout(&mut self, now_ms: f64, events: &mut Vec<CalibrationEvent>) {
        let timeout_ms = self.config.point_timeout_ms as f64;
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if timeout_ms > 0.0 && now_ms - session.target_shown_at >= timeout_ms {
            warn!(index = session.target_index, "calibration target timed out");
            self.finish_target(now_ms, events);
        }
    }

    /// Close the current target and advance.
    fn finish_target(&mut self, now_ms: f64, events: &mut Vec<CalibrationEvent>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let index = session.target_index;
        let attempts = session.attempts_for_target;
        if session.samples_for_target > 0 {
            debug!(index, samples = session.samples_for_target, "calibration point accepted");
            events.push(CalibrationEvent::PointAccepted {
                index,
                samples: session.samples_for_target,
                attempts,
            });
        } else {
            warn!(index, attempts, "no signal captured for calibration point");
            session.empty_points.push(index);
            events.push(CalibrationEvent::PointEmpty { index, attempts });
        }

        session.target_index += 1;
        session.reset_target(now_ms);

        if session.is_complete() {
            self.phase = CalibrationPhase::Completed;
            if !session.completion_notified {
                session.completion_notified = true;
                let total = session.targets.len();
                let empty_points = session.empty_points.len();
                info!(total, empty_points, "calibration completed");
                events.push(CalibrationEvent::Completed {
                    total,
                    empty_points,
                });
            }
        } else {
            self.show_target(events);
        }
    }

    /// Generate IPC calibration status s-expression.
    pub fn status_sexp(&self) -> String {
        match self.session.as_ref() {
            Some(s) => format!(
                "(:phase :{} :mode :{} :index {} :total {} :samples {} :attempts {} :empty-points {} :forced {})",
                self.phase.as_str(),
                s.mode.as_str(),
                s.target_index.min(s.targets.len()),
                s.targets.len(),
                s.samples_for_target,
                s.attempts_for_target,
                s.empty_points.len(),
                if s.forced { "t" } else { "nil" },
            ),
            None => format!("(:phase :{})", self.phase.as_str()),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────
