//! Deterministic replay of input traces against a single engine.
//!
//! Time is driven by a `TestClock`: `(:wait N)` advances it in host-tick
//! steps, calling `InteractionEngine::tick` after each step, so replaying
//! the same trace always produces the same effects.

use std::path::Path;

use tracing::info;

use crate::action::{CalibrationSink, Effectors, RecordingEffectors};
use crate::clock::{Clock, TestClock};
use crate::config::EngineConfig;
use crate::gaze::engine::InteractionEngine;
use crate::gaze::zone_dwell::Viewport;
use crate::input_source::{InputEvent, InputProvider, ScriptedInputProvider};
use crate::ipc::outbound;
use crate::session::SharedSession;

/// Feed one event to an engine at the clock's current time.
pub fn apply_event<E: Effectors + CalibrationSink>(
    engine: &mut InteractionEngine<E>,
    event: &InputEvent,
    clock: &TestClock,
    tick_ms: f64,
) {
    let now = clock.now_ms();
    match event {
        InputEvent::Gaze { x, y } => engine.on_gaze(*x, *y, now),
        InputEvent::GazeLost => engine.on_gaze_lost(now),
        InputEvent::Face { detected } => engine.set_face_detected(*detected, now),
        InputEvent::Viewport { width, height } => engine.set_viewport(Viewport::new(*width, *height)),
        InputEvent::ScrollLimits(limits) => engine.set_scroll_limits(*limits),
        InputEvent::CalibrateStart { mode } => engine.start_calibration(*mode, now),
        InputEvent::CalibrateHold => engine.begin_calibration_hold(now),
        InputEvent::MenuAction(action) => engine.handle_menu_action(*action, now),
        InputEvent::Wait { duration } => {
            let mut remaining = duration.as_secs_f64() * 1000.0;
            let step = tick_ms.max(1.0);
            while remaining > 0.0 {
                let dt = remaining.min(step);
                clock.advance_ms(dt);
                engine.tick(clock.now_ms());
                remaining -= dt;
            }
        }
    }
}

/// Drain a provider into an engine. Returns the number of events applied.
pub fn drive<E, P>(
    engine: &mut InteractionEngine<E>,
    provider: &mut P,
    clock: &TestClock,
    tick_ms: f64,
) -> usize
where
    E: Effectors + CalibrationSink,
    P: InputProvider,
{
    let mut applied = 0;
    while let Some(event) = provider.next_event() {
        apply_event(engine, &event, clock, tick_ms);
        applied += 1;
    }
    applied
}

/// Replay a trace file against a fresh engine with recording effectors.
pub fn replay_file(
    path: &Path,
    config: EngineConfig,
    tick_ms: f64,
) -> anyhow::Result<InteractionEngine<RecordingEffectors>> {
    let mut provider = ScriptedInputProvider::from_trace_file(path)?;
    let clock = TestClock::new();
    let mut engine = InteractionEngine::new(config, RecordingEffectors::new(), SharedSession::new(), 0.0);
    let applied = drive(&mut engine, &mut provider, &clock, tick_ms);
    info!(
        path = %path.display(),
        events = applied,
        end_ms = clock.now_ms(),
        "replay finished"
    );
    Ok(engine)
}

/// Effects recorded during a replay, as IPC event s-expressions.
pub fn effect_lines(effectors: &RecordingEffectors) -> Vec<String> {
    let mut lines = Vec::new();
    for (direction, amount) in &effectors.scrolls {
        lines.push(outbound::scroll_event(None, *direction, *amount));
    }
    for action in &effectors.menu_actions {
        lines.push(outbound::menu_action_event(None, *action));
    }
    for (x, y) in &effectors.calibration_samples {
        lines.push(outbound::calibration_sample_event(*x, *y));
    }
    for status in &effectors.statuses {
        lines.push(status.to_sexp());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ScrollDirection;

    #[test]
    fn test_wait_ticks_engine() {
        let clock = TestClock::new();
        let mut engine = InteractionEngine::new(
            EngineConfig::default(),
            RecordingEffectors::new(),
            SharedSession::new(),
            0.0,
        );
        let mut provider = ScriptedInputProvider::new(vec![]).wait_ms(3200);
        drive(&mut engine, &mut provider, &clock, 50.0);
        assert_eq!(clock.now_ms(), 3200.0);
        assert_eq!(engine.effectors().statuses_named("no-signal").len(), 1);
    }

    #[test]
    fn test_replay_file_and_effect_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.sexp");
        let mut trace = String::from("; dwell in the right band\n");
        for _ in 0..12 {
            trace.push_str("(:gaze :x 1900 :y 300)\n(:wait 50)\n");
        }
        std::fs::write(&path, trace).unwrap();

        let mut config = EngineConfig::default();
        config.smoothing.ema_alpha = 1.0;
        let engine = replay_file(&path, config, 50.0).unwrap();
        assert_eq!(engine.effectors().scroll_count(ScrollDirection::Right), 1);

        let lines = effect_lines(engine.effectors());
        assert!(lines[0].starts_with("(:type :event :event :scroll :direction :right"));
        assert!(lines.iter().any(|l| l.contains(":tracking-active")));
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replay_file(&dir.path().join("none.sexp"), EngineConfig::default(), 50.0).is_err());
    }
}
