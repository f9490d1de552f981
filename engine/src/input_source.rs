//! Scripted input for replay and integration testing.
//!
//! `InputEvent` covers everything a host or estimator can feed an engine.
//! Traces are one s-expression per line; `;` starts a comment.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

use crate::action::MenuAction;
use crate::gaze::calibration::ConfirmMode;
use crate::gaze::zone_dwell::ScrollLimits;
use crate::sexp::{bool_sexp, form_args, get_bool, get_float, get_keyword, head_keyword};

/// One input step.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Estimator gaze position in viewport pixels.
    Gaze { x: f64, y: f64 },
    /// Estimator tick without a usable position.
    GazeLost,
    Face { detected: bool },
    Viewport { width: f64, height: f64 },
    ScrollLimits(ScrollLimits),
    CalibrateStart { mode: Option<ConfirmMode> },
    /// Pointer-down on the current calibration target.
    CalibrateHold,
    /// Host-side menu button.
    MenuAction(MenuAction),
    /// Let time pass (host ticks keep running).
    Wait { duration: Duration },
}

impl InputEvent {
    /// Parse one trace form.
    pub fn from_sexp(raw: &str) -> anyhow::Result<Self> {
        let value = lexpr::from_str(raw).map_err(|e| anyhow!("malformed s-expression: {}", e))?;
        let head = head_keyword(&value).ok_or_else(|| anyhow!("missing leading keyword"))?;
        let args = form_args(&value);
        let float = |key: &str| {
            get_float(args, key).ok_or_else(|| anyhow!("{}: missing or invalid :{}", head, key))
        };

        let event = match head.as_str() {
            "wait" => {
                let ms = get_float(&value, "wait")
                    .ok_or_else(|| anyhow!("wait: missing or invalid duration"))?;
                if !(ms >= 0.0) {
                    bail!("wait: negative duration {}", ms);
                }
                Self::Wait {
                    duration: Duration::from_micros((ms * 1000.0).round() as u64),
                }
            }
            "gaze" => Self::Gaze {
                x: float("x")?,
                y: float("y")?,
            },
            "gaze-lost" => Self::GazeLost,
            "face" => Self::Face {
                detected: get_bool(args, "detected").unwrap_or(true),
            },
            "viewport" => Self::Viewport {
                width: float("width")?,
                height: float("height")?,
            },
            "scroll-limits" => Self::ScrollLimits(ScrollLimits {
                up: get_bool(args, "up").unwrap_or(true),
                down: get_bool(args, "down").unwrap_or(true),
                right: get_bool(args, "right").unwrap_or(true),
            }),
            "calibrate-start" => {
                let mode = match get_keyword(args, "mode") {
                    Some(m) => Some(
                        ConfirmMode::from_str(&m)
                            .ok_or_else(|| anyhow!("unknown calibration mode: {}", m))?,
                    ),
                    None => None,
                };
                Self::CalibrateStart { mode }
            }
            "calibrate-hold" => Self::CalibrateHold,
            "menu-action" => {
                let name = get_keyword(args, "action")
                    .ok_or_else(|| anyhow!("menu-action: missing :action"))?;
                Self::MenuAction(
                    MenuAction::from_str(&name).ok_or_else(|| anyhow!("unknown menu action: {}", name))?,
                )
            }
            other => bail!("unknown trace entry: {}", other),
        };
        Ok(event)
    }

    /// Render as a trace form.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Gaze { x, y } => format!("(:gaze :x {} :y {})", x, y),
            Self::GazeLost => "(:gaze-lost)".to_string(),
            Self::Face { detected } => format!("(:face :detected {})", bool_sexp(*detected)),
            Self::Viewport { width, height } => {
                format!("(:viewport :width {} :height {})", width, height)
            }
            Self::ScrollLimits(l) => format!(
                "(:scroll-limits :up {} :down {} :right {})",
                bool_sexp(l.up),
                bool_sexp(l.down),
                bool_sexp(l.right)
            ),
            Self::CalibrateStart { mode: Some(m) } => {
                format!("(:calibrate-start :mode :{})", m.as_str())
            }
            Self::CalibrateStart { mode: None } => "(:calibrate-start)".to_string(),
            Self::CalibrateHold => "(:calibrate-hold)".to_string(),
            Self::MenuAction(a) => format!("(:menu-action :action :{})", a.as_str()),
            Self::Wait { duration } => format!("(:wait {})", duration.as_millis()),
        }
    }
}

/// Parse a whole trace. Blank lines and `;` comments are skipped.
pub fn parse_trace(text: &str) -> anyhow::Result<Vec<InputEvent>> {
    let mut events = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = match line.find(';') {
            Some(i) => &line[..i],
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let event = InputEvent::from_sexp(line).with_context(|| format!("trace line {}", lineno + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Source of input events.
pub trait InputProvider: Send {
    /// Get the next input event, if any.
    fn next_event(&mut self) -> Option<InputEvent>;
    /// Whether there are more events to deliver.
    fn has_events(&self) -> bool;
}

/// Delivers events from a pre-defined queue.
pub struct ScriptedInputProvider {
    events: VecDeque<InputEvent>,
}

impl ScriptedInputProvider {
    pub fn new(events: Vec<InputEvent>) -> Self {
        Self {
            events: VecDeque::from(events),
        }
    }

    /// Load a trace file.
    pub fn from_trace_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read trace {}", path.display()))?;
        let events = parse_trace(&text).with_context(|| format!("invalid trace {}", path.display()))?;
        Ok(Self::new(events))
    }

    /// Append `(:gaze)` samples at a fixed interval for `duration_ms`,
    /// starting with a sample at the current time.
    pub fn gaze_hold(mut self, x: f64, y: f64, duration_ms: u64, interval_ms: u64) -> Self {
        let interval_ms = interval_ms.max(1);
        let mut elapsed = 0;
        loop {
            self.events.push_back(InputEvent::Gaze { x, y });
            if elapsed + interval_ms > duration_ms {
                break;
            }
            self.events.push_back(InputEvent::Wait {
                duration: Duration::from_millis(interval_ms),
            });
            elapsed += interval_ms;
        }
        self
    }

    pub fn then(mut self, event: InputEvent) -> Self {
        self.events.push_back(event);
        self
    }

    pub fn wait_ms(self, ms: u64) -> Self {
        self.then(InputEvent::Wait {
            duration: Duration::from_millis(ms),
        })
    }

    /// Number of remaining events.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl InputProvider for ScriptedInputProvider {
    fn next_event(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}

/// A recording wrapper that logs all events from an inner provider.
pub struct RecordingProvider<P: InputProvider> {
    inner: P,
    recorded: Vec<InputEvent>,
}

impl<P: InputProvider> RecordingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }

    pub fn recorded(&self) -> &[InputEvent] {
        &self.recorded
    }

    /// Recorded events as a trace, loadable by `parse_trace`.
    pub fn to_trace(&self) -> String {
        let mut out = String::new();
        for event in &self.recorded {
            out.push_str(&event.to_sexp());
            out.push('\n');
        }
        out
    }

    pub fn into_recorded(self) -> Vec<InputEvent> {
        self.recorded
    }
}

impl<P: InputProvider> InputProvider for RecordingProvider<P> {
    fn next_event(&mut self) -> Option<InputEvent> {
        let event = self.inner.next_event()?;
        self.recorded.push(event.clone());
        Some(event)
    }

    fn has_events(&self) -> bool {
        self.inner.has_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_entries() {
        let trace = "\
; top band dwell
(:viewport :width 1280 :height 720)
(:gaze :x 640 :y 40)   ; inline comment

(:wait 100)
(:gaze-lost)
(:face :detected nil)
(:scroll-limits :up t :down nil :right t)
(:calibrate-start :mode :auto)
(:calibrate-hold)
(:menu-action :action :pause)
";
        let events = parse_trace(trace).unwrap();
        assert_eq!(events.len(), 9);
        assert_eq!(events[0], InputEvent::Viewport { width: 1280.0, height: 720.0 });
        assert_eq!(events[1], InputEvent::Gaze { x: 640.0, y: 40.0 });
        assert_eq!(events[2], InputEvent::Wait { duration: Duration::from_millis(100) });
        assert_eq!(events[4], InputEvent::Face { detected: false });
        assert_eq!(
            events[5],
            InputEvent::ScrollLimits(ScrollLimits { up: true, down: false, right: true })
        );
        assert_eq!(events[6], InputEvent::CalibrateStart { mode: Some(ConfirmMode::AutoDwell) });
        assert_eq!(events[8], InputEvent::MenuAction(MenuAction::Pause));
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = parse_trace("(:wait 10)\n(:gaze :x 1)\n").unwrap_err();
        assert!(format!("{:#}", err).contains("trace line 2"));
        assert!(parse_trace("(:teleport)").is_err());
        assert!(parse_trace("(:calibrate-start :mode :blink)").is_err());
    }

    #[test]
    fn test_sexp_reparses() {
        let events = vec![
            InputEvent::Gaze { x: 12.5, y: 40.0 },
            InputEvent::CalibrateStart { mode: None },
            InputEvent::Wait { duration: Duration::from_millis(250) },
            InputEvent::MenuAction(MenuAction::Recalibrate),
        ];
        for e in events {
            assert_eq!(InputEvent::from_sexp(&e.to_sexp()).unwrap(), e);
        }
    }

    #[test]
    fn test_gaze_hold_builder() {
        let provider = ScriptedInputProvider::new(vec![]).gaze_hold(10.0, 20.0, 300, 100);
        // 4 samples at 0, 100, 200, 300 with 3 waits between
        assert_eq!(provider.remaining(), 7);
    }

    #[test]
    fn test_recording_provider() {
        let scripted = ScriptedInputProvider::new(vec![InputEvent::GazeLost]).wait_ms(50);
        let mut recording = RecordingProvider::new(scripted);
        while recording.next_event().is_some() {}
        assert!(!recording.has_events());
        assert_eq!(recording.to_trace(), "(:gaze-lost)\n(:wait 50)\n");
        assert_eq!(recording.into_recorded().len(), 2);
    }
}
