//! Gaze interaction core.
//!
//! Pure state machines driven by conditioned gaze samples and explicit
//! timestamps. Nothing in here performs I/O.

pub mod calibration;
pub mod engine;
pub mod radial_menu;
pub mod signal;
pub mod zone_dwell;

pub use calibration::{CalibrationPhase, CalibrationSequencer, ConfirmMode};
pub use engine::InteractionEngine;
pub use radial_menu::{MenuEvent, MenuLayout, RadialMenu};
pub use signal::{GazePoint, GazeSample, GazeSmoother, SignalMonitor};
pub use zone_dwell::{ScrollLimits, Viewport, ZoneDwellEngine};
