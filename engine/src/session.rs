//! Session flags shared between engines.
//!
//! Pause, calibration and termination are per user, not per surface: every
//! engine consuming the same gaze stream holds a clone of one handle.

use std::sync::Arc;

use parking_lot::RwLock;

/// Flags visible to every engine of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFlags {
    /// Zone scrolling enabled (false while paused).
    pub tracking_enabled: bool,
    /// At least one calibration completed.
    pub calibrated: bool,
    /// Exit requested; engines ignore further input.
    pub terminated: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            calibrated: false,
            terminated: false,
        }
    }
}

/// Cloneable handle to the session flags.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<RwLock<SessionFlags>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> SessionFlags {
        *self.inner.read()
    }

    pub fn tracking_enabled(&self) -> bool {
        self.inner.read().tracking_enabled
    }

    pub fn is_calibrated(&self) -> bool {
        self.inner.read().calibrated
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.read().terminated
    }

    /// Returns the previous value.
    pub fn set_tracking_enabled(&self, enabled: bool) -> bool {
        std::mem::replace(&mut self.inner.write().tracking_enabled, enabled)
    }

    pub fn set_calibrated(&self, calibrated: bool) {
        self.inner.write().calibrated = calibrated;
    }

    pub fn terminate(&self) {
        self.inner.write().terminated = true;
    }

    /// Generate IPC session s-expression.
    pub fn to_sexp(&self) -> String {
        let f = self.flags();
        let b = |v: bool| if v { "t" } else { "nil" };
        format!(
            "(:tracking {} :calibrated {} :terminated {})",
            b(f.tracking_enabled),
            b(f.calibrated),
            b(f.terminated)
        )
    }
}
