//! Effectors that turn engine decisions into IPC events.
//!
//! Each surface engine owns one `SexpEffectors`. Events queue in outboxes
//! and are flushed to the owning host client and to estimator clients once
//! per event loop iteration.

use anyhow::bail;

use crate::action::{CalibrationSink, Effectors, MenuAction, ScrollDirection, StatusEvent};
use crate::sexp::format_event;

/// Wheel delta sent for a scroll: positive scrolls up. Horizontal scrolls
/// are a shifted wheel, so `right` shares the sign of `down`.
pub fn wheel_delta(direction: ScrollDirection, amount: i32) -> i32 {
    match direction {
        ScrollDirection::Up => amount,
        ScrollDirection::Down | ScrollDirection::Right => -amount,
    }
}

pub fn scroll_event(surface: Option<u64>, direction: ScrollDirection, amount: i32) -> String {
    let mut fields = Vec::new();
    if let Some(id) = surface {
        fields.push(("surface", id.to_string()));
    }
    let axis = match direction {
        ScrollDirection::Right => ":horizontal",
        _ => ":vertical",
    };
    fields.push(("direction", format!(":{}", direction.as_str())));
    fields.push(("amount", amount.to_string()));
    fields.push(("axis", axis.to_string()));
    fields.push(("delta", wheel_delta(direction, amount).to_string()));
    format_event("scroll", &fields)
}

pub fn menu_action_event(surface: Option<u64>, action: MenuAction) -> String {
    let mut fields = Vec::new();
    if let Some(id) = surface {
        fields.push(("surface", id.to_string()));
    }
    fields.push(("action", format!(":{}", action.as_str())));
    format_event("menu-action", &fields)
}

pub fn calibration_sample_event(x: f64, y: f64) -> String {
    format_event(
        "record-calibration-sample",
        &[("x", format!("{:.1}", x)), ("y", format!("{:.1}", y))],
    )
}

/// Queued IPC output of one surface engine.
#[derive(Debug)]
pub struct SexpEffectors {
    pub surface_id: u64,
    /// Events for the host client that owns the surface.
    pub host_outbox: Vec<String>,
    /// Events for every estimator client.
    pub estimator_outbox: Vec<String>,
    /// Whether any estimator is connected to receive training pairs.
    pub estimator_connected: bool,
}

impl SexpEffectors {
    pub fn new(surface_id: u64) -> Self {
        Self {
            surface_id,
            host_outbox: Vec::new(),
            estimator_outbox: Vec::new(),
            estimator_connected: false,
        }
    }

    pub fn take_host_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.host_outbox)
    }

    pub fn take_estimator_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.estimator_outbox)
    }
}

impl Effectors for SexpEffectors {
    fn scroll(&mut self, direction: ScrollDirection, amount: i32) -> anyhow::Result<()> {
        self.host_outbox
            .push(scroll_event(Some(self.surface_id), direction, amount));
        Ok(())
    }

    fn dispatch_menu_action(&mut self, action: MenuAction) -> anyhow::Result<()> {
        self.host_outbox
            .push(menu_action_event(Some(self.surface_id), action));
        Ok(())
    }

    fn report_status(&mut self, status: &StatusEvent) {
        self.host_outbox.push(status.to_sexp());
    }
}

impl CalibrationSink for SexpEffectors {
    fn record_calibration_sample(&mut self, screen_x: f64, screen_y: f64) -> anyhow::Result<()> {
        if !self.estimator_connected {
            bail!("no estimator connected");
        }
        self.estimator_outbox
            .push(calibration_sample_event(screen_x, screen_y));
        Ok(())
    }
}
