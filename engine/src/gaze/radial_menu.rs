//! Radial menu dwell selection.
//!
//! A hub anchored at the right edge expands a ring of four items. Each item
//! is selected by dwelling on it. Unlike edge zones, selection is one-shot:
//! after a fire the item is latched until the gaze moves off it.

use tracing::{debug, info};

use super::signal::GazePoint;
use super::zone_dwell::Viewport;
use crate::action::MenuAction;
use crate::config::MenuConfig;

// ── Layout ─────────────────────────────────────────────────

/// Hit-test geometry in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MenuLayout {
    pub center: GazePoint,
    pub hub_radius: f64,
    /// Distance from the centre to each item centre.
    pub ring_radius: f64,
    pub item_radius: f64,
}

impl MenuLayout {
    pub fn new(config: &MenuConfig, viewport: Viewport) -> Self {
        Self {
            center: GazePoint::new(viewport.width - config.right_inset_px, viewport.height / 2.0),
            hub_radius: config.hub_radius_px,
            ring_radius: config.hub_radius_px + config.ring_gap_px,
            item_radius: config.item_radius_px,
        }
    }

    /// Item centre, clockwise from 12 o'clock in `MenuAction::ALL` order.
    pub fn item_center(&self, index: usize) -> GazePoint {
        let angle = (index as f64 * 90.0 - 90.0).to_radians();
        GazePoint::new(
            self.center.x + self.ring_radius * angle.cos(),
            self.center.y + self.ring_radius * angle.sin(),
        )
    }

    /// Radius of the circle enclosing hub and items.
    pub fn outer_radius(&self) -> f64 {
        self.ring_radius + self.item_radius
    }

    pub fn in_hub(&self, p: GazePoint) -> bool {
        p.distance_to(self.center) <= self.hub_radius
    }

    pub fn item_at(&self, p: GazePoint) -> Option<MenuAction> {
        MenuAction::ALL
            .iter()
            .enumerate()
            .find(|(i, _)| p.distance_to(self.item_center(*i)) <= self.item_radius)
            .map(|(_, a)| *a)
    }

    /// Whether the point belongs to the menu. Items count only when expanded.
    pub fn contains(&self, p: GazePoint, expanded: bool) -> bool {
        if expanded {
            p.distance_to(self.center) <= self.outer_radius()
        } else {
            self.in_hub(p)
        }
    }
}

// ── State ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MenuHoverState {
    pub hovered_action: Option<MenuAction>,
    pub hover_started_at: f64,
}

/// Presentation and selection events from one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuEvent {
    Expanded,
    Collapsed,
    HoverChanged(Option<MenuAction>),
    Selected(MenuAction),
}

impl MenuEvent {
    pub fn selected(&self) -> Option<MenuAction> {
        match self {
            Self::Selected(a) => Some(*a),
            _ => None,
        }
    }
}

/// One-shot dwell engine over the radial menu.
pub struct RadialMenu {
    pub enabled: bool,
    pub dwell_ms: f64,
    pub layout: MenuLayout,
    pub expanded: bool,
    hover: MenuHoverState,
    /// Item that fired and must be left before it can dwell again.
    latched: Option<MenuAction>,
}

impl RadialMenu {
    pub fn new(config: &MenuConfig, dwell_ms: u64, viewport: Viewport) -> Self {
        Self {
            enabled: config.enabled,
            dwell_ms: dwell_ms as f64,
            layout: MenuLayout::new(config, viewport),
            expanded: false,
            hover: MenuHoverState::default(),
            latched: None,
        }
    }

    pub fn reconfigure(&mut self, config: &MenuConfig, dwell_ms: u64, viewport: Viewport) {
        self.enabled = config.enabled;
        self.dwell_ms = dwell_ms as f64;
        self.layout = MenuLayout::new(config, viewport);
        if !self.enabled {
            self.collapse();
        }
    }

    /// Whether this point is captured by the menu, given the current state.
    pub fn captures(&self, p: GazePoint) -> bool {
        self.enabled && self.layout.contains(p, self.expanded)
    }

    /// Feed one conditioned point.
    pub fn on_sample(&mut self, p: GazePoint, now_ms: f64) -> Option<MenuEvent> {
        if !self.enabled {
            return None;
        }

        if self.expanded && p.distance_to(self.layout.center) > self.layout.outer_radius() {
            self.collapse();
            debug!("menu collapsed");
            return Some(MenuEvent::Collapsed);
        }
        if !self.expanded && self.layout.in_hub(p) {
            self.expanded = true;
            self.hover.hover_started_at = now_ms;
            debug!("menu expanded");
            return Some(MenuEvent::Expanded);
        }
        if !self.expanded {
            return None;
        }

        let target = self.layout.item_at(p);
        self.on_target(target, now_ms)
    }

    fn on_target(&mut self, target: Option<MenuAction>, now_ms: f64) -> Option<MenuEvent> {
        if let Some(latched) = self.latched {
            if target == Some(latched) {
                return None;
            }
            self.latched = None;
        }

        if target != self.hover.hovered_action {
            self.hover.hovered_action = target;
            self.hover.hover_started_at = now_ms;
            return Some(MenuEvent::HoverChanged(target));
        }

        let action = target?;
        if now_ms - self.hover.hover_started_at < self.dwell_ms {
            return None;
        }
        self.hover.hovered_action = None;
        self.hover.hover_started_at = now_ms;
        self.latched = Some(action);
        info!(action = action.as_str(), "menu item selected");
        Some(MenuEvent::Selected(action))
    }

    /// A tick without a usable sample: hover dwell is dropped.
    pub fn on_no_signal(&mut self, now_ms: f64) -> Option<MenuEvent> {
        if self.hover.hovered_action.take().is_some() {
            self.hover.hover_started_at = now_ms;
            return Some(MenuEvent::HoverChanged(None));
        }
        None
    }

    /// Discard all hover and latch state and close the ring.
    pub fn collapse(&mut self) {
        self.expanded = false;
        self.hover = MenuHoverState::default();
        self.latched = None;
    }

    pub fn hover(&self) -> &MenuHoverState {
        &self.hover
    }

    pub fn latched(&self) -> Option<MenuAction> {
        self.latched
    }

    pub fn dwell_progress(&self, now_ms: f64) -> f64 {
        if self.hover.hovered_action.is_none() || self.dwell_ms <= 0.0 {
            return 0.0;
        }
        ((now_ms - self.hover.hover_started_at) / self.dwell_ms).clamp(0.0, 1.0)
    }

    /// Generate IPC menu status s-expression.
    pub fn status_sexp(&self, now_ms: f64) -> String {
        format!(
            "(:enabled {} :expanded {} :hover {} :progress {:.2} :center-x {:.0} :center-y {:.0})",
            if self.enabled { "t" } else { "nil" },
            if self.expanded { "t" } else { "nil" },
            self.hover
                .hovered_action
                .map(|a| format!(":{}", a.as_str()))
                .unwrap_or_else(|| "nil".to_string()),
            self.dwell_progress(now_ms),
            self.layout.center.x,
            self.layout.center.y,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
