//! IPC message dispatch: parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, info, warn};

use super::server::ClientRole;
use crate::gaze::calibration::ConfirmMode;
use crate::gaze::zone_dwell::{ScrollLimits, Viewport};
use crate::action::MenuAction;
use crate::sexp::{
    error_response, get_bool, get_float, get_int, get_keyword, ok_response, ok_response_with,
    plist_pairs,
};
use crate::state::{DaemonState, SurfaceEngine};

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut DaemonState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    let is_authenticated = state
        .ipc_server
        .clients
        .get(&client_id)
        .map(|c| c.authenticated)
        .unwrap_or(false);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(state, msg_id, &value),
        // Estimator traffic: fire-and-forget
        Some(kind @ ("gaze" | "gaze-lost" | "face")) if role_of(state, client_id) != Some(ClientRole::Estimator) => {
            warn!(client_id, msg_type = kind, "gaze input from non-estimator client");
            Some(error_response(msg_id, &format!("{kind} requires :role :estimator")))
        }
        Some("gaze") => handle_gaze(state, &value),
        Some("gaze-lost") => {
            state.broadcast_gaze(None);
            None
        }
        Some("face") => {
            state.set_face_detected(get_bool(&value, "detected").unwrap_or(true));
            None
        }
        // Host surface lifecycle
        Some("surface-register") => handle_surface_register(state, client_id, msg_id, &value),
        Some("surface-resize") => handle_surface_resize(state, client_id, msg_id, &value),
        Some("scroll-limits") => handle_scroll_limits(state, client_id, msg_id, &value),
        // Calibration
        Some("calibrate-start") => handle_calibrate_start(state, client_id, msg_id, &value),
        Some("calibrate-hold") => handle_calibrate_hold(state, client_id, msg_id),
        Some("calibrate-status") => handle_calibrate_status(state, client_id, msg_id),
        Some("menu-action") => handle_menu_action(state, client_id, msg_id, &value),
        // Daemon
        Some("status") => Some(ok_response_with(msg_id, &format!(" {}", state.status_sexp()))),
        Some("config-get") => Some(ok_response_with(
            msg_id,
            &format!(" :config {}", state.config.to_sexp()),
        )),
        Some("config-set") => handle_config_set(state, msg_id, &value),
        Some("config-save") => handle_config_save(state, msg_id),
        Some(other) => {
            warn!(client_id, msg_type = other, "unknown message type");
            Some(error_response(msg_id, &format!("unknown message type: {other}")))
        }
        None => Some(error_response(msg_id, "missing :type")),
    }
}

// ── Handshake ──────────────────────────────────────────────

fn handle_hello(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // Only clients of the daemon's own user may connect.
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        if let Some(peer_uid) = client.peer_uid {
            let our_uid = unsafe { libc::getuid() };
            if peer_uid != our_uid {
                warn!(client_id, peer_uid, our_uid, "rejecting client: UID mismatch");
                return Some(error_response(msg_id, "authentication failed: UID mismatch"));
            }
        }
    }

    let role = match get_keyword(value, "role") {
        None => ClientRole::Host,
        Some(name) => match ClientRole::from_str(&name) {
            Some(role) => role,
            None => return Some(error_response(msg_id, &format!("unknown role: {name}"))),
        },
    };

    let Some(client) = state.ipc_server.clients.get_mut(&client_id) else {
        return Some(error_response(msg_id, "unknown client"));
    };
    client.authenticated = true;
    client.role = Some(role);
    info!(client_id, role = role.as_str(), "hello handshake (authenticated)");

    if role == ClientRole::Estimator {
        state.refresh_estimator_presence();
    }

    Some(format!(
        "(:type :hello :id {} :version 1 :server \"gaze-dwell\" :role :{})",
        msg_id,
        role.as_str()
    ))
}

fn handle_ping(state: &mut DaemonState, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = state.clock.unix_millis();

    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {})",
        msg_id, client_ts, server_ts
    ))
}

// ── Estimator input ────────────────────────────────────────

fn handle_gaze(state: &mut DaemonState, value: &Value) -> Option<String> {
    // Missing or nil coordinates mean the estimator had no prediction.
    let point = match (get_float(value, "x"), get_float(value, "y")) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };
    state.broadcast_gaze(point);
    None
}

// ── Surfaces ───────────────────────────────────────────────

fn role_of(state: &DaemonState, client_id: u64) -> Option<ClientRole> {
    state.ipc_server.clients.get(&client_id).and_then(|c| c.role)
}

fn viewport_from(state: &DaemonState, value: &Value) -> Result<Viewport, String> {
    let width = get_float(value, "width").unwrap_or(state.config.viewport.width);
    let height = get_float(value, "height").unwrap_or(state.config.viewport.height);
    if !(width > 0.0 && height > 0.0) {
        return Err(format!("invalid viewport: {width}x{height}"));
    }
    Ok(Viewport::new(width, height))
}

/// Run `f` against the surface engine owned by `client_id`.
fn with_surface<F>(state: &mut DaemonState, client_id: u64, msg_id: i64, f: F) -> Option<String>
where
    F: FnOnce(&mut SurfaceEngine, f64) -> Option<String>,
{
    let now = state.now_ms();
    match state.surfaces.get_mut(&client_id) {
        Some(engine) => f(engine, now),
        None => Some(error_response(msg_id, "surface not registered")),
    }
}

fn handle_surface_register(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    if role_of(state, client_id) != Some(ClientRole::Host) {
        return Some(error_response(msg_id, "surface-register requires :role :host"));
    }
    let viewport = match viewport_from(state, value) {
        Ok(v) => v,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    state.register_surface(client_id, viewport);
    Some(ok_response_with(msg_id, &format!(" :surface {}", client_id)))
}

fn handle_surface_resize(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let viewport = match viewport_from(state, value) {
        Ok(v) => v,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    with_surface(state, client_id, msg_id, |engine, _| {
        engine.set_viewport(viewport);
        Some(ok_response(msg_id))
    })
}

fn handle_scroll_limits(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let limits = ScrollLimits {
        up: get_bool(value, "up").unwrap_or(true),
        down: get_bool(value, "down").unwrap_or(true),
        right: get_bool(value, "right").unwrap_or(true),
    };
    with_surface(state, client_id, msg_id, |engine, _| {
        debug!(surface = client_id, ?limits, "scroll limits");
        engine.set_scroll_limits(limits);
        Some(ok_response(msg_id))
    })
}

// ── Calibration ────────────────────────────────────────────

fn handle_calibrate_start(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let mode = match get_keyword(value, "mode") {
        None => None,
        Some(name) => match ConfirmMode::from_str(&name) {
            Some(mode) => Some(mode),
            None => {
                return Some(error_response(
                    msg_id,
                    &format!("unknown calibration mode: {name}"),
                ))
            }
        },
    };
    with_surface(state, client_id, msg_id, |engine, now| {
        engine.start_calibration(mode, now);
        Some(ok_response_with(
            msg_id,
            &format!(" :calibration {}", engine.calibration().status_sexp()),
        ))
    })
}

fn handle_calibrate_hold(state: &mut DaemonState, client_id: u64, msg_id: i64) -> Option<String> {
    with_surface(state, client_id, msg_id, |engine, now| {
        engine.begin_calibration_hold(now);
        Some(ok_response(msg_id))
    })
}

fn handle_calibrate_status(state: &mut DaemonState, client_id: u64, msg_id: i64) -> Option<String> {
    with_surface(state, client_id, msg_id, |engine, _| {
        Some(ok_response_with(
            msg_id,
            &format!(" :calibration {}", engine.calibration().status_sexp()),
        ))
    })
}

// ── Menu ───────────────────────────────────────────────────

fn handle_menu_action(
    state: &mut DaemonState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let action = match get_keyword(value, "action").as_deref().map(MenuAction::from_str) {
        Some(Some(action)) => action,
        Some(None) | None => return Some(error_response(msg_id, "missing or unknown :action")),
    };
    with_surface(state, client_id, msg_id, |engine, now| {
        engine.handle_menu_action(action, now);
        Some(ok_response(msg_id))
    })
}

// ── Config ─────────────────────────────────────────────────

fn handle_config_set(state: &mut DaemonState, msg_id: i64, value: &Value) -> Option<String> {
    let mut config = state.config.clone();
    let mut changed = 0;
    for (key, val) in plist_pairs(value) {
        if key == "type" || key == "id" {
            continue;
        }
        if let Err(e) = config.set_field(&key, &val) {
            return Some(error_response(msg_id, &e.to_string()));
        }
        changed += 1;
    }
    if let Err(e) = state.apply_config(config) {
        return Some(error_response(msg_id, &e.to_string()));
    }
    info!(fields = changed, "configuration updated over IPC");
    Some(ok_response_with(
        msg_id,
        &format!(" :config {}", state.config.to_sexp()),
    ))
}

fn handle_config_save(state: &mut DaemonState, msg_id: i64) -> Option<String> {
    match state.save_config() {
        Ok(path) => Some(ok_response_with(
            msg_id,
            &format!(" :path \"{}\"", crate::sexp::escape_string(&path.display().to_string())),
        )),
        Err(e) => Some(error_response(msg_id, &format!("{e:#}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::EngineConfig;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    struct Harness {
        state: DaemonState,
        clock: Arc<TestClock>,
        _peers: Vec<UnixStream>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(TestClock::new());
            let state = DaemonState::new(EngineConfig::default(), clock.clone());
            Self {
                state,
                clock,
                _peers: Vec::new(),
            }
        }

        fn connect(&mut self, role: &str) -> u64 {
            let (ours, theirs) = UnixStream::pair().unwrap();
            self._peers.push(theirs);
            let id = self.state.ipc_server.add_client(ours);
            let resp = self.send(id, &format!("(:type :hello :id 1 :version 1 :role :{role})"));
            assert!(resp.unwrap().contains(":type :hello"));
            id
        }

        fn send(&mut self, client_id: u64, msg: &str) -> Option<String> {
            handle_message(&mut self.state, client_id, msg)
        }
    }

    fn status_of(resp: &str) -> Option<String> {
        get_keyword(&lexpr::from_str(resp).unwrap(), "status")
    }

    #[test]
    fn test_hello_required() {
        let mut h = Harness::new();
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let id = h.state.ipc_server.add_client(ours);
        let resp = h.send(id, "(:type :ping :id 2)").unwrap();
        assert!(resp.contains("hello handshake required"));
    }

    #[test]
    fn test_hello_rejects_bad_version_and_role() {
        let mut h = Harness::new();
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let id = h.state.ipc_server.add_client(ours);
        let resp = h.send(id, "(:type :hello :id 1 :version 2)").unwrap();
        assert!(resp.contains("unsupported protocol version"));
        let resp = h.send(id, "(:type :hello :id 1 :version 1 :role :viewer)").unwrap();
        assert!(resp.contains("unknown role"));
        assert!(!h.state.ipc_server.clients[&id].authenticated);
    }

    #[test]
    fn test_hello_defaults_to_host() {
        let mut h = Harness::new();
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let id = h.state.ipc_server.add_client(ours);
        let resp = h.send(id, "(:type :hello :id 1 :version 1)").unwrap();
        assert!(resp.ends_with(":role :host)"));
        assert_eq!(h.state.ipc_server.clients[&id].role, Some(ClientRole::Host));
    }

    #[test]
    fn test_malformed_and_unknown() {
        let mut h = Harness::new();
        let id = h.connect("host");
        assert!(h.send(id, "(:type :ping").unwrap().contains("malformed"));
        let resp = h.send(id, "(:type :teleport :id 4)").unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("error"));
        assert!(resp.contains("unknown message type: teleport"));
    }

    #[test]
    fn test_ping_carries_timestamps() {
        let mut h = Harness::new();
        let id = h.connect("host");
        h.clock.set_unix_millis(1_700_000_000_000);
        let resp = h.send(id, "(:type :ping :id 3 :timestamp 42)").unwrap();
        assert!(resp.contains(":client-timestamp 42"));
        assert!(resp.contains(":server-timestamp 1700000000000"));
    }

    #[test]
    fn test_surface_commands_need_registration() {
        let mut h = Harness::new();
        let id = h.connect("host");
        let resp = h.send(id, "(:type :calibrate-hold :id 5)").unwrap();
        assert!(resp.contains("surface not registered"));

        let resp = h
            .send(id, "(:type :surface-register :id 6 :width 1280 :height 720)")
            .unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("ok"));
        assert_eq!(h.state.surfaces[&id].viewport(), Viewport::new(1280.0, 720.0));

        h.send(id, "(:type :surface-resize :id 7 :width 800 :height 600)");
        assert_eq!(h.state.surfaces[&id].viewport(), Viewport::new(800.0, 600.0));
    }

    #[test]
    fn test_estimator_cannot_register_surface() {
        let mut h = Harness::new();
        let id = h.connect("estimator");
        let resp = h.send(id, "(:type :surface-register :id 1)").unwrap();
        assert!(resp.contains("requires :role :host"));
        assert!(h.state.surfaces.is_empty());
    }

    #[test]
    fn test_gaze_is_fire_and_forget() {
        let mut h = Harness::new();
        let host = h.connect("host");
        let est = h.connect("estimator");
        h.send(host, "(:type :surface-register :id 1 :width 1920 :height 1080)");

        assert!(h.send(est, "(:type :gaze :x 960 :y 540)").is_none());
        assert!(h.send(est, "(:type :gaze :x nil :y nil)").is_none());
        assert!(h.send(est, "(:type :gaze-lost)").is_none());
        assert!(h.send(est, "(:type :face :detected t)").is_none());
        assert_eq!(h.state.gaze_samples, 3);
        assert!(h.state.face_detected);
        assert!(h.state.surfaces[&host].monitor().face_ready);
    }

    #[test]
    fn test_host_cannot_send_gaze() {
        let mut h = Harness::new();
        let host = h.connect("host");
        h.send(host, "(:type :surface-register :id 1)");

        for msg in ["(:type :gaze :x 960 :y 40)", "(:type :gaze-lost)", "(:type :face :detected t)"] {
            let resp = h.send(host, msg).unwrap();
            assert!(resp.contains("requires :role :estimator"));
        }
        assert_eq!(h.state.gaze_samples, 0);
        assert!(!h.state.face_detected);
        assert_eq!(h.state.surfaces[&host].samples, 0);
    }

    #[test]
    fn test_invalid_viewport_rejected() {
        let mut h = Harness::new();
        let id = h.connect("host");
        let resp = h
            .send(id, "(:type :surface-register :id 2 :width 0 :height 720)")
            .unwrap();
        assert!(resp.contains("invalid viewport"));
    }

    #[test]
    fn test_calibrate_start_and_status() {
        let mut h = Harness::new();
        let id = h.connect("host");
        h.send(id, "(:type :surface-register :id 1)");
        let resp = h.send(id, "(:type :calibrate-start :id 2 :mode :blink)").unwrap();
        assert!(resp.contains("unknown calibration mode"));

        let resp = h.send(id, "(:type :calibrate-start :id 3 :mode :hold)").unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("ok"));
        assert!(resp.contains(":calibration (:phase"));

        let resp = h.send(id, "(:type :calibrate-status :id 4)").unwrap();
        assert!(resp.contains(":calibration (:phase"));
    }

    #[test]
    fn test_menu_action_pause_resume() {
        let mut h = Harness::new();
        let id = h.connect("host");
        h.send(id, "(:type :surface-register :id 1)");
        let resp = h.send(id, "(:type :menu-action :id 2 :action :pause)").unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("ok"));
        assert!(!h.state.session.tracking_enabled());

        h.send(id, "(:type :menu-action :id 3 :action :resume)");
        assert!(h.state.session.tracking_enabled());

        let resp = h.send(id, "(:type :menu-action :id 4 :action :dance)").unwrap();
        assert!(resp.contains("unknown :action"));

        h.state.flush_outbound();
        assert!(!h.state.ipc_server.clients[&id].write_buf.is_empty());
    }

    #[test]
    fn test_config_set_applies_and_validates() {
        let mut h = Harness::new();
        let id = h.connect("host");
        h.send(id, "(:type :surface-register :id 1)");

        let resp = h
            .send(id, "(:type :config-set :id 2 :dwell-ms 800 :calibration-mode :auto)")
            .unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("ok"));
        assert_eq!(h.state.config.dwell.threshold_ms, 800);
        assert_eq!(h.state.surfaces[&id].zones().dwell_ms, 800.0);
        assert!(resp.contains(":calibration-mode :auto"));

        let resp = h.send(id, "(:type :config-set :id 3 :ema-alpha 7)").unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("error"));
        assert_eq!(h.state.config.dwell.threshold_ms, 800);

        let resp = h.send(id, "(:type :config-set :id 4 :warp-factor 9)").unwrap();
        assert!(resp.contains("unknown config key"));
    }

    #[test]
    fn test_config_save() {
        let mut h = Harness::new();
        let id = h.connect("host");
        let resp = h.send(id, "(:type :config-save :id 1)").unwrap();
        assert!(resp.contains("no config path"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        h.state.config_path = Some(path.clone());
        let resp = h.send(id, "(:type :config-save :id 2)").unwrap();
        assert_eq!(status_of(&resp).as_deref(), Some("ok"));
        assert_eq!(EngineConfig::load(&path).unwrap(), h.state.config);
    }

    #[test]
    fn test_status_response_parses() {
        let mut h = Harness::new();
        let id = h.connect("host");
        h.send(id, "(:type :surface-register :id 1)");
        let resp = h.send(id, "(:type :status :id 9)").unwrap();
        let value = lexpr::from_str(&resp).unwrap();
        assert_eq!(get_int(&value, "clients"), Some(1));
        assert_eq!(get_keyword(&value, "face"), Some("nil".to_string()));
    }
}
