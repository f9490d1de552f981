//! Daemon state: the single struct owning every surface engine and the IPC
//! server, passed as `&mut` to every event loop callback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::gaze::engine::InteractionEngine;
use crate::gaze::zone_dwell::Viewport;
use crate::ipc::outbound::SexpEffectors;
use crate::ipc::server::ClientRole;
use crate::ipc::IpcServer;
use crate::session::SharedSession;

pub type SurfaceEngine = InteractionEngine<SexpEffectors>;

pub struct DaemonState {
    pub config: EngineConfig,
    /// Where `config-save` and `--persist-config` write.
    pub config_path: Option<PathBuf>,
    pub persist_config: bool,
    pub clock: Arc<dyn Clock>,
    pub session: SharedSession,
    /// One engine per registered host surface, keyed by host client id.
    pub surfaces: HashMap<u64, SurfaceEngine>,
    pub ipc_server: IpcServer,
    pub face_detected: bool,
    pub running: bool,
    /// Gaze samples fanned out since start.
    pub gaze_samples: u64,
}

impl DaemonState {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            config_path: None,
            persist_config: false,
            clock,
            session: SharedSession::new(),
            surfaces: HashMap::new(),
            ipc_server: IpcServer::new(IpcServer::default_socket_path()),
            face_detected: false,
            running: true,
            gaze_samples: 0,
        }
    }

    pub fn with_system_clock(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(SystemClock::new()))
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Create (or resize) the engine for a host surface.
    pub fn register_surface(&mut self, client_id: u64, viewport: Viewport) {
        let now = self.now_ms();
        let estimator = self.ipc_server.has_role(ClientRole::Estimator);
        if let Some(engine) = self.surfaces.get_mut(&client_id) {
            engine.set_viewport(viewport);
            return;
        }

        let mut effectors = SexpEffectors::new(client_id);
        effectors.estimator_connected = estimator;
        let mut engine = InteractionEngine::new(self.config.clone(), effectors, self.session.clone(), now);
        engine.set_viewport(viewport);
        engine.set_face_detected(self.face_detected, now);
        self.surfaces.insert(client_id, engine);
        info!(
            surface = client_id,
            width = viewport.width,
            height = viewport.height,
            "surface registered"
        );
    }

    /// Drop the engine of a departed host.
    pub fn remove_surface(&mut self, client_id: u64) {
        if self.surfaces.remove(&client_id).is_some() {
            info!(surface = client_id, "surface removed");
        }
    }

    /// Fan one estimator sample out to every surface engine.
    pub fn broadcast_gaze(&mut self, point: Option<(f64, f64)>) {
        let now = self.now_ms();
        self.gaze_samples += 1;
        for engine in self.surfaces.values_mut() {
            match point {
                Some((x, y)) => engine.on_gaze(x, y, now),
                None => engine.on_gaze_lost(now),
            }
        }
    }

    pub fn set_face_detected(&mut self, detected: bool) {
        let now = self.now_ms();
        self.face_detected = detected;
        for engine in self.surfaces.values_mut() {
            engine.set_face_detected(detected, now);
        }
    }

    /// Host tick for every engine.
    pub fn tick_all(&mut self) {
        let now = self.now_ms();
        for engine in self.surfaces.values_mut() {
            engine.tick(now);
        }
        if self.session.is_terminated() && self.running {
            info!("session exit requested");
            self.running = false;
        }
    }

    /// Validate and apply a new configuration to every engine.
    pub fn apply_config(&mut self, config: EngineConfig) -> anyhow::Result<()> {
        config.validate()?;
        for engine in self.surfaces.values_mut() {
            engine.apply_config(config.clone());
        }
        self.config = config;
        debug!("configuration applied to {} surface(s)", self.surfaces.len());
        Ok(())
    }

    pub fn save_config(&self) -> anyhow::Result<PathBuf> {
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no config path configured"))?;
        self.config.save(&path)?;
        Ok(path)
    }

    /// Update estimator presence on every engine's effectors.
    pub fn refresh_estimator_presence(&mut self) {
        let present = self.ipc_server.has_role(ClientRole::Estimator);
        for engine in self.surfaces.values_mut() {
            engine.effectors_mut().estimator_connected = present;
        }
    }

    /// Move queued engine events into client write buffers.
    pub fn flush_outbound(&mut self) {
        let mut host_events = Vec::new();
        let mut estimator_events = Vec::new();
        for (id, engine) in self.surfaces.iter_mut() {
            let fx = engine.effectors_mut();
            let events = fx.take_host_events();
            if !events.is_empty() {
                host_events.push((*id, events));
            }
            estimator_events.extend(fx.take_estimator_events());
        }

        for (client_id, events) in host_events {
            for event in events {
                if !self.ipc_server.send_event(client_id, &event) {
                    warn!(client_id, "host gone, dropping event");
                    break;
                }
            }
        }
        for event in estimator_events {
            self.ipc_server.broadcast_to_role(ClientRole::Estimator, &event);
        }
    }

    /// Generate IPC daemon status s-expression.
    pub fn status_sexp(&self) -> String {
        let mut ids: Vec<&u64> = self.surfaces.keys().collect();
        ids.sort();
        let mut surfaces = String::from("(");
        for id in ids {
            if let Some(engine) = self.surfaces.get(id) {
                surfaces.push_str(&format!("(:id {} :engine {})", id, engine.status_sexp()));
            }
        }
        surfaces.push(')');
        format!(
            ":session {} :clients {} :face {} :gaze-samples {} :surfaces {}",
            self.session.to_sexp(),
            self.ipc_server.clients.len(),
            if self.face_detected { "t" } else { "nil" },
            self.gaze_samples,
            surfaces
        )
    }
}
