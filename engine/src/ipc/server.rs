//! IPC server: Unix socket listener, per-client state and message framing.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Instant;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::DaemonState;

/// Maximum message payload size (64 KiB).
const MAX_MESSAGE_SIZE: u32 = 65_536;

/// Maximum write buffer before dropping events (256 KiB).
const MAX_WRITE_BUFFER: usize = 262_144;

/// Default rate limit: messages per second per client. An estimator at
/// 60 Hz plus face and control traffic stays well inside it.
pub const DEFAULT_RATE_LIMIT: u32 = 240;

/// Which side of the protocol a client speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    /// Consuming surface: receives scroll, menu-action and status events.
    Host,
    /// Gaze source: receives record-calibration-sample events.
    Estimator,
}

impl ClientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Estimator => "estimator",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "host" => Some(Self::Host),
            "estimator" => Some(Self::Estimator),
            _ => None,
        }
    }
}

/// Fixed-window per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Returns true if the message is within the limit.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start).as_secs() >= 1 {
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Peer `(uid, pid)` via SO_PEERCRED on Linux.
fn get_peer_cred(stream: &UnixStream) -> Option<(Option<u32>, Option<i32>)> {
    #[cfg(target_os = "linux")]
    {
        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == 0 {
            Some((Some(cred.uid), Some(cred.pid)))
        } else {
            None
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream.as_raw_fd();
        Some((None, None))
    }
}

/// Per-client connection state.
pub struct IpcClient {
    pub stream: UnixStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub id: u64,
    pub authenticated: bool,
    /// Set by the hello handshake.
    pub role: Option<ClientRole>,
    pub peer_uid: Option<u32>,
    pub peer_pid: Option<i32>,
    pub rate_limiter: RateLimiter,
    /// Set on a framing violation; the client is dropped on the next poll.
    pub poisoned: bool,
}

impl IpcClient {
    pub fn new(stream: UnixStream, id: u64, rate_limit: u32) -> Self {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(id, "failed to set client socket non-blocking: {}", e);
        }
        let (peer_uid, peer_pid) = get_peer_cred(&stream).unwrap_or_else(|| {
            warn!(id, "failed to read peer credentials");
            (None, None)
        });
        if let Some(uid) = peer_uid {
            debug!(id, peer_uid = uid, peer_pid = ?peer_pid, "peer credentials");
        }
        Self {
            stream,
            read_buf: Vec::with_capacity(4096),
            write_buf: Vec::new(),
            id,
            authenticated: false,
            role: None,
            peer_uid,
            peer_pid,
            rate_limiter: RateLimiter::new(rate_limit),
            poisoned: false,
        }
    }

    /// Attempt to flush pending writes without blocking.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Enqueue a framed message (length prefix + payload).
    pub fn enqueue_message(&mut self, payload: &str) {
        let bytes = payload.as_bytes();
        self.write_buf
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.write_buf.extend_from_slice(bytes);
    }

    /// Enqueue an event, dropping it if the client is not keeping up.
    pub fn enqueue_event(&mut self, payload: &str) -> bool {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "write buffer overflow, dropping event");
            return false;
        }
        self.enqueue_message(payload);
        true
    }

    /// Extract complete framed messages from the read buffer.
    pub fn extract_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while self.read_buf.len() >= 4 {
            let len = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]);
            if len > MAX_MESSAGE_SIZE {
                error!(client_id = self.id, len, "message exceeds maximum size");
                self.read_buf.clear();
                self.poisoned = true;
                break;
            }
            let total = 4 + len as usize;
            if self.read_buf.len() < total {
                break;
            }
            messages.push(String::from_utf8_lossy(&self.read_buf[4..total]).into_owned());
            self.read_buf.drain(..total);
        }
        messages
    }
}

/// Listener socket plus every client connection.
pub struct IpcServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
    pub ipc_trace: bool,
    pub rate_limit: u32,
}

impl IpcServer {
    /// Create the server state. Call `bind` to start listening.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            next_client_id: 1,
            ipc_trace: false,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    /// `$XDG_RUNTIME_DIR/gaze-dwell.sock`, or a per-uid path under /tmp.
    pub fn default_socket_path() -> PathBuf {
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) => PathBuf::from(dir).join("gaze-dwell.sock"),
            Err(_) => PathBuf::from(format!("/tmp/gaze-dwell-{}.sock", unsafe { libc::getuid() })),
        }
    }

    /// Bind the listener socket and register it with calloop.
    pub fn bind(socket_path: &Path, loop_handle: &LoopHandle<'static, DaemonState>) -> anyhow::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
        }
        info!(?socket_path, "IPC server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(source, |_event, listener, state| {
                loop {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            let id = state.ipc_server.add_client(stream);
                            info!(client_id = id, "IPC client connected");
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            error!("accept error: {}", e);
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow::anyhow!("failed to register IPC listener: {}", e.error))?;
        Ok(())
    }

    /// Track a connected stream. Returns the new client id.
    pub fn add_client(&mut self, stream: UnixStream) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.clients
            .insert(id, IpcClient::new(stream, id, self.rate_limit));
        id
    }

    pub fn has_role(&self, role: ClientRole) -> bool {
        self.clients
            .values()
            .any(|c| c.authenticated && c.role == Some(role))
    }

    /// Queue an event for one client. Returns false if it is gone.
    pub fn send_event(&mut self, client_id: u64, event: &str) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) if client.authenticated => {
                if self.ipc_trace {
                    info!(client_id, ">> {}", event);
                }
                client.enqueue_event(event);
                true
            }
            _ => false,
        }
    }

    /// Queue an event for every authenticated client with the given role.
    pub fn broadcast_to_role(&mut self, role: ClientRole, event: &str) {
        if self.ipc_trace {
            info!(role = role.as_str(), "broadcast >> {}", event);
        }
        for client in self.clients.values_mut() {
            if client.authenticated && client.role == Some(role) {
                client.enqueue_event(event);
            }
        }
    }

    /// Read, dispatch and flush every client. Called once per loop
    /// iteration.
    pub fn poll_clients(state: &mut DaemonState) {
        let client_ids: Vec<u64> = state.ipc_server.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let messages = {
                let Some(client) = state.ipc_server.clients.get_mut(&client_id) else {
                    continue;
                };
                let mut buf = [0u8; 4096];
                let read_result = loop {
                    match client.stream.read(&mut buf) {
                        Ok(0) => break Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                        Ok(n) => client.read_buf.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                        Err(e) => break Err(e),
                    }
                };
                let messages = client.extract_messages();
                if let Err(e) = read_result {
                    debug!(client_id, "client disconnected: {}", e);
                    disconnected.push(client_id);
                } else if client.poisoned {
                    disconnected.push(client_id);
                }
                messages
            };

            for msg in messages {
                Self::handle_one(state, client_id, &msg);
            }

            if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                if let Err(e) = client.flush_writes() {
                    debug!(client_id, "write error: {}", e);
                    disconnected.push(client_id);
                }
            }
        }

        for id in disconnected {
            Self::remove_client(state, id);
        }
    }

    /// Rate-limit and dispatch one message, queueing any response.
    pub fn handle_one(state: &mut DaemonState, client_id: u64, msg: &str) {
        let rate_ok = state
            .ipc_server
            .clients
            .get_mut(&client_id)
            .map(|c| c.rate_limiter.check())
            .unwrap_or(false);
        if !rate_ok {
            warn!(client_id, "rate limit exceeded, dropping message");
            if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                client.enqueue_event("(:type :response :id 0 :status :error :reason \"rate limit exceeded\")");
            }
            return;
        }

        if state.ipc_server.ipc_trace {
            info!(client_id, "<< {}", msg);
        }
        if let Some(resp) = dispatch::handle_message(state, client_id, msg) {
            if state.ipc_server.ipc_trace {
                info!(client_id, ">> {}", resp);
            }
            if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                client.enqueue_message(&resp);
            }
        }
    }

    /// Forget a client and the surface it owned.
    pub fn remove_client(state: &mut DaemonState, client_id: u64) {
        if let Some(client) = state.ipc_server.clients.remove(&client_id) {
            info!(
                client_id,
                role = client.role.map(|r| r.as_str()),
                "removing disconnected IPC client"
            );
            state.remove_surface(client_id);
            state.refresh_estimator_presence();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (IpcClient, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (IpcClient::new(a, 1, DEFAULT_RATE_LIMIT), b)
    }

    #[test]
    fn test_framing_roundtrip() {
        let (mut c, _peer) = client();
        c.enqueue_message("(:type :ping :id 1)");
        c.enqueue_message("(:type :status :id 2)");
        c.read_buf = std::mem::take(&mut c.write_buf);
        assert_eq!(
            c.extract_messages(),
            vec!["(:type :ping :id 1)".to_string(), "(:type :status :id 2)".to_string()]
        );
        assert!(c.read_buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let (mut c, _peer) = client();
        c.read_buf.extend_from_slice(&10u32.to_be_bytes());
        c.read_buf.extend_from_slice(b"(:type");
        assert!(c.extract_messages().is_empty());
        assert_eq!(c.read_buf.len(), 10);
    }

    #[test]
    fn test_oversized_frame_poisons_client() {
        let (mut c, _peer) = client();
        c.read_buf.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        assert!(c.extract_messages().is_empty());
        assert!(c.poisoned);
    }

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(ClientRole::from_str("estimator"), Some(ClientRole::Estimator));
        assert_eq!(ClientRole::from_str(ClientRole::Host.as_str()), Some(ClientRole::Host));
        assert_eq!(ClientRole::from_str("viewer"), None);
    }

    #[test]
    fn test_peer_credentials_are_ours() {
        let (c, _peer) = client();
        if let Some(uid) = c.peer_uid {
            assert_eq!(uid, unsafe { libc::getuid() });
        }
    }
}
