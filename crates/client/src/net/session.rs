use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use towerlink::{
    AccountInfo, LoginResponse, Packet, PacketCodec, PacketKind, RequestBody, RequestCmd,
    ResponseBody, ServiceInfo,
};

use super::config::ClientConfig;
use super::jitter::{JitterStats, JitterTracker};
use super::pending::PendingRequestTable;
use super::transport::{NetworkStats, read_frame, write_frame};
use crate::error::{ClientError, Result};
use crate::game::{Dispatch, NotificationRouter, World, WorldSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Closing,
}

/// A difference between what this client was built against and what the
/// server advertised at login. Never fails the login; it is logged and kept
/// on [`Session::version_mismatches`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} mismatch: client {client} server {server}")]
pub struct VersionMismatch {
    pub what: &'static str,
    pub client: String,
    pub server: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub nickname: String,
    pub service_info: ServiceInfo,
    pub account: AccountInfo,
    pub version_mismatches: Vec<VersionMismatch>,
}

impl Session {
    fn from_login(login: LoginResponse, config: &ClientConfig) -> Self {
        let version_mismatches = check_versions(config, &login.service_info);
        Self {
            session_id: login.account.session_id.clone(),
            nickname: login.account.nickname.clone(),
            service_info: login.service_info,
            account: login.account,
            version_mismatches,
        }
    }

    /// True when the server runs a different protocol or data version; world
    /// state from it should not be fully trusted.
    pub fn is_degraded(&self) -> bool {
        !self.version_mismatches.is_empty()
    }

    pub fn can_use(&self, cmd: RequestCmd) -> bool {
        self.account.can_use(cmd)
    }
}

fn check_versions(config: &ClientConfig, info: &ServiceInfo) -> Vec<VersionMismatch> {
    let mut mismatches = Vec::new();
    if config.protocol_version != info.protocol_version {
        mismatches.push(VersionMismatch {
            what: "protocol version",
            client: config.protocol_version.clone(),
            server: info.protocol_version.clone(),
        });
    }
    if config.data_version != info.data_version {
        mismatches.push(VersionMismatch {
            what: "data version",
            client: config.data_version.clone(),
            server: info.data_version.clone(),
        });
    }
    mismatches
}

pub fn wall_clock_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

struct Shared {
    config: ClientConfig,
    codec: PacketCodec,
    pending: PendingRequestTable,
    router: NotificationRouter,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: Mutex<SessionState>,
    session: Mutex<Option<Session>>,
    stats: Mutex<NetworkStats>,
    jitter: Mutex<JitterTracker>,
    turn_tx: watch::Sender<Arc<WorldSnapshot>>,
    deadline_changed: Notify,
    cancel: CancellationToken,
    closing: AtomicBool,
}

/// One client-to-tower connection: owns the transport tasks, the pending
/// request table and the notification router.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct SessionConnection {
    shared: Arc<Shared>,
}

impl SessionConnection {
    /// Spawns the transport tasks over `stream`, logs in and waits for the
    /// login response. A version mismatch is logged and recorded on the
    /// returned [`Session`] but does not fail the connection.
    pub async fn connect<S>(stream: S, config: ClientConfig, world: World) -> Result<(Self, Session)>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Self::spawn(stream, config, world);

        let login = RequestBody::Login {
            session_token: conn.shared.config.session_token.clone(),
            nickname: conn.shared.config.nickname.clone(),
        };
        let session = match conn.request(login).await {
            Ok(ResponseBody::Login(login)) => Session::from_login(login, &conn.shared.config),
            Ok(_) => {
                conn.close();
                return Err(ClientError::UnexpectedResponse("login"));
            }
            Err(e) => {
                log::warn!("Login failed: {}", e);
                conn.close();
                return Err(e);
            }
        };

        for mismatch in &session.version_mismatches {
            log::error!("{}", mismatch);
        }

        {
            let mut state = conn.shared.state.lock();
            if *state != SessionState::Handshaking {
                return Err(ClientError::ConnectionClosed);
            }
            *state = SessionState::Connected;
            *conn.shared.session.lock() = Some(session.clone());
        }
        log::info!(
            "Logged in as {} on {}",
            session.nickname,
            session.service_info.service_name
        );

        Ok((conn, session))
    }

    fn spawn<S>(stream: S, config: ClientConfig, world: World) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (turn_tx, _) = watch::channel(Arc::new(WorldSnapshot::default()));

        let shared = Arc::new(Shared {
            jitter: Mutex::new(JitterTracker::new(config.heartbeat_interval)),
            config,
            codec: PacketCodec::default(),
            pending: PendingRequestTable::new(),
            router: NotificationRouter::new(world),
            outbound,
            state: Mutex::new(SessionState::Handshaking),
            session: Mutex::new(None),
            stats: Mutex::new(NetworkStats::default()),
            turn_tx,
            deadline_changed: Notify::new(),
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
        });

        let conn = Self { shared };
        tokio::spawn(conn.clone().receive_loop(reader));
        tokio::spawn(conn.clone().send_loop(writer, outbound_rx));
        tokio::spawn(conn.clone().expiry_loop());
        conn
    }

    async fn receive_loop<S>(self, mut reader: ReadHalf<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = self.shared.cancel.clone();
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = read_frame(&mut reader) => frame,
            };

            match frame {
                Ok(Some(data)) => self.handle_frame(&data),
                Ok(None) => {
                    log::info!("Server closed the connection");
                    self.close();
                    break;
                }
                Err(e) => {
                    log::error!("Network error: {}", e);
                    self.close();
                    break;
                }
            }
        }
        log::debug!("Receive loop stopped");
    }

    fn handle_frame(&self, data: &[u8]) {
        {
            let mut stats = self.shared.stats.lock();
            stats.packets_received += 1;
            stats.bytes_received += data.len() as u64;
        }

        let packet = match self.shared.codec.decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.shared.stats.lock().packets_dropped += 1;
                log::warn!("Dropping malformed packet: {}", e);
                return;
            }
        };

        if packet.header.kind == PacketKind::Request {
            log::warn!("Ignoring request cmd {} from server", packet.header.cmd);
            return;
        }

        if packet.header.is_notification() {
            self.handle_notification(packet);
        } else {
            self.shared.pending.resolve(packet.header.pid, packet);
        }
    }

    fn handle_notification(&self, packet: Packet) {
        match self.shared.router.dispatch(&packet.header, &packet.body) {
            Ok(Dispatch::TurnComplete(snapshot)) => {
                self.shared.turn_tx.send_replace(snapshot);
            }
            Ok(Dispatch::StaleFloor | Dispatch::StaleTime) => {
                log::trace!("Discarded stale notification cmd {}", packet.header.cmd);
            }
            Ok(Dispatch::Applied | Dispatch::Ignored) => {}
            Err(ClientError::UnknownNotification(cmd)) => {
                log::warn!("Ignoring unknown notification {}", cmd);
            }
            Err(e) => {
                self.shared.stats.lock().packets_dropped += 1;
                log::warn!("Dropping notification cmd {}: {}", packet.header.cmd, e);
            }
        }
    }

    async fn send_loop<S>(
        self,
        mut writer: WriteHalf<S>,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = self.shared.cancel.clone();
        loop {
            let data = tokio::select! {
                _ = cancel.cancelled() => break,
                data = outbound.recv() => match data {
                    Some(data) => data,
                    None => break,
                },
            };

            if let Err(e) = write_frame(&mut writer, &data).await {
                log::error!("Network error: {}", e);
                self.close();
                break;
            }
            let mut stats = self.shared.stats.lock();
            stats.packets_sent += 1;
            stats.bytes_sent += data.len() as u64;
        }
        log::debug!("Send loop stopped");
    }

    async fn expiry_loop(self) {
        let cancel = self.shared.cancel.clone();
        loop {
            let next = self.shared.pending.next_deadline();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.shared.deadline_changed.notified() => continue,
                _ = sleep_until_deadline(next) => {
                    let expired = self.shared.pending.expire(Instant::now());
                    if !expired.is_empty() {
                        log::debug!("Expired {} pending request(s)", expired.len());
                    }
                }
            }
        }
    }

    /// Sends a request and waits for its correlated response. Only the
    /// calling task is suspended; the receive loop keeps running.
    pub async fn request(&self, body: RequestBody) -> Result<ResponseBody> {
        let cmd = body.cmd();
        let packet = self.request_packet(body).await?;
        match ResponseBody::from_bytes(&packet.body)? {
            ResponseBody::Error { code, message } => {
                log::warn!("Request {:?} rejected: {:?} {}", cmd, code, message);
                Err(ClientError::Server { code, message })
            }
            response => Ok(response),
        }
    }

    async fn request_packet(&self, body: RequestBody) -> Result<Packet> {
        match self.state() {
            SessionState::Handshaking | SessionState::Connected => {}
            SessionState::Closing => return Err(ClientError::ConnectionClosed),
            SessionState::Disconnected => return Err(ClientError::NotConnected),
        }

        let pid = self.shared.pending.next_pid();
        let data = self.shared.codec.encode(&body.into_packet(pid)?)?;

        let rx = self
            .shared
            .pending
            .register_waiter(pid, self.shared.config.request_timeout)?;
        self.shared.deadline_changed.notify_one();

        if self.shared.outbound.send(data).is_err() {
            self.close();
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// One heartbeat round trip, folded into the jitter estimate.
    pub async fn heartbeat(&self) -> Result<JitterStats> {
        let sent_at = Instant::now();
        let client_time_ns = wall_clock_ns();
        self.shared.jitter.lock().record_send(sent_at);

        match self.request(RequestBody::Heartbeat { client_time_ns }).await? {
            ResponseBody::Heartbeat {
                client_time_ns,
                server_time_ns,
            } => {
                let mut jitter = self.shared.jitter.lock();
                jitter.record_heartbeat(sent_at, Instant::now(), client_time_ns, server_time_ns);
                Ok(jitter.stats())
            }
            _ => Err(ClientError::UnexpectedResponse("heartbeat")),
        }
    }

    /// Sends a logout request, waiting at most the request timeout, then
    /// closes.
    pub async fn logout(&self) {
        if self.state() == SessionState::Connected {
            if let Err(e) = self.request(RequestBody::Logout).await {
                log::debug!("Logout not acknowledged: {}", e);
            }
        }
        self.close();
    }

    /// Tears the connection down: fails every pending request with
    /// `ConnectionClosed` and stops all tasks. Idempotent and callable from
    /// any task.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.shared.state.lock() = SessionState::Closing;

        let drained = self.shared.pending.drain();
        if drained > 0 {
            log::debug!("Failed {} pending request(s) on close", drained);
        }

        *self.shared.session.lock() = None;
        *self.shared.state.lock() = SessionState::Disconnected;
        self.shared.cancel.cancel();
        log::info!("Disconnected");
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.session.lock().clone()
    }

    /// World as of the latest completed turn; changes on every completed turn.
    pub fn turns(&self) -> watch::Receiver<Arc<WorldSnapshot>> {
        self.shared.turn_tx.subscribe()
    }

    pub fn jitter_stats(&self) -> JitterStats {
        self.shared.jitter.lock().stats()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.stats.lock().clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
