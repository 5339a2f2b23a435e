use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use towerlink::{Action, RequestBody, RequestCmd, ResponseBody, Way9};

use crate::error::{ClientError, Result};
use crate::game::{ActionLimiter, IntentKind, TurnLoop, World, WorldSnapshot};
use crate::net::{ClientConfig, JitterStats, NetworkStats, Session, SessionConnection, SessionState};
use crate::render::RenderSink;

/// Library entry point for a UI shell: one live session, its world and the
/// turn loop feeding a render sink.
pub struct TowerClient {
    session: SessionConnection,
    world: World,
    limiter: ActionLimiter,
    sink: Arc<dyn RenderSink>,
}

impl TowerClient {
    pub async fn connect<A>(addr: A, config: ClientConfig, sink: Arc<dyn RenderSink>) -> Result<Self>
    where
        A: ToSocketAddrs,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        log::info!("Connecting to {}", stream.peer_addr()?);
        Self::start(stream, config, sink).await
    }

    /// Logs in over an already-open stream and starts the turn loop.
    pub async fn start<S>(stream: S, config: ClientConfig, sink: Arc<dyn RenderSink>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let world = World::new();
        let limiter = ActionLimiter::new(config.moves_per_turn, config.actions_per_turn);
        let heartbeat = config.heartbeat_interval;
        let ai_play = config.ai_play;

        let (session, info) = SessionConnection::connect(stream, config, world.clone()).await?;

        let turn_loop = TurnLoop::new(session.clone(), Arc::clone(&sink), heartbeat);
        tokio::spawn(turn_loop.run());

        let client = Self {
            session,
            world,
            limiter,
            sink,
        };

        if ai_play && info.can_use(RequestCmd::AiPlay) {
            if let Err(e) = client.set_ai_play(true).await {
                log::warn!("Could not enable AI play: {}", e);
            }
        }
        Ok(client)
    }

    /// Requests one step. Refused locally while dead or once this turn's
    /// move budget is spent.
    pub async fn submit_move(&self, dir: Way9) -> Result<()> {
        if self.world.waiting_rebirth() {
            return Err(ClientError::WaitingRebirth);
        }
        self.submit(IntentKind::Move, RequestBody::Move { dir }).await
    }

    pub async fn submit_action(&self, action: Action) -> Result<()> {
        if self.world.waiting_rebirth() && !action.allowed_while_dead() {
            return Err(ClientError::WaitingRebirth);
        }
        self.submit(IntentKind::Action, RequestBody::Action(action))
            .await
    }

    async fn submit(&self, kind: IntentKind, body: RequestBody) -> Result<()> {
        if !self.session.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let turn = self.world.turn();
        self.limiter.try_acquire(kind, turn)?;

        match self.session.request(body).await {
            Ok(ResponseBody::Ack) => Ok(()),
            Ok(_) => Err(ClientError::UnexpectedResponse("intent")),
            Err(e @ (ClientError::NotConnected | ClientError::ConnectionClosed)) => {
                self.limiter.release(kind, turn);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn set_ai_play(&self, on: bool) -> Result<()> {
        match self.session.request(RequestBody::AiPlay { on }).await? {
            ResponseBody::Ack => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("ai play")),
        }
    }

    /// Consistent copy of the whole world.
    pub fn snapshot(&self) -> WorldSnapshot {
        self.world.snapshot()
    }

    /// Pushes the current world to the render sink outside the turn cycle.
    pub fn redraw(&self) {
        self.sink.redraw(&self.world.snapshot());
    }

    pub fn session(&self) -> Option<Session> {
        self.session.session()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn connection(&self) -> &SessionConnection {
        &self.session
    }

    pub fn jitter_stats(&self) -> JitterStats {
        self.session.jitter_stats()
    }

    pub fn stats(&self) -> NetworkStats {
        self.session.stats()
    }

    pub async fn logout(&self) {
        self.session.logout().await
    }

    pub fn shutdown(&self) {
        self.session.close();
    }

    pub async fn closed(&self) {
        self.session.closed().await
    }
}

impl Drop for TowerClient {
    fn drop(&mut self) {
        self.session.close();
    }
}
