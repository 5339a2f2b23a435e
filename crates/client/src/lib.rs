pub mod client;
pub mod error;
pub mod game;
pub mod net;
pub mod render;

pub use client::TowerClient;
pub use error::{ClientError, Result};
pub use game::{
    ActionLimiter, ClientFloor, Dispatch, IntentKind, NotificationRouter, TurnLoop, TurnProgress,
    TurnTracker, World, WorldSnapshot,
};
pub use net::{
    ClientConfig, JitterStats, JitterTracker, NetworkStats, PendingRequestTable, Session,
    SessionConnection, SessionState, VersionMismatch,
};
pub use render::{NullSink, RenderSink};
