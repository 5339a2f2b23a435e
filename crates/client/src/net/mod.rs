pub mod config;
pub mod jitter;
pub mod pending;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_REQUEST_TIMEOUT};
pub use jitter::{DirectionJitter, JitterStats, JitterTracker};
pub use pending::{PendingRequestTable, ResponseHandler};
pub use session::{Session, SessionConnection, SessionState, VersionMismatch, wall_clock_ns};
pub use transport::{NetworkStats, read_frame, write_frame};
