use std::io;
use std::time::Duration;

use towerlink::{CodecError, ErrorCode, PacketKind};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("malformed packet: {0}")]
    MalformedPacket(CodecError),
    #[error("pid {0} is already pending")]
    DuplicatePid(u32),
    #[error("request {pid} timed out after {timeout:?}")]
    Timeout { pid: u32, timeout: Duration },
    #[error("unknown notification {0}")]
    UnknownNotification(u16),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("{kind} limit of {limit} per turn reached")]
    RateLimited { kind: &'static str, limit: u32 },
    #[error("waiting to rebirth")]
    WaitingRebirth,
    #[error("not connected")]
    NotConnected,
    #[error("server error {code:?}: {message}")]
    Server { code: ErrorCode, message: String },
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownCommand {
                kind: PacketKind::Notification,
                cmd,
            } => ClientError::UnknownNotification(cmd),
            other => ClientError::MalformedPacket(other),
        }
    }
}

impl ClientError {
    /// Errors after which the session cannot carry on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::ConnectionClosed | ClientError::Io(_))
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_notification_mapping() {
        let err: ClientError = CodecError::UnknownCommand {
            kind: PacketKind::Notification,
            cmd: 77,
        }
        .into();
        assert!(matches!(err, ClientError::UnknownNotification(77)));

        let err: ClientError = CodecError::Truncated(3).into();
        assert!(matches!(err, ClientError::MalformedPacket(_)));
    }
}
