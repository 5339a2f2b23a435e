use rkyv::{Archive, Deserialize, Serialize};

use super::protocol::{CodecError, Packet, PacketHeader, PacketKind, impl_body_codec};
use crate::world::{Action, Way9};

/// Request command tags carried in `PacketHeader::cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCmd {
    Invalid = 0,
    Login = 1,
    Heartbeat = 2,
    Move = 3,
    Action = 4,
    AiPlay = 5,
    Logout = 6,
}

impl RequestCmd {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Invalid),
            1 => Some(Self::Login),
            2 => Some(Self::Heartbeat),
            3 => Some(Self::Move),
            4 => Some(Self::Action),
            5 => Some(Self::AiPlay),
            6 => Some(Self::Logout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum RequestBody {
    Invalid,
    Login {
        session_token: Option<String>,
        nickname: String,
    },
    Heartbeat {
        client_time_ns: i64,
    },
    Move {
        dir: Way9,
    },
    Action(Action),
    AiPlay {
        on: bool,
    },
    Logout,
}

impl RequestBody {
    pub fn cmd(&self) -> RequestCmd {
        match self {
            Self::Invalid => RequestCmd::Invalid,
            Self::Login { .. } => RequestCmd::Login,
            Self::Heartbeat { .. } => RequestCmd::Heartbeat,
            Self::Move { .. } => RequestCmd::Move,
            Self::Action(_) => RequestCmd::Action,
            Self::AiPlay { .. } => RequestCmd::AiPlay,
            Self::Logout => RequestCmd::Logout,
        }
    }

    pub fn into_packet(&self, pid: u32) -> Result<Packet, CodecError> {
        let header = PacketHeader::request(self.cmd() as u16, pid);
        Ok(Packet::new(header, self.to_bytes()?))
    }

    /// Decodes the body of a request packet and checks it agrees with its tag.
    pub fn decode(header: &PacketHeader, body: &[u8]) -> Result<Self, CodecError> {
        let cmd = RequestCmd::from_u16(header.cmd).ok_or(CodecError::UnknownCommand {
            kind: PacketKind::Request,
            cmd: header.cmd,
        })?;
        let decoded = Self::from_bytes(body)?;
        if decoded.cmd() != cmd {
            return Err(CodecError::BodyMismatch(header.cmd));
        }
        Ok(decoded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ServiceInfo {
    pub service_name: String,
    pub protocol_version: String,
    pub data_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct AccountInfo {
    pub session_id: String,
    pub nickname: String,
    /// Request command tags this account may issue.
    pub commands: Vec<u16>,
}

impl AccountInfo {
    pub fn can_use(&self, cmd: RequestCmd) -> bool {
        self.commands.contains(&(cmd as u16))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct LoginResponse {
    pub service_info: ServiceInfo,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum ErrorCode {
    InvalidRequest,
    NotPermitted,
    ActionProhibited,
    Overloaded,
    SessionExpired,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ResponseBody {
    Login(LoginResponse),
    Heartbeat {
        client_time_ns: i64,
        server_time_ns: i64,
    },
    Ack,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ResponseBody {
    pub fn into_packet(&self, cmd: RequestCmd, pid: u32) -> Result<Packet, CodecError> {
        let header = PacketHeader::response(cmd as u16, pid);
        Ok(Packet::new(header, self.to_bytes()?))
    }
}

impl_body_codec!(RequestBody, ResponseBody);
