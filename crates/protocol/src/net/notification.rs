use rkyv::{Archive, Deserialize, Serialize};

use super::protocol::{CodecError, Packet, PacketHeader, PacketKind, impl_body_codec};
use crate::world::{
    ActiveObjClient, CarryObjClient, FieldObjAct, FieldObjClient, FloorInfo, G2Id,
    PlayerActiveObjInfo, TileCell, TowerInfo,
};

/// Notification tags carried in `PacketHeader::cmd`. Servers newer than this
/// client may send tags missing here; those decode to
/// [`CodecError::UnknownCommand`] without touching the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotiCmd {
    Invalid = 0,
    EnterTower = 1,
    LeaveTower = 2,
    EnterFloor = 3,
    LeaveFloor = 4,
    Ageing = 5,
    Death = 6,
    ReadyToRebirth = 7,
    Rebirthed = 8,
    Broadcast = 9,
    ObjectList = 10,
    VpTiles = 11,
    FloorTiles = 12,
    FoundFieldObj = 13,
    ForgetFloor = 14,
    ActivateTrap = 15,
}

impl NotiCmd {
    pub fn from_u16(value: u16) -> Option<Self> {
        let cmd = match value {
            0 => Self::Invalid,
            1 => Self::EnterTower,
            2 => Self::LeaveTower,
            3 => Self::EnterFloor,
            4 => Self::LeaveFloor,
            5 => Self::Ageing,
            6 => Self::Death,
            7 => Self::ReadyToRebirth,
            8 => Self::Rebirthed,
            9 => Self::Broadcast,
            10 => Self::ObjectList,
            11 => Self::VpTiles,
            12 => Self::FloorTiles,
            13 => Self::FoundFieldObj,
            14 => Self::ForgetFloor,
            15 => Self::ActivateTrap,
            _ => return None,
        };
        Some(cmd)
    }
}

/// Every object visible to the player on one floor at one server turn.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ObjectList {
    pub time_ns: i64,
    pub floor_id: G2Id,
    pub player: Option<PlayerActiveObjInfo>,
    pub active_objs: Vec<ActiveObjClient>,
    pub carry_objs: Vec<CarryObjClient>,
    pub field_objs: Vec<FieldObjClient>,
}

/// Tiles currently inside the player's sight, centred on `(vp_x, vp_y)`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ViewportTiles {
    pub time_ns: i64,
    pub floor_id: G2Id,
    pub vp_x: i32,
    pub vp_y: i32,
    pub cells: Vec<TileCell>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum NotificationBody {
    Invalid,
    EnterTower(TowerInfo),
    LeaveTower(TowerInfo),
    EnterFloor(FloorInfo),
    LeaveFloor(FloorInfo),
    Ageing { id: G2Id },
    Death,
    ReadyToRebirth,
    Rebirthed,
    Broadcast { msg: String },
    ObjectList(ObjectList),
    VpTiles(ViewportTiles),
    FloorTiles { floor: FloorInfo, cells: Vec<TileCell> },
    FoundFieldObj { floor_id: G2Id, obj: FieldObjClient },
    ForgetFloor { floor_id: G2Id },
    ActivateTrap { act: FieldObjAct, triggered: bool },
}

impl NotificationBody {
    pub fn cmd(&self) -> NotiCmd {
        match self {
            Self::Invalid => NotiCmd::Invalid,
            Self::EnterTower(_) => NotiCmd::EnterTower,
            Self::LeaveTower(_) => NotiCmd::LeaveTower,
            Self::EnterFloor(_) => NotiCmd::EnterFloor,
            Self::LeaveFloor(_) => NotiCmd::LeaveFloor,
            Self::Ageing { .. } => NotiCmd::Ageing,
            Self::Death => NotiCmd::Death,
            Self::ReadyToRebirth => NotiCmd::ReadyToRebirth,
            Self::Rebirthed => NotiCmd::Rebirthed,
            Self::Broadcast { .. } => NotiCmd::Broadcast,
            Self::ObjectList(_) => NotiCmd::ObjectList,
            Self::VpTiles(_) => NotiCmd::VpTiles,
            Self::FloorTiles { .. } => NotiCmd::FloorTiles,
            Self::FoundFieldObj { .. } => NotiCmd::FoundFieldObj,
            Self::ForgetFloor { .. } => NotiCmd::ForgetFloor,
            Self::ActivateTrap { .. } => NotiCmd::ActivateTrap,
        }
    }

    pub fn into_packet(&self) -> Result<Packet, CodecError> {
        let header = PacketHeader::notification(self.cmd() as u16);
        Ok(Packet::new(header, self.to_bytes()?))
    }

    /// Decodes a notification body. The tag is checked before the body so an
    /// unknown tag never costs a decode.
    pub fn decode(header: &PacketHeader, body: &[u8]) -> Result<Self, CodecError> {
        let cmd = NotiCmd::from_u16(header.cmd).ok_or(CodecError::UnknownCommand {
            kind: PacketKind::Notification,
            cmd: header.cmd,
        })?;
        let decoded = Self::from_bytes(body)?;
        if decoded.cmd() != cmd {
            return Err(CodecError::BodyMismatch(header.cmd));
        }
        Ok(decoded)
    }
}

impl_body_codec!(NotificationBody);
