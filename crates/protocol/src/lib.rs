pub mod net;
pub mod world;

pub use net::{
    AccountInfo, CodecError, DEFAULT_PORT, ErrorCode, LoginResponse, MAX_FRAME_LEN,
    NOTIFICATION_PID, NotiCmd, NotificationBody, ObjectList, PROTOCOL_VERSION, Packet,
    PacketCodec, PacketHeader, PacketKind, RequestBody, RequestCmd, ResponseBody, ServiceInfo,
    ViewportTiles,
};
pub use world::{
    Action, ActiveObjClient, CarryObjClient, CarryObjKind, FieldObjAct, FieldObjClient,
    FloorInfo, G2Id, PlayerActiveObjInfo, Tile, TileCell, TilePos, TowerInfo, Way9,
};

/// Message schema version this client was built against. Compared with the
/// server's advertised version at login.
pub const SERVICE_PROTOCOL_VERSION: &str = "3.1.0";
/// Game data version (item tables, floor scripts) this client was built against.
pub const DATA_VERSION: &str = "2024.11.1";
