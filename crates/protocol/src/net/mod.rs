mod command;
mod notification;
mod protocol;

pub use command::{
    AccountInfo, ErrorCode, LoginResponse, RequestBody, RequestCmd, ResponseBody, ServiceInfo,
};
pub use notification::{NotiCmd, NotificationBody, ObjectList, ViewportTiles};
pub use protocol::{
    CodecError, DEFAULT_PORT, MAX_FRAME_LEN, NOTIFICATION_PID, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    Packet, PacketCodec, PacketHeader, PacketKind,
};
