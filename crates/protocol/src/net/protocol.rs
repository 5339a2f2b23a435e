use rkyv::{Archive, Deserialize, Serialize, rancor, util::AlignedVec};

/// Upper bound on a single length-framed packet. Whole-floor tile dumps are the
/// largest payloads the tower sends.
pub const MAX_FRAME_LEN: usize = 1 << 20;
/// Wire format version embedded in every header.
pub const PROTOCOL_VERSION: u32 = 3;
pub const PROTOCOL_MAGIC: u32 = 0x5457_524C;
pub const DEFAULT_PORT: u16 = 14101;

/// PID carried by packets that answer no request.
pub const NOTIFICATION_PID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum PacketKind {
    Request,
    Response,
    Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub kind: PacketKind,
    pub cmd: u16,
    pub pid: u32,
}

impl PacketHeader {
    pub fn new(kind: PacketKind, cmd: u16, pid: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            kind,
            cmd,
            pid,
        }
    }

    pub fn request(cmd: u16, pid: u32) -> Self {
        Self::new(PacketKind::Request, cmd, pid)
    }

    pub fn response(cmd: u16, pid: u32) -> Self {
        Self::new(PacketKind::Response, cmd, pid)
    }

    pub fn notification(cmd: u16) -> Self {
        Self::new(PacketKind::Notification, cmd, NOTIFICATION_PID)
    }

    pub fn is_notification(&self) -> bool {
        self.kind == PacketKind::Notification || self.pid == NOTIFICATION_PID
    }
}

/// A decoded envelope. `body` holds the rkyv bytes of the typed payload named
/// by `header.cmd`; it is decoded lazily so unknown commands can be skipped.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(header: PacketHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("truncated packet: {0} bytes")]
    Truncated(usize),
    #[error("packet of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("protocol version mismatch: expected {expected}, got {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("unknown command {cmd} for {kind:?}")]
    UnknownCommand { kind: PacketKind, cmd: u16 },
    #[error("body does not match command {0}")]
    BodyMismatch(u16),
}

const MIN_PACKET_LEN: usize = 8;

pub(crate) fn aligned_copy(data: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::with_capacity(data.len());
    aligned.extend_from_slice(data);
    aligned
}

/// Versioned packet codec. Encoding is deterministic for a given packet and
/// decoding never yields a packet whose header disagrees with the codec.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    version: u32,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

impl PacketCodec {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        let mut stamped = packet.clone();
        stamped.header.magic = PROTOCOL_MAGIC;
        stamped.header.version = self.version;

        let data = rkyv::to_bytes::<rancor::Error>(&stamped)
            .map(|aligned| aligned.into_vec())
            .map_err(CodecError::Serialize)?;

        if data.len() > MAX_FRAME_LEN {
            return Err(CodecError::Oversized {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        Ok(data)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Packet, CodecError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(CodecError::Truncated(data.len()));
        }
        if data.len() > MAX_FRAME_LEN {
            return Err(CodecError::Oversized {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }

        let aligned = aligned_copy(data);
        let packet = rkyv::from_bytes::<Packet, rancor::Error>(aligned.as_slice())
            .map_err(CodecError::Deserialize)?;

        if packet.header.magic != PROTOCOL_MAGIC {
            return Err(CodecError::BadMagic(packet.header.magic));
        }
        if packet.header.version != self.version {
            return Err(CodecError::VersionMismatch {
                expected: self.version,
                found: packet.header.version,
            });
        }
        Ok(packet)
    }
}

/// Implements rkyv byte conversion for a payload enum.
macro_rules! impl_body_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                pub fn to_bytes(&self) -> Result<Vec<u8>, $crate::net::CodecError> {
                    rkyv::to_bytes::<rkyv::rancor::Error>(self)
                        .map(|aligned| aligned.into_vec())
                        .map_err($crate::net::CodecError::Serialize)
                }

                pub fn from_bytes(data: &[u8]) -> Result<Self, $crate::net::CodecError> {
                    let aligned = $crate::net::protocol::aligned_copy(data);
                    rkyv::from_bytes::<Self, rkyv::rancor::Error>(aligned.as_slice())
                        .map_err($crate::net::CodecError::Deserialize)
                }
            }
        )+
    };
}

pub(crate) use impl_body_codec;
