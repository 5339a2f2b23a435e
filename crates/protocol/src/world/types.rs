use std::fmt;

use bitflags::bitflags;
use rkyv::{Archive, Deserialize, Serialize};

/// Globally unique id the tower assigns to floors, objects and sessions.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct G2Id(pub u64);

impl G2Id {
    pub const NONE: G2Id = G2Id(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for G2Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G2#{:x}", self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum Way9 {
    #[default]
    Center = 0,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Way9 {
    pub const ALL_MOVING: [Way9; 8] = [
        Way9::North,
        Way9::NorthEast,
        Way9::East,
        Way9::SouthEast,
        Way9::South,
        Way9::SouthWest,
        Way9::West,
        Way9::NorthWest,
    ];

    pub fn dx_dy(&self) -> (i32, i32) {
        match self {
            Way9::Center => (0, 0),
            Way9::North => (0, -1),
            Way9::NorthEast => (1, -1),
            Way9::East => (1, 0),
            Way9::SouthEast => (1, 1),
            Way9::South => (0, 1),
            Way9::SouthWest => (-1, 1),
            Way9::West => (-1, 0),
            Way9::NorthWest => (-1, -1),
        }
    }

    pub fn is_center(&self) -> bool {
        matches!(self, Way9::Center)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(&self, dir: Way9) -> Self {
        let (dx, dy) = dir.dx_dy();
        Self::new(self.x + dx, self.y + dy)
    }
}

bitflags! {
    /// Terrain layers present on one tile. An empty set means the tile has
    /// not been seen.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct Tile: u16 {
        const SWAMP = 1 << 0;
        const SOIL = 1 << 1;
        const STONE = 1 << 2;
        const SAND = 1 << 3;
        const SEA = 1 << 4;
        const MAGMA = 1 << 5;
        const ICE = 1 << 6;
        const GRASS = 1 << 7;
        const TREE = 1 << 8;
        const ROAD = 1 << 9;
        const ROOM = 1 << 10;
        const WALL = 1 << 11;
        const WINDOW = 1 << 12;
        const DOOR = 1 << 13;
        const FOG = 1 << 14;
        const SMOKE = 1 << 15;
    }
}

impl Tile {
    pub fn is_known(&self) -> bool {
        !self.is_empty()
    }

    pub fn blocks_movement(&self) -> bool {
        self.intersects(Tile::WALL | Tile::WINDOW | Tile::TREE | Tile::MAGMA | Tile::SEA)
    }
}

/// One tile as carried on the wire: absolute position plus raw [`Tile`] bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TileCell {
    pub pos: TilePos,
    pub bits: u16,
}

impl TileCell {
    pub fn new(pos: TilePos, tile: Tile) -> Self {
        Self {
            pos,
            bits: tile.bits(),
        }
    }

    pub fn tile(&self) -> Tile {
        Tile::from_bits_truncate(self.bits)
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TowerInfo {
    pub id: G2Id,
    pub name: String,
    pub factor: [i64; 3],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FloorInfo {
    pub id: G2Id,
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub turn_per_sec: f64,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum FieldObjAct {
    PortalInOut,
    PortalIn,
    PortalOut,
    PortalAutoIn,
    RecycleCan,
    Teleport,
    Mine,
    Lightning,
    Fog,
    Drain,
    Rotate,
}

impl FieldObjAct {
    pub fn is_trap(&self) -> bool {
        matches!(
            self,
            FieldObjAct::Teleport
                | FieldObjAct::Mine
                | FieldObjAct::Lightning
                | FieldObjAct::Fog
                | FieldObjAct::Drain
                | FieldObjAct::Rotate
        )
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FieldObjClient {
    pub id: G2Id,
    pub pos: TilePos,
    pub act: FieldObjAct,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum CarryObjKind {
    Equip,
    Potion,
    Scroll,
    Money,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CarryObjClient {
    pub id: G2Id,
    pub kind: CarryObjKind,
    pub pos: TilePos,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ActiveObjClient {
    pub id: G2Id,
    pub nickname: String,
    pub pos: TilePos,
    pub dir: Way9,
    pub faction: u8,
    pub alive: bool,
}

/// Detailed state of the player's own active object.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlayerActiveObjInfo {
    pub id: G2Id,
    pub pos: TilePos,
    pub hp: i32,
    pub hp_max: i32,
    pub sp: i32,
    pub sp_max: i32,
    pub level: i32,
    pub exp: i64,
    pub remain_turn_to_rebirth: i32,
    pub overload_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Action {
    Attack(Way9),
    AttackWide(Way9),
    AttackLong(Way9),
    Pickup(G2Id),
    Drop(G2Id),
    Equip(G2Id),
    UnEquip(G2Id),
    DrinkPotion(G2Id),
    ReadScroll(G2Id),
    Recycle(G2Id),
    EnterPortal,
    Meditate,
    KillSelf,
    Rebirth,
}

impl Action {
    /// Rebirth is the only action a dead player may still take.
    pub fn allowed_while_dead(&self) -> bool {
        matches!(self, Action::Rebirth)
    }
}
