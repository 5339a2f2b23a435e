mod types;

pub use types::{
    Action, ActiveObjClient, CarryObjClient, CarryObjKind, FieldObjAct, FieldObjClient,
    FloorInfo, G2Id, PlayerActiveObjInfo, Tile, TileCell, TilePos, TowerInfo, Way9,
};
