use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use towerlink::{
    ActiveObjClient, CarryObjClient, FieldObjAct, FieldObjClient, FloorInfo, G2Id,
    PlayerActiveObjInfo, Tile, TileCell, TilePos, TowerInfo,
};

use super::turn::TurnTracker;

/// What the client remembers about one floor it has seen.
#[derive(Debug, Clone)]
pub struct ClientFloor {
    pub info: FloorInfo,
    pub tiles: HashMap<TilePos, Tile>,
    pub field_objs: HashMap<G2Id, FieldObjClient>,
}

impl ClientFloor {
    pub fn new(info: FloorInfo) -> Self {
        Self {
            info,
            tiles: HashMap::new(),
            field_objs: HashMap::new(),
        }
    }

    /// Merges revealed tiles by position. Unknown cells never replace a tile
    /// that was already seen, so merging the same cells twice is a no-op.
    /// Returns how many positions changed.
    pub fn merge_tiles(&mut self, cells: &[TileCell]) -> usize {
        let mut changed = 0;
        for cell in cells {
            let tile = cell.tile();
            if !tile.is_known() {
                continue;
            }
            if self.tiles.insert(cell.pos, tile) != Some(tile) {
                changed += 1;
            }
        }
        changed
    }

    pub fn tile(&self, pos: TilePos) -> Tile {
        self.tiles.get(&pos).copied().unwrap_or_default()
    }

    pub fn forget(&mut self) {
        self.tiles.clear();
        self.field_objs.clear();
    }
}

/// Everything the render sink may look at. Always handed out as a clone taken
/// under a single lock, so floor info and object maps never disagree.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub tower: Option<TowerInfo>,
    pub floor: Option<FloorInfo>,
    pub floors: HashMap<G2Id, ClientFloor>,
    pub active_objs: HashMap<G2Id, ActiveObjClient>,
    pub carry_objs: HashMap<G2Id, CarryObjClient>,
    pub field_objs: HashMap<G2Id, FieldObjClient>,
    pub player: Option<PlayerActiveObjInfo>,
    pub hp_diff: i32,
    pub sp_diff: i32,
    pub remain_turn_to_rebirth: i32,
    pub waiting_rebirth: bool,
    pub ready_to_rebirth: bool,
    pub ageing: u64,
    pub last_broadcast: Option<String>,
    pub last_trap: Option<(FieldObjAct, bool)>,
    pub viewport: TilePos,
    pub turn: u64,
    pub turn_time_ns: i64,
}

impl WorldSnapshot {
    pub fn current_floor_id(&self) -> Option<G2Id> {
        self.floor.as_ref().map(|f| f.id)
    }

    pub fn current_floor(&self) -> Option<&ClientFloor> {
        self.current_floor_id().and_then(|id| self.floors.get(&id))
    }

    pub fn is_current_floor(&self, floor_id: G2Id) -> bool {
        self.current_floor_id() == Some(floor_id)
    }

    pub(crate) fn clear_floor_objects(&mut self) {
        self.active_objs.clear();
        self.carry_objs.clear();
        self.field_objs.clear();
    }
}

#[derive(Debug, Default)]
pub struct WorldState {
    pub snapshot: WorldSnapshot,
    pub turns: TurnTracker,
}

/// Shared handle to the single mutable world. All writers go through
/// [`World::lock`]; readers take [`World::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct World {
    inner: Arc<Mutex<WorldState>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.inner.lock()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        self.inner.lock().snapshot.clone()
    }

    pub fn turn(&self) -> u64 {
        self.inner.lock().snapshot.turn
    }

    pub fn waiting_rebirth(&self) -> bool {
        self.inner.lock().snapshot.waiting_rebirth
    }
}
