use std::sync::Arc;

use towerlink::{NotificationBody, ObjectList, PacketHeader, ViewportTiles};

use super::turn::TurnProgress;
use super::world::{ClientFloor, World, WorldSnapshot, WorldState};
use crate::error::Result;

/// Outcome of routing one notification.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Applied,
    /// A turn just completed. The snapshot was taken under the same lock
    /// that completed it.
    TurnComplete(Arc<WorldSnapshot>),
    /// Addressed to a floor other than the current one.
    StaleFloor,
    /// Not newer than the last accepted notification of its kind.
    StaleTime,
    Ignored,
}

/// Applies unsolicited server notifications to the world.
///
/// The body is fully decoded before the world lock is taken, and every
/// check runs before the first write, so a notification is either applied
/// whole or not at all.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    world: World,
}

impl NotificationRouter {
    pub fn new(world: World) -> Self {
        Self { world }
    }

    pub fn dispatch(&self, header: &PacketHeader, body: &[u8]) -> Result<Dispatch> {
        let noti = NotificationBody::decode(header, body)?;
        Ok(self.apply(noti))
    }

    pub fn apply(&self, noti: NotificationBody) -> Dispatch {
        let mut world = self.world.lock();
        let state = &mut *world;

        match noti {
            NotificationBody::Invalid => Dispatch::Ignored,
            NotificationBody::EnterTower(tower) => {
                log::info!("Entered tower {} ({})", tower.name, tower.id);
                state.snapshot.floors.clear();
                state.snapshot.floor = None;
                state.snapshot.clear_floor_objects();
                state.snapshot.tower = Some(tower);
                state.turns.reset_pending();
                Dispatch::Applied
            }
            NotificationBody::LeaveTower(tower) => {
                log::info!("Left tower {} ({})", tower.name, tower.id);
                state.snapshot.tower = None;
                state.snapshot.floors.clear();
                state.snapshot.floor = None;
                state.snapshot.clear_floor_objects();
                state.turns.reset_pending();
                Dispatch::Applied
            }
            NotificationBody::EnterFloor(info) => {
                let previous = state.snapshot.current_floor_id();
                if previous != Some(info.id) {
                    state.snapshot.clear_floor_objects();
                    state.turns.reset_pending();
                }
                log::debug!("Entered floor {} ({})", info.name, info.id);
                state
                    .snapshot
                    .floors
                    .entry(info.id)
                    .and_modify(|f| f.info = info.clone())
                    .or_insert_with(|| ClientFloor::new(info.clone()));
                state.snapshot.floor = Some(info);
                Dispatch::Applied
            }
            NotificationBody::LeaveFloor(info) => {
                if !state.snapshot.is_current_floor(info.id) {
                    return Dispatch::StaleFloor;
                }
                log::debug!("Left floor {} ({})", info.name, info.id);
                state.snapshot.floor = None;
                state.snapshot.clear_floor_objects();
                state.turns.reset_pending();
                Dispatch::Applied
            }
            NotificationBody::Ageing { id } => {
                state.snapshot.ageing += 1;
                log::debug!("Ageing {}", id);
                Dispatch::Applied
            }
            NotificationBody::Death => {
                log::info!("Player died, waiting to rebirth");
                state.snapshot.waiting_rebirth = true;
                state.snapshot.ready_to_rebirth = false;
                Dispatch::Applied
            }
            NotificationBody::ReadyToRebirth => {
                state.snapshot.ready_to_rebirth = true;
                Dispatch::Applied
            }
            NotificationBody::Rebirthed => {
                log::info!("Player rebirthed");
                state.snapshot.waiting_rebirth = false;
                state.snapshot.ready_to_rebirth = false;
                state.snapshot.remain_turn_to_rebirth = 0;
                Dispatch::Applied
            }
            NotificationBody::Broadcast { msg } => {
                log::info!("Broadcast: {}", msg);
                state.snapshot.last_broadcast = Some(msg);
                Dispatch::Applied
            }
            NotificationBody::ObjectList(list) => apply_object_list(state, list),
            NotificationBody::VpTiles(tiles) => apply_viewport_tiles(state, tiles),
            NotificationBody::FloorTiles { floor, cells } => {
                let entry = state
                    .snapshot
                    .floors
                    .entry(floor.id)
                    .or_insert_with(|| ClientFloor::new(floor.clone()));
                entry.info = floor;
                entry.merge_tiles(&cells);
                Dispatch::Applied
            }
            NotificationBody::FoundFieldObj { floor_id, obj } => {
                let Some(floor) = state.snapshot.floors.get_mut(&floor_id) else {
                    return Dispatch::StaleFloor;
                };
                floor.field_objs.insert(obj.id, obj.clone());
                if state.snapshot.current_floor_id() == Some(floor_id) {
                    state.snapshot.field_objs.insert(obj.id, obj);
                }
                Dispatch::Applied
            }
            NotificationBody::ForgetFloor { floor_id } => {
                let Some(floor) = state.snapshot.floors.get_mut(&floor_id) else {
                    return Dispatch::Ignored;
                };
                log::debug!("Forgot floor {}", floor_id);
                floor.forget();
                if state.snapshot.current_floor_id() == Some(floor_id) {
                    state.snapshot.field_objs.clear();
                }
                Dispatch::Applied
            }
            NotificationBody::ActivateTrap { act, triggered } => {
                log::debug!("Trap {:?} triggered={}", act, triggered);
                state.snapshot.last_trap = Some((act, triggered));
                Dispatch::Applied
            }
        }
    }
}


fn apply_object_list(state: &mut WorldState, list: ObjectList) -> Dispatch {
    if !state.snapshot.is_current_floor(list.floor_id) {
        log::debug!("Dropping object list for floor {}", list.floor_id);
        return Dispatch::StaleFloor;
    }
    let progress = state.turns.record_objects(list.time_ns);
    if progress == TurnProgress::Stale {
        return Dispatch::StaleTime;
    }

    let snapshot = &mut state.snapshot;
    if let Some(player) = list.player {
        if let Some(prev) = &snapshot.player {
            snapshot.hp_diff = player.hp - prev.hp;
            snapshot.sp_diff = player.sp - prev.sp;
        }
        snapshot.remain_turn_to_rebirth = player.remain_turn_to_rebirth;
        snapshot.player = Some(player);
    }

    snapshot.active_objs = list.active_objs.into_iter().map(|o| (o.id, o)).collect();
    snapshot.carry_objs = list.carry_objs.into_iter().map(|o| (o.id, o)).collect();
    snapshot.field_objs = list.field_objs.into_iter().map(|o| (o.id, o)).collect();

    if let Some(floor) = snapshot.floors.get_mut(&list.floor_id) {
        for (id, obj) in &snapshot.field_objs {
            floor.field_objs.insert(*id, obj.clone());
        }
    }

    snapshot.turn_time_ns = list.time_ns;
    finish_turn(state, progress)
}

fn apply_viewport_tiles(state: &mut WorldState, tiles: ViewportTiles) -> Dispatch {
    if !state.snapshot.is_current_floor(tiles.floor_id) {
        log::debug!("Dropping viewport tiles for floor {}", tiles.floor_id);
        return Dispatch::StaleFloor;
    }
    let Some(floor) = state.snapshot.floors.get_mut(&tiles.floor_id) else {
        return Dispatch::StaleFloor;
    };
    if !state.turns.tiles_fresh(tiles.time_ns) {
        return Dispatch::StaleTime;
    }

    floor.merge_tiles(&tiles.cells);
    state.snapshot.viewport = towerlink::TilePos::new(tiles.vp_x, tiles.vp_y);
    let progress = state.turns.record_tiles(tiles.time_ns);
    finish_turn(state, progress)
}

fn finish_turn(state: &mut WorldState, progress: TurnProgress) -> Dispatch {
    match progress {
        TurnProgress::Complete(turn) => {
            state.snapshot.turn = turn;
            Dispatch::TurnComplete(Arc::new(state.snapshot.clone()))
        }
        TurnProgress::Pending => Dispatch::Applied,
        TurnProgress::Stale => Dispatch::StaleTime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use towerlink::{
        ActiveObjClient, FloorInfo, G2Id, PlayerActiveObjInfo, Tile, TileCell, TilePos, Way9,
    };

    fn floor(id: u64) -> FloorInfo {
        FloorInfo {
            id: G2Id(id),
            name: format!("F{}", id),
            width: 32,
            height: 32,
            turn_per_sec: 2.0,
        }
    }

    fn object_list(floor_id: u64, time_ns: i64, hp: i32) -> ObjectList {
        ObjectList {
            time_ns,
            floor_id: G2Id(floor_id),
            player: Some(PlayerActiveObjInfo {
                id: G2Id(100),
                hp,
                sp: 10,
                ..Default::default()
            }),
            active_objs: vec![ActiveObjClient {
                id: G2Id(100),
                nickname: "me".into(),
                pos: TilePos::new(1, 1),
                dir: Way9::Center,
                faction: 0,
                alive: true,
            }],
            carry_objs: Vec::new(),
            field_objs: Vec::new(),
        }
    }

    fn tiles(floor_id: u64, time_ns: i64) -> ViewportTiles {
        ViewportTiles {
            time_ns,
            floor_id: G2Id(floor_id),
            vp_x: 1,
            vp_y: 1,
            cells: vec![
                TileCell::new(TilePos::new(1, 1), Tile::ROOM),
                TileCell::new(TilePos::new(2, 1), Tile::empty()),
            ],
        }
    }

    fn router_on_floor(id: u64) -> (World, NotificationRouter) {
        let world = World::new();
        let router = NotificationRouter::new(world.clone());
        router.apply(NotificationBody::EnterFloor(floor(id)));
        (world, router)
    }

    #[test]
    fn test_stale_floor_object_list_ignored() {
        let (world, router) = router_on_floor(1);
        let before = world.snapshot();

        let outcome = router.apply(NotificationBody::ObjectList(object_list(2, 10, 50)));

        assert!(matches!(outcome, Dispatch::StaleFloor));
        let after = world.snapshot();
        assert!(after.active_objs.is_empty());
        assert_eq!(after.player, before.player);
    }

    fn completed_turn(outcome: Dispatch) -> Option<u64> {
        match outcome {
            Dispatch::TurnComplete(snapshot) => Some(snapshot.turn),
            _ => None,
        }
    }

    #[test]
    fn test_turn_completes_in_either_order() {
        let (world, router) = router_on_floor(1);

        assert!(matches!(
            router.apply(NotificationBody::ObjectList(object_list(1, 10, 50))),
            Dispatch::Applied
        ));
        assert_eq!(
            completed_turn(router.apply(NotificationBody::VpTiles(tiles(1, 10)))),
            Some(1)
        );
        assert!(matches!(
            router.apply(NotificationBody::VpTiles(tiles(1, 20))),
            Dispatch::Applied
        ));
        assert_eq!(
            completed_turn(router.apply(NotificationBody::ObjectList(object_list(1, 20, 45)))),
            Some(2)
        );

        let snapshot = world.snapshot();
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.hp_diff, -5);
        assert_eq!(snapshot.active_objs.len(), 1);
    }

    #[test]
    fn test_completed_snapshot_unaffected_by_next_turn() {
        let (world, router) = router_on_floor(1);
        router.apply(NotificationBody::VpTiles(tiles(1, 10)));
        let Dispatch::TurnComplete(done) =
            router.apply(NotificationBody::ObjectList(object_list(1, 10, 50)))
        else {
            panic!("turn should complete");
        };

        router.apply(NotificationBody::ObjectList(object_list(1, 20, 5)));

        assert_eq!(done.turn, 1);
        assert_eq!(done.turn_time_ns, 10);
        assert_eq!(done.player.as_ref().map(|p| p.hp), Some(50));
        assert_eq!(world.snapshot().player.as_ref().map(|p| p.hp), Some(5));
    }

    #[test]
    fn test_stale_time_object_list_discarded() {
        let (world, router) = router_on_floor(1);
        router.apply(NotificationBody::ObjectList(object_list(1, 10, 50)));
        router.apply(NotificationBody::VpTiles(tiles(1, 10)));

        let outcome = router.apply(NotificationBody::ObjectList(object_list(1, 5, 1)));

        assert!(matches!(outcome, Dispatch::StaleTime));
        assert_eq!(world.snapshot().player.map(|p| p.hp), Some(50));
    }

    #[test]
    fn test_tile_merge_idempotent_through_router() {
        let (world, router) = router_on_floor(1);
        let body = NotificationBody::FloorTiles {
            floor: floor(1),
            cells: vec![TileCell::new(TilePos::new(3, 3), Tile::WALL)],
        };

        router.apply(body.clone());
        let once = world.snapshot().current_floor().map(|f| f.tiles.clone());
        router.apply(body);
        let twice = world.snapshot().current_floor().map(|f| f.tiles.clone());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_floor_change_clears_objects() {
        let (world, router) = router_on_floor(1);
        router.apply(NotificationBody::ObjectList(object_list(1, 10, 50)));
        router.apply(NotificationBody::VpTiles(tiles(1, 10)));
        assert_eq!(world.snapshot().active_objs.len(), 1);

        router.apply(NotificationBody::EnterFloor(floor(2)));

        let snapshot = world.snapshot();
        assert_eq!(snapshot.current_floor_id(), Some(G2Id(2)));
        assert!(snapshot.active_objs.is_empty());
        assert!(snapshot.floors.contains_key(&G2Id(1)));
    }

    #[test]
    fn test_death_and_rebirth_cycle() {
        let (world, router) = router_on_floor(1);

        router.apply(NotificationBody::Death);
        assert!(world.waiting_rebirth());

        router.apply(NotificationBody::ReadyToRebirth);
        assert!(world.snapshot().ready_to_rebirth);

        router.apply(NotificationBody::Rebirthed);
        let snapshot = world.snapshot();
        assert!(!snapshot.waiting_rebirth);
        assert!(!snapshot.ready_to_rebirth);
    }

    #[test]
    fn test_unknown_tag_reported() {
        let (_, router) = router_on_floor(1);
        let header = PacketHeader::notification(999);

        let err = router.dispatch(&header, &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ClientError::UnknownNotification(999)
        ));
    }

    #[test]
    fn test_forget_floor_clears_tiles() {
        let (world, router) = router_on_floor(1);
        router.apply(NotificationBody::VpTiles(tiles(1, 1)));
        router.apply(NotificationBody::ForgetFloor { floor_id: G2Id(1) });

        let snapshot = world.snapshot();
        assert!(snapshot.current_floor().unwrap().tiles.is_empty());
    }
}
