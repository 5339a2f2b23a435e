use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use crate::net::SessionConnection;
use crate::render::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnProgress {
    /// Timestamp not newer than what was already accepted; discard.
    Stale,
    /// Recorded; still waiting for the other half of the turn.
    Pending,
    /// Both halves arrived; carries the new turn number.
    Complete(u64),
}

/// Decides when a server turn is complete: a viewport-tile notification and
/// an object-list notification for the current floor, each newer than the
/// previously accepted pair, in either order.
#[derive(Debug, Default)]
pub struct TurnTracker {
    turn: u64,
    tiles_time: Option<i64>,
    objects_time: Option<i64>,
    accepted_tiles: Option<i64>,
    accepted_objects: Option<i64>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Returns whether a tile notification stamped `time_ns` would be accepted.
    pub fn tiles_fresh(&self, time_ns: i64) -> bool {
        is_newer(time_ns, self.tiles_time.or(self.accepted_tiles))
    }

    pub fn objects_fresh(&self, time_ns: i64) -> bool {
        is_newer(time_ns, self.objects_time.or(self.accepted_objects))
    }

    pub fn record_tiles(&mut self, time_ns: i64) -> TurnProgress {
        if !self.tiles_fresh(time_ns) {
            return TurnProgress::Stale;
        }
        self.tiles_time = Some(time_ns);
        self.try_complete()
    }

    pub fn record_objects(&mut self, time_ns: i64) -> TurnProgress {
        if !self.objects_fresh(time_ns) {
            return TurnProgress::Stale;
        }
        self.objects_time = Some(time_ns);
        self.try_complete()
    }

    /// Drops a half-collected turn, e.g. after a floor change.
    pub fn reset_pending(&mut self) {
        self.tiles_time = None;
        self.objects_time = None;
    }

    fn try_complete(&mut self) -> TurnProgress {
        match (self.tiles_time, self.objects_time) {
            (Some(tiles), Some(objects)) => {
                self.accepted_tiles = Some(tiles);
                self.accepted_objects = Some(objects);
                self.reset_pending();
                self.turn += 1;
                TurnProgress::Complete(self.turn)
            }
            _ => TurnProgress::Pending,
        }
    }
}

fn is_newer(time_ns: i64, last: Option<i64>) -> bool {
    last.is_none_or(|last| time_ns > last)
}

/// Periodic heartbeat plus turn-complete fan-out to the render sink.
pub struct TurnLoop {
    session: SessionConnection,
    sink: Arc<dyn RenderSink>,
    heartbeat_interval: Duration,
}

impl TurnLoop {
    pub fn new(
        session: SessionConnection,
        sink: Arc<dyn RenderSink>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            session,
            sink,
            heartbeat_interval,
        }
    }

    pub async fn run(self) {
        let cancel = self.session.cancel_token();
        let mut turns = self.session.turns();
        let mut ticker = interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let in_flight = Arc::new(AtomicBool::new(false));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if in_flight.swap(true, Ordering::AcqRel) {
                        log::debug!("Heartbeat still in flight, skipping tick");
                        continue;
                    }
                    let session = self.session.clone();
                    let in_flight = Arc::clone(&in_flight);
                    tokio::spawn(async move {
                        match session.heartbeat().await {
                            Ok(stats) => log::debug!(
                                "Heartbeat ping {:?} skew {}ns",
                                stats.ping,
                                stats.clock_skew_ns
                            ),
                            Err(e) => log::warn!("Heartbeat failed: {}", e),
                        }
                        in_flight.store(false, Ordering::Release);
                    });
                }
                changed = turns.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = Arc::clone(&turns.borrow_and_update());
                    log::trace!("Turn {} complete", snapshot.turn);
                    self.sink.turn_complete(&snapshot);
                }
            }
        }

        log::debug!("Turn loop stopped");
    }
}
