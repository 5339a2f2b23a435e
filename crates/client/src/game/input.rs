use parking_lot::Mutex;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Move,
    Action,
}

impl IntentKind {
    fn name(&self) -> &'static str {
        match self {
            IntentKind::Move => "move",
            IntentKind::Action => "action",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    turn: u64,
    moves: u32,
    actions: u32,
}

/// Caps how many move and action requests leave the client per server turn.
/// Counters reset whenever the observed turn number changes.
#[derive(Debug)]
pub struct ActionLimiter {
    moves_per_turn: u32,
    actions_per_turn: u32,
    counters: Mutex<Counters>,
}

impl ActionLimiter {
    pub fn new(moves_per_turn: u32, actions_per_turn: u32) -> Self {
        Self {
            moves_per_turn,
            actions_per_turn,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn try_acquire(&self, kind: IntentKind, turn: u64) -> Result<()> {
        let mut counters = self.counters.lock();
        if counters.turn != turn {
            *counters = Counters {
                turn,
                ..Default::default()
            };
        }

        let (used, limit) = match kind {
            IntentKind::Move => (&mut counters.moves, self.moves_per_turn),
            IntentKind::Action => (&mut counters.actions, self.actions_per_turn),
        };
        if *used >= limit {
            return Err(ClientError::RateLimited {
                kind: kind.name(),
                limit,
            });
        }
        *used += 1;
        Ok(())
    }

    /// Gives back a slot taken for a request that never reached the wire.
    pub fn release(&self, kind: IntentKind, turn: u64) {
        let mut counters = self.counters.lock();
        if counters.turn != turn {
            return;
        }
        let used = match kind {
            IntentKind::Move => &mut counters.moves,
            IntentKind::Action => &mut counters.actions,
        };
        *used = used.saturating_sub(1);
    }

    pub fn used(&self, kind: IntentKind, turn: u64) -> u32 {
        let counters = self.counters.lock();
        if counters.turn != turn {
            return 0;
        }
        match kind {
            IntentKind::Move => counters.moves,
            IntentKind::Action => counters.actions,
        }
    }
}
