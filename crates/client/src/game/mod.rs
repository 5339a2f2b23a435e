mod input;
mod router;
mod turn;
mod world;

pub use input::{ActionLimiter, IntentKind};
pub use router::{Dispatch, NotificationRouter};
pub use turn::{TurnLoop, TurnProgress, TurnTracker};
pub use world::{ClientFloor, World, WorldSnapshot, WorldState};
