use crate::game::WorldSnapshot;

/// Receives world snapshots. Called on the turn task, so implementations must
/// return quickly.
pub trait RenderSink: Send + Sync + 'static {
    fn turn_complete(&self, snapshot: &WorldSnapshot);

    /// Out-of-turn redraw, e.g. after a window resize.
    fn redraw(&self, snapshot: &WorldSnapshot) {
        self.turn_complete(snapshot);
    }
}

impl<F> RenderSink for F
where
    F: Fn(&WorldSnapshot) + Send + Sync + 'static,
{
    fn turn_complete(&self, snapshot: &WorldSnapshot) {
        self(snapshot)
    }
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn turn_complete(&self, _snapshot: &WorldSnapshot) {}
}
