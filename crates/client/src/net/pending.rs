use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use towerlink::{NOTIFICATION_PID, Packet};

use crate::error::{ClientError, Result};

/// Invoked exactly once with the response packet, a timeout or a teardown error.
pub type ResponseHandler = Box<dyn FnOnce(Result<Packet>) + Send>;

struct PendingRequest {
    handler: ResponseHandler,
    deadline: Instant,
    timeout: Duration,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<u32, PendingRequest>,
    closed: bool,
}

/// Correlates request PIDs with the handlers waiting on their responses.
///
/// The lock only guards map mutation. Handlers always run after it is
/// released, so a handler may register a new request.
pub struct PendingRequestTable {
    state: Mutex<TableState>,
    next_pid: AtomicU32,
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState::default()),
            next_pid: AtomicU32::new(1),
        }
    }

    /// Allocates a PID that is neither the notification sentinel nor pending.
    pub fn next_pid(&self) -> u32 {
        loop {
            let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
            if pid == NOTIFICATION_PID {
                continue;
            }
            if !self.state.lock().entries.contains_key(&pid) {
                return pid;
            }
        }
    }

    pub fn register(&self, pid: u32, handler: ResponseHandler, timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if state.entries.contains_key(&pid) {
            return Err(ClientError::DuplicatePid(pid));
        }
        state.entries.insert(
            pid,
            PendingRequest {
                handler,
                deadline: Instant::now() + timeout,
                timeout,
            },
        );
        Ok(())
    }

    /// Registers a handler that forwards the outcome to the returned receiver.
    pub fn register_waiter(
        &self,
        pid: u32,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Packet>>> {
        let (tx, rx) = oneshot::channel();
        let handler: ResponseHandler = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        self.register(pid, handler, timeout)?;
        Ok(rx)
    }

    pub fn resolve(&self, pid: u32, packet: Packet) -> bool {
        let entry = self.state.lock().entries.remove(&pid);
        match entry {
            Some(pending) => {
                (pending.handler)(Ok(packet));
                true
            }
            None => {
                log::warn!(
                    "Unexpected response pid {} cmd {} (late or duplicate)",
                    pid,
                    packet.header.cmd
                );
                false
            }
        }
    }

    /// Removes every entry whose deadline is at or before `now` and fails it
    /// with a timeout.
    pub fn expire(&self, now: Instant) -> Vec<u32> {
        let expired: Vec<(u32, PendingRequest)> = {
            let mut state = self.state.lock();
            let pids: Vec<u32> = state
                .entries
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(&pid, _)| pid)
                .collect();
            pids.into_iter()
                .filter_map(|pid| state.entries.remove(&pid).map(|p| (pid, p)))
                .collect()
        };

        let mut pids = Vec::with_capacity(expired.len());
        for (pid, pending) in expired {
            log::debug!("Request {} timed out after {:?}", pid, pending.timeout);
            (pending.handler)(Err(ClientError::Timeout {
                pid,
                timeout: pending.timeout,
            }));
            pids.push(pid);
        }
        pids
    }

    /// Fails every pending request with `ConnectionClosed` and refuses new
    /// registrations. Returns how many requests were drained.
    pub fn drain(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.entries.drain().map(|(_, p)| p).collect()
        };

        let count = drained.len();
        for pending in drained {
            (pending.handler)(Err(ClientError::ConnectionClosed));
        }
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().entries.values().map(|p| p.deadline).min()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.state.lock().entries.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
