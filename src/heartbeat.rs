//! Liveness heartbeat between the host and the safety monitor.
//!
//! The only state shared across threads is one atomic flag: a timer task sets it, the monitor
//! swaps it back to false when it checks in. No lock is ever taken on the control path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
/// Missing this many periods disables controls.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    alive: Arc<AtomicBool>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking, callable from any thread.
    pub fn beat(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Whether a beat arrived since the last call, clearing it.
    pub fn take(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn peek(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Beats `heartbeat` every `period` on its own task until the handle is aborted.
pub fn spawn_heartbeat(heartbeat: Heartbeat, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            heartbeat.beat();
            trace!("heartbeat");
        }
    })
}

/// Monitor-side view: remembers when a beat was last seen.
#[derive(Debug, Clone)]
pub struct HeartbeatWatch {
    heartbeat: Heartbeat,
    timeout_ns: u64,
    last_seen_ns: Option<u64>,
}

impl HeartbeatWatch {
    pub fn new(heartbeat: Heartbeat, timeout: Duration) -> Self {
        Self {
            heartbeat,
            timeout_ns: u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX),
            last_seen_ns: None,
        }
    }

    /// False once no beat has been seen for longer than the timeout.
    ///
    /// The first check starts the clock.
    pub fn check(&mut self, now_ns: u64) -> bool {
        if self.heartbeat.take() || self.last_seen_ns.is_none() {
            self.last_seen_ns = Some(now_ns);
        }
        self.last_seen_ns
            .is_some_and(|seen| now_ns.saturating_sub(seen) <= self.timeout_ns)
    }

    pub fn last_seen_ns(&self) -> Option<u64> {
        self.last_seen_ns
    }
}
