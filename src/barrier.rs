//! Start barrier: resolves once every stream has started or failed.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of waiting on a [`StartBarrier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// Every stream resolved.
    Resolved,
    /// The wait gave up with `pending` streams unresolved.
    TimedOut { pending: usize },
}

struct BarrierState {
    /// One flag per stream; set on its first resolution.
    resolved: Vec<bool>,
    remaining: usize,
    decrements: usize,
}

/// Counts down once per stream, the first time it starts or fails.
///
/// Further resolutions of the same stream are ignored, so the counter
/// never goes negative.
pub struct StartBarrier {
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl StartBarrier {
    pub fn new(streams: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                resolved: vec![false; streams],
                remaining: streams,
                decrements: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Mark stream `index` as resolved. Returns `true` if this call counted.
    pub fn resolve(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        match state.resolved.get_mut(index) {
            Some(flag) if !*flag => *flag = true,
            _ => return false,
        }
        state.remaining -= 1;
        state.decrements += 1;
        if state.remaining == 0 {
            self.condvar.notify_all();
        }
        true
    }

    /// Block until every stream resolved or `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> BarrierOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.remaining > 0 {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match state.remaining {
            0 => BarrierOutcome::Resolved,
            pending => BarrierOutcome::TimedOut { pending },
        }
    }

    /// Streams not yet resolved.
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    /// Total decrements so far.
    pub fn decrements(&self) -> usize {
        self.state.lock().decrements
    }
}
