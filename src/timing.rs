//! Entry/exit timestamps shared by every invocation of the probe.

use spin::Mutex;

use crate::platform;

/// Start/end timestamp pair.
///
/// `start_ns` is only written by the pre-handler and `end_ns` only by the
/// post-handler. Under concurrent matching calls the pair is last-writer-wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingState {
    pub start_ns: u64,
    pub end_ns: u64,
}

/// Consistent copy of a [`TimingState`] taken under the lock.
pub type TimingSnapshot = TimingState;

impl TimingState {
    /// `end_ns - start_ns`, or `None` if the end stamp precedes the start.
    pub fn delta_ns(&self) -> Option<u64> {
        self.end_ns.checked_sub(self.start_ns)
    }
}

/// Spin-locked timing pair.
///
/// Every access goes through a scoped guard, so the lock is released on all
/// return paths. Callers must not hold any other probe lock while stamping.
#[derive(Debug, Default)]
pub struct TimingLock {
    inner: Mutex<TimingState>,
}

impl TimingLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(TimingState {
                start_ns: 0,
                end_ns: 0,
            }),
        }
    }

    /// Record the entry timestamp.
    pub fn stamp_start(&self) -> u64 {
        let mut state = self.inner.lock();
        state.start_ns = platform::realtime_ns();
        state.start_ns
    }

    /// Record the exit timestamp and return the pair as it stood afterwards.
    pub fn stamp_end(&self) -> TimingSnapshot {
        let mut state = self.inner.lock();
        state.end_ns = platform::realtime_ns();
        *state
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        *self.inner.lock()
    }
}

/// Log an elapsed-time line for a snapshot.
pub fn show_delta(symbol: &str, snap: &TimingSnapshot) {
    match snap.delta_ns() {
        Some(delta) => info!(
            "kprobe_lkm: {}(): delta: {} ns ({} us, {} ms)",
            symbol,
            delta,
            delta / 1_000,
            delta / 1_000_000
        ),
        None => warn!(
            "kprobe_lkm: {}(): end < start (end={} start={}), no delta",
            symbol, snap.end_ns, snap.start_ns
        ),
    }
}
