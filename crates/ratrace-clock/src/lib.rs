//! Time for Ratrace: a wall clock and the per-room turn timers.
//!
//! Turn deadlines travel to clients as Unix milliseconds, but the engine
//! waits on them with Tokio timers. [`Clock`] anchors one to the other at
//! construction so that both move together, including under
//! `tokio::time::pause()` in tests.
//!
//! [`TurnTimers`] holds at most one pending deadline per room. Scheduling
//! a new turn for a room replaces its old timer, so a room can never have
//! two live timers.
//!
//! # Integration
//!
//! The timers sit inside the engine's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         expiry = timers.next_expiry() => {
//!             store.expire_turn(expiry.key, expiry.turn);
//!         }
//!     }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Unix-millisecond wall clock driven by Tokio's monotonic clock.
///
/// The wall time is sampled once; after that, `now_ms` is the sampled
/// time plus Tokio's elapsed time. Pausing or advancing Tokio time moves
/// this clock too.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall_origin_ms: u64,
    origin: Instant,
}

impl Clock {
    /// Anchors to the system clock.
    pub fn system() -> Self {
        let wall_origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::starting_at(wall_origin_ms)
    }

    /// Anchors to a fixed wall time. Tests use this for readable
    /// deadlines.
    pub fn starting_at(wall_origin_ms: u64) -> Self {
        Self {
            wall_origin_ms,
            origin: Instant::now(),
        }
    }

    /// Current wall time in Unix milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.wall_origin_ms + self.origin.elapsed().as_millis() as u64
    }

    /// The Tokio instant at which this clock reads `wall_ms`. Times
    /// before the anchor map to the anchor itself.
    pub fn instant_at(&self, wall_ms: u64) -> Instant {
        self.origin + Duration::from_millis(wall_ms.saturating_sub(self.wall_origin_ms))
    }
}

// ---------------------------------------------------------------------------
// Turn timers
// ---------------------------------------------------------------------------

/// A fired timer, returned by [`TurnTimers::next_expiry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry<K> {
    pub key: K,
    /// The turn sequence number the timer was scheduled for.
    pub turn: u64,
    /// How late the timer fired relative to its deadline.
    pub late_by: Duration,
}

/// Counters for timer activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub scheduled: u64,
    /// Schedules that replaced a pending timer for the same key.
    pub replaced: u64,
    pub cancelled: u64,
    pub fired: u64,
}

/// Timers firing later than this are logged.
const LATE_WARN: Duration = Duration::from_millis(500);

/// One pending turn deadline per key, ordered by deadline.
pub struct TurnTimers<K> {
    pending: BTreeMap<K, (Instant, u64)>,
    queue: BTreeSet<(Instant, K)>,
    stats: TimerStats,
}

impl<K> TurnTimers<K>
where
    K: Copy + Ord + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            queue: BTreeSet::new(),
            stats: TimerStats::default(),
        }
    }

    /// Arms the timer for `key`'s `turn`, replacing any pending timer for
    /// that key. Returns `true` if one was replaced.
    pub fn schedule(&mut self, key: K, turn: u64, deadline: Instant) -> bool {
        let replaced = self.remove(key);
        self.pending.insert(key, (deadline, turn));
        self.queue.insert((deadline, key));
        self.stats.scheduled += 1;
        if replaced {
            self.stats.replaced += 1;
        }
        trace!(%key, turn, replaced, "turn timer armed");
        replaced
    }

    /// Disarms the timer for `key`. Returns `true` if one was pending.
    pub fn cancel(&mut self, key: K) -> bool {
        let cancelled = self.remove(key);
        if cancelled {
            self.stats.cancelled += 1;
            trace!(%key, "turn timer cancelled");
        }
        cancelled
    }

    /// Waits for the earliest pending deadline and disarms it.
    ///
    /// Pends forever while no timer is armed. Cancel safe: nothing is
    /// removed until the deadline has passed, so dropping the future in
    /// a `select!` loses no timer.
    pub async fn next_expiry(&mut self) -> Expiry<K> {
        let Some(&(deadline, key)) = self.queue.first() else {
            std::future::pending::<()>().await;
            unreachable!()
        };

        time::sleep_until(deadline).await;

        let late_by = Instant::now().saturating_duration_since(deadline);
        let turn = self.pending.get(&key).map(|&(_, turn)| turn).unwrap_or_default();
        self.remove(key);
        self.stats.fired += 1;

        if late_by > LATE_WARN {
            warn!(%key, turn, late_ms = late_by.as_millis() as u64, "turn timer fired late");
        } else {
            debug!(%key, turn, "turn timer fired");
        }

        Expiry { key, turn, late_by }
    }

    /// The pending deadline and turn for `key`, if armed.
    pub fn deadline_of(&self, key: K) -> Option<(Instant, u64)> {
        self.pending.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> &TimerStats {
        &self.stats
    }

    fn remove(&mut self, key: K) -> bool {
        match self.pending.remove(&key) {
            Some((deadline, _)) => {
                self.queue.remove(&(deadline, key));
                true
            }
            None => false,
        }
    }
}

impl<K> Default for TurnTimers<K>
where
    K: Copy + Ord + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_tracks_paused_time() {
        let clock = Clock::starting_at(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);

        time::advance(Duration::from_secs(30)).await;

        assert_eq!(clock.now_ms(), 1_030_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_instant_at_round_trips_with_now() {
        let clock = Clock::starting_at(5_000);
        let at = clock.instant_at(35_000);

        time::sleep_until(at).await;

        assert_eq!(clock.now_ms(), 35_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_instant_at_past_clamps_to_origin() {
        let clock = Clock::starting_at(5_000);
        assert!(clock.instant_at(1_000) <= Instant::now());
    }

    #[test]
    fn test_clock_system_is_after_2020() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            assert!(Clock::system().now_ms() > 1_577_836_800_000);
        });
    }
}
