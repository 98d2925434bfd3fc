// Proactive token refresh scheduling.
//
// One cancellable timer slot per client: scheduling again aborts the
// previous timer, and close aborts whatever is pending. The timer fires
// the same refresh-and-reconnect cycle as the reactive 401 path.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::debug;

/// Seconds before credential expiry at which the proactive refresh fires.
pub const REFRESH_LEAD_SECS: f64 = 300.0;

struct Slot {
    handle: Option<JoinHandle<()>>,
    /// Bumped on every schedule/cancel so a stale timer task cannot vacate
    /// a slot that has since been re-armed.
    generation: u64,
}

/// Owns the single pending proactive-refresh timer.
///
/// At most one timer is armed at a time; [`schedule`](Self::schedule)
/// supersedes (aborts) any previous one. Dropping the scheduler cancels
/// the pending timer.
pub struct RefreshScheduler {
    slot: Arc<Mutex<Slot>>,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                handle: None,
                generation: 0,
            })),
        }
    }

    /// Arm the timer to run `fire` [`REFRESH_LEAD_SECS`] before
    /// `expires_at` (seconds since the Unix epoch).
    ///
    /// If the lead time has already passed, `fire` runs immediately but
    /// asynchronously — the caller is never blocked on the refresh cycle.
    /// Any previously armed timer is cancelled first.
    pub fn schedule<F>(&self, expires_at: f64, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = refresh_delay(expires_at, epoch_now());
        if delay == Duration::ZERO {
            debug!("token near expiry, refreshing immediately");
        } else {
            debug!(delay_secs = delay.as_secs(), "scheduled proactive token refresh");
        }

        let mut slot = self.slot.lock().expect("refresh timer lock poisoned");
        slot.generation += 1;
        let generation = slot.generation;

        let shared = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            // Vacate the slot before firing: `fire` may re-arm the timer,
            // and that re-arm must not abort the task it is running on.
            {
                let mut slot = shared.lock().expect("refresh timer lock poisoned");
                if slot.generation == generation {
                    slot.handle = None;
                }
            }
            fire.await;
        });

        if let Some(previous) = slot.handle.replace(handle) {
            previous.abort();
        }
    }

    /// Disarm any pending timer. Safe to call when none is armed; a fire
    /// already past its timer is not interrupted.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().expect("refresh timer lock poisoned");
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }

    /// Whether a timer is currently armed. The slot is vacated when the
    /// timer fires, so a refresh already in progress does not count.
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .expect("refresh timer lock poisoned")
            .handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// How long to wait before firing, given the expiry and the current time.
fn refresh_delay(expires_at: f64, now: f64) -> Duration {
    let delay = expires_at - now - REFRESH_LEAD_SECS;
    if delay <= 0.0 {
        return Duration::ZERO;
    }
    // NaN fails the comparison above and lands here, as do oversized
    // values; both saturate to "never" instead of firing a refresh loop
    // against an authority that keeps reporting a bogus expiry.
    Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}
