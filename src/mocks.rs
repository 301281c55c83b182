//! Deterministic test doubles for the trigger engine.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! chronex = { path = "...", features = ["test-support"] }
//! ```

use crate::scheduler::{Clock, Scheduler, TriggerEvent};

use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ── ManualClock ───────────────────────────────────────────────────────────────

struct ManualClockInner {
    now: Mutex<DateTime<Utc>>,
    waker: Notify,
}

/// Clock that only moves when the test advances it; pending sleeps wake as
/// soon as their deadline is reached.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<ManualClockInner>,
}

impl ManualClock {
    /// Clock frozen at the given instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(ManualClockInner {
                now: Mutex::new(start),
                waker: Notify::new(),
            }),
        }
    }

    /// Move the clock forward and wake every pending sleep.
    pub fn advance(&self, duration: std::time::Duration) {
        {
            let mut now = self.inner.now.lock().expect("clock lock poisoned");
            *now += TimeDelta::from_std(duration).expect("advance overflows");
        }
        self.inner.waker.notify_waiters();
    }

    /// Jump the clock to an absolute instant and wake every pending sleep.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.inner.now.lock().expect("clock lock poisoned") = instant;
        self.inner.waker.notify_waiters();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.now.lock().expect("clock lock poisoned")
    }

    fn sleep(&self, duration: std::time::Duration) -> impl Future<Output = ()> + Send {
        let deadline = self.now() + TimeDelta::from_std(duration).expect("sleep overflows");
        let inner = Arc::clone(&self.inner);
        async move {
            loop {
                // Arm the waiter before checking so an advance between the
                // check and the await cannot be missed.
                let notified = inner.waker.notified();
                if *inner.now.lock().expect("clock lock poisoned") >= deadline {
                    return;
                }
                notified.await;
            }
        }
    }
}

// ── EventRecorder ─────────────────────────────────────────────────────────────

/// Records every trigger event as a compact `kind:id[:detail]` line.
#[derive(Clone, Default)]
pub struct EventRecorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe this recorder to all four event streams of a scheduler.
    pub fn attach<C: Clock>(&self, scheduler: &Scheduler<C>) {
        let entries = Arc::clone(&self.entries);
        scheduler.on_firing(move |event| record(&entries, event));
        let entries = Arc::clone(&self.entries);
        scheduler.on_completed(move |event| record(&entries, event));
        let entries = Arc::clone(&self.entries);
        scheduler.on_failed(move |event| record(&entries, event));
        let entries = Arc::clone(&self.entries);
        scheduler.on_skipped(move |event| record(&entries, event));
    }

    /// Everything recorded so far, in emission order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("recorder lock poisoned").clone()
    }

    /// Drop every recorded entry.
    pub fn clear(&self) {
        self.entries.lock().expect("recorder lock poisoned").clear();
    }
}

fn record(entries: &Arc<Mutex<Vec<String>>>, event: &TriggerEvent) {
    let line = match event {
        TriggerEvent::Firing(context) => format!("firing:{}", context.trigger_id),
        TriggerEvent::Completed(context) => format!("completed:{}", context.trigger_id),
        TriggerEvent::Failed(context, error) => {
            format!("failed:{}:{}", context.trigger_id, error)
        }
        TriggerEvent::Skipped { trigger_id, reason } => {
            format!("skipped:{trigger_id}:{reason}")
        }
    };
    entries.lock().expect("recorder lock poisoned").push(line);
}
