//! Tick-driven trigger engine: a concurrent registry of parsed expressions
//! with handlers, evaluated against a pluggable clock.

use crate::error::Error;
use crate::expression::Expression;
use crate::Result;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error as ThisError;
use tokio::task::JoinHandle;

/// Time source and delay primitive the engine runs against; swapping it for
/// a manually advanced fake makes every engine test deterministic.
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
    /// Sleep for the given duration on this clock.
    fn sleep(&self, duration: std::time::Duration) -> impl Future<Output = ()> + Send;
}

/// Wall-clock implementation used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: std::time::Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Externally supplied trigger record; metadata is carried opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique trigger id.
    pub id: String,
    /// Schedule expression string.
    pub expression: String,
    /// Disabled triggers stay registered but never fire.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque key/value payload forwarded to every handler invocation.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

/// Everything a handler learns about the fire that invoked it.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// Id of the trigger that fired.
    pub trigger_id: String,
    /// Nominal scheduled instant, before stagger and jitter.
    pub scheduled_at: DateTime<Utc>,
    /// The tick instant that dispatched the fire.
    pub fired_at: DateTime<Utc>,
    /// 1-based fire counter.
    pub fire_count: u32,
    /// The full parsed expression, queryable for future occurrences.
    pub expression: Arc<Expression>,
    /// Metadata from the definition record.
    pub metadata: Arc<HashMap<String, String>>,
}

/// Why an occurrence was skipped instead of dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The trigger is disabled.
    Disabled,
    /// The occurrence was past its `window`.
    WindowExceeded,
    /// `max` fires already happened.
    MaxReached,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::WindowExceeded => "window exceeded",
            Self::MaxReached => "max reached",
        })
    }
}

/// Lifecycle notifications fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    /// Emitted immediately before the handler runs.
    Firing(TriggerContext),
    /// Handler returned normally.
    Completed(TriggerContext),
    /// Handler failed with the given error text.
    Failed(TriggerContext, String),
    /// Occurrence skipped without running the handler.
    Skipped {
        /// Trigger id.
        trigger_id: String,
        /// Why it was skipped.
        reason: SkipReason,
    },
}

/// Error returned from a trigger handler.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum HandlerError {
    /// The handler observed the tick's cancellation token.
    #[error("handler observed cancellation")]
    Cancelled,
    /// Any other failure; captured and reported, never fatal to the engine.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Cooperative cancellation flag handed to every handler invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was signalled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type TriggerHandler =
    Arc<dyn Fn(TriggerContext, CancelToken) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

type EventSubscriber = Arc<dyn Fn(&TriggerEvent) + Send + Sync>;

/// Point-in-time view of one registration.
#[derive(Debug, Clone)]
pub struct TriggerSnapshot {
    /// Trigger id.
    pub id: String,
    /// Parsed expression.
    pub expression: Arc<Expression>,
    /// Enabled flag.
    pub enabled: bool,
    /// Next computed fire instant, if any remain.
    pub next_fire: Option<DateTime<Utc>>,
    /// Instant of the most recent fire.
    pub last_fired: Option<DateTime<Utc>>,
    /// Fires so far.
    pub fire_count: u32,
    /// Metadata from the definition.
    pub metadata: Arc<HashMap<String, String>>,
}

struct FireTimes {
    next_fire: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
}

struct Registration {
    id: String,
    expression: Arc<Expression>,
    handler: TriggerHandler,
    enabled: AtomicBool,
    fire_count: AtomicU32,
    times: Mutex<FireTimes>,
    metadata: Arc<HashMap<String, String>>,
}

impl Registration {
    fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.times.lock().expect("times lock poisoned").next_fire
    }

    fn set_next_fire(&self, next: Option<DateTime<Utc>>) {
        self.times.lock().expect("times lock poisoned").next_fire = next;
    }

    fn set_last_fired(&self, at: DateTime<Utc>) {
        self.times.lock().expect("times lock poisoned").last_fired = Some(at);
    }

    fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.times.lock().expect("times lock poisoned").last_fired
    }

    /// Next occurrence after `from` as an absolute UTC instant.
    fn occurrence_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expression
            .next_occurrence(&from)
            .map(|at| at.with_timezone(&Utc))
    }
}

#[derive(Default)]
struct Subscribers {
    firing: Vec<EventSubscriber>,
    completed: Vec<EventSubscriber>,
    failed: Vec<EventSubscriber>,
    skipped: Vec<EventSubscriber>,
}

struct Inner<C> {
    clock: C,
    registry: RwLock<HashMap<String, Arc<Registration>>>,
    subscribers: RwLock<Subscribers>,
    started: AtomicBool,
    disposed: AtomicBool,
    token: Mutex<CancelToken>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// In-process trigger engine.
///
/// Holds parsed [`Expression`]s keyed by id; [`tick`](Self::tick) evaluates
/// every due registration against the clock and dispatches its handler.
/// [`start`](Self::start) spawns a loop that ticks once a second; manual
/// ticking with an injected clock is the deterministic alternative.
pub struct Scheduler<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Scheduler<SystemClock> {
    /// Engine on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Scheduler<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Scheduler<C> {
    /// Engine on a caller-supplied clock.
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                registry: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Subscribers::default()),
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                token: Mutex::new(CancelToken::new()),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Register a trigger from a definition record. Fails fast on a parse
    /// error, a duplicate id or a disposed engine; never via events.
    pub fn register<F, Fut>(&self, definition: &TriggerDefinition, handler: F) -> Result<()>
    where
        F: Fn(TriggerContext, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let expression = Expression::parse(&definition.expression)?;
        self.register_parsed(
            &definition.id,
            expression,
            definition.enabled,
            definition.metadata.clone(),
            handler,
        )
    }

    /// Register an already parsed expression.
    pub fn register_parsed<F, Fut>(
        &self,
        id: &str,
        expression: Expression,
        enabled: bool,
        metadata: HashMap<String, String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(TriggerContext, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.ensure_live()?;

        let now = self.inner.clock.now();
        let next_fire = expression
            .next_occurrence(&now)
            .map(|at| at.with_timezone(&Utc));
        let handler: TriggerHandler =
            Arc::new(move |context, token| Box::pin(handler(context, token)));
        let registration = Arc::new(Registration {
            id: id.to_string(),
            expression: Arc::new(expression),
            handler,
            enabled: AtomicBool::new(enabled),
            fire_count: AtomicU32::new(0),
            times: Mutex::new(FireTimes {
                next_fire,
                last_fired: None,
            }),
            metadata: Arc::new(metadata),
        });

        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        if registry.contains_key(id) {
            return Err(Error::DuplicateTrigger(id.to_string()));
        }
        registry.insert(id.to_string(), registration);
        tracing::info!(trigger_id = %id, ?next_fire, "trigger registered");
        Ok(())
    }

    /// Remove a trigger; `true` when it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .inner
            .registry
            .write()
            .expect("registry lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(trigger_id = %id, "trigger unregistered");
        }
        removed
    }

    /// Flip a trigger's enabled flag; `true` when the id exists.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let registry = self.inner.registry.read().expect("registry lock poisoned");
        match registry.get(id) {
            Some(registration) => {
                registration.enabled.store(enabled, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registration.
    pub fn get_triggers(&self) -> Vec<TriggerSnapshot> {
        self.inner
            .registry
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|registration| TriggerSnapshot {
                id: registration.id.clone(),
                expression: Arc::clone(&registration.expression),
                enabled: registration.enabled.load(Ordering::SeqCst),
                next_fire: registration.next_fire(),
                last_fired: registration.last_fired(),
                fire_count: registration.fire_count.load(Ordering::SeqCst),
                metadata: Arc::clone(&registration.metadata),
            })
            .collect()
    }

    /// Subscribe to `Firing` events.
    pub fn on_firing(&self, subscriber: impl Fn(&TriggerEvent) + Send + Sync + 'static) {
        self.subscribers().firing.push(Arc::new(subscriber));
    }

    /// Subscribe to `Completed` events.
    pub fn on_completed(&self, subscriber: impl Fn(&TriggerEvent) + Send + Sync + 'static) {
        self.subscribers().completed.push(Arc::new(subscriber));
    }

    /// Subscribe to `Failed` events. With no subscriber, failures go to the
    /// tracing sink instead.
    pub fn on_failed(&self, subscriber: impl Fn(&TriggerEvent) + Send + Sync + 'static) {
        self.subscribers().failed.push(Arc::new(subscriber));
    }

    /// Subscribe to `Skipped` events.
    pub fn on_skipped(&self, subscriber: impl Fn(&TriggerEvent) + Send + Sync + 'static) {
        self.subscribers().skipped.push(Arc::new(subscriber));
    }

    fn subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .write()
            .expect("subscribers lock poisoned")
    }

    /// Fan an event out to its subscriber list, isolating each callback so
    /// one panicking subscriber cannot starve the rest.
    fn emit(&self, event: &TriggerEvent) {
        // Clone the list out of the lock so a subscriber may re-subscribe
        // from inside its callback without deadlocking.
        let list = {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .expect("subscribers lock poisoned");
            match event {
                TriggerEvent::Firing(_) => subscribers.firing.clone(),
                TriggerEvent::Completed(_) => subscribers.completed.clone(),
                TriggerEvent::Failed(..) => subscribers.failed.clone(),
                TriggerEvent::Skipped { .. } => subscribers.skipped.clone(),
            }
        };
        for subscriber in list {
            drop_panics(|| subscriber(event));
        }
    }

    fn emit_skipped(&self, trigger_id: &str, reason: SkipReason) {
        tracing::warn!(trigger_id = %trigger_id, %reason, "occurrence skipped");
        self.emit(&TriggerEvent::Skipped {
            trigger_id: trigger_id.to_string(),
            reason,
        });
    }

    fn emit_failed(&self, context: TriggerContext, error: String) {
        let has_subscriber = !self
            .inner
            .subscribers
            .read()
            .expect("subscribers lock poisoned")
            .failed
            .is_empty();
        if has_subscriber {
            self.emit(&TriggerEvent::Failed(context, error));
        } else {
            tracing::error!(
                trigger_id = %context.trigger_id,
                error = %error,
                "trigger handler failed"
            );
        }
    }

    /// One evaluation pass over every registration with the engine's
    /// current token.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let token = self
            .inner
            .token
            .lock()
            .expect("token lock poisoned")
            .clone();
        self.tick_with_token(now, &token).await
    }

    /// One evaluation pass with an explicit cancellation token.
    ///
    /// Handlers run sequentially. A handler propagating cancellation that
    /// matches `token` aborts the pass with [`Error::Cancelled`] after
    /// restoring the trigger's `next_fire`; any other handler failure is
    /// reported and never aborts the pass.
    pub async fn tick_with_token(&self, now: DateTime<Utc>, token: &CancelToken) -> Result<()> {
        self.ensure_live()?;

        let registrations: Vec<Arc<Registration>> = self
            .inner
            .registry
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();

        for registration in registrations {
            let Some(scheduled) = registration.next_fire() else {
                continue;
            };
            let options = registration.expression.options();

            if !registration.enabled.load(Ordering::SeqCst) {
                if now >= scheduled {
                    self.emit_skipped(&registration.id, SkipReason::Disabled);
                }
                continue;
            }

            let stagger_millis = options
                .stagger
                .map(|stagger| stagger_offset(&registration.id, stagger.as_millis()))
                .unwrap_or(0);
            let jitter_millis = options
                .jitter
                .map(|jitter| rand::thread_rng().gen_range(0..jitter.as_millis()))
                .unwrap_or(0);
            let effective = scheduled
                + TimeDelta::milliseconds(stagger_millis as i64)
                + TimeDelta::milliseconds(jitter_millis as i64);
            if now < effective {
                continue;
            }

            if let Some(max) = options.max {
                if registration.fire_count.load(Ordering::SeqCst) >= max {
                    self.emit_skipped(&registration.id, SkipReason::MaxReached);
                    registration.set_next_fire(None);
                    continue;
                }
            }

            // Guard against reentrant double-fires before anything that can
            // suspend or call out.
            registration.set_next_fire(None);

            // Lateness is judged against the nominal instant, not the
            // jitter-shifted one.
            if let Some(window) = options.window {
                if now > scheduled + window.to_chrono() {
                    self.emit_skipped(&registration.id, SkipReason::WindowExceeded);
                    registration.set_next_fire(registration.occurrence_after(scheduled));
                    continue;
                }
            }

            let fire_count = registration.fire_count.fetch_add(1, Ordering::SeqCst) + 1;
            registration.set_last_fired(now);

            let context = TriggerContext {
                trigger_id: registration.id.clone(),
                scheduled_at: scheduled,
                fired_at: now,
                fire_count,
                expression: Arc::clone(&registration.expression),
                metadata: Arc::clone(&registration.metadata),
            };

            self.emit(&TriggerEvent::Firing(context.clone()));
            let outcome = (registration.handler)(context.clone(), token.clone()).await;

            match outcome {
                Ok(()) => self.emit(&TriggerEvent::Completed(context)),
                Err(HandlerError::Cancelled) if token.is_cancelled() => {
                    // Shutdown intent: put the occurrence back so the
                    // schedule resumes on the next tick, then re-raise.
                    registration.set_next_fire(registration.occurrence_after(scheduled));
                    return Err(Error::Cancelled);
                }
                Err(error) => self.emit_failed(context, error.to_string()),
            }

            let mut next = registration.occurrence_after(scheduled);
            if let Some(max) = options.max {
                if registration.fire_count.load(Ordering::SeqCst) >= max {
                    next = None;
                }
            }
            registration.set_next_fire(next);
        }

        Ok(())
    }

    /// Spawn the 1-second tick loop. Idempotent: a second call while running
    /// is a no-op. Fails on a disposed engine.
    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let token = CancelToken::new();
        *self.inner.token.lock().expect("token lock poisoned") = token.clone();

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("trigger loop started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                let now = scheduler.inner.clock.now();
                match scheduler.tick_with_token(now, &token).await {
                    Ok(()) => {}
                    Err(Error::Cancelled) => break,
                    Err(error) => {
                        tracing::error!(error = %error, "tick aborted, stopping loop");
                        break;
                    }
                }
                scheduler
                    .inner
                    .clock
                    .sleep(std::time::Duration::from_secs(1))
                    .await;
            }
            tracing::info!("trigger loop stopped");
        });
        *self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle lock poisoned") = Some(handle);
        Ok(())
    }

    /// Signal the loop to stop and wait for it. Idempotent.
    pub async fn stop(&self) {
        if self
            .inner
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.inner
            .token
            .lock()
            .expect("token lock poisoned")
            .cancel();
        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Stop the loop and refuse all further operations. Idempotent;
    /// registrations are dropped with the engine.
    pub async fn dispose(&self) {
        if self
            .inner
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.stop().await;
        tracing::info!("scheduler disposed");
    }
}

/// Deterministic per-id offset: FNV-1a of the id, reduced modulo the stagger
/// span. Stable across processes, unlike the std hasher.
fn stagger_offset(id: &str, stagger_millis: u64) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash % stagger_millis
}

fn drop_panics(callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("event subscriber panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{EventRecorder, ManualClock};
    use std::sync::atomic::AtomicU32;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn start_instant() -> DateTime<Utc> {
        utc("2026-01-01T00:00:00Z")
    }

    fn definition(id: &str, expression: &str) -> TriggerDefinition {
        TriggerDefinition {
            id: id.to_string(),
            expression: expression.to_string(),
            enabled: true,
            metadata: HashMap::new(),
        }
    }

    fn scheduler() -> (Scheduler<ManualClock>, ManualClock) {
        let clock = ManualClock::starting_at(start_instant());
        (Scheduler::with_clock(clock.clone()), clock)
    }

    fn counting_handler(
        counter: Arc<AtomicU32>,
    ) -> impl Fn(TriggerContext, CancelToken) -> BoxFuture<'static, Result<(), HandlerError>>
           + Send
           + Sync
           + 'static {
        move |_context, _token| -> BoxFuture<'static, Result<(), HandlerError>> {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn registration_computes_next_fire() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "0 1 * * *"), counting_handler(fires))
            .unwrap();

        let triggers = scheduler.get_triggers();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].next_fire, Some(utc("2026-01-01T01:00:00Z")));
        assert_eq!(triggers[0].fire_count, 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("dup", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();
        let error = scheduler
            .register(&definition("dup", "* * * * *"), counting_handler(fires))
            .unwrap_err();
        assert_eq!(error, Error::DuplicateTrigger("dup".to_string()));
    }

    #[tokio::test]
    async fn invalid_expression_fails_registration() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        let error = scheduler
            .register(&definition("bad", "not a cron"), counting_handler(fires))
            .unwrap_err();
        assert!(matches!(error, Error::Parse(_)));
    }

    #[tokio::test]
    async fn due_trigger_fires_and_reschedules() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();

        // Not due yet.
        scheduler.tick(utc("2026-01-01T00:00:30Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        let snapshot = &scheduler.get_triggers()[0];
        assert_eq!(snapshot.fire_count, 1);
        assert_eq!(snapshot.last_fired, Some(utc("2026-01-01T00:01:00Z")));
        // Rescheduled from the nominal instant.
        assert_eq!(snapshot.next_fire, Some(utc("2026-01-01T00:02:00Z")));
    }

    #[tokio::test]
    async fn firing_and_completed_events_are_ordered() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        recorder.attach(&scheduler);
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(fires))
            .unwrap();

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(recorder.entries(), vec!["firing:t", "completed:t"]);
    }

    #[tokio::test]
    async fn max_option_caps_fires_and_clears_next_fire() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                &definition("capped", "* * * * * {max:2}"),
                counting_handler(Arc::clone(&fires)),
            )
            .unwrap();

        for minute in 1..=10 {
            let now = start_instant() + TimeDelta::minutes(minute);
            scheduler.tick(now).await.unwrap();
        }

        assert_eq!(fires.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.get_triggers()[0].next_fire, None);
    }

    #[tokio::test]
    async fn disabled_trigger_skips_when_due() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        recorder.attach(&scheduler);
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();
        scheduler.set_enabled("t", false);

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.entries(), vec!["skipped:t:disabled"]);

        // Re-enabling resumes the schedule.
        scheduler.set_enabled("t", true);
        scheduler.tick(utc("2026-01-01T00:01:30Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn window_exceeded_drops_and_reschedules() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        recorder.attach(&scheduler);
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                &definition("t", "* * * * * {window:30s}"),
                counting_handler(Arc::clone(&fires)),
            )
            .unwrap();

        // Tick arrives 45 s past the 00:01 occurrence.
        scheduler.tick(utc("2026-01-01T00:01:45Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.entries(), vec!["skipped:t:window exceeded"]);
        assert_eq!(
            scheduler.get_triggers()[0].next_fire,
            Some(utc("2026-01-01T00:02:00Z"))
        );
    }

    #[tokio::test]
    async fn handler_failure_is_isolated() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("broken", "* * * * *"), |_context, _token| async {
                Err(HandlerError::failed("boom"))
            })
            .unwrap();
        scheduler
            .register(&definition("healthy", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();

        // No Failed subscriber: the failure routes to tracing and the other
        // trigger still fires.
        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        scheduler.tick(utc("2026-01-01T00:02:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 2);

        // The broken trigger keeps its schedule too.
        let broken = scheduler
            .get_triggers()
            .into_iter()
            .find(|snapshot| snapshot.id == "broken")
            .unwrap();
        assert_eq!(broken.fire_count, 2);
        assert!(broken.next_fire.is_some());
    }

    #[tokio::test]
    async fn handler_failure_reaches_failed_subscriber() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        recorder.attach(&scheduler);
        scheduler
            .register(&definition("broken", "* * * * *"), |_context, _token| async {
                Err(HandlerError::failed("boom"))
            })
            .unwrap();

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(recorder.entries(), vec!["firing:broken", "failed:broken:boom"]);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        scheduler.on_firing(|_event| panic!("bad subscriber"));
        recorder.attach(&scheduler);
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(fires))
            .unwrap();

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(recorder.entries(), vec!["firing:t", "completed:t"]);
    }

    #[tokio::test]
    async fn cancellation_restores_next_fire_and_propagates() {
        let (scheduler, _clock) = scheduler();
        scheduler
            .register(&definition("t", "* * * * *"), |_context, token: CancelToken| async move {
                token.cancel();
                Err(HandlerError::Cancelled)
            })
            .unwrap();

        let token = CancelToken::new();
        let error = scheduler
            .tick_with_token(utc("2026-01-01T00:01:00Z"), &token)
            .await
            .unwrap_err();
        assert_eq!(error, Error::Cancelled);

        // The occurrence is restored so the schedule resumes next tick.
        assert_eq!(
            scheduler.get_triggers()[0].next_fire,
            Some(utc("2026-01-01T00:02:00Z"))
        );
    }

    #[tokio::test]
    async fn cancelled_error_without_cancelled_token_is_a_failure() {
        let (scheduler, _clock) = scheduler();
        let recorder = EventRecorder::new();
        recorder.attach(&scheduler);
        scheduler
            .register(&definition("t", "* * * * *"), |_context, _token| async {
                Err(HandlerError::Cancelled)
            })
            .unwrap();

        let token = CancelToken::new();
        scheduler
            .tick_with_token(utc("2026-01-01T00:01:00Z"), &token)
            .await
            .unwrap();
        assert_eq!(
            recorder.entries(),
            vec!["firing:t", "failed:t:handler observed cancellation"]
        );
    }

    #[tokio::test]
    async fn stagger_delays_fire_deterministically() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                &definition("staggered", "* * * * * {stagger:10s}"),
                counting_handler(Arc::clone(&fires)),
            )
            .unwrap();

        // At the nominal instant the stagger offset may not have elapsed...
        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        let fired_at_nominal = fires.load(Ordering::SeqCst);

        // ...but one full stagger span later it always has.
        scheduler.tick(utc("2026-01-01T00:01:10Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), fired_at_nominal.max(1));

        // The offset itself is a pure function of the id.
        assert_eq!(
            stagger_offset("staggered", 10_000),
            stagger_offset("staggered", 10_000)
        );
        assert!(stagger_offset("staggered", 10_000) < 10_000);
    }

    #[tokio::test]
    async fn stagger_pattern_is_identical_across_instances() {
        let mut patterns = Vec::new();
        for _ in 0..2 {
            let (scheduler, _clock) = scheduler();
            let fires = Arc::new(AtomicU32::new(0));
            scheduler
                .register(
                    &definition("same-id", "* * * * * {stagger:45s}"),
                    counting_handler(Arc::clone(&fires)),
                )
                .unwrap();

            let mut pattern = Vec::new();
            for second in (0..180).step_by(5) {
                let now = start_instant() + TimeDelta::seconds(second);
                scheduler.tick(now).await.unwrap();
                pattern.push(fires.load(Ordering::SeqCst));
            }
            patterns.push(pattern);
        }
        assert_eq!(patterns[0], patterns[1]);
    }

    #[tokio::test]
    async fn unregister_removes_trigger() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();
        assert!(scheduler.unregister("t"));
        assert!(!scheduler.unregister("t"));

        scheduler.tick(utc("2026-01-01T00:01:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn once_trigger_fires_once_and_clears() {
        let (scheduler, _clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                &definition("once", "@once 2026-01-01T00:05:00Z"),
                counting_handler(Arc::clone(&fires)),
            )
            .unwrap();

        scheduler.tick(utc("2026-01-01T00:05:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.get_triggers()[0].next_fire, None);

        scheduler.tick(utc("2026-01-01T00:06:00Z")).await.unwrap();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let (scheduler, clock) = scheduler();
        scheduler.start().unwrap();
        scheduler.start().unwrap(); // no-op
        scheduler.stop().await;
        scheduler.stop().await; // no-op
        scheduler.dispose().await;
        scheduler.dispose().await; // no-op

        assert_eq!(scheduler.start().unwrap_err(), Error::Disposed);
        let fires = Arc::new(AtomicU32::new(0));
        assert_eq!(
            scheduler
                .register(&definition("late", "* * * * *"), counting_handler(fires))
                .unwrap_err(),
            Error::Disposed
        );
        assert_eq!(
            scheduler.tick(clock.now()).await.unwrap_err(),
            Error::Disposed
        );
    }

    #[tokio::test]
    async fn started_loop_ticks_on_the_injected_clock() {
        let (scheduler, clock) = scheduler();
        let fires = Arc::new(AtomicU32::new(0));
        scheduler
            .register(&definition("t", "* * * * *"), counting_handler(Arc::clone(&fires)))
            .unwrap();
        scheduler.start().unwrap();

        // Let the loop reach its first sleep, then advance past the
        // occurrence and give the loop a chance to tick again.
        tokio::task::yield_now().await;
        for _ in 0..120 {
            clock.advance(std::time::Duration::from_secs(1));
            tokio::task::yield_now().await;
            if fires.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(fires.load(Ordering::SeqCst) >= 1);
        scheduler.stop().await;
    }

    #[test]
    fn definition_record_round_trips_through_serde() {
        let mut metadata = HashMap::new();
        metadata.insert("team".to_string(), "data".to_string());
        let definition = TriggerDefinition {
            id: "etl".to_string(),
            expression: "@daily {tag:etl}".to_string(),
            enabled: false,
            metadata,
        };
        let json = serde_json::to_string(&definition).unwrap();
        let back: TriggerDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "etl");
        assert!(!back.enabled);
        assert_eq!(back.metadata.get("team").map(String::as_str), Some("data"));

        // `enabled` defaults to true, metadata to empty.
        let minimal: TriggerDefinition =
            serde_json::from_str(r#"{"id":"x","expression":"@daily"}"#).unwrap();
        assert!(minimal.enabled);
        assert!(minimal.metadata.is_empty());
    }
}
