//! Cron-expression superset parser, occurrence generator and in-process
//! trigger engine.
//!
//! One string describes a complete firing schedule: a 5/6-field cron body,
//! an `@daily`-style alias, an `@every` interval or an `@once` one-shot,
//! optionally qualified with an IANA timezone prefix and a `{k:v,…}` options
//! block:
//!
//! ```text
//! TZ=America/New_York 30 2 * * MON-FRI {jitter:30s,max:100,until:2026-12-31}
//! ```
//!
//! [`Expression`] parses the string and computes timezone-aware occurrences
//! (including Vixie-cron day-of-month/day-of-week OR semantics, `L`/`W`/`#`
//! specials and DST gap/overlap handling); [`validate`] collects every rule
//! violation as a coded diagnostic instead of failing fast; and
//! [`Scheduler`] dispatches callbacks as occurrences come due, with events,
//! per-trigger jitter/stagger and a pluggable clock.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate specific Errors implementation.
pub mod error;

mod duration;
mod expression;
mod field;
mod interval;
mod options;
mod schedule;
/// Trigger registry, tick engine and lifecycle.
pub mod scheduler;
mod specials;
mod stream;
mod tokenizer;
mod utils;
/// Whole-expression diagnostic collection.
pub mod validate;

/// Deterministic test doubles (`test-support` feature).
#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

/// Re-export of public entities.
pub use duration::{Span, SpanParseError};
pub use error::{Diagnostic, Error, ErrorCode, Severity};
pub use expression::{Expression, ExpressionKind, Occurrences};
pub use interval::{IntervalSchedule, OnceSchedule};
pub use options::{DateBound, Options};
pub use schedule::CronSchedule;
pub use scheduler::{
    CancelToken, Clock, HandlerError, Scheduler, SkipReason, SystemClock, TriggerContext,
    TriggerDefinition, TriggerEvent, TriggerSnapshot,
};
pub use stream::{ExpressionSleep, ExpressionStream, FireEvent};
pub use validate::{validate, validate_at, Validation};

/// Convenient alias for `Result`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
