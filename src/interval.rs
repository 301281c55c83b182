use crate::duration::Span;
use chrono::{DateTime, FixedOffset, Utc};
use rand::Rng;

/// Fixed or randomly sampled recurring interval (`@every 30s`,
/// `@every 1h-2h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalSchedule {
    min: Span,
    max: Option<Span>,
}

impl IntervalSchedule {
    /// Invariants (`min > 0`, `min < max`) are enforced by the parser.
    pub(crate) fn new(min: Span, max: Option<Span>) -> Self {
        Self { min, max }
    }

    /// The fixed interval, or the lower bound of the range.
    pub fn min(&self) -> Span {
        self.min
    }

    /// The upper bound of the range, if any.
    pub fn max(&self) -> Option<Span> {
        self.max
    }

    /// The next firing instant: `from + min` for a fixed interval, or
    /// `from + uniform(min..=max)` sampled per call with millisecond
    /// resolution.
    pub(crate) fn next_after(&self, from: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
        let millis = match self.max {
            Some(max) => rng.gen_range(self.min.as_millis()..=max.as_millis()),
            None => self.min.as_millis(),
        };
        from + chrono::TimeDelta::milliseconds(millis as i64)
    }
}

impl std::fmt::Display for IntervalSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) => write!(f, "@every {}-{}", self.min, max),
            None => write!(f, "@every {}", self.min),
        }
    }
}

/// One-shot schedule (`@once 2026-06-01T09:00:00Z`, `@once +4h`).
///
/// A relative form is resolved to an absolute instant at parse time; from
/// then on the two are indistinguishable and the canonical rendering is the
/// absolute one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnceSchedule {
    fire_at: DateTime<FixedOffset>,
    was_relative: bool,
    relative_duration: Option<Span>,
}

impl OnceSchedule {
    pub(crate) fn absolute(fire_at: DateTime<FixedOffset>) -> Self {
        Self {
            fire_at,
            was_relative: false,
            relative_duration: None,
        }
    }

    pub(crate) fn relative(reference: DateTime<Utc>, duration: Span) -> Self {
        Self {
            fire_at: (reference + duration.to_chrono()).fixed_offset(),
            was_relative: true,
            relative_duration: Some(duration),
        }
    }

    /// The absolute firing instant.
    pub fn fire_at(&self) -> DateTime<FixedOffset> {
        self.fire_at
    }

    /// Whether the expression used the `+duration` form.
    pub fn was_relative(&self) -> bool {
        self.was_relative
    }

    /// The original relative duration, when [`was_relative`](Self::was_relative).
    pub fn relative_duration(&self) -> Option<Span> {
        self.relative_duration
    }

    /// `fire_at` when it is strictly after `from`, otherwise `None`.
    pub(crate) fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        (self.fire_at.with_timezone(&Utc) > from).then_some(self.fire_at)
    }
}

impl std::fmt::Display for OnceSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "@once {}",
            self.fire_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }
}
