use crate::duration::Span;
use crate::error::{Diagnostic, Error, ErrorCode, Severity};
use crate::interval::{IntervalSchedule, OnceSchedule};
use crate::options::Options;
use crate::schedule::CronSchedule;
use crate::tokenizer::{self, BodyKind};
use crate::utils;
use crate::Result;

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use rand::Rng;
use std::fmt::{self, Display};
use std::str::FromStr;

/// Hard cap on enumeration when the expression carries no `max` option.
const DEFAULT_ENUMERATION_LIMIT: u32 = 1000;

/// What the expression body turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// Plain 5- or 6-field cron body.
    Cron,
    /// `@daily`-style alias, expanded to a cron schedule.
    Alias,
    /// `@every` fixed or ranged interval.
    Interval,
    /// `@once` one-shot.
    Once,
}

/// A fully parsed schedule expression.
///
/// Immutable after construction; all occurrence computation goes through
/// [`next_occurrence`](Self::next_occurrence).
///
/// ```rust
/// use chronex::Expression;
/// use chrono::{TimeZone, Utc};
///
/// let expression = Expression::parse("TZ=UTC */5 * * * * {max:3}")?;
/// let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 3, 0).unwrap();
/// let next = expression.next_occurrence(&from).unwrap();
/// assert_eq!(next.to_rfc3339(), "2026-01-01T00:05:00+00:00");
/// # Ok::<(), chronex::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    original: String,
    kind: ExpressionKind,
    timezone: Option<Tz>,
    alias: Option<&'static str>,
    cron: Option<CronSchedule>,
    interval: Option<IntervalSchedule>,
    once: Option<OnceSchedule>,
    options: Options,
}

impl Expression {
    /// Parse an expression, resolving any relative `@once` against the
    /// current wall clock.
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_at(input, Utc::now())
    }

    /// Parse an expression, resolving any relative `@once` against the
    /// supplied reference instant.
    pub fn parse_at(input: &str, reference: DateTime<Utc>) -> Result<Self> {
        let mut diagnostics = Vec::new();
        match Self::parse_collect(input, reference, &mut diagnostics) {
            Some(expression) => Ok(expression),
            None => {
                let first = diagnostics
                    .into_iter()
                    .find(|d| d.severity() == Severity::Error)
                    .unwrap_or_else(|| Diagnostic::new(ErrorCode::Structure, "invalid expression"));
                Err(Error::Parse(first))
            }
        }
    }

    /// Collecting parse used by both the strict entry points and the
    /// validator: every rule violation is pushed to `diagnostics` and
    /// parsing continues as far as it can.
    pub(crate) fn parse_collect(
        input: &str,
        reference: DateTime<Utc>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Self> {
        let raw = match tokenizer::split(input) {
            Ok(raw) => raw,
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                return None;
            }
        };
        let before = diagnostics.len();

        let timezone = match raw.timezone {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    diagnostics.push(
                        Diagnostic::new(ErrorCode::UnknownTimezone, "unknown IANA timezone")
                            .with_value(name),
                    );
                    None
                }
            },
            None => None,
        };

        let options = match raw.options {
            Some(block) => Options::parse_collect(block, diagnostics),
            None => Options::default(),
        };
        options.check_bounds(timezone, diagnostics);

        let mut alias = None;
        let mut cron = None;
        let mut interval = None;
        let mut once = None;

        let kind = match tokenizer::classify(raw.body) {
            BodyKind::Interval => {
                interval = parse_every(raw.body, diagnostics);
                ExpressionKind::Interval
            }
            BodyKind::Once => {
                once = parse_once(raw.body, timezone, reference, diagnostics);
                ExpressionKind::Once
            }
            BodyKind::Alias => {
                match tokenizer::expand_alias(raw.body.trim()) {
                    Some((name, expanded)) => {
                        alias = Some(name);
                        let tokens: Vec<&str> = expanded.split_whitespace().collect();
                        cron = CronSchedule::parse_collect(&tokens, diagnostics);
                    }
                    None => diagnostics.push(
                        Diagnostic::new(ErrorCode::Structure, "unknown alias")
                            .with_value(raw.body.trim()),
                    ),
                }
                ExpressionKind::Alias
            }
            BodyKind::Cron => {
                let tokens: Vec<&str> = raw.body.split_whitespace().collect();
                if tokens.len() == 5 || tokens.len() == 6 {
                    cron = CronSchedule::parse_collect(&tokens, diagnostics);
                } else {
                    diagnostics.push(
                        Diagnostic::new(
                            ErrorCode::Structure,
                            format!("expected 5 or 6 fields, got {}", tokens.len()),
                        )
                        .with_value(raw.body),
                    );
                }
                ExpressionKind::Cron
            }
        };

        let failed = diagnostics[before..]
            .iter()
            .any(|d| d.severity() == Severity::Error);
        if failed {
            return None;
        }

        Some(Self {
            original: input.trim().to_string(),
            kind,
            timezone,
            alias,
            cron,
            interval,
            once,
            options,
        })
    }

    /// The input string as given (trimmed).
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Kind of the body.
    pub fn kind(&self) -> ExpressionKind {
        self.kind
    }

    /// The `TZ=` zone, if one was given.
    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    /// Parsed options block.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The cron schedule for `Cron` and `Alias` kinds.
    pub fn cron(&self) -> Option<&CronSchedule> {
        self.cron.as_ref()
    }

    /// The interval schedule for the `Interval` kind.
    pub fn interval(&self) -> Option<&IntervalSchedule> {
        self.interval.as_ref()
    }

    /// The one-shot schedule for the `Once` kind.
    pub fn once(&self) -> Option<&OnceSchedule> {
        self.once.as_ref()
    }

    /// Earliest occurrence strictly after `from`, honoring the `from`,
    /// `until` and timezone qualifiers; `None` when the schedule is
    /// exhausted.
    ///
    /// Pure for cron and once kinds; ranged intervals sample their delay
    /// from the shared thread-local generator on every call.
    pub fn next_occurrence<Z: TimeZone>(&self, from: &DateTime<Z>) -> Option<DateTime<FixedOffset>> {
        self.next_occurrence_with(from.with_timezone(&Utc), &mut rand::thread_rng())
    }

    /// Same as [`next_occurrence`](Self::next_occurrence) with an injected
    /// random source, for reproducible range-interval tests.
    pub(crate) fn next_occurrence_with(
        &self,
        from: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Option<DateTime<FixedOffset>> {
        let until = self.options.until_instant(self.timezone);
        if let Some(until) = until {
            if from >= until {
                return None;
            }
        }
        let lower = self.options.from_instant(self.timezone);

        let result = match self.kind {
            ExpressionKind::Cron | ExpressionKind::Alias => {
                // Rewind one second so the search lands on the first
                // occurrence at or after the lower bound.
                let search = match lower {
                    Some(bound) if from < bound => bound - TimeDelta::seconds(1),
                    _ => from,
                };
                self.next_cron(search)?
            }
            ExpressionKind::Interval => {
                let base = match lower {
                    Some(bound) if from < bound => bound,
                    _ => from,
                };
                let next = self.interval.as_ref()?.next_after(base, rng);
                self.attach_offset(next)
            }
            ExpressionKind::Once => {
                let fire = self.once.as_ref()?.next_after(from)?;
                if let Some(bound) = lower {
                    if fire.with_timezone(&Utc) < bound {
                        return None;
                    }
                }
                fire
            }
        };

        if let Some(until) = until {
            if result.with_timezone(&Utc) > until {
                return None;
            }
        }
        Some(result)
    }

    /// Cron-kind search: convert to the schedule zone, walk naive local
    /// time, then re-attach a concrete offset. The loop guards the
    /// strictly-after contract across a fall-back overlap, where the
    /// earlier-of-ambiguous rule can map a later naive time to an earlier
    /// absolute instant.
    fn next_cron(&self, search: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        let schedule = self.cron.as_ref()?;
        match self.timezone {
            Some(tz) => {
                let mut naive = search.with_timezone(&tz).naive_local();
                loop {
                    let candidate = schedule.next_after(&naive)?;
                    let resolved = utils::resolve_local(tz, candidate);
                    if resolved.with_timezone(&Utc) > search {
                        return Some(resolved.fixed_offset());
                    }
                    naive = candidate;
                }
            }
            None => {
                let candidate = schedule.next_after(&search.naive_utc())?;
                Some(Utc.from_utc_datetime(&candidate).fixed_offset())
            }
        }
    }

    fn attach_offset(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self.timezone {
            Some(tz) => instant.with_timezone(&tz).fixed_offset(),
            None => instant.fixed_offset(),
        }
    }

    /// Iterator over upcoming occurrences, capped at the `max` option or
    /// 1000 results.
    pub fn occurrences<Z: TimeZone>(&self, from: &DateTime<Z>) -> Occurrences {
        self.clone().into_occurrences(from)
    }

    /// Consuming variant of [`occurrences`](Self::occurrences).
    pub fn into_occurrences<Z: TimeZone>(self, from: &DateTime<Z>) -> Occurrences {
        let remaining = self.options.max.unwrap_or(DEFAULT_ENUMERATION_LIMIT);
        Occurrences {
            from: from.with_timezone(&Utc),
            expression: self,
            remaining,
        }
    }

    /// The next `count` occurrences after `from`, limited additionally by
    /// the `max` option (or 1000).
    pub fn enumerate<Z: TimeZone>(
        &self,
        from: &DateTime<Z>,
        count: usize,
    ) -> Vec<DateTime<FixedOffset>> {
        self.occurrences(from).take(count).collect()
    }
}

/// Iterator of strictly increasing occurrences of one expression.
#[derive(Debug, Clone)]
pub struct Occurrences {
    expression: Expression,
    from: DateTime<Utc>,
    remaining: u32,
}

impl Iterator for Occurrences {
    type Item = DateTime<FixedOffset>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let next = self.expression.next_occurrence(&self.from)?;
        self.remaining -= 1;
        self.from = next.with_timezone(&Utc);
        Some(next)
    }
}

fn parse_every(body: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<IntervalSchedule> {
    let argument = body["@every".len()..].trim();
    if argument.is_empty() {
        diagnostics.push(
            Diagnostic::new(ErrorCode::MalformedEveryDuration, "missing duration")
                .with_value(body),
        );
        return None;
    }

    let parse_span = |raw: &str, diagnostics: &mut Vec<Diagnostic>| match Span::parse(raw) {
        Ok(span) if span.is_zero() => {
            diagnostics.push(
                Diagnostic::new(ErrorCode::MalformedEveryDuration, "duration must be positive")
                    .with_value(raw),
            );
            None
        }
        Ok(span) => Some(span),
        Err(error) => {
            diagnostics.push(
                Diagnostic::new(ErrorCode::MalformedEveryDuration, error.to_string())
                    .with_value(raw),
            );
            None
        }
    };

    match argument.split_once('-') {
        Some((min_raw, max_raw)) => {
            let min = parse_span(min_raw.trim(), diagnostics);
            let max = parse_span(max_raw.trim(), diagnostics);
            let (min, max) = (min?, max?);
            if min >= max {
                diagnostics.push(
                    Diagnostic::new(
                        ErrorCode::EveryRangeOrder,
                        "range minimum must be below maximum",
                    )
                    .with_value(argument),
                );
                return None;
            }
            Some(IntervalSchedule::new(min, Some(max)))
        }
        None => Some(IntervalSchedule::new(parse_span(argument, diagnostics)?, None)),
    }
}

fn parse_once(
    body: &str,
    timezone: Option<Tz>,
    reference: DateTime<Utc>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<OnceSchedule> {
    let argument = body["@once".len()..].trim();
    if argument.is_empty() {
        diagnostics.push(
            Diagnostic::new(ErrorCode::MalformedOnceInstant, "missing instant").with_value(body),
        );
        return None;
    }

    if let Some(relative) = argument.strip_prefix('+') {
        return match Span::parse(relative) {
            Ok(span) if span.is_zero() => {
                diagnostics.push(
                    Diagnostic::new(
                        ErrorCode::OnceDurationNotPositive,
                        "relative duration must be positive",
                    )
                    .with_value(argument),
                );
                None
            }
            Ok(span) => Some(OnceSchedule::relative(reference, span)),
            Err(error) => {
                diagnostics.push(
                    Diagnostic::new(ErrorCode::MalformedOnceInstant, error.to_string())
                        .with_value(argument),
                );
                None
            }
        };
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(argument) {
        return Some(OnceSchedule::absolute(instant));
    }
    let naive = NaiveDateTime::parse_from_str(argument, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(argument, "%Y-%m-%dT%H:%M:%S%.3f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(argument, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        });
    match naive {
        Some(naive) => {
            let fire_at = match timezone {
                Some(tz) => utils::resolve_local(tz, naive).fixed_offset(),
                None => Utc.from_utc_datetime(&naive).fixed_offset(),
            };
            Some(OnceSchedule::absolute(fire_at))
        }
        None => {
            diagnostics.push(
                Diagnostic::new(ErrorCode::MalformedOnceInstant, "malformed datetime")
                    .with_value(argument),
            );
            None
        }
    }
}

impl Display for Expression {
    /// Canonical rendering: `[TZ=<zone> ]<body>[ {<opts>}]` with options
    /// sorted by key; aliases keep their name, relative `@once` renders
    /// absolute.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tz) = self.timezone {
            write!(f, "TZ={} ", tz.name())?;
        }
        match self.kind {
            ExpressionKind::Alias => f.write_str(self.alias.unwrap_or("@unknown"))?,
            ExpressionKind::Cron => match &self.cron {
                Some(schedule) => write!(f, "{schedule}")?,
                None => f.write_str(&self.original)?,
            },
            ExpressionKind::Interval => match &self.interval {
                Some(interval) => write!(f, "{interval}")?,
                None => f.write_str(&self.original)?,
            },
            ExpressionKind::Once => match &self.once {
                Some(once) => write!(f, "{once}")?,
                None => f.write_str(&self.original)?,
            },
        }
        if !self.options.is_empty() {
            write!(f, " {{{}}}", self.options)?;
        }
        Ok(())
    }
}

impl FromStr for Expression {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

impl TryFrom<&str> for Expression {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<&String> for Expression {
    type Error = Error;

    fn try_from(value: &String) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Expression {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}
