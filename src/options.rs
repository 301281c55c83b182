use crate::duration::Span;
use crate::error::{Diagnostic, ErrorCode};
use crate::utils;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt::{self, Display};

/// A `from`/`until` option value: a calendar date or an absolute instant.
///
/// Date-only bounds are interpreted in the expression's timezone — start of
/// day for `from`, last moment of the day (23:59:59.999) for `until` — which
/// is also why the distinction is kept instead of resolving eagerly: a
/// date-only `until` renders back in its short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateBound {
    /// `2026-06-01` — a whole calendar day.
    Date(NaiveDate),
    /// `2026-06-01T09:00:00Z` — a fully qualified instant.
    Instant(DateTime<FixedOffset>),
}

impl DateBound {
    fn parse(input: &str) -> Option<Self> {
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Some(Self::Date(date));
        }
        DateTime::parse_from_rfc3339(input).ok().map(Self::Instant)
    }

    /// Absolute lower bound: date-only resolves to the start of the day.
    pub(crate) fn resolve_start(&self, tz: Option<Tz>) -> DateTime<Utc> {
        match self {
            Self::Instant(instant) => instant.with_timezone(&Utc),
            Self::Date(date) => {
                let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
                match tz {
                    Some(tz) => utils::resolve_local(tz, naive).with_timezone(&Utc),
                    None => Utc.from_utc_datetime(&naive),
                }
            }
        }
    }

    /// Absolute upper bound: date-only resolves to 23:59:59.999.
    pub(crate) fn resolve_end(&self, tz: Option<Tz>) -> DateTime<Utc> {
        match self {
            Self::Instant(instant) => instant.with_timezone(&Utc),
            Self::Date(date) => {
                let last_moment =
                    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or_default();
                let naive = date.and_time(last_moment);
                match tz {
                    Some(tz) => utils::resolve_local(tz, naive).with_timezone(&Utc),
                    None => Utc.from_utc_datetime(&naive),
                }
            }
        }
    }
}

impl Display for DateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Instant(instant) => {
                let format = if instant.timestamp_subsec_millis() == 0 {
                    chrono::SecondsFormat::Secs
                } else {
                    chrono::SecondsFormat::Millis
                };
                f.write_str(&instant.to_rfc3339_opts(format, true))
            }
        }
    }
}

/// Typed options record parsed from the `{k:v,…}` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Random delay added to every fire, sampled per tick from `[0, jitter)`.
    pub jitter: Option<Span>,
    /// Deterministic per-trigger offset derived from the trigger id.
    pub stagger: Option<Span>,
    /// Maximum lateness after the scheduled instant before the occurrence
    /// is dropped.
    pub window: Option<Span>,
    /// No occurrences before this bound.
    pub from: Option<DateBound>,
    /// No occurrences at or after this bound.
    pub until: Option<DateBound>,
    /// Maximum number of fires.
    pub max: Option<u32>,
    /// Ordered tag list; duplicates are preserved (the validator warns).
    pub tags: Option<Vec<String>>,
}

impl Options {
    /// Collecting parse of the raw block content. Violations land in
    /// `diagnostics`; recognizable values are still kept so later checks
    /// (bounds, warnings) can run. Duplicate keys: last one wins.
    pub(crate) fn parse_collect(raw: &str, diagnostics: &mut Vec<Diagnostic>) -> Self {
        let mut options = Self::default();

        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once(':') else {
                diagnostics.push(
                    Diagnostic::new(ErrorCode::OptionValueMismatch, "expected key:value")
                        .with_value(pair),
                );
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "jitter" => {
                    if let Some(span) =
                        parse_span(key, value, ErrorCode::OptionValueMismatch, diagnostics)
                    {
                        options.jitter = Some(span);
                    }
                }
                "stagger" => {
                    if let Some(span) =
                        parse_span(key, value, ErrorCode::StaggerNotPositive, diagnostics)
                    {
                        options.stagger = Some(span);
                    }
                }
                "window" => {
                    if let Some(span) =
                        parse_span(key, value, ErrorCode::WindowNotPositive, diagnostics)
                    {
                        options.window = Some(span);
                    }
                }
                "from" => match DateBound::parse(value) {
                    Some(bound) => options.from = Some(bound),
                    None => diagnostics.push(mismatch(key, value, "expected date or datetime")),
                },
                "until" => match DateBound::parse(value) {
                    Some(bound) => options.until = Some(bound),
                    None => diagnostics.push(mismatch(key, value, "expected date or datetime")),
                },
                "max" => match value.parse::<i64>() {
                    Ok(max) if max >= 1 && max <= u32::MAX as i64 => {
                        options.max = Some(max as u32)
                    }
                    Ok(_) => diagnostics.push(
                        Diagnostic::new(ErrorCode::MaxNotPositive, "max must be positive")
                            .with_field(key)
                            .with_value(value),
                    ),
                    Err(_) => diagnostics.push(mismatch(key, value, "expected an integer")),
                },
                "tag" => {
                    let tags: Vec<String> = value
                        .split('+')
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string)
                        .collect();
                    if tags.is_empty() {
                        diagnostics.push(mismatch(key, value, "expected at least one tag"));
                    } else {
                        options.tags = Some(tags);
                    }
                }
                _ => diagnostics.push(
                    Diagnostic::new(ErrorCode::UnknownOptionKey, "unknown option key")
                        .with_field(key)
                        .with_value(value),
                ),
            }
        }

        options
    }

    /// Cross-field check: `from` must be strictly before `until`.
    pub(crate) fn check_bounds(&self, tz: Option<Tz>, diagnostics: &mut Vec<Diagnostic>) {
        if let (Some(from), Some(until)) = (&self.from, &self.until) {
            if from.resolve_start(tz) >= until.resolve_end(tz) {
                diagnostics.push(
                    Diagnostic::new(ErrorCode::FromAfterUntil, "from must be before until")
                        .with_field("from"),
                );
            }
        }
    }

    /// Absolute lower bound, if configured.
    pub(crate) fn from_instant(&self, tz: Option<Tz>) -> Option<DateTime<Utc>> {
        self.from.as_ref().map(|bound| bound.resolve_start(tz))
    }

    /// Absolute upper bound, if configured.
    pub(crate) fn until_instant(&self, tz: Option<Tz>) -> Option<DateTime<Utc>> {
        self.until.as_ref().map(|bound| bound.resolve_end(tz))
    }

    /// `true` when no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_span(
    key: &str,
    value: &str,
    zero_code: ErrorCode,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Span> {
    match Span::parse(value) {
        Ok(span) if span.is_zero() => {
            diagnostics.push(
                Diagnostic::new(zero_code, format!("{key} must be positive"))
                    .with_field(key)
                    .with_value(value),
            );
            None
        }
        Ok(span) => Some(span),
        Err(error) => {
            diagnostics.push(mismatch(key, value, &error.to_string()));
            None
        }
    }
}

fn mismatch(key: &str, value: &str, message: &str) -> Diagnostic {
    Diagnostic::new(ErrorCode::OptionValueMismatch, message)
        .with_field(key)
        .with_value(value)
}

impl Display for Options {
    /// Canonical rendering: options sorted alphabetically by key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(from) = &self.from {
            parts.push(format!("from:{from}"));
        }
        if let Some(jitter) = &self.jitter {
            parts.push(format!("jitter:{jitter}"));
        }
        if let Some(max) = &self.max {
            parts.push(format!("max:{max}"));
        }
        if let Some(stagger) = &self.stagger {
            parts.push(format!("stagger:{stagger}"));
        }
        if let Some(tags) = &self.tags {
            parts.push(format!("tag:{}", tags.join("+")));
        }
        if let Some(until) = &self.until {
            parts.push(format!("until:{until}"));
        }
        if let Some(window) = &self.window {
            parts.push(format!("window:{window}"));
        }
        f.write_str(&parts.join(","))
    }
}
