use crate::error::{Diagnostic, ErrorCode};
use crate::field::FieldKind;
use crate::utils;
use std::fmt::{self, Display};

/// Date-aware day matcher for the `L`, `W` and `#` syntax.
///
/// Unlike a numeric [`CronField`](crate::field::CronField), these are
/// evaluated against a concrete calendar date because their meaning depends
/// on the month's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum SpecialDay {
    /// `L` — last day of the month.
    LastDay,
    /// `LW` — last weekday (Mon-Fri) of the month.
    LastWeekday,
    /// `L-N` — N days before the last day of the month.
    LastDayOffset(u8),
    /// `NW` — weekday nearest to day N, staying within the month.
    NearestWeekday(u8),
    /// `dowL` — last occurrence of the weekday in the month.
    LastDowOfMonth(u8),
    /// `dow#N` — N-th (1..=5) occurrence of the weekday in the month.
    NthDowOfMonth(u8, u8),
}

impl SpecialDay {
    /// Whether a day-of-month token uses special syntax and must bypass
    /// generic field parsing: starts with `L`, or is `NW` with a digit
    /// before the `W`.
    pub(crate) fn is_dom_token(token: &str) -> bool {
        token.starts_with('L')
            || (token.ends_with('W')
                && token.len() > 1
                && token[..token.len() - 1].bytes().all(|b| b.is_ascii_digit()))
    }

    /// Whether a day-of-week token uses special syntax: contains `#` or ends
    /// with `L`.
    pub(crate) fn is_dow_token(token: &str) -> bool {
        token.contains('#') || token.ends_with('L')
    }

    /// Parse a day-of-month token: `L`, `LW`, `L-N` or `NW`.
    pub(crate) fn parse_dom(token: &str) -> Result<Self, Diagnostic> {
        let bad = || {
            Diagnostic::new(ErrorCode::DayOfMonthOutOfRange, "malformed day-of-month special")
                .with_field(FieldKind::Dom.name())
                .with_value(token)
        };

        if token == "L" {
            return Ok(Self::LastDay);
        }
        if token == "LW" {
            return Ok(Self::LastWeekday);
        }
        if let Some(offset) = token.strip_prefix("L-") {
            let offset: u8 = offset.parse().map_err(|_| bad())?;
            if offset < 1 || offset > 30 {
                return Err(bad());
            }
            return Ok(Self::LastDayOffset(offset));
        }
        if let Some(day) = token.strip_suffix('W') {
            let day = FieldKind::Dom.parse_value(day)?;
            return Ok(Self::NearestWeekday(day));
        }
        Err(bad())
    }

    /// Parse a day-of-week token: `dow#N` or `dowL`.
    pub(crate) fn parse_dow(token: &str) -> Result<Self, Diagnostic> {
        if let Some((dow_str, nth_str)) = token.split_once('#') {
            let dow = FieldKind::Dow.parse_value(dow_str)?;
            let nth: u8 = nth_str.parse().map_err(|_| {
                Diagnostic::new(ErrorCode::DayOfWeekOutOfRange, "malformed nth-day-of-week")
                    .with_field(FieldKind::Dow.name())
                    .with_value(token)
            })?;
            if nth < 1 || nth > 5 {
                return Err(Diagnostic::new(
                    ErrorCode::DayOfWeekOutOfRange,
                    "nth occurrence must be 1..=5",
                )
                .with_field(FieldKind::Dow.name())
                .with_value(token));
            }
            return Ok(Self::NthDowOfMonth(dow, nth));
        }
        if let Some(dow_str) = token.strip_suffix('L') {
            let dow = FieldKind::Dow.parse_value(dow_str)?;
            return Ok(Self::LastDowOfMonth(dow));
        }
        Err(
            Diagnostic::new(ErrorCode::DayOfWeekOutOfRange, "malformed day-of-week special")
                .with_field(FieldKind::Dow.name())
                .with_value(token),
        )
    }

    /// Evaluate against a concrete date.
    pub(crate) fn matches(&self, year: i32, month: u32, day: u32) -> bool {
        let last = utils::days_in_month(year, month);
        match *self {
            Self::LastDay => day == last,
            Self::LastWeekday => day == utils::last_weekday(year, month),
            Self::LastDayOffset(offset) => {
                last > offset as u32 && day == last - offset as u32
            }
            Self::NearestWeekday(target) => {
                day == utils::nearest_weekday(year, month, target as u32)
            }
            Self::LastDowOfMonth(dow) => {
                utils::day_of_week(year, month, day) == dow as u32 && day + 7 > last
            }
            Self::NthDowOfMonth(dow, nth) => {
                utils::day_of_week(year, month, day) == dow as u32
                    && (day - 1) / 7 + 1 == nth as u32
            }
        }
    }
}

impl Display for SpecialDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastDay => f.write_str("L"),
            Self::LastWeekday => f.write_str("LW"),
            Self::LastDayOffset(offset) => write!(f, "L-{offset}"),
            Self::NearestWeekday(day) => write!(f, "{day}W"),
            Self::LastDowOfMonth(dow) => write!(f, "{dow}L"),
            Self::NthDowOfMonth(dow, nth) => write!(f, "{dow}#{nth}"),
        }
    }
}
