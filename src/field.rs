use crate::error::{Diagnostic, ErrorCode};
use std::fmt::{self, Display};

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAYS_OF_WEEK: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Which of the six cron positions a field occupies; fixes the value domain
/// and the diagnostic code for out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum FieldKind {
    Second,
    Minute,
    Hour,
    Dom,
    Month,
    Dow,
}

impl FieldKind {
    pub(crate) fn min(&self) -> u8 {
        match self {
            Self::Dom | Self::Month => 1,
            _ => 0,
        }
    }

    pub(crate) fn max(&self) -> u8 {
        match self {
            Self::Second | Self::Minute => 59,
            Self::Hour => 23,
            Self::Dom => 31,
            Self::Month => 12,
            Self::Dow => 6,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Dom => "day-of-month",
            Self::Month => "month",
            Self::Dow => "day-of-week",
        }
    }

    pub(crate) fn range_code(&self) -> ErrorCode {
        match self {
            Self::Second => ErrorCode::SecondOutOfRange,
            Self::Minute => ErrorCode::MinuteOutOfRange,
            Self::Hour => ErrorCode::HourOutOfRange,
            Self::Dom => ErrorCode::DayOfMonthOutOfRange,
            Self::Month => ErrorCode::MonthOutOfRange,
            Self::Dow => ErrorCode::DayOfWeekOutOfRange,
        }
    }

    fn out_of_range(&self, value: &str) -> Diagnostic {
        Diagnostic::new(self.range_code(), "value out of range")
            .with_field(self.name())
            .with_value(value)
    }

    /// Parse a single value: an integer within the domain, or a three-letter
    /// name for months and weekdays. Day-of-week `7` normalizes to `0`.
    pub(crate) fn parse_value(&self, input: &str) -> Result<u8, Diagnostic> {
        if let Ok(number) = input.parse::<u16>() {
            if *self == Self::Dow && number == 7 {
                return Ok(0);
            }
            if number < self.min() as u16 || number > self.max() as u16 {
                return Err(self.out_of_range(input));
            }
            return Ok(number as u8);
        }

        let names: &[&str] = match self {
            Self::Month => &MONTHS,
            Self::Dow => &DAYS_OF_WEEK,
            _ => return Err(self.out_of_range(input)),
        };
        names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(input))
            .map(|index| match self {
                Self::Month => (index + 1) as u8,
                _ => index as u8,
            })
            .ok_or_else(|| self.out_of_range(input))
    }
}

/// One comma-separated entry of a cron field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum FieldEntry {
    /// `*`
    Wildcard,
    /// `*/N`
    WildcardStep(u8),
    /// `v`
    Value(u8),
    /// `lo-hi`; reversed bounds wrap through the domain edges.
    Range(u8, u8),
    /// `lo-hi/N`; a bare `v/N` parses as `v-max/N`.
    RangeStep(u8, u8, u8),
}

impl FieldEntry {
    fn matches(&self, value: u8, min: u8, max: u8) -> bool {
        match *self {
            Self::Wildcard => true,
            Self::WildcardStep(step) => (value - min) % step == 0,
            Self::Value(v) => value == v,
            Self::Range(lo, hi) => {
                if lo <= hi {
                    value >= lo && value <= hi
                } else {
                    value >= lo || value <= hi
                }
            }
            Self::RangeStep(lo, hi, step) => {
                if lo <= hi {
                    value >= lo && value <= hi && (value - lo) % step == 0
                } else if value >= lo {
                    (value - lo) % step == 0
                } else if value <= hi {
                    // Linearize the wrapped tail: positions continue past max.
                    ((max - lo + 1) + (value - min)) % step == 0
                } else {
                    false
                }
            }
        }
    }
}

impl Display for FieldEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::WildcardStep(step) => write!(f, "*/{step}"),
            Self::Value(v) => write!(f, "{v}"),
            Self::Range(lo, hi) => write!(f, "{lo}-{hi}"),
            Self::RangeStep(lo, hi, step) => write!(f, "{lo}-{hi}/{step}"),
        }
    }
}

/// One parsed cron field: an ordered list of entries over the field's domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct CronField {
    kind: FieldKind,
    entries: Vec<FieldEntry>,
}

impl CronField {
    /// The implicit field used where the grammar supplies no token — a bare
    /// wildcard (specials route around the generic field entirely).
    pub(crate) fn wildcard(kind: FieldKind) -> Self {
        Self {
            kind,
            entries: vec![FieldEntry::Wildcard],
        }
    }

    /// The implicit seconds field of a five-token expression: `{0}`.
    pub(crate) fn zero(kind: FieldKind) -> Self {
        Self {
            kind,
            entries: vec![FieldEntry::Value(0)],
        }
    }

    /// Strict parse: first violation fails.
    #[cfg(test)]
    pub(crate) fn parse(kind: FieldKind, input: &str) -> Result<Self, Diagnostic> {
        let mut diagnostics = Vec::new();
        match Self::parse_collect(kind, input, &mut diagnostics) {
            Some(field) if diagnostics.is_empty() => Ok(field),
            _ => Err(diagnostics.remove(0)),
        }
    }

    /// Collecting parse: every violation is pushed to `diagnostics` and the
    /// remaining entries are still examined. Returns `None` when any entry
    /// failed.
    pub(crate) fn parse_collect(
        kind: FieldKind,
        input: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Self> {
        if input.is_empty() {
            diagnostics.push(
                Diagnostic::new(ErrorCode::Structure, "empty field").with_field(kind.name()),
            );
            return None;
        }

        let before = diagnostics.len();
        let entries = input
            .split(',')
            .filter_map(|part| match Self::parse_entry(kind, part) {
                Ok(entry) => Some(entry),
                Err(diagnostic) => {
                    diagnostics.push(diagnostic);
                    None
                }
            })
            .collect::<Vec<_>>();

        if diagnostics.len() > before {
            return None;
        }
        Some(Self { kind, entries })
    }

    fn parse_entry(kind: FieldKind, part: &str) -> Result<FieldEntry, Diagnostic> {
        let (base, step) = match part.split_once('/') {
            Some((base, step_str)) => {
                let step = step_str.parse::<i64>().map_err(|_| {
                    Diagnostic::new(ErrorCode::StepNotPositive, "malformed step")
                        .with_field(kind.name())
                        .with_value(part)
                })?;
                if step < 1 {
                    return Err(Diagnostic::new(
                        ErrorCode::StepNotPositive,
                        "step must be positive",
                    )
                    .with_field(kind.name())
                    .with_value(part));
                }
                // Any step wider than the domain only ever selects the low
                // bound, so clamping keeps the arithmetic in u8 losslessly.
                (base, Some(step.min(u8::MAX as i64) as u8))
            }
            None => (part, None),
        };

        match (base, step) {
            ("*", None) => Ok(FieldEntry::Wildcard),
            ("*", Some(step)) => Ok(FieldEntry::WildcardStep(step)),
            (base, step) => {
                if let Some((lo_str, hi_str)) = base.split_once('-') {
                    let lo = kind.parse_value(lo_str)?;
                    let hi = kind.parse_value(hi_str)?;
                    Ok(match step {
                        Some(step) => FieldEntry::RangeStep(lo, hi, step),
                        None => FieldEntry::Range(lo, hi),
                    })
                } else {
                    let value = kind.parse_value(base)?;
                    Ok(match step {
                        // A bare `v/N` runs to the end of the domain.
                        Some(step) => FieldEntry::RangeStep(value, FieldKind::max(&kind), step),
                        None => FieldEntry::Value(value),
                    })
                }
            }
        }
    }

    /// Membership test for a concrete value.
    pub(crate) fn matches(&self, value: u8) -> bool {
        let (min, max) = (FieldKind::min(&self.kind), FieldKind::max(&self.kind));
        self.entries
            .iter()
            .any(|entry| entry.matches(value, min, max))
    }

    /// `true` when the field is the single unrestricted `*`.
    pub(crate) fn is_wildcard(&self) -> bool {
        self.entries == [FieldEntry::Wildcard]
    }
}

impl Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&rendered)
    }
}
