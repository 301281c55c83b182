use crate::error::{Diagnostic, ErrorCode};
use crate::field::{CronField, FieldKind};
use crate::specials::SpecialDay;
use std::fmt::{self, Display};

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

/// How many years past the start the occurrence search may roam before
/// giving up; enough to cross any leap-year gap (e.g. `0 0 29 2 *`).
const SEARCH_YEARS: i32 = 4;

/// A parsed cron schedule: six value fields plus optional date-aware
/// specials on the day positions, evaluated in naive local time.
///
/// | Field        | Allowed values  | Special characters |
/// | ------------ | --------------- | ------------------ |
/// | Second       | 0-59            | * , - /            |
/// | Minute       | 0-59            | * , - /            |
/// | Hour         | 0-23            | * , - /            |
/// | Day of Month | 1-31            | * , - / L W        |
/// | Month        | 1-12 or JAN-DEC | * , - /            |
/// | Day of Week  | 0-7 or SUN-SAT  | * , - / L #        |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CronSchedule {
    second: CronField,
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
    has_seconds: bool,
    dom_special: Option<SpecialDay>,
    dow_special: Option<SpecialDay>,
}

impl CronSchedule {
    /// Collecting parse over 5 or 6 whitespace-split tokens (the tokenizer
    /// enforces the count). Every field violation lands in `diagnostics`,
    /// tagged with its 0-based token position.
    pub(crate) fn parse_collect(
        tokens: &[&str],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Self> {
        let has_seconds = tokens.len() == 6;
        let offset = usize::from(has_seconds);
        let before = diagnostics.len();

        let mut field_at = |kind: FieldKind, index: usize, sink: &mut Vec<Diagnostic>| {
            let mut local = Vec::new();
            let parsed = CronField::parse_collect(kind, tokens[index], &mut local);
            sink.extend(local.into_iter().map(|d| d.at(index)));
            parsed
        };

        let second = if has_seconds {
            field_at(FieldKind::Second, 0, diagnostics)
        } else {
            Some(CronField::zero(FieldKind::Second))
        };
        let minute = field_at(FieldKind::Minute, offset, diagnostics);
        let hour = field_at(FieldKind::Hour, offset + 1, diagnostics);

        let dom_token = tokens[offset + 2];
        let (dom, dom_special) = if SpecialDay::is_dom_token(dom_token) {
            match SpecialDay::parse_dom(dom_token) {
                Ok(special) => (Some(CronField::wildcard(FieldKind::Dom)), Some(special)),
                Err(diagnostic) => {
                    diagnostics.push(diagnostic.at(offset + 2));
                    (None, None)
                }
            }
        } else {
            (field_at(FieldKind::Dom, offset + 2, diagnostics), None)
        };

        let month = field_at(FieldKind::Month, offset + 3, diagnostics);

        let dow_token = tokens[offset + 4];
        let (dow, dow_special) = if SpecialDay::is_dow_token(dow_token) {
            match SpecialDay::parse_dow(dow_token) {
                Ok(special) => (Some(CronField::wildcard(FieldKind::Dow)), Some(special)),
                Err(diagnostic) => {
                    diagnostics.push(diagnostic.at(offset + 4));
                    (None, None)
                }
            }
        } else {
            (field_at(FieldKind::Dow, offset + 4, diagnostics), None)
        };

        if diagnostics.len() > before {
            return None;
        }
        Some(Self {
            second: second?,
            minute: minute?,
            hour: hour?,
            dom: dom?,
            month: month?,
            dow: dow?,
            has_seconds,
            dom_special,
            dow_special,
        })
    }

    /// Strict parse of a bare cron body (mainly for tests and benches).
    pub fn parse(body: &str) -> Result<Self, Diagnostic> {
        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() != 5 && tokens.len() != 6 {
            return Err(Diagnostic::new(
                ErrorCode::Structure,
                format!("expected 5 or 6 fields, got {}", tokens.len()),
            )
            .with_value(body));
        }
        let mut diagnostics = Vec::new();
        match Self::parse_collect(&tokens, &mut diagnostics) {
            Some(schedule) if diagnostics.is_empty() => Ok(schedule),
            _ => Err(diagnostics.remove(0)),
        }
    }

    /// Whether the expression carried an explicit seconds field.
    pub fn has_seconds(&self) -> bool {
        self.has_seconds
    }

    /// Joint DOM/DOW predicate with Vixie-cron OR semantics: when both day
    /// positions are restricted, matching either one is enough. A special
    /// counts as a restriction.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let (year, month, day) = (date.year(), date.month(), date.day());

        let dom_wild = self.dom_special.is_none() && self.dom.is_wildcard();
        let dow_wild = self.dow_special.is_none() && self.dow.is_wildcard();

        let dom_hit = || match &self.dom_special {
            Some(special) => special.matches(year, month, day),
            None => self.dom.matches(day as u8),
        };
        let dow_hit = || match &self.dow_special {
            Some(special) => special.matches(year, month, day),
            None => self
                .dow
                .matches(date.weekday().num_days_from_sunday() as u8),
        };

        match (dom_wild, dow_wild) {
            (true, true) => true,
            (true, false) => dow_hit(),
            (false, true) => dom_hit(),
            (false, false) => dom_hit() || dow_hit(),
        }
    }

    /// Whether the schedule fires at the given naive local instant.
    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        self.second.matches(at.second() as u8)
            && self.minute.matches(at.minute() as u8)
            && self.hour.matches(at.hour() as u8)
            && self.month.matches(at.month() as u8)
            && self.day_matches(at.date())
    }

    /// Earliest instant strictly after `from` that matches, searching up to
    /// four years ahead; `None` when the schedule never fires in that span.
    ///
    /// The search walks fields most-significant first, resetting every less
    /// significant component each time one advances, so each loop iteration
    /// lands on the earliest candidate not yet ruled out.
    pub fn next_after(&self, from: &NaiveDateTime) -> Option<NaiveDateTime> {
        let mut at = from
            .with_nanosecond(0)
            .unwrap_or(*from)
            .checked_add_signed(TimeDelta::seconds(1))?;
        let bound_year = from.year() + SEARCH_YEARS;

        loop {
            if at.year() > bound_year {
                return None;
            }

            if !self.month.matches(at.month() as u8) {
                let (year, month) = if at.month() == 12 {
                    (at.year() + 1, 1)
                } else {
                    (at.year(), at.month() + 1)
                };
                at = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.day_matches(at.date()) {
                at = at
                    .date()
                    .checked_add_days(Days::new(1))?
                    .and_hms_opt(0, 0, 0)?;
                continue;
            }

            if !self.hour.matches(at.hour() as u8) {
                at = at.date().and_hms_opt(at.hour(), 0, 0)? + TimeDelta::hours(1);
                continue;
            }

            if !self.minute.matches(at.minute() as u8) {
                at = at.date().and_hms_opt(at.hour(), at.minute(), 0)? + TimeDelta::minutes(1);
                continue;
            }

            if !self.second.matches(at.second() as u8) {
                at += TimeDelta::seconds(1);
                continue;
            }

            return Some(at);
        }
    }
}

impl Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_seconds {
            write!(f, "{} ", self.second)?;
        }
        write!(f, "{} {} ", self.minute, self.hour)?;
        match &self.dom_special {
            Some(special) => write!(f, "{special} ")?,
            None => write!(f, "{} ", self.dom)?,
        }
        write!(f, "{} ", self.month)?;
        match &self.dow_special {
            Some(special) => write!(f, "{special}"),
            None => write!(f, "{}", self.dow),
        }
    }
}
