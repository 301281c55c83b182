/// Common calendar helpers shared by field matching and DST resolution.
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Offset, TimeDelta, TimeZone};
use chrono_tz::Tz;

/// Returns `true` if the provided year is leap.
#[inline]
pub(crate) fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Number of days in the specified month (1-12).
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        _ => 28,
    }
}

/// Day of week for the date, 0 = Sunday .. 6 = Saturday.
pub(crate) fn day_of_week(year: i32, month: u32, day: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| date.weekday().num_days_from_sunday())
        .unwrap_or(0)
}

/// Day in the month of the last occurrence of `dow` (0 = Sunday).
pub(crate) fn last_dow(year: i32, month: u32, dow: u32) -> u32 {
    let mut day = days_in_month(year, month);
    while day_of_week(year, month, day) != dow {
        day -= 1;
    }
    day
}

/// Day in the month of the n-th (1..=5) occurrence of `dow`, if it exists.
pub(crate) fn nth_dow(year: i32, month: u32, dow: u32, nth: u32) -> Option<u32> {
    let first = day_of_week(year, month, 1);
    let offset = (dow + 7 - first) % 7;
    let day = 1 + offset + (nth - 1) * 7;
    (day <= days_in_month(year, month)).then_some(day)
}

/// The weekday (Mon-Fri) nearest to `day`, staying within the month.
///
/// `day` is clamped to the month length first; a Saturday resolves to the
/// preceding Friday unless that leaves the month, a Sunday to the following
/// Monday unless that leaves the month.
pub(crate) fn nearest_weekday(year: i32, month: u32, day: u32) -> u32 {
    let last = days_in_month(year, month);
    let day = day.min(last);

    match day_of_week(year, month, day) {
        0 => {
            if day + 1 <= last {
                day + 1
            } else {
                day - 2
            }
        }
        6 => {
            if day > 1 {
                day - 1
            } else {
                day + 2
            }
        }
        _ => day,
    }
}

/// The last weekday (Mon-Fri) of the month.
pub(crate) fn last_weekday(year: i32, month: u32) -> u32 {
    let last = days_in_month(year, month);
    match day_of_week(year, month, last) {
        6 => last - 1,
        0 => last - 2,
        _ => last,
    }
}

/// Attach a naive local time to its zone, resolving DST transitions.
///
/// Ambiguous local times (fall-back overlap) resolve to the earlier,
/// pre-transition instant. Invalid local times (spring-forward gap) borrow
/// the UTC offset in effect two hours earlier and convert through UTC, which
/// lands the result immediately after the gap.
pub(crate) fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(instant) => instant,
        chrono::LocalResult::Ambiguous(earlier, _later) => earlier,
        chrono::LocalResult::None => {
            let before = naive - TimeDelta::hours(2);
            let offset = match tz.from_local_datetime(&before) {
                chrono::LocalResult::Single(instant) => instant.offset().fix(),
                chrono::LocalResult::Ambiguous(earlier, _) => earlier.offset().fix(),
                chrono::LocalResult::None => tz.from_utc_datetime(&before).offset().fix(),
            };
            let as_utc = naive - TimeDelta::seconds(offset.local_minus_utc() as i64);
            tz.from_utc_datetime(&as_utc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case(2024, true)]
    #[case(2000, true)]
    #[case(2023, false)]
    #[case(1900, false)]
    #[case(2100, false)]
    fn leap_years(#[case] year: i32, #[case] expected: bool) {
        assert_eq!(is_leap_year(year), expected, "year = {year}");
    }

    #[rstest]
    #[case(2026, 1, 31)]
    #[case(2026, 2, 28)]
    #[case(2024, 2, 29)]
    #[case(2026, 4, 30)]
    #[case(2026, 12, 31)]
    #[case(1900, 2, 28)]
    fn month_lengths(#[case] year: i32, #[case] month: u32, #[case] expected: u32) {
        assert_eq!(days_in_month(year, month), expected);
    }

    #[rstest]
    #[case(2026, 1, 1, 4)] // Thursday
    #[case(2026, 1, 2, 5)] // Friday
    #[case(2026, 3, 1, 0)] // Sunday
    #[case(2024, 2, 29, 4)] // Thursday
    #[case(2000, 1, 1, 6)] // Saturday
    fn weekday_of_date(#[case] y: i32, #[case] m: u32, #[case] d: u32, #[case] expected: u32) {
        assert_eq!(day_of_week(y, m, d), expected, "{y}-{m:02}-{d:02}");
    }

    #[rstest]
    #[case(2023, 12, 0, 31)] // last Sunday of December 2023
    #[case(2024, 2, 0, 25)] // last Sunday of February 2024
    #[case(2023, 12, 5, 29)] // last Friday of December 2023
    fn last_dow_of_month(#[case] y: i32, #[case] m: u32, #[case] dow: u32, #[case] expected: u32) {
        assert_eq!(last_dow(y, m, dow), expected);
    }

    #[rstest]
    #[case(2026, 3, 1, 1, Some(2))] // first Monday of March 2026
    #[case(2026, 3, 1, 2, Some(9))] // second Monday of March 2026
    #[case(2026, 3, 1, 5, Some(30))] // fifth Monday of March 2026
    #[case(2026, 1, 1, 5, None)] // January 2026 has four Mondays
    #[case(2026, 2, 0, 5, None)] // February 2026 has four Sundays
    #[case(2026, 2, 0, 4, Some(22))]
    fn nth_dow_of_month(
        #[case] y: i32,
        #[case] m: u32,
        #[case] dow: u32,
        #[case] nth: u32,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(nth_dow(y, m, dow, nth), expected);
    }

    #[rstest]
    #[case(2024, 1, 1, 1)] // Monday stays
    #[case(2024, 1, 6, 5)] // Saturday -> Friday
    #[case(2024, 1, 7, 8)] // Sunday -> Monday
    #[case(2024, 6, 1, 3)] // first day Saturday -> Monday the 3rd
    #[case(2024, 3, 31, 29)] // last day Sunday -> Friday the 29th
    #[case(2024, 6, 31, 28)] // clamped to June 30 (Sunday) -> would leave month -> Friday 28
    fn nearest_weekday_resolution(
        #[case] y: i32,
        #[case] m: u32,
        #[case] d: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(nearest_weekday(y, m, d), expected, "{y}-{m:02}-{d:02}");
    }

    #[rstest]
    #[case(2024, 3, 29)] // March 2024 ends on Sunday the 31st
    #[case(2024, 8, 30)] // August 2024 ends on Saturday the 31st
    #[case(2024, 1, 31)] // January 2024 ends on Wednesday
    fn last_weekday_of_month(#[case] y: i32, #[case] m: u32, #[case] expected: u32) {
        assert_eq!(last_weekday(y, m), expected);
    }

    #[test]
    fn resolve_normal_local_time() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2026, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let resolved = resolve_local(tz, naive);
        assert_eq!(resolved.naive_local(), naive);
    }

    #[test]
    fn resolve_gap_lands_after_transition() {
        // 2026-03-08 02:30 does not exist in New York; expect 03:30 EDT.
        let tz: Tz = "America/New_York".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2026, 3, 8)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolve_local(tz, naive);
        assert_eq!(
            resolved.with_timezone(&Utc).to_rfc3339(),
            "2026-03-08T07:30:00+00:00"
        );
        assert_eq!(resolved.naive_local().format("%H:%M").to_string(), "03:30");
    }

    #[test]
    fn resolve_overlap_prefers_earlier() {
        // 2026-11-01 01:30 happens twice in New York; expect the EDT pass.
        let tz: Tz = "America/New_York".parse().unwrap();
        let naive = NaiveDate::from_ymd_opt(2026, 11, 1)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        let resolved = resolve_local(tz, naive);
        assert_eq!(
            resolved.with_timezone(&Utc).to_rfc3339(),
            "2026-11-01T05:30:00+00:00"
        );
    }
}
