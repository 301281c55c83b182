use std::fmt::{self, Display};

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: u64 = 24 * MILLIS_PER_HOUR;

/// Why a duration string failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanParseError {
    /// Input is empty or whitespace.
    Empty,
    /// Digits with no trailing unit, or a unit with no digits.
    MissingUnit(String),
    /// Unit is not one of `ms`, `s`, `m`, `h`, `d`.
    UnknownUnit(String),
    /// The total exceeds what fits in 64-bit milliseconds.
    Overflow,
}

impl Display for SpanParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty duration"),
            Self::MissingUnit(part) => write!(f, "number without unit: {part:?}"),
            Self::UnknownUnit(unit) => write!(f, "unknown duration unit: {unit:?}"),
            Self::Overflow => f.write_str("duration overflows"),
        }
    }
}

impl std::error::Error for SpanParseError {}

/// Non-negative time span with millisecond resolution.
///
/// Parsed from compound strings such as `1h30m` or `500ms`; the canonical
/// rendering emits nonzero components largest-first, so
/// `Span::parse("90m")?.to_string()` is `"1h30m"` and zero renders `"0ms"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    millis: u64,
}

impl Span {
    /// The zero-length span.
    pub const ZERO: Self = Self { millis: 0 };

    /// Span from a raw millisecond count.
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Span from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * MILLIS_PER_SECOND,
        }
    }

    /// Total length in milliseconds.
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// `true` when the span is zero.
    pub const fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Parse a compound duration: one or more `<digits><unit>` groups with
    /// `unit ∈ {ms, s, m, h, d}`.
    ///
    /// `m` is disambiguated from `ms` by looking one character past the `m`.
    pub fn parse(input: &str) -> Result<Self, SpanParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SpanParseError::Empty);
        }

        let bytes = input.as_bytes();
        let mut pos = 0;
        let mut total: u64 = 0;

        while pos < bytes.len() {
            let digits_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if digits_start == pos {
                return Err(SpanParseError::UnknownUnit(input[pos..].to_string()));
            }
            let value: u64 = input[digits_start..pos]
                .parse()
                .map_err(|_| SpanParseError::Overflow)?;

            if pos == bytes.len() {
                return Err(SpanParseError::MissingUnit(
                    input[digits_start..].to_string(),
                ));
            }

            let multiplier = match bytes[pos] {
                b'm' if pos + 1 < bytes.len() && bytes[pos + 1] == b's' => {
                    pos += 2;
                    1
                }
                b'm' => {
                    pos += 1;
                    MILLIS_PER_MINUTE
                }
                b's' => {
                    pos += 1;
                    MILLIS_PER_SECOND
                }
                b'h' => {
                    pos += 1;
                    MILLIS_PER_HOUR
                }
                b'd' => {
                    pos += 1;
                    MILLIS_PER_DAY
                }
                _ => {
                    let unit_end = input[pos..]
                        .find(|c: char| c.is_ascii_digit())
                        .map(|i| pos + i)
                        .unwrap_or(input.len());
                    return Err(SpanParseError::UnknownUnit(input[pos..unit_end].to_string()));
                }
            };

            let component = value
                .checked_mul(multiplier)
                .ok_or(SpanParseError::Overflow)?;
            total = total.checked_add(component).ok_or(SpanParseError::Overflow)?;
        }

        Ok(Self { millis: total })
    }

    /// Conversion to a `chrono` duration.
    pub fn to_chrono(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::milliseconds(self.millis as i64)
    }

    /// Conversion to a standard-library duration.
    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.millis)
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis == 0 {
            return f.write_str("0ms");
        }

        let mut rest = self.millis;
        for (per, unit) in [
            (MILLIS_PER_DAY, "d"),
            (MILLIS_PER_HOUR, "h"),
            (MILLIS_PER_MINUTE, "m"),
            (MILLIS_PER_SECOND, "s"),
            (1, "ms"),
        ] {
            let count = rest / per;
            if count > 0 {
                write!(f, "{count}{unit}")?;
                rest -= count * per;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rstest_reuse::{apply, template};

    #[rstest]
    #[case("500ms", 500)]
    #[case("1s", 1_000)]
    #[case("90s", 90_000)]
    #[case("1m", 60_000)]
    #[case("1h30m", 5_400_000)]
    #[case("1h30m15s", 5_415_000)]
    #[case("2d", 172_800_000)]
    #[case("1d1h1m1s1ms", 90_061_001)]
    #[case("0ms", 0)]
    #[case("1m500ms", 60_500)]
    #[case("  10s ", 10_000)]
    fn parse_valid(#[case] input: &str, #[case] expected_millis: u64) {
        assert_eq!(
            Span::parse(input).unwrap().as_millis(),
            expected_millis,
            "input = {input}"
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("10")]
    #[case("1h30")]
    #[case("h")]
    #[case("10x")]
    #[case("10sec")]
    #[case("-5s")]
    #[case("1.5h")]
    fn parse_invalid(#[case] input: &str) {
        assert!(Span::parse(input).is_err(), "input = {input}");
    }

    #[test]
    fn parse_overflow() {
        assert_eq!(
            Span::parse("99999999999999999999d"),
            Err(SpanParseError::Overflow)
        );
        assert_eq!(
            Span::parse("18446744073709551615d"),
            Err(SpanParseError::Overflow)
        );
    }

    #[rstest]
    #[case(0, "0ms")]
    #[case(500, "500ms")]
    #[case(1_000, "1s")]
    #[case(5_400_000, "1h30m")]
    #[case(90_061_001, "1d1h1m1s1ms")]
    #[case(60_500, "1m500ms")]
    #[case(172_800_000, "2d")]
    fn display_canonical(#[case] millis: u64, #[case] expected: &str) {
        assert_eq!(Span::from_millis(millis).to_string(), expected);
    }

    #[template]
    #[rstest]
    #[case("90m")]
    #[case("3600s")]
    #[case("1h30m")]
    #[case("36h")]
    #[case("0ms")]
    #[case("1h30m15s250ms")]
    #[case("500ms")]
    fn spans_to_round_trip(#[case] input: &str) {}

    #[apply(spans_to_round_trip)]
    fn canonical_is_idempotent(#[case] input: &str) {
        let first = Span::parse(input).unwrap().to_string();
        let second = Span::parse(&first).unwrap().to_string();
        assert_eq!(first, second, "input = {input}");
    }

    #[apply(spans_to_round_trip)]
    fn canonical_round_trip_is_identity(#[case] input: &str) {
        let span = Span::parse(input).unwrap();
        assert_eq!(Span::parse(&span.to_string()).unwrap(), span, "input = {input}");
    }

    #[test]
    fn conversions() {
        let span = Span::from_secs(90);
        assert_eq!(span.to_std(), std::time::Duration::from_secs(90));
        assert_eq!(span.to_chrono(), chrono::TimeDelta::seconds(90));
        assert!(!span.is_zero());
        assert!(Span::ZERO.is_zero());
    }
}
